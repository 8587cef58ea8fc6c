//! Persistence seam for rooms, devices, sensors and measurements.
//!
//! Services only talk to [`TelemetryStore`]; production wires in [`pg::PgStore`]
//! (a pooled PostgreSQL connection manager), tests use `memory::MemoryStore`.
//! Calls are blocking and must be run off the async reactor.

use chrono::{DateTime, Utc};

use crate::config::ChartSettings;
use crate::db::models::{
    ChartPoint, Device, DeviceSummary, LatestReading, NewDevice, NewMeasurement, NewSensor, Reading, ReadingFilter,
    Room, Sensor, SensorKind,
};

#[cfg(test)]
pub mod memory;
pub mod pg;

#[derive(Debug)]
pub enum StoreError {
    /// No connection could be checked out of the pool.
    Pool(String),
    /// A unique constraint rejected the write.
    UniqueViolation(String),
    Query(String),
}

impl core::fmt::Display for StoreError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            StoreError::Pool(e) => write!(f, "connection pool error: {}", e),
            StoreError::UniqueViolation(e) => write!(f, "unique violation: {}", e),
            StoreError::Query(e) => write!(f, "query error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<diesel::result::Error> for StoreError {
    fn from(value: diesel::result::Error) -> Self {
        use diesel::result::{DatabaseErrorKind, Error};
        match value {
            Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                StoreError::UniqueViolation(info.message().to_string())
            }
            other => StoreError::Query(other.to_string()),
        }
    }
}

impl From<diesel::r2d2::PoolError> for StoreError {
    fn from(value: diesel::r2d2::PoolError) -> Self {
        StoreError::Pool(value.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

pub trait TelemetryStore: Send + Sync {
    // rooms
    /// All rooms ordered by name.
    fn list_rooms(&self) -> StoreResult<Vec<Room>>;
    fn find_room(&self, room_id: i32) -> StoreResult<Option<Room>>;
    fn insert_room(&self, name: &str) -> StoreResult<Room>;
    /// Returns `false` when no room has that id.
    fn rename_room(&self, room_id: i32, name: &str) -> StoreResult<bool>;
    /// Detaches the room's devices, then deletes it. Returns `false` when no
    /// room has that id.
    fn delete_room(&self, room_id: i32) -> StoreResult<bool>;

    // devices
    fn find_device(&self, dev_eui: &str) -> StoreResult<Option<Device>>;
    /// Inserts the device unless the dev_eui already exists. Returns whether a
    /// row was created.
    fn create_device_if_absent(&self, device: &NewDevice) -> StoreResult<bool>;
    fn touch_device(&self, dev_eui: &str, seen_at: DateTime<Utc>) -> StoreResult<()>;
    /// Returns `false` when the device does not exist.
    fn set_device_room(&self, dev_eui: &str, room_id: Option<i32>) -> StoreResult<bool>;
    /// Devices of one room ordered by name.
    fn devices_in_room(&self, room_id: i32) -> StoreResult<Vec<Device>>;
    /// All devices (or only those without a room) ordered by name.
    fn list_devices(&self, unassigned_only: bool) -> StoreResult<Vec<DeviceSummary>>;

    // sensors
    /// Inserts the sensor or overwrites type/unit of an existing (dev_eui, channel).
    fn upsert_sensor(&self, sensor: &NewSensor) -> StoreResult<()>;
    /// Sensors of one device ordered by channel.
    fn sensors_for_device(&self, dev_eui: &str) -> StoreResult<Vec<Sensor>>;
    /// Distinct known (type, unit) pairs ordered by type; `unknown` excluded.
    fn sensor_kinds(&self) -> StoreResult<Vec<SensorKind>>;

    // measurements
    fn insert_measurement(&self, measurement: &NewMeasurement) -> StoreResult<()>;
    /// Deletes measurements strictly older than `cutoff`.
    fn delete_measurements_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize>;
    /// Joined readings matching the filter, newest first.
    fn readings(&self, filter: &ReadingFilter) -> StoreResult<Vec<Reading>>;
    /// Bucketed avg/min/max/count per (bucket, device, sensor), implausible
    /// values dropped first. Ordered by bucket, device name, dev_eui, type, unit.
    /// `filter.limit` does not apply.
    fn chart_points(&self, filter: &ReadingFilter, settings: &ChartSettings) -> StoreResult<Vec<ChartPoint>>;
    /// Latest value per (dev_eui, channel) for the given devices.
    fn latest_readings(&self, dev_euis: &[String]) -> StoreResult<Vec<LatestReading>>;
}

//! In-memory store used by unit and router tests.
//!
//! Mirrors the PostgreSQL semantics the services depend on: unique room names,
//! room deletion detaching devices, sensor upsert, newest-first readings.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{StoreError, StoreResult, TelemetryStore};
use crate::config::ChartSettings;
use crate::db::models::{
    ChartPoint, Device, DeviceSummary, LatestReading, Measurement, NewDevice, NewMeasurement, NewSensor, Reading,
    ReadingFilter, Room, Sensor, SensorKind,
};
use crate::models::sensor::SensorType;
use crate::services::measurements;

#[derive(Default)]
struct Tables {
    next_room_id: i32,
    next_measurement_id: i64,
    rooms: BTreeMap<i32, Room>,
    devices: BTreeMap<String, Device>,
    sensors: BTreeMap<(String, i32), Sensor>,
    measurements: Vec<Measurement>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    /// When set every call fails with a query error.
    failing: Mutex<bool>,
    /// Deletes wait on this lock, so a test can keep one in flight.
    delete_hold: Mutex<()>,
    delete_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    /// Inserts a device with an explicit `last_seen_at` and room.
    pub fn seed_device(&self, dev_eui: &str, name: &str, room_id: Option<i32>, last_seen_at: Option<DateTime<Utc>>) {
        self.tables.lock().unwrap().devices.insert(
            dev_eui.to_string(),
            Device {
                dev_eui: dev_eui.to_string(),
                name: name.to_string(),
                room_id,
                last_seen_at,
            },
        );
    }

    /// Blocks `delete_measurements_before` until the guard is dropped.
    pub fn hold_deletes(&self) -> MutexGuard<'_, ()> {
        self.delete_hold.lock().unwrap()
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn all_devices(&self) -> Vec<Device> {
        self.tables.lock().unwrap().devices.values().cloned().collect()
    }

    pub fn all_measurements(&self) -> Vec<Measurement> {
        self.tables.lock().unwrap().measurements.clone()
    }

    fn tables(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        if *self.failing.lock().unwrap() {
            return Err(StoreError::Query("connection refused".to_string()));
        }
        Ok(self.tables.lock().unwrap())
    }
}

impl TelemetryStore for MemoryStore {
    fn list_rooms(&self) -> StoreResult<Vec<Room>> {
        let t = self.tables()?;
        let mut rooms: Vec<Room> = t.rooms.values().cloned().collect();
        rooms.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rooms)
    }

    fn find_room(&self, room_id: i32) -> StoreResult<Option<Room>> {
        Ok(self.tables()?.rooms.get(&room_id).cloned())
    }

    fn insert_room(&self, name: &str) -> StoreResult<Room> {
        let mut t = self.tables()?;
        if t.rooms.values().any(|r| r.name == name) {
            return Err(StoreError::UniqueViolation(format!("room {name} exists")));
        }
        t.next_room_id += 1;
        let room = Room {
            room_id: t.next_room_id,
            name: name.to_string(),
            created_at: Utc::now(),
        };
        t.rooms.insert(room.room_id, room.clone());
        Ok(room)
    }

    fn rename_room(&self, room_id: i32, name: &str) -> StoreResult<bool> {
        let mut t = self.tables()?;
        if t.rooms.values().any(|r| r.name == name && r.room_id != room_id) {
            return Err(StoreError::UniqueViolation(format!("room {name} exists")));
        }
        match t.rooms.get_mut(&room_id) {
            Some(room) => {
                room.name = name.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete_room(&self, room_id: i32) -> StoreResult<bool> {
        let mut t = self.tables()?;
        if t.rooms.remove(&room_id).is_none() {
            return Ok(false);
        }
        for device in t.devices.values_mut() {
            if device.room_id == Some(room_id) {
                device.room_id = None;
            }
        }
        Ok(true)
    }

    fn find_device(&self, dev_eui: &str) -> StoreResult<Option<Device>> {
        Ok(self.tables()?.devices.get(dev_eui).cloned())
    }

    fn create_device_if_absent(&self, device: &NewDevice) -> StoreResult<bool> {
        let mut t = self.tables()?;
        if t.devices.contains_key(&device.dev_eui) {
            return Ok(false);
        }
        t.devices.insert(
            device.dev_eui.clone(),
            Device {
                dev_eui: device.dev_eui.clone(),
                name: device.name.clone(),
                room_id: None,
                last_seen_at: None,
            },
        );
        Ok(true)
    }

    fn touch_device(&self, dev_eui: &str, seen_at: DateTime<Utc>) -> StoreResult<()> {
        if let Some(device) = self.tables()?.devices.get_mut(dev_eui) {
            device.last_seen_at = Some(seen_at);
        }
        Ok(())
    }

    fn set_device_room(&self, dev_eui: &str, room_id: Option<i32>) -> StoreResult<bool> {
        let mut t = self.tables()?;
        match t.devices.get_mut(dev_eui) {
            Some(device) => {
                device.room_id = room_id;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn devices_in_room(&self, room_id: i32) -> StoreResult<Vec<Device>> {
        let t = self.tables()?;
        let mut devices: Vec<Device> = t
            .devices
            .values()
            .filter(|d| d.room_id == Some(room_id))
            .cloned()
            .collect();
        devices.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.dev_eui.cmp(&b.dev_eui)));
        Ok(devices)
    }

    fn list_devices(&self, unassigned_only: bool) -> StoreResult<Vec<DeviceSummary>> {
        let t = self.tables()?;
        let mut devices: Vec<DeviceSummary> = t
            .devices
            .values()
            .filter(|d| !unassigned_only || d.room_id.is_none())
            .map(|d| DeviceSummary {
                dev_eui: d.dev_eui.clone(),
                name: d.name.clone(),
                room_id: d.room_id,
                last_seen_at: d.last_seen_at,
                room_name: d.room_id.and_then(|id| t.rooms.get(&id)).map(|r| r.name.clone()),
            })
            .collect();
        devices.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.dev_eui.cmp(&b.dev_eui)));
        Ok(devices)
    }

    fn upsert_sensor(&self, sensor: &NewSensor) -> StoreResult<()> {
        let mut t = self.tables()?;
        if !t.devices.contains_key(&sensor.dev_eui) {
            return Err(StoreError::Query(format!("device {} does not exist", sensor.dev_eui)));
        }
        t.sensors.insert(
            (sensor.dev_eui.clone(), sensor.channel),
            Sensor {
                dev_eui: sensor.dev_eui.clone(),
                channel: sensor.channel,
                sensor_type: sensor.sensor_type.clone(),
                unit: sensor.unit.clone(),
            },
        );
        Ok(())
    }

    fn sensors_for_device(&self, dev_eui: &str) -> StoreResult<Vec<Sensor>> {
        let t = self.tables()?;
        Ok(t.sensors.values().filter(|s| s.dev_eui == dev_eui).cloned().collect())
    }

    fn sensor_kinds(&self) -> StoreResult<Vec<SensorKind>> {
        let t = self.tables()?;
        let mut kinds: Vec<(String, String)> = t
            .sensors
            .values()
            .map(|s| (s.sensor_type.clone(), s.unit.clone()))
            .collect();
        kinds.sort();
        kinds.dedup();
        Ok(kinds
            .into_iter()
            .map(|(sensor_type, unit)| SensorKind {
                sensor_type: SensorType::from_db(&sensor_type),
                unit,
            })
            .filter(|k| k.sensor_type != SensorType::Unknown)
            .collect())
    }

    fn insert_measurement(&self, measurement: &NewMeasurement) -> StoreResult<()> {
        let mut t = self.tables()?;
        let key = (measurement.dev_eui.clone(), measurement.channel);
        if !t.sensors.contains_key(&key) {
            return Err(StoreError::Query(format!(
                "sensor {}/{} does not exist",
                measurement.dev_eui, measurement.channel
            )));
        }
        t.next_measurement_id += 1;
        let id = t.next_measurement_id;
        t.measurements.push(Measurement {
            id,
            dev_eui: measurement.dev_eui.clone(),
            channel: measurement.channel,
            value: measurement.value,
            measured_at: measurement.measured_at,
        });
        Ok(())
    }

    fn delete_measurements_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        let _held = self.delete_hold.lock().unwrap();
        let mut t = self.tables()?;
        let before = t.measurements.len();
        t.measurements.retain(|m| m.measured_at >= cutoff);
        Ok(before - t.measurements.len())
    }

    fn readings(&self, filter: &ReadingFilter) -> StoreResult<Vec<Reading>> {
        let t = self.tables()?;
        let mut rows: Vec<Reading> = t
            .measurements
            .iter()
            .filter(|m| m.measured_at >= filter.since)
            .filter_map(|m| {
                let sensor = t.sensors.get(&(m.dev_eui.clone(), m.channel))?;
                let device = t.devices.get(&m.dev_eui)?;
                let room = device.room_id.and_then(|id| t.rooms.get(&id));
                Some(Reading {
                    id: m.id,
                    value: m.value,
                    measured_at: m.measured_at,
                    sensor_type: SensorType::from_db(&sensor.sensor_type),
                    unit: sensor.unit.clone(),
                    dev_eui: device.dev_eui.clone(),
                    device_name: device.name.clone(),
                    room_name: room.map(|r| r.name.clone()),
                    room_id: room.map(|r| r.room_id),
                })
            })
            .filter(|r| filter.room_id.is_none() || r.room_id == filter.room_id)
            .filter(|r| filter.sensor_type.is_none_or(|wanted| r.sensor_type == wanted))
            .collect();
        rows.sort_by(|a, b| b.measured_at.cmp(&a.measured_at).then_with(|| b.id.cmp(&a.id)));
        if let Some(limit) = filter.limit {
            rows.truncate(usize::try_from(limit).unwrap_or(0));
        }
        Ok(rows)
    }

    fn chart_points(&self, filter: &ReadingFilter, settings: &ChartSettings) -> StoreResult<Vec<ChartPoint>> {
        let rows = self.readings(&ReadingFilter {
            limit: None,
            ..filter.clone()
        })?;
        Ok(measurements::aggregate(&rows, settings))
    }

    fn latest_readings(&self, dev_euis: &[String]) -> StoreResult<Vec<LatestReading>> {
        let t = self.tables()?;
        let mut latest: BTreeMap<(String, i32), &Measurement> = BTreeMap::new();
        for m in t.measurements.iter().filter(|m| dev_euis.contains(&m.dev_eui)) {
            let entry = latest.entry((m.dev_eui.clone(), m.channel)).or_insert(m);
            if (m.measured_at, m.id) > (entry.measured_at, entry.id) {
                *entry = m;
            }
        }
        Ok(latest
            .into_iter()
            .filter_map(|(key, m)| {
                let sensor = t.sensors.get(&key)?;
                Some(LatestReading {
                    dev_eui: m.dev_eui.clone(),
                    channel: m.channel,
                    sensor_type: SensorType::from_db(&sensor.sensor_type),
                    value: m.value,
                    measured_at: m.measured_at,
                })
            })
            .collect())
    }
}

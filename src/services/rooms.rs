//! Rooms: CRUD plus the nested dashboard views.
//!
//! Latest values come from the per-(dev_eui, channel) latest lookup; a room's
//! temperature and humidity are picked independently, so they may come from
//! different devices and timestamps.

use chrono::{DateTime, Duration, Utc};
use log::info;
use serde::Serialize;
use std::collections::HashMap;

use crate::db::models::{Device, LatestReading, Room, Sensor};
use crate::error::ApiError;
use crate::models::sensor::SensorType;
use crate::store::{StoreError, TelemetryStore};
use crate::utils::{is_online, non_blank};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatestValue {
    pub value: f64,
    pub measured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RoomLatest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<LatestValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<LatestValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomOverview {
    #[serde(flatten)]
    pub room: Room,
    pub device_count: usize,
    pub latest: RoomLatest,
    pub is_online: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorDetail {
    #[serde(flatten)]
    pub sensor: Sensor,
    pub latest_value: Option<f64>,
    pub latest_measured_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceDetail {
    #[serde(flatten)]
    pub device: Device,
    pub is_online: bool,
    pub sensors: Vec<SensorDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomDetail {
    #[serde(flatten)]
    pub room: Room,
    pub devices: Vec<DeviceDetail>,
}

fn newest_of(latest: &[LatestReading], sensor_type: SensorType) -> Option<LatestValue> {
    latest
        .iter()
        .filter(|r| r.sensor_type == sensor_type)
        .max_by_key(|r| r.measured_at)
        .map(|r| LatestValue {
            value: r.value,
            measured_at: r.measured_at,
        })
}

/// Every room, ordered by name, with device count, latest climate and liveness.
pub fn overview(
    store: &dyn TelemetryStore,
    liveness: Duration,
    now: DateTime<Utc>,
) -> Result<Vec<RoomOverview>, ApiError> {
    let rooms = store.list_rooms()?;
    let mut out = Vec::with_capacity(rooms.len());
    for room in rooms {
        let devices = store.devices_in_room(room.room_id)?;
        let dev_euis: Vec<String> = devices.iter().map(|d| d.dev_eui.clone()).collect();
        let latest = store.latest_readings(&dev_euis)?;

        out.push(RoomOverview {
            device_count: devices.len(),
            latest: RoomLatest {
                temperature: newest_of(&latest, SensorType::Temperature),
                humidity: newest_of(&latest, SensorType::Humidity),
            },
            is_online: devices.iter().any(|d| is_online(d.last_seen_at, liveness, now)),
            room,
        });
    }
    Ok(out)
}

pub fn detail(
    store: &dyn TelemetryStore,
    room_id: i32,
    liveness: Duration,
    now: DateTime<Utc>,
) -> Result<RoomDetail, ApiError> {
    let room = store
        .find_room(room_id)?
        .ok_or_else(|| ApiError::NotFound("Room not found".to_string()))?;
    let devices = store.devices_in_room(room_id)?;
    let dev_euis: Vec<String> = devices.iter().map(|d| d.dev_eui.clone()).collect();
    let latest: HashMap<(String, i32), LatestReading> = store
        .latest_readings(&dev_euis)?
        .into_iter()
        .map(|r| ((r.dev_eui.clone(), r.channel), r))
        .collect();

    let mut details = Vec::with_capacity(devices.len());
    for device in devices {
        let sensors = store
            .sensors_for_device(&device.dev_eui)?
            .into_iter()
            .map(|sensor| {
                let newest = latest.get(&(sensor.dev_eui.clone(), sensor.channel));
                SensorDetail {
                    latest_value: newest.map(|r| r.value),
                    latest_measured_at: newest.map(|r| r.measured_at),
                    sensor,
                }
            })
            .collect();
        details.push(DeviceDetail {
            is_online: is_online(device.last_seen_at, liveness, now),
            device,
            sensors,
        });
    }

    Ok(RoomDetail { room, devices: details })
}

fn required_name(name: Option<&str>) -> Result<String, ApiError> {
    non_blank(name).ok_or_else(|| ApiError::Validation("Room name is required".to_string()))
}

fn conflict_or_store(e: StoreError) -> ApiError {
    match e {
        StoreError::UniqueViolation(_) => ApiError::Conflict("Room name already exists".to_string()),
        other => ApiError::Store(other),
    }
}

pub fn create(store: &dyn TelemetryStore, name: Option<&str>) -> Result<Room, ApiError> {
    let name = required_name(name)?;
    let room = store.insert_room(&name).map_err(conflict_or_store)?;
    info!("Rooms: created {} ({})", room.room_id, room.name);
    Ok(room)
}

pub fn rename(store: &dyn TelemetryStore, room_id: i32, name: Option<&str>) -> Result<(), ApiError> {
    let name = required_name(name)?;
    if !store.rename_room(room_id, &name).map_err(conflict_or_store)? {
        return Err(ApiError::NotFound("Room not found".to_string()));
    }
    Ok(())
}

/// Deletes the room; its devices stay, detached.
pub fn delete(store: &dyn TelemetryStore, room_id: i32) -> Result<(), ApiError> {
    if !store.delete_room(room_id)? {
        return Err(ApiError::NotFound("Room not found".to_string()));
    }
    info!("Rooms: deleted {}", room_id);
    Ok(())
}

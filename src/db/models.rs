//! Diesel row structs for rooms, devices, sensors and measurements, plus the
//! joined read rows the API serves.
//!
//! `measurements` is append-only and pruned by the retention service.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::models::sensor::SensorType;
use crate::schema;

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::rooms)]
#[diesel(primary_key(room_id))]
pub struct Room {
    pub room_id: i32,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::rooms)]
pub struct NewRoom {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Associations, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::devices)]
#[diesel(primary_key(dev_eui))]
#[diesel(belongs_to(Room))]
pub struct Device {
    pub dev_eui: String,
    pub name: String,
    pub room_id: Option<i32>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = schema::devices)]
pub struct NewDevice {
    pub dev_eui: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::sensors)]
pub struct Sensor {
    pub dev_eui: String,
    pub channel: i32,
    #[serde(rename = "type")]
    pub sensor_type: String,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = schema::sensors)]
pub struct NewSensor {
    pub dev_eui: String,
    pub channel: i32,
    pub sensor_type: String,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::measurements)]
pub struct Measurement {
    pub id: i64,
    pub dev_eui: String,
    pub channel: i32,
    pub value: f64,
    pub measured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = schema::measurements)]
pub struct NewMeasurement {
    pub dev_eui: String,
    pub channel: i32,
    pub value: f64,
    pub measured_at: DateTime<Utc>,
}

/// Device row joined with its room name, as listed by `/api/devices`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSummary {
    pub dev_eui: String,
    pub name: String,
    pub room_id: Option<i32>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub room_name: Option<String>,
}

/// A measurement joined with its sensor, device and (optional) room.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub id: i64,
    pub value: f64,
    pub measured_at: DateTime<Utc>,
    pub sensor_type: SensorType,
    pub unit: String,
    pub dev_eui: String,
    pub device_name: String,
    pub room_name: Option<String>,
    pub room_id: Option<i32>,
}

/// Most recent value of one (dev_eui, channel) sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct LatestReading {
    pub dev_eui: String,
    pub channel: i32,
    pub sensor_type: SensorType,
    pub value: f64,
    pub measured_at: DateTime<Utc>,
}

/// A distinct (type, unit) pair currently in use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SensorKind {
    #[serde(rename = "type")]
    pub sensor_type: SensorType,
    pub unit: String,
}

/// One chart bucket of one device sensor, computed after outlier removal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPoint {
    pub device_name: String,
    pub dev_eui: String,
    pub sensor_type: SensorType,
    pub unit: String,
    /// Start of the bucket.
    pub hour: DateTime<Utc>,
    pub avg_value: f64,
    pub min_value: f64,
    pub max_value: f64,
    pub count: usize,
}

/// Query for joined readings; `None` filters impose no restriction.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingFilter {
    pub since: DateTime<Utc>,
    pub room_id: Option<i32>,
    pub sensor_type: Option<SensorType>,
    /// Newest-first cap; `None` returns every matching row.
    pub limit: Option<i64>,
}

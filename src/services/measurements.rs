//! Measurement queries: raw listing and time-bucketed chart aggregates.
//!
//! Both are bounded by the retention window, so they never read data cleanup
//! is allowed to drop. Postgres aggregates in SQL; [`aggregate`] is the same
//! rule applied to rows already in memory.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

use crate::config::ChartSettings;
use crate::db::models::{Reading, ReadingFilter};
use crate::models::sensor::SensorType;
use crate::store::{StoreResult, TelemetryStore};

pub use crate::db::models::ChartPoint;

pub const DEFAULT_LIST_LIMIT: i64 = 100;

/// Optional, conjunctive restrictions shared by listing and charting.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MeasurementFilter {
    /// Only devices currently assigned to this room.
    pub room_id: Option<i32>,
    pub sensor_type: Option<SensorType>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct BucketKey {
    start: DateTime<Utc>,
    device_name: String,
    dev_eui: String,
    // text form, so ties sort as they do in SQL
    sensor_type: &'static str,
    unit: String,
}

#[derive(Debug, Clone, Copy)]
struct Stats {
    sum: f64,
    min: f64,
    max: f64,
    count: usize,
}

impl Stats {
    fn new(value: f64) -> Self {
        Stats {
            sum: value,
            min: value,
            max: value,
            count: 1,
        }
    }

    fn push(&mut self, value: f64) {
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.count += 1;
    }
}

/// Start of the bucket containing `ts`. Buckets are aligned to the Unix epoch,
/// so widths dividing a day line up with UTC calendar hours.
pub fn bucket_start(ts: DateTime<Utc>, width: Duration) -> DateTime<Utc> {
    let secs = width.num_seconds().max(1);
    let t = ts.timestamp();
    DateTime::from_timestamp(t - t.rem_euclid(secs), 0).unwrap_or(ts)
}

/// Groups readings per (bucket, device, sensor type), dropping implausible
/// values first. Output is ordered by bucket, device name, dev_eui, type, unit.
pub fn aggregate(readings: &[Reading], settings: &ChartSettings) -> Vec<ChartPoint> {
    let mut buckets: BTreeMap<BucketKey, Stats> = BTreeMap::new();
    for r in readings {
        if !settings.outliers.is_plausible(r.sensor_type, r.value) {
            continue;
        }
        let key = BucketKey {
            start: bucket_start(r.measured_at, settings.bucket),
            device_name: r.device_name.clone(),
            dev_eui: r.dev_eui.clone(),
            sensor_type: r.sensor_type.as_str(),
            unit: r.unit.clone(),
        };
        buckets
            .entry(key)
            .and_modify(|s| s.push(r.value))
            .or_insert_with(|| Stats::new(r.value));
    }

    buckets
        .into_iter()
        .map(|(key, stats)| ChartPoint {
            device_name: key.device_name,
            dev_eui: key.dev_eui,
            sensor_type: SensorType::from_db(key.sensor_type),
            unit: key.unit,
            hour: key.start,
            avg_value: stats.sum / stats.count as f64,
            min_value: stats.min,
            max_value: stats.max,
            count: stats.count,
        })
        .collect()
}

pub fn chart(
    store: &dyn TelemetryStore,
    filter: MeasurementFilter,
    settings: &ChartSettings,
    retention: Duration,
    now: DateTime<Utc>,
) -> StoreResult<Vec<ChartPoint>> {
    store.chart_points(
        &ReadingFilter {
            since: now - retention,
            room_id: filter.room_id,
            sensor_type: filter.sensor_type,
            limit: None,
        },
        settings,
    )
}

/// Newest-first measurement rows inside the retention window.
pub fn recent(
    store: &dyn TelemetryStore,
    filter: MeasurementFilter,
    limit: i64,
    retention: Duration,
    now: DateTime<Utc>,
) -> StoreResult<Vec<Reading>> {
    store.readings(&ReadingFilter {
        since: now - retention,
        room_id: filter.room_id,
        sensor_type: filter.sensor_type,
        limit: Some(limit),
    })
}

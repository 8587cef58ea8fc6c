//! PostgreSQL store on a bounded r2d2 pool.
//!
//! Each call checks out one connection for its duration and returns it to the
//! pool on drop. Only `delete_room` opens a transaction.

use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::sql_types::{Array, BigInt, Float8, Integer, Nullable, Text, Timestamptz};

use super::{StoreResult, TelemetryStore};
use crate::config::ChartSettings;
use crate::db::models::{
    ChartPoint, Device, DeviceSummary, LatestReading, NewDevice, NewMeasurement, NewRoom, NewSensor, Reading,
    ReadingFilter, Room, Sensor, SensorKind,
};
use crate::models::sensor::SensorType;
use crate::schema;

pub type PgPool = Pool<ConnectionManager<PgConnection>>;
pub type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

type ReadingRow = (i64, f64, DateTime<Utc>, String, String, String, String, Option<String>, Option<i32>);

// Buckets are epoch-aligned like `measurements::bucket_start`. Plausible
// ranges arrive as parallel arrays (type, low, high); unbounded ends are +-inf.
const CHART_SQL: &str = r#"
SELECT d.name AS device_name,
       d.dev_eui AS dev_eui,
       s.type AS sensor_type,
       s.unit AS unit,
       to_timestamp(floor(extract(epoch FROM m.measured_at)::float8 / $1) * $1) AS hour,
       avg(m.value) AS avg_value,
       min(m.value) AS min_value,
       max(m.value) AS max_value,
       count(*) AS count
FROM measurements m
JOIN sensors s ON s.dev_eui = m.dev_eui AND s.channel = m.channel
JOIN devices d ON d.dev_eui = m.dev_eui
WHERE m.measured_at >= $2
  AND ($3::int4 IS NULL OR d.room_id = $3)
  AND ($4::text IS NULL OR s.type = $4)
  AND NOT EXISTS (
      SELECT 1
      FROM unnest($5::text[], $6::float8[], $7::float8[]) AS r(type, lo, hi)
      WHERE r.type = s.type AND (m.value < r.lo OR m.value > r.hi)
  )
GROUP BY 1, 2, 3, 4, 5
ORDER BY 5, d.name COLLATE "C", d.dev_eui COLLATE "C", s.type COLLATE "C", s.unit COLLATE "C"
"#;

#[derive(QueryableByName)]
struct BucketRow {
    #[diesel(sql_type = Text)]
    device_name: String,
    #[diesel(sql_type = Text)]
    dev_eui: String,
    #[diesel(sql_type = Text)]
    sensor_type: String,
    #[diesel(sql_type = Text)]
    unit: String,
    #[diesel(sql_type = Timestamptz)]
    hour: DateTime<Utc>,
    #[diesel(sql_type = Float8)]
    avg_value: f64,
    #[diesel(sql_type = Float8)]
    min_value: f64,
    #[diesel(sql_type = Float8)]
    max_value: f64,
    #[diesel(sql_type = BigInt)]
    count: i64,
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Builds the pool and opens its first connections; fails when the
    /// database is unreachable.
    pub fn connect(database_url: &str, max_size: u32) -> StoreResult<Self> {
        let manager = ConnectionManager::<PgConnection>::new(database_url);
        let pool = Pool::builder().max_size(max_size).build(manager)?;
        Ok(PgStore { pool })
    }

    pub fn conn(&self) -> StoreResult<PgPooledConnection> {
        Ok(self.pool.get()?)
    }
}

impl TelemetryStore for PgStore {
    fn list_rooms(&self) -> StoreResult<Vec<Room>> {
        use schema::rooms::dsl as R;

        let mut conn = self.conn()?;
        Ok(R::rooms.order(R::name.asc()).select(Room::as_select()).load(&mut conn)?)
    }

    fn find_room(&self, room_id: i32) -> StoreResult<Option<Room>> {
        use schema::rooms::dsl as R;

        let mut conn = self.conn()?;
        Ok(R::rooms
            .find(room_id)
            .select(Room::as_select())
            .first(&mut conn)
            .optional()?)
    }

    fn insert_room(&self, name: &str) -> StoreResult<Room> {
        use schema::rooms::dsl as R;

        let mut conn = self.conn()?;
        let row = NewRoom { name: name.to_string() };
        Ok(diesel::insert_into(R::rooms)
            .values(&row)
            .returning(Room::as_returning())
            .get_result(&mut conn)?)
    }

    fn rename_room(&self, room_id: i32, name: &str) -> StoreResult<bool> {
        use schema::rooms::dsl as R;

        let mut conn = self.conn()?;
        let updated = diesel::update(R::rooms.find(room_id))
            .set(R::name.eq(name))
            .execute(&mut conn)?;
        Ok(updated > 0)
    }

    fn delete_room(&self, room_id: i32) -> StoreResult<bool> {
        use schema::devices::dsl as D;
        use schema::rooms::dsl as R;

        let mut conn = self.conn()?;
        let deleted = conn.transaction::<usize, diesel::result::Error, _>(|conn| {
            diesel::update(D::devices.filter(D::room_id.eq(Some(room_id))))
                .set(D::room_id.eq(None::<i32>))
                .execute(conn)?;
            diesel::delete(R::rooms.find(room_id)).execute(conn)
        })?;
        Ok(deleted > 0)
    }

    fn find_device(&self, dev_eui: &str) -> StoreResult<Option<Device>> {
        use schema::devices::dsl as D;

        let mut conn = self.conn()?;
        Ok(D::devices
            .find(dev_eui)
            .select(Device::as_select())
            .first(&mut conn)
            .optional()?)
    }

    fn create_device_if_absent(&self, device: &NewDevice) -> StoreResult<bool> {
        use schema::devices::dsl as D;

        let mut conn = self.conn()?;
        let inserted = diesel::insert_into(D::devices)
            .values(device)
            .on_conflict(D::dev_eui)
            .do_nothing()
            .execute(&mut conn)?;
        Ok(inserted > 0)
    }

    fn touch_device(&self, dev_eui: &str, seen_at: DateTime<Utc>) -> StoreResult<()> {
        use schema::devices::dsl as D;

        let mut conn = self.conn()?;
        diesel::update(D::devices.find(dev_eui))
            .set(D::last_seen_at.eq(Some(seen_at)))
            .execute(&mut conn)?;
        Ok(())
    }

    fn set_device_room(&self, dev_eui: &str, room_id: Option<i32>) -> StoreResult<bool> {
        use schema::devices::dsl as D;

        let mut conn = self.conn()?;
        let updated = diesel::update(D::devices.find(dev_eui))
            .set(D::room_id.eq(room_id))
            .execute(&mut conn)?;
        Ok(updated > 0)
    }

    fn devices_in_room(&self, room_id: i32) -> StoreResult<Vec<Device>> {
        use schema::devices::dsl as D;

        let mut conn = self.conn()?;
        Ok(D::devices
            .filter(D::room_id.eq(Some(room_id)))
            .order((D::name.asc(), D::dev_eui.asc()))
            .select(Device::as_select())
            .load(&mut conn)?)
    }

    fn list_devices(&self, unassigned_only: bool) -> StoreResult<Vec<DeviceSummary>> {
        use schema::devices::dsl as D;
        use schema::rooms::dsl as R;

        let mut conn = self.conn()?;
        let mut query = D::devices
            .left_join(R::rooms.on(D::room_id.eq(R::room_id.nullable())))
            .select((Device::as_select(), R::name.nullable()))
            .order((D::name.asc(), D::dev_eui.asc()))
            .into_boxed();
        if unassigned_only {
            query = query.filter(D::room_id.is_null());
        }

        let rows: Vec<(Device, Option<String>)> = query.load(&mut conn)?;
        Ok(rows
            .into_iter()
            .map(|(d, room_name)| DeviceSummary {
                dev_eui: d.dev_eui,
                name: d.name,
                room_id: d.room_id,
                last_seen_at: d.last_seen_at,
                room_name,
            })
            .collect())
    }

    fn upsert_sensor(&self, sensor: &NewSensor) -> StoreResult<()> {
        use schema::sensors::dsl as S;

        let mut conn = self.conn()?;
        diesel::insert_into(S::sensors)
            .values(sensor)
            .on_conflict((S::dev_eui, S::channel))
            .do_update()
            .set((S::sensor_type.eq(&sensor.sensor_type), S::unit.eq(&sensor.unit)))
            .execute(&mut conn)?;
        Ok(())
    }

    fn sensors_for_device(&self, dev_eui: &str) -> StoreResult<Vec<Sensor>> {
        use schema::sensors::dsl as S;

        let mut conn = self.conn()?;
        Ok(S::sensors
            .filter(S::dev_eui.eq(dev_eui))
            .order(S::channel.asc())
            .select(Sensor::as_select())
            .load(&mut conn)?)
    }

    fn sensor_kinds(&self) -> StoreResult<Vec<SensorKind>> {
        use schema::sensors::dsl as S;

        let mut conn = self.conn()?;
        let rows: Vec<(String, String)> = S::sensors
            .filter(S::sensor_type.ne(SensorType::Unknown.as_str()))
            .select((S::sensor_type, S::unit))
            .distinct()
            .order((S::sensor_type.asc(), S::unit.asc()))
            .load(&mut conn)?;
        Ok(rows
            .into_iter()
            .map(|(t, unit)| SensorKind {
                sensor_type: SensorType::from_db(&t),
                unit,
            })
            .filter(|k| k.sensor_type != SensorType::Unknown)
            .collect())
    }

    fn insert_measurement(&self, measurement: &NewMeasurement) -> StoreResult<()> {
        use schema::measurements::dsl as M;

        let mut conn = self.conn()?;
        diesel::insert_into(M::measurements)
            .values(measurement)
            .execute(&mut conn)?;
        Ok(())
    }

    fn delete_measurements_before(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        use schema::measurements::dsl as M;

        let mut conn = self.conn()?;
        Ok(diesel::delete(M::measurements.filter(M::measured_at.lt(cutoff))).execute(&mut conn)?)
    }

    fn readings(&self, filter: &ReadingFilter) -> StoreResult<Vec<Reading>> {
        use schema::devices::dsl as D;
        use schema::measurements::dsl as M;
        use schema::rooms::dsl as R;
        use schema::sensors::dsl as S;

        let mut conn = self.conn()?;
        let mut query = M::measurements
            .inner_join(S::sensors.on(M::dev_eui.eq(S::dev_eui).and(M::channel.eq(S::channel))))
            .inner_join(D::devices.on(M::dev_eui.eq(D::dev_eui)))
            .left_join(R::rooms.on(D::room_id.eq(R::room_id.nullable())))
            .filter(M::measured_at.ge(filter.since))
            .select((
                M::id,
                M::value,
                M::measured_at,
                S::sensor_type,
                S::unit,
                D::dev_eui,
                D::name,
                R::name.nullable(),
                R::room_id.nullable(),
            ))
            .order((M::measured_at.desc(), M::id.desc()))
            .into_boxed();
        if let Some(room_id) = filter.room_id {
            query = query.filter(D::room_id.eq(Some(room_id)));
        }
        if let Some(sensor_type) = filter.sensor_type {
            query = query.filter(S::sensor_type.eq(sensor_type.as_str()));
        }
        if let Some(limit) = filter.limit {
            query = query.limit(limit);
        }

        let rows: Vec<ReadingRow> = query.load(&mut conn)?;
        Ok(rows
            .into_iter()
            .map(
                |(id, value, measured_at, sensor_type, unit, dev_eui, device_name, room_name, room_id)| Reading {
                    id,
                    value,
                    measured_at,
                    sensor_type: SensorType::from_db(&sensor_type),
                    unit,
                    dev_eui,
                    device_name,
                    room_name,
                    room_id,
                },
            )
            .collect())
    }

    fn chart_points(&self, filter: &ReadingFilter, settings: &ChartSettings) -> StoreResult<Vec<ChartPoint>> {
        let mut types = Vec::new();
        let mut lows = Vec::new();
        let mut highs = Vec::new();
        for (sensor_type, range) in settings.outliers.ranges() {
            types.push(sensor_type.as_str().to_string());
            lows.push(range.min.unwrap_or(f64::NEG_INFINITY));
            highs.push(range.max.unwrap_or(f64::INFINITY));
        }

        let mut conn = self.conn()?;
        let rows: Vec<BucketRow> = diesel::sql_query(CHART_SQL)
            .bind::<Float8, _>(settings.bucket.num_seconds().max(1) as f64)
            .bind::<Timestamptz, _>(filter.since)
            .bind::<Nullable<Integer>, _>(filter.room_id)
            .bind::<Nullable<Text>, _>(filter.sensor_type.map(|t| t.as_str()))
            .bind::<Array<Text>, _>(types)
            .bind::<Array<Float8>, _>(lows)
            .bind::<Array<Float8>, _>(highs)
            .load(&mut conn)?;
        Ok(rows
            .into_iter()
            .map(|r| ChartPoint {
                device_name: r.device_name,
                dev_eui: r.dev_eui,
                sensor_type: SensorType::from_db(&r.sensor_type),
                unit: r.unit,
                hour: r.hour,
                avg_value: r.avg_value,
                min_value: r.min_value,
                max_value: r.max_value,
                count: usize::try_from(r.count).unwrap_or(0),
            })
            .collect())
    }

    fn latest_readings(&self, dev_euis: &[String]) -> StoreResult<Vec<LatestReading>> {
        use schema::measurements::dsl as M;
        use schema::sensors::dsl as S;

        if dev_euis.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.conn()?;
        let rows: Vec<(String, i32, String, f64, DateTime<Utc>)> = M::measurements
            .inner_join(S::sensors.on(M::dev_eui.eq(S::dev_eui).and(M::channel.eq(S::channel))))
            .filter(M::dev_eui.eq_any(dev_euis))
            .distinct_on((M::dev_eui, M::channel))
            .order((M::dev_eui.asc(), M::channel.asc(), M::measured_at.desc(), M::id.desc()))
            .select((M::dev_eui, M::channel, S::sensor_type, M::value, M::measured_at))
            .load(&mut conn)?;
        Ok(rows
            .into_iter()
            .map(|(dev_eui, channel, sensor_type, value, measured_at)| LatestReading {
                dev_eui,
                channel,
                sensor_type: SensorType::from_db(&sensor_type),
                value,
                measured_at,
            })
            .collect())
    }
}

use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use chrono::Utc;
use http::StatusCode;
use log::{info, warn};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::api::SharedState;
use crate::config::Config;
use crate::db::models::{DeviceSummary, Reading, SensorKind};
use crate::error::ApiError;
use crate::models::sensor::SensorType;
use crate::models::uplink::UplinkEnvelope;
use crate::services::measurements::{self, ChartPoint, DEFAULT_LIST_LIMIT, MeasurementFilter};
use crate::services::rooms::{self, RoomDetail, RoomOverview};
use crate::services::{devices, ingest, retention};
use crate::store::TelemetryStore;
use crate::utils::non_blank;

/// Runs store work on the blocking pool; the request suspends until it is done.
async fn blocking<T, F>(state: &SharedState, work: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&dyn TelemetryStore, &Config) -> Result<T, ApiError> + Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || work(state.store.as_ref(), &state.config))
        .await
        .map_err(|e| ApiError::Internal(format!("store task failed: {}", e)))?
}

/// Unparseable ids cannot name an existing room.
fn room_id_from_path(raw: &str) -> Result<i32, ApiError> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::NotFound("Room not found".to_string()))
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::Validation(rejection.body_text()))
}

#[derive(Debug, Default, Deserialize)]
pub struct FilterQuery {
    pub room_id: Option<String>,
    pub sensor_type: Option<String>,
    pub limit: Option<String>,
}

impl FilterQuery {
    /// `Ok(None)` when the sensor type is not one we know: nothing can match.
    fn filter(&self) -> Result<Option<MeasurementFilter>, ApiError> {
        let room_id = match non_blank(self.room_id.as_deref()) {
            Some(raw) => Some(
                raw.parse::<i32>()
                    .map_err(|_| ApiError::Validation("room_id must be an integer".to_string()))?,
            ),
            None => None,
        };
        let sensor_type = match non_blank(self.sensor_type.as_deref()) {
            Some(raw) => match raw.parse::<SensorType>() {
                Ok(t) => Some(t),
                Err(_) => return Ok(None),
            },
            None => None,
        };
        Ok(Some(MeasurementFilter { room_id, sensor_type }))
    }

    fn limit(&self) -> Result<i64, ApiError> {
        match non_blank(self.limit.as_deref()) {
            Some(raw) => raw
                .parse::<i64>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| ApiError::Validation("limit must be a positive integer".to_string())),
            None => Ok(DEFAULT_LIST_LIMIT),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DevicesQuery {
    pub unassigned: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RoomName {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RoomAssignment {
    #[serde(default)]
    pub room_id: Option<i32>,
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "timestamp": Utc::now() }))
}

// --- Rooms ---

pub async fn list_rooms(State(state): State<SharedState>) -> Result<Json<Vec<RoomOverview>>, ApiError> {
    let rooms = blocking(&state, |store, cfg| rooms::overview(store, cfg.liveness, Utc::now())).await?;
    Ok(Json(rooms))
}

pub async fn get_room(State(state): State<SharedState>, Path(id): Path<String>) -> Result<Json<RoomDetail>, ApiError> {
    let room_id = room_id_from_path(&id)?;
    let room = blocking(&state, move |store, cfg| rooms::detail(store, room_id, cfg.liveness, Utc::now())).await?;
    Ok(Json(room))
}

pub async fn create_room(
    State(state): State<SharedState>,
    payload: Result<Json<RoomName>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let body = json_body(payload)?;
    let room = blocking(&state, move |store, _| rooms::create(store, body.name.as_deref())).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "room_id": room.room_id,
            "name": room.name,
            "message": "Room created successfully",
        })),
    ))
}

pub async fn update_room(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    payload: Result<Json<RoomName>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let room_id = room_id_from_path(&id)?;
    let body = json_body(payload)?;
    blocking(&state, move |store, _| rooms::rename(store, room_id, body.name.as_deref())).await?;
    Ok(Json(json!({ "message": "Room updated successfully" })))
}

pub async fn delete_room(State(state): State<SharedState>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    let room_id = room_id_from_path(&id)?;
    blocking(&state, move |store, _| rooms::delete(store, room_id)).await?;
    Ok(Json(json!({ "message": "Room deleted successfully" })))
}

// --- Devices ---

pub async fn list_devices(
    State(state): State<SharedState>,
    Query(query): Query<DevicesQuery>,
) -> Result<Json<Vec<DeviceSummary>>, ApiError> {
    let unassigned_only = matches!(query.unassigned.as_deref().map(str::trim), Some("1" | "true"));
    let devices = blocking(&state, move |store, _| Ok(store.list_devices(unassigned_only)?)).await?;
    Ok(Json(devices))
}

pub async fn assign_device_room(
    State(state): State<SharedState>,
    Path(dev_eui): Path<String>,
    payload: Result<Json<RoomAssignment>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let room_id = json_body(payload)?.room_id;
    let target = dev_eui.clone();
    blocking(&state, move |store, _| devices::assign_room(store, &target, room_id)).await?;
    let message = if room_id.is_some() {
        "Device attached to room"
    } else {
        "Device detached from room"
    };
    Ok(Json(json!({ "message": message, "dev_eui": dev_eui, "room_id": room_id })))
}

// --- Measurements ---

pub async fn list_measurements(
    State(state): State<SharedState>,
    Query(query): Query<FilterQuery>,
) -> Result<Json<Vec<Reading>>, ApiError> {
    let limit = query.limit()?;
    let Some(filter) = query.filter()? else {
        return Ok(Json(Vec::new()));
    };
    let rows = blocking(&state, move |store, cfg| {
        Ok(measurements::recent(store, filter, limit, cfg.retention, Utc::now())?)
    })
    .await?;
    Ok(Json(rows))
}

pub async fn chart(
    State(state): State<SharedState>,
    Query(query): Query<FilterQuery>,
) -> Result<Json<Vec<ChartPoint>>, ApiError> {
    let Some(filter) = query.filter()? else {
        return Ok(Json(Vec::new()));
    };
    let points = blocking(&state, move |store, cfg| {
        Ok(measurements::chart(store, filter, &cfg.chart, cfg.retention, Utc::now())?)
    })
    .await?;
    Ok(Json(points))
}

pub async fn cleanup(State(state): State<SharedState>) -> Result<Json<Value>, ApiError> {
    let deleted = blocking(&state, |store, cfg| Ok(retention::cleanup(store, cfg.retention, Utc::now()))).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Cleanup completed",
        "deleted_rows": deleted,
    })))
}

pub async fn sensor_types(State(state): State<SharedState>) -> Result<Json<Vec<SensorKind>>, ApiError> {
    let kinds = blocking(&state, |store, _| Ok(store.sensor_kinds()?)).await?;
    Ok(Json(kinds))
}

// --- Webhook ---

pub async fn webhook_ttn(State(state): State<SharedState>, body: Bytes) -> Result<Json<Value>, ApiError> {
    info!("Webhook: TTN uplink received ({} bytes)", body.len());
    let uplink = UplinkEnvelope::from_slice(&body)
        .and_then(|envelope| envelope.into_uplink(Utc::now()))
        .map_err(|e| {
            warn!("Webhook: rejected uplink: {}", e);
            ApiError::Validation(e.to_string())
        })?;

    retention::spawn_cleanup(state.store.clone(), state.config.retention, &state.cleanup_gate);

    let outcome = blocking(&state, move |store, _| Ok(ingest::ingest(store, &uplink)?)).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Processed {} sensor values", outcome.saved_count),
        "dev_eui": outcome.dev_eui,
        "saved_count": outcome.saved_count,
    })))
}

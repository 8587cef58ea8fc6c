//! The Things Network uplink webhook payload (subset we consume).
//!
//! Only the fields the ingestion path reads are modelled; everything else in the
//! TTN message is ignored by serde.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UplinkEnvelope {
    pub end_device_ids: Option<EndDeviceIds>,
    pub received_at: Option<DateTime<Utc>>,
    pub uplink_message: Option<UplinkMessage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndDeviceIds {
    pub dev_eui: Option<String>,
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UplinkMessage {
    pub decoded_payload: Option<Map<String, Value>>,
}

/// An uplink that carries everything ingestion needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Uplink {
    pub dev_eui: String,
    pub device_id: Option<String>,
    pub received_at: DateTime<Utc>,
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UplinkError {
    /// Body is not JSON or a field has the wrong shape; carries the JSON path.
    Malformed { path: String, message: String },
    MissingDevEui,
    MissingDecodedPayload,
}

impl core::fmt::Display for UplinkError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            UplinkError::Malformed { path, message } if path == "." => write!(f, "Invalid payload: {}", message),
            UplinkError::Malformed { path, message } => write!(f, "Invalid payload at {}: {}", path, message),
            UplinkError::MissingDevEui => write!(f, "Missing dev_eui"),
            UplinkError::MissingDecodedPayload => write!(f, "Missing decoded_payload"),
        }
    }
}

impl std::error::Error for UplinkError {}

impl UplinkEnvelope {
    pub fn from_slice(body: &[u8]) -> Result<Self, UplinkError> {
        let de = &mut serde_json::Deserializer::from_slice(body);
        serde_path_to_error::deserialize(de).map_err(|e| UplinkError::Malformed {
            path: e.path().to_string(),
            message: e.inner().to_string(),
        })
    }

    /// Checks the required fields. `received_at` falls back to `now`.
    pub fn into_uplink(self, now: DateTime<Utc>) -> Result<Uplink, UplinkError> {
        let ids = self.end_device_ids.unwrap_or_default();
        let dev_eui = ids
            .dev_eui
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or(UplinkError::MissingDevEui)?;
        let fields = self
            .uplink_message
            .and_then(|m| m.decoded_payload)
            .ok_or(UplinkError::MissingDecodedPayload)?;

        Ok(Uplink {
            dev_eui,
            device_id: ids.device_id.filter(|s| !s.trim().is_empty()),
            received_at: self.received_at.unwrap_or(now),
            fields,
        })
    }
}

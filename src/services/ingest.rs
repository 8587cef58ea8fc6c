use log::{debug, info, warn};
use serde::Serialize;

use crate::db::models::{NewDevice, NewMeasurement, NewSensor};
use crate::models::uplink::Uplink;
use crate::services::decoder;
use crate::store::{StoreError, TelemetryStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestOutcome {
    pub dev_eui: String,
    pub saved_count: usize,
}

/// Default device name: "Device " plus the last four characters of the dev_eui.
pub fn default_device_name(dev_eui: &str) -> String {
    let skip = dev_eui.chars().count().saturating_sub(4);
    let suffix: String = dev_eui.chars().skip(skip).collect();
    format!("Device {}", suffix)
}

/// Stores one validated uplink.
///
/// Write order: device create-if-absent, `last_seen_at`, then per decoded
/// channel a sensor upsert followed by its measurement insert. Device writes
/// fail the call; a failing channel is logged and skipped so the returned
/// count reflects what was stored.
pub fn ingest(store: &dyn TelemetryStore, uplink: &Uplink) -> Result<IngestOutcome, StoreError> {
    let dev_eui = uplink.dev_eui.as_str();

    let new_device = NewDevice {
        dev_eui: dev_eui.to_string(),
        name: uplink
            .device_id
            .clone()
            .unwrap_or_else(|| default_device_name(dev_eui)),
    };
    if store.create_device_if_absent(&new_device)? {
        info!("Ingest: new device {} created as {:?}", dev_eui, new_device.name);
    }
    store.touch_device(dev_eui, uplink.received_at)?;

    let readings = decoder::decode(&uplink.fields);
    let mut saved_count = 0;
    for reading in &readings {
        let sensor = NewSensor {
            dev_eui: dev_eui.to_string(),
            channel: reading.channel,
            sensor_type: reading.sensor_type.as_str().to_string(),
            unit: reading.unit.to_string(),
        };
        if let Err(e) = store.upsert_sensor(&sensor) {
            warn!("Ingest: sensor upsert {}/{} failed: {}", dev_eui, reading.channel, e);
            continue;
        }

        let measurement = NewMeasurement {
            dev_eui: dev_eui.to_string(),
            channel: reading.channel,
            value: reading.value,
            measured_at: uplink.received_at,
        };
        match store.insert_measurement(&measurement) {
            Ok(()) => {
                debug!("Ingest: {} {} = {} {}", dev_eui, reading.sensor_type, reading.value, reading.unit);
                saved_count += 1;
            }
            Err(e) => warn!("Ingest: measurement insert {}/{} failed: {}", dev_eui, reading.channel, e),
        }
    }

    info!(
        "Ingest: {} stored {} of {} field(s) ({} decoded)",
        dev_eui,
        saved_count,
        uplink.fields.len(),
        readings.len()
    );
    Ok(IngestOutcome {
        dev_eui: dev_eui.to_string(),
        saved_count,
    })
}

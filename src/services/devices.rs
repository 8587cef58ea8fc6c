use log::info;

use crate::error::ApiError;
use crate::store::TelemetryStore;

/// Attaches the device to `room_id`, or detaches it when `None`.
pub fn assign_room(store: &dyn TelemetryStore, dev_eui: &str, room_id: Option<i32>) -> Result<(), ApiError> {
    if store.find_device(dev_eui)?.is_none() {
        return Err(ApiError::NotFound("Device not found".to_string()));
    }
    if let Some(room_id) = room_id
        && store.find_room(room_id)?.is_none()
    {
        return Err(ApiError::NotFound("Room not found".to_string()));
    }

    if !store.set_device_room(dev_eui, room_id)? {
        return Err(ApiError::NotFound("Device not found".to_string()));
    }
    match room_id {
        Some(id) => info!("Devices: {} attached to room {}", dev_eui, id),
        None => info!("Devices: {} detached", dev_eui),
    }
    Ok(())
}

//! Maps decoded uplink fields onto typed sensor channels.
//!
//! A field named `<anything>_<digits>` belongs to the channel given by its
//! trailing digits. Fields without that suffix, non-numeric values and channels
//! missing from [`CHANNELS`] are dropped.

use serde_json::{Map, Value};

use crate::models::sensor::SensorType;

/// Channel number -> (sensor type, unit). One line per channel.
pub const CHANNELS: &[(i32, SensorType, &str)] = &[
    (1, SensorType::Humidity, "%"),
    (2, SensorType::Temperature, "°C"),
    (3, SensorType::Presence, "%"),
    (4, SensorType::Co2, "ppm"),
    (5, SensorType::Light, "%"),
    (6, SensorType::Noise, "dB"),
];

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelReading {
    pub channel: i32,
    pub sensor_type: SensorType,
    pub unit: &'static str,
    pub value: f64,
}

pub fn channel_info(channel: i32) -> Option<(SensorType, &'static str)> {
    CHANNELS
        .iter()
        .find(|(number, _, _)| *number == channel)
        .map(|(_, sensor_type, unit)| (*sensor_type, *unit))
}

/// Trailing `_<digits>` of a field name, if any.
fn channel_of(field: &str) -> Option<i32> {
    let (_, digits) = field.rsplit_once('_')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Decodes in field-name order (serde_json maps are sorted by key); never fails.
pub fn decode(fields: &Map<String, Value>) -> Vec<ChannelReading> {
    fields
        .iter()
        .filter_map(|(key, value)| {
            let value = value.as_f64().filter(|v| v.is_finite())?;
            let channel = channel_of(key)?;
            let (sensor_type, unit) = channel_info(channel)?;
            Some(ChannelReading {
                channel,
                sensor_type,
                unit,
                value,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn skips_unmatched_fields_and_unknown_channels() {
        let payload = fields(json!({"humidity_1": 55, "foo": "bar", "temperature_2": 21.5, "noise_9": 40}));
        let mut readings = decode(&payload);
        readings.sort_by_key(|r| r.channel);
        assert_eq!(
            readings,
            vec![
                ChannelReading {
                    channel: 1,
                    sensor_type: SensorType::Humidity,
                    unit: "%",
                    value: 55.0,
                },
                ChannelReading {
                    channel: 2,
                    sensor_type: SensorType::Temperature,
                    unit: "°C",
                    value: 21.5,
                },
            ]
        );
    }

    #[test]
    fn channel_comes_from_trailing_digits_only() {
        let payload = fields(json!({
            "co2_4": 612,
            "battery": 3.6,
            "light_5x": 10,
            "light_": 10,
            "presence_3": "high",
            "a_b_6": 42.0,
            "noise_006": 38
        }));
        let mut readings = decode(&payload);
        readings.sort_by_key(|r| r.channel);
        let summary: Vec<(i32, f64)> = readings.iter().map(|r| (r.channel, r.value)).collect();
        assert_eq!(summary, vec![(4, 612.0), (6, 42.0), (6, 38.0)]);
        assert!(readings.iter().all(|r| r.channel != 3));
    }

    #[test]
    fn table_has_one_entry_per_channel() {
        for (number, _, _) in CHANNELS {
            assert_eq!(CHANNELS.iter().filter(|(n, _, _)| n == number).count(), 1);
        }
        assert_eq!(channel_info(4), Some((SensorType::Co2, "ppm")));
        assert_eq!(channel_info(7), None);
    }

    #[test]
    fn empty_payload_yields_nothing() {
        assert!(decode(&Map::new()).is_empty());
    }

    #[test]
    fn output_follows_field_name_order() {
        let payload = fields(json!({"temperature_2": 21.0, "co2_4": 600, "humidity_1": 40}));
        let channels: Vec<i32> = decode(&payload).iter().map(|r| r.channel).collect();
        assert_eq!(channels, vec![4, 1, 2]);
    }
}

//! Sensor kinds reported by the room sensors.
//!
//! Stored as lowercase text in `sensors.type`; anything the database holds that
//! does not match a known name reads back as [`SensorType::Unknown`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorType {
    Temperature,
    Humidity,
    Presence,
    Co2,
    Light,
    Noise,
    Unknown,
}

impl SensorType {
    pub const ALL: [SensorType; 7] = [
        SensorType::Temperature,
        SensorType::Humidity,
        SensorType::Presence,
        SensorType::Co2,
        SensorType::Light,
        SensorType::Noise,
        SensorType::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SensorType::Temperature => "temperature",
            SensorType::Humidity => "humidity",
            SensorType::Presence => "presence",
            SensorType::Co2 => "co2",
            SensorType::Light => "light",
            SensorType::Noise => "noise",
            SensorType::Unknown => "unknown",
        }
    }

    /// Lenient conversion for values read back from the database.
    pub fn from_db(raw: &str) -> SensorType {
        raw.parse().unwrap_or(SensorType::Unknown)
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSensorType(pub String);

impl fmt::Display for UnknownSensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown sensor type: {}", self.0)
    }
}

impl std::error::Error for UnknownSensorType {}

impl FromStr for SensorType {
    type Err = UnknownSensorType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        SensorType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(needle))
            .ok_or_else(|| UnknownSensorType(s.to_string()))
    }
}

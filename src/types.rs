//! Typed records for sensors, fans and helper status
//!
//! The helper reports fan and status information as string-keyed variant
//! dictionaries. Those bags are validated into the typed records here at
//! the boundary; nothing downstream ever touches an untyped payload.

use std::collections::{HashMap, VecDeque};

use zvariant::OwnedValue;

use crate::errors::{Result, SmcBridgeError};

/// Maximum number of readings retained per sensor.
pub const MAX_SENSOR_READINGS: usize = 100;

/// Rough sensor classification derived from the SMC key prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorType {
    Cpu,
    Gpu,
    Memory,
    Storage,
    Battery,
    Ambient,
    Unknown,
}

impl SensorType {
    /// Classify a sensor by its SMC key.
    ///
    /// SMC temperature keys start with `T` followed by a subsystem letter,
    /// e.g. `TC0P` is a CPU proximity sensor and `TG0P` a GPU one.
    pub fn from_smc_key(key: &str) -> Self {
        match key.get(..2) {
            Some("TC") => SensorType::Cpu,
            Some("TG") => SensorType::Gpu,
            Some("TM") => SensorType::Memory,
            Some("TH") | Some("TN") => SensorType::Storage,
            Some("TB") => SensorType::Battery,
            Some("TA") => SensorType::Ambient,
            _ => SensorType::Unknown,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SensorType::Cpu => "CPU",
            SensorType::Gpu => "GPU",
            SensorType::Memory => "Memory",
            SensorType::Storage => "Storage",
            SensorType::Battery => "Battery",
            SensorType::Ambient => "Ambient",
            SensorType::Unknown => "Unknown",
        }
    }
}

/// A temperature sensor together with its recent reading history.
#[derive(Debug, Clone)]
pub struct TemperatureSensor {
    pub id: String,
    pub sensor_type: SensorType,
    pub current_temperature: f64,
    pub max_temperature: f64,
    /// Bounded FIFO of recent readings, oldest first.
    pub readings: VecDeque<f64>,
    pub smc_key: Option<String>,
}

impl TemperatureSensor {
    pub fn new(key: &str, value: f64) -> Self {
        let mut sensor = Self {
            id: key.to_string(),
            sensor_type: SensorType::from_smc_key(key),
            current_temperature: value,
            max_temperature: value,
            readings: VecDeque::new(),
            smc_key: Some(key.to_string()),
        };
        sensor.push_reading(value);
        sensor
    }

    /// Append a reading, dropping the oldest once the history is full.
    pub fn push_reading(&mut self, value: f64) {
        if self.readings.len() >= MAX_SENSOR_READINGS {
            self.readings.pop_front();
        }
        self.readings.push_back(value);
        self.current_temperature = value;
        if value > self.max_temperature {
            self.max_temperature = value;
        }
    }
}

/// One fan as reported by the helper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fan {
    pub index: u8,
    pub name: String,
    pub current_speed: u32,
    pub min_speed: u32,
    pub max_speed: u32,
    pub is_manual_control: bool,
    pub target_speed: Option<u32>,
}

impl Fan {
    /// Validate a fan info reply dictionary.
    ///
    /// Required fields: `index`, `current_speed`, `min_speed`, `max_speed`,
    /// `manual`. Optional: `name` (defaults to "Fan N"), `target_speed`.
    pub fn from_reply(map: &HashMap<String, OwnedValue>) -> Result<Self> {
        let index = reply_u8(map, "index")?;
        let name = reply_string_opt(map, "name").unwrap_or_else(|| format!("Fan {}", index));
        Ok(Self {
            index,
            name,
            current_speed: reply_u32(map, "current_speed")?,
            min_speed: reply_u32(map, "min_speed")?,
            max_speed: reply_u32(map, "max_speed")?,
            is_manual_control: reply_bool(map, "manual")?,
            target_speed: reply_u32_opt(map, "target_speed"),
        })
    }

    /// Whether an RPM request is inside this fan's reported bounds.
    pub fn speed_in_bounds(&self, rpm: u32) -> bool {
        rpm >= self.min_speed && rpm <= self.max_speed
    }
}

/// Typed view of the helper's status reply.
#[derive(Debug, Clone)]
pub struct HelperStatus {
    pub version: String,
    pub smc_session_open: bool,
    pub fan_count: Option<u32>,
    pub uptime_seconds: Option<u64>,
}

impl HelperStatus {
    /// Validate a status reply dictionary.
    ///
    /// Required fields: `version`, `smc_session_open`. Optional:
    /// `fan_count`, `uptime_seconds`.
    pub fn from_reply(map: &HashMap<String, OwnedValue>) -> Result<Self> {
        Ok(Self {
            version: reply_string(map, "version")?,
            smc_session_open: reply_bool(map, "smc_session_open")?,
            fan_count: map
                .get("fan_count")
                .and_then(|v| u32::try_from(v.clone()).ok()),
            uptime_seconds: map
                .get("uptime_seconds")
                .and_then(|v| u64::try_from(v.clone()).ok()),
        })
    }
}

fn missing_field(key: &str) -> SmcBridgeError {
    SmcBridgeError::ReadFailed(format!("helper reply is missing field '{}'", key))
}

fn reply_u8(map: &HashMap<String, OwnedValue>, key: &str) -> Result<u8> {
    map.get(key)
        .and_then(|v| u8::try_from(v.clone()).ok())
        .ok_or_else(|| missing_field(key))
}

fn reply_u32(map: &HashMap<String, OwnedValue>, key: &str) -> Result<u32> {
    map.get(key)
        .and_then(|v| u32::try_from(v.clone()).ok())
        .ok_or_else(|| missing_field(key))
}

fn reply_u32_opt(map: &HashMap<String, OwnedValue>, key: &str) -> Option<u32> {
    map.get(key).and_then(|v| u32::try_from(v.clone()).ok())
}

fn reply_bool(map: &HashMap<String, OwnedValue>, key: &str) -> Result<bool> {
    map.get(key)
        .and_then(|v| bool::try_from(v.clone()).ok())
        .ok_or_else(|| missing_field(key))
}

fn reply_string(map: &HashMap<String, OwnedValue>, key: &str) -> Result<String> {
    map.get(key)
        .and_then(|v| String::try_from(v.clone()).ok())
        .ok_or_else(|| missing_field(key))
}

fn reply_string_opt(map: &HashMap<String, OwnedValue>, key: &str) -> Option<String> {
    map.get(key).and_then(|v| String::try_from(v.clone()).ok())
}

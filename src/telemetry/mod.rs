//! Robot-wide telemetry bus.
//!
//! Values live in named tables of scalar keys. The pipeline only writes
//! through these traits; whether the bus is a broker or an in-process map is
//! decided by the binary.

mod callback;
mod memory;
pub mod mqtt;
mod poller;

use std::sync::Arc;

use crate::config::parse_flag;
use crate::error::TelemetryError;

pub use callback::{detector_labels, CameraCallback};
pub use memory::{MemoryBus, MemoryTable};
pub use mqtt::{MqttBus, MqttSettings};
pub use poller::Poller;

/// Stand-in for a measurement a detector did not compute.
pub const MISSING_VALUE: f64 = -9999.0;

#[derive(Clone, Debug, PartialEq)]
pub enum TelemetryValue {
    Number(f64),
    Bool(bool),
    Text(String),
}

impl TelemetryValue {
    /// Interpret a wire payload: flag spellings, then numbers, then text.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Ok(number) = raw.parse::<f64>() {
            return TelemetryValue::Number(number);
        }
        match parse_flag(raw) {
            Some(flag) => TelemetryValue::Bool(flag),
            None => TelemetryValue::Text(raw.to_string()),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TelemetryValue::Bool(flag) => Some(*flag),
            TelemetryValue::Number(n) => Some(*n != 0.0),
            TelemetryValue::Text(text) => parse_flag(text),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            TelemetryValue::Number(n) => Some(*n),
            TelemetryValue::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
            TelemetryValue::Text(text) => text.trim().parse().ok(),
        }
    }
}

impl std::fmt::Display for TelemetryValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TelemetryValue::Number(n) => write!(f, "{}", n),
            TelemetryValue::Bool(flag) => write!(f, "{}", flag),
            TelemetryValue::Text(text) => f.write_str(text),
        }
    }
}

/// One table of named values.
pub trait TelemetryTable: Send + Sync {
    fn name(&self) -> &str;

    fn put(&self, key: &str, value: TelemetryValue) -> Result<(), TelemetryError>;

    /// Latest value known locally, written by us or received from the bus.
    fn get(&self, key: &str) -> Option<TelemetryValue>;

    fn put_number(&self, key: &str, value: f64) -> Result<(), TelemetryError> {
        self.put(key, TelemetryValue::Number(value))
    }

    fn put_bool(&self, key: &str, value: bool) -> Result<(), TelemetryError> {
        self.put(key, TelemetryValue::Bool(value))
    }

    fn put_string(&self, key: &str, value: &str) -> Result<(), TelemetryError> {
        self.put(key, TelemetryValue::Text(value.to_string()))
    }

    fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    fn get_number(&self, key: &str, default: f64) -> f64 {
        self.get(key).and_then(|v| v.as_number()).unwrap_or(default)
    }
}

pub trait TelemetryBus: Send + Sync {
    fn table(&self, name: &str) -> Arc<dyn TelemetryTable>;

    /// Whether the bus is currently reachable. May be slow; callers on the
    /// frame path go through a `Poller`.
    fn is_connected(&self) -> bool;
}

//! Error taxonomy.
//!
//! Each category is contained where it occurs:
//! - `ConfigError` is fatal for the affected camera or detector only.
//! - `DeviceError` degrades a camera; it never stops the process.
//! - `DetectionError` drops one detector's results for one tick.
//! - `TelemetryError` is swallowed by the publish path.
//! - `ThreadTerminationError` is logged once during shutdown.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration could not be loaded or a value could not be resolved.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to open config source {}: {source}", path.display())]
    MissingSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("section '{section}' has no TYPE (and the default section has none)")]
    MissingType { section: String },
    #[error("section '{section}' names unknown type '{tag}'")]
    UnknownType { section: String, tag: String },
    #[error("{section}.{key}: cannot parse '{value}' as {expected}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        expected: &'static str,
    },
    #[error("{section}.{key} is required")]
    MissingKey { section: String, key: String },
}

/// A capture source failed to open or stopped responding.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("camera {name}: no device found (PORT/ID unresolved)")]
    NotFound { name: String },
    #[error("camera {name}: open failed: {reason}")]
    Open { name: String, reason: String },
    #[error("camera {name}: read failed: {reason}")]
    Read { name: String, reason: String },
    #[error("camera {name}: not open")]
    NotOpen { name: String },
    #[error("camera {name}: {reason}")]
    Unsupported { name: String, reason: String },
}

/// A detector failed on a single frame.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DetectionError {
    #[error("detector {detector}: {reason}")]
    Failed { detector: String, reason: String },
    #[error("detector {detector}: frame is {actual} bytes, expected {expected}")]
    FrameSize {
        detector: String,
        expected: usize,
        actual: usize,
    },
    #[error("detector {detector} panicked")]
    Panicked { detector: String },
}

/// The telemetry bus rejected or could not accept a value.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("telemetry bus unreachable")]
    Unreachable,
    #[error("telemetry publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
}

/// A worker did not exit within its cancellation timeout.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("worker {name} still running {timeout:?} after stop was requested")]
pub struct ThreadTerminationError {
    pub name: String,
    pub timeout: Duration,
}

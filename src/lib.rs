//! Robot vision front-end.
//!
//! Pulls frames from one or more cameras, runs the configured detectors on
//! each frame, turns bounding boxes into robot-relative distance, angle and
//! offset, and republishes the results to the robot's telemetry bus.
//!
//! # Architecture
//!
//! Every camera is driven by its own worker thread. A worker owns its camera
//! and its detector instances outright; the only state shared with other
//! threads is the per-camera snapshot it publishes after each tick and the
//! camera's `Enabled` flag.
//!
//! # Module Structure
//!
//! - `config`: sectioned key/value settings with default-section fallback
//! - `ingest`: capture sources, the `Camera` wrapper, USB port resolution
//! - `detect`: detector plugin contract, registry, target geometry
//! - `pipeline`: per-camera worker with cooperative cancellation
//! - `stats`: rolling frame-rate statistics
//! - `telemetry`: telemetry bus (MQTT or in-process) and the result callback
//! - `record`: optional MJPEG recording of captured frames

pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod record;
pub mod stats;
pub mod telemetry;

pub use config::ConfigStore;
pub use detect::{
    BoundingBox, DetectedTarget, DetectorPlugin, DetectorRegistry, NameFilter,
};
pub use error::{
    ConfigError, DetectionError, DeviceError, TelemetryError, ThreadTerminationError,
};
pub use frame::Frame;
pub use ingest::{
    Camera, CameraGeometry, CameraParams, CameraSource, CameraState, SourceRegistry,
};
pub use pipeline::{FrameResult, FrameSink, PipelineRunner, RunnerOptions, RunnerState};
pub use record::VideoTarget;
pub use stats::{FrameStats, StatsSnapshot};
pub use telemetry::{CameraCallback, MemoryBus, MqttBus, TelemetryBus, TelemetryTable};

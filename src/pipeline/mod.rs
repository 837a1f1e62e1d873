//! Per-camera capture, detect and publish loop.
//!
//! Each camera gets one `PipelineRunner`. The runner owns the camera and its
//! detector instances outright; the only state other threads can see is the
//! `CameraSnapshot` published after every tick.

mod result;
mod runner;
mod snapshot;

pub use result::{FrameResult, FrameSink};
pub use runner::{CancelToken, PipelineRunner, RunnerOptions, RunnerState};
pub use snapshot::{CameraSnapshot, SnapshotCell};

use std::collections::BTreeMap;

use crate::detect::DetectedTarget;
use crate::frame::Frame;
use crate::ingest::{CameraHealth, CameraState};
use crate::stats::StatsSnapshot;

/// Output of one pipeline tick. Borrowed from the worker; valid only for the
/// duration of the sink call.
#[derive(Debug)]
pub struct FrameResult<'a> {
    pub camera: &'a str,
    /// Telemetry table of the camera.
    pub table: &'a str,
    pub frame: &'a Frame,
    /// Detector name to targets. Detectors filtered out, or that failed this
    /// tick, have no entry.
    pub detections: &'a BTreeMap<String, Vec<DetectedTarget>>,
    /// False when the read failed and `frame` is the last good one.
    pub captured: bool,
    pub enabled: bool,
    pub state: CameraState,
    pub health: CameraHealth,
    pub stats: StatsSnapshot,
}

impl FrameResult<'_> {
    pub fn targets(&self, detector: &str) -> &[DetectedTarget] {
        self.detections.get(detector).map_or(&[], Vec::as_slice)
    }
}

/// Receives every tick's result, in capture order, on the worker thread.
pub trait FrameSink: Send {
    fn on_frame(&mut self, result: &FrameResult<'_>);
}

impl<F> FrameSink for F
where
    F: FnMut(&FrameResult<'_>) + Send,
{
    fn on_frame(&mut self, result: &FrameResult<'_>) {
        self(result)
    }
}

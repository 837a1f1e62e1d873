use crate::error::DetectionError;
use crate::frame::Frame;

use super::target::DetectedTarget;

/// Detector plugin.
///
/// Each pipeline worker constructs its own instances, so implementations may
/// keep expensive state (models, scratch buffers) in `self` without sharing
/// it across threads. Output must depend only on the inputs and that
/// worker-local state, and an all-zero frame must yield an empty result,
/// not an error.
pub trait DetectorPlugin: Send {
    /// Detector name (the config section it was built from).
    fn name(&self) -> &str;

    /// Find targets in one frame.
    fn find_objects(
        &mut self,
        frame: &Frame,
        width: u32,
        height: u32,
        fov: f64,
    ) -> Result<Vec<DetectedTarget>, DetectionError>;

    /// Optional warm-up hook, called once on the worker before the first frame.
    fn warm_up(&mut self) -> Result<(), DetectionError> {
        Ok(())
    }
}

/// Placeholder detector that never finds anything.
pub struct NullDetector {
    name: String,
}

impl NullDetector {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl DetectorPlugin for NullDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn find_objects(
        &mut self,
        _frame: &Frame,
        _width: u32,
        _height: u32,
        _fov: f64,
    ) -> Result<Vec<DetectedTarget>, DetectionError> {
        Ok(Vec::new())
    }
}

/// Reject frames whose buffer does not match the advertised size.
pub(crate) fn check_frame(
    detector: &str,
    frame: &Frame,
    width: u32,
    height: u32,
) -> Result<(), DetectionError> {
    let expected = Frame::byte_len(width, height);
    let actual = frame.as_bytes().len();
    if expected != actual {
        return Err(DetectionError::FrameSize {
            detector: detector.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

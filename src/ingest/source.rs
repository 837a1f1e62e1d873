use crate::config::ConfigStore;
use crate::error::{ConfigError, DeviceError};
use crate::frame::Frame;

/// Capture geometry shared by a camera, its source and its detectors.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraGeometry {
    pub width: u32,
    pub height: u32,
    /// Target frame rate.
    pub fps: u32,
    /// Horizontal field of view in degrees. Zero means "unknown"; geometry is
    /// then left uncomputed.
    pub fov: f64,
}

impl CameraGeometry {
    pub const DEFAULT_WIDTH: u32 = 320;
    pub const DEFAULT_HEIGHT: u32 = 240;
    pub const DEFAULT_FPS: u32 = 30;

    pub fn from_config(name: &str, cfg: &ConfigStore) -> Result<Self, ConfigError> {
        let geometry = Self {
            width: cfg.get(name, "WIDTH", Self::DEFAULT_WIDTH)?,
            height: cfg.get(name, "HEIGHT", Self::DEFAULT_HEIGHT)?,
            fps: cfg.get(name, "FPS", Self::DEFAULT_FPS)?,
            fov: cfg.get(name, "FOV", 0.0f64)?,
        };
        if geometry.width == 0 || geometry.height == 0 {
            return Err(ConfigError::InvalidValue {
                section: name.to_uppercase(),
                key: "WIDTH".to_string(),
                value: format!("{}x{}", geometry.width, geometry.height),
                expected: "non-zero resolution",
            });
        }
        Ok(geometry)
    }
}

impl Default for CameraGeometry {
    fn default() -> Self {
        Self {
            width: Self::DEFAULT_WIDTH,
            height: Self::DEFAULT_HEIGHT,
            fps: Self::DEFAULT_FPS,
            fov: 0.0,
        }
    }
}

/// Capture source contract.
///
/// Sources are driven by a `Camera`, which owns the frame buffers, state
/// tracking and failure debounce. A source only has to move pixels.
pub trait CameraSource: Send {
    /// Type tag this source was registered under.
    fn kind(&self) -> &'static str;

    /// Acquire the device. Failure leaves the camera degraded; the caller
    /// decides whether to keep running.
    fn open(&mut self, geometry: &CameraGeometry) -> Result<(), DeviceError>;

    /// Second initialization phase, run after every camera has been opened.
    fn post_init(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    /// Capture the next frame into `frame`, which is already sized to the
    /// camera geometry. On error `frame` contents are discarded.
    fn grab(&mut self, frame: &mut Frame) -> Result<(), DeviceError>;

    /// Release device resources. May be called more than once.
    fn close(&mut self) {}
}

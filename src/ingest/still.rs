use crate::config::ConfigStore;
use crate::error::{ConfigError, DeviceError};
use crate::frame::Frame;

use super::source::{CameraGeometry, CameraSource};

/// Serves the same solid frame forever. Used on benches without a camera.
pub struct StillSource {
    name: String,
    color: [u8; 3],
    frame: Option<Frame>,
}

impl StillSource {
    pub fn new(name: impl Into<String>, color: [u8; 3]) -> Self {
        Self {
            name: name.into(),
            color,
            frame: None,
        }
    }

    /// `COLOR=r,g,b`, white when absent.
    pub fn from_config(name: &str, cfg: &ConfigStore) -> Result<Self, ConfigError> {
        let color = match cfg.get_raw(name, "COLOR") {
            Some(raw) => parse_rgb(raw).ok_or_else(|| ConfigError::InvalidValue {
                section: name.to_uppercase(),
                key: "COLOR".to_string(),
                value: raw.to_string(),
                expected: "r,g,b with components 0..=255",
            })?,
            None => [255, 255, 255],
        };
        Ok(Self::new(name, color))
    }
}

pub(crate) fn parse_rgb(raw: &str) -> Option<[u8; 3]> {
    let mut parts = raw.split(',').map(|p| p.trim().parse::<u8>());
    let rgb = [parts.next()?.ok()?, parts.next()?.ok()?, parts.next()?.ok()?];
    parts.next().is_none().then_some(rgb)
}

impl CameraSource for StillSource {
    fn kind(&self) -> &'static str {
        "FRAME"
    }

    fn open(&mut self, geometry: &CameraGeometry) -> Result<(), DeviceError> {
        self.frame = Some(Frame::filled(geometry.width, geometry.height, self.color));
        Ok(())
    }

    fn grab(&mut self, frame: &mut Frame) -> Result<(), DeviceError> {
        match &self.frame {
            Some(still) if frame.copy_from(still) => Ok(()),
            Some(still) => Err(DeviceError::Read {
                name: self.name.clone(),
                reason: format!(
                    "buffer is {}x{}, still is {}x{}",
                    frame.width, frame.height, still.width, still.height
                ),
            }),
            None => Err(DeviceError::NotOpen {
                name: self.name.clone(),
            }),
        }
    }

    fn close(&mut self) {
        self.frame = None;
    }
}

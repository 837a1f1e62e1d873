//! USB camera source over V4L2.
//!
//! The device is selected by physical `PORT` (resolved through sysfs) and
//! falls back to `ID`, which is either a device index or a device path. The
//! device is opened at 1 fps so that enumeration of several cameras on one
//! bus does not saturate it; `post_init` raises the rate to the configured
//! one once every camera is open. Streaming starts on the first grab.

use crate::config::ConfigStore;
use crate::error::{ConfigError, DeviceError};
use crate::frame::Frame;

use super::ports;
use super::source::{CameraGeometry, CameraSource};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceSelector {
    Index(u32),
    Path(String),
}

impl DeviceSelector {
    fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.parse::<u32>() {
            Ok(index) => DeviceSelector::Index(index),
            Err(_) => DeviceSelector::Path(raw.to_string()),
        }
    }

    pub fn device_path(&self) -> String {
        match self {
            DeviceSelector::Index(index) => format!("/dev/video{}", index),
            DeviceSelector::Path(path) => path.clone(),
        }
    }
}

impl std::fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.device_path())
    }
}

pub struct UsbSource {
    name: String,
    selector: Option<DeviceSelector>,
    brightness: Option<i64>,
    fps: u32,
    read_error_logged: bool,
    #[cfg(feature = "ingest-v4l2")]
    device: Option<device::UsbDevice>,
}

impl UsbSource {
    pub fn new(name: impl Into<String>, selector: Option<DeviceSelector>) -> Self {
        Self {
            name: name.into(),
            selector,
            brightness: None,
            fps: 0,
            read_error_logged: false,
            #[cfg(feature = "ingest-v4l2")]
            device: None,
        }
    }

    pub fn from_config(name: &str, cfg: &ConfigStore) -> Result<Self, ConfigError> {
        let by_port = match cfg.get_raw(name, "PORT") {
            Some(_) => {
                let port: u32 = cfg.require(name, "PORT")?;
                let found = ports::find_device_index(port);
                if found.is_none() {
                    log::warn!("UsbSource: {}: nothing plugged into port {}", name, port);
                }
                found.map(DeviceSelector::Index)
            }
            None => None,
        };
        let selector = by_port.or_else(|| cfg.get_raw(name, "ID").map(DeviceSelector::parse));
        let mut source = Self::new(name, selector);
        source.brightness = match cfg.get_raw(name, "BRIGHTNESS") {
            Some(_) => Some(cfg.require(name, "BRIGHTNESS")?),
            None => None,
        };
        Ok(source)
    }

    pub fn selector(&self) -> Option<&DeviceSelector> {
        self.selector.as_ref()
    }
}

impl CameraSource for UsbSource {
    fn kind(&self) -> &'static str {
        "USB"
    }

    fn open(&mut self, geometry: &CameraGeometry) -> Result<(), DeviceError> {
        let Some(selector) = self.selector.clone() else {
            return Err(DeviceError::NotFound {
                name: self.name.clone(),
            });
        };
        self.fps = geometry.fps;
        self.read_error_logged = false;
        #[cfg(feature = "ingest-v4l2")]
        {
            let device = device::UsbDevice::open(&self.name, &selector, geometry, self.brightness)?;
            self.device = Some(device);
            Ok(())
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            Err(DeviceError::Unsupported {
                name: self.name.clone(),
                reason: format!("cannot open {}: built without the ingest-v4l2 feature", selector),
            })
        }
    }

    fn post_init(&mut self) -> Result<(), DeviceError> {
        #[cfg(feature = "ingest-v4l2")]
        if let Some(device) = self.device.as_mut() {
            device.set_fps(&self.name, self.fps)?;
        }
        Ok(())
    }

    fn grab(&mut self, frame: &mut Frame) -> Result<(), DeviceError> {
        #[cfg(feature = "ingest-v4l2")]
        {
            let Some(device) = self.device.as_mut() else {
                return Err(DeviceError::NotOpen {
                    name: self.name.clone(),
                });
            };
            let result = device.grab(&self.name, frame);
            if let Err(err) = &result {
                if !self.read_error_logged {
                    self.read_error_logged = true;
                    log::debug!("UsbSource: {}", err);
                }
            }
            result
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            let _ = frame;
            Err(DeviceError::NotOpen {
                name: self.name.clone(),
            })
        }
    }

    fn close(&mut self) {
        #[cfg(feature = "ingest-v4l2")]
        if self.device.take().is_some() {
            log::info!("UsbSource: {} released", self.name);
        }
    }
}

#[cfg(feature = "ingest-v4l2")]
mod device {
    use ouroboros::self_referencing;

    use super::super::normalize::{normalize_into, PixelFormat};
    use super::DeviceSelector;
    use crate::error::DeviceError;
    use crate::frame::Frame;
    use crate::ingest::source::CameraGeometry;

    #[self_referencing]
    struct UsbStream {
        device: v4l::Device,
        #[borrows(mut device)]
        #[covariant]
        stream: v4l::prelude::MmapStream<'this, v4l::Device>,
    }

    enum Phase {
        Configured(v4l::Device),
        Streaming(UsbStream),
    }

    pub(super) struct UsbDevice {
        phase: Option<Phase>,
        format: PixelFormat,
        width: u32,
        height: u32,
    }

    fn open_error(name: &str, reason: impl std::fmt::Display) -> DeviceError {
        DeviceError::Open {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }

    impl UsbDevice {
        pub(super) fn open(
            name: &str,
            selector: &DeviceSelector,
            geometry: &CameraGeometry,
            brightness: Option<i64>,
        ) -> Result<Self, DeviceError> {
            use v4l::video::Capture;

            let mut device = match selector {
                DeviceSelector::Index(index) => v4l::Device::new(*index as usize),
                DeviceSelector::Path(path) => v4l::Device::with_path(path),
            }
            .map_err(|err| open_error(name, format!("{}: {}", selector, err)))?;

            let mut format = device.format().map_err(|err| open_error(name, err))?;
            format.width = geometry.width;
            format.height = geometry.height;
            format.fourcc = v4l::FourCC::new(b"YUYV");
            let format = match device.set_format(&format) {
                Ok(format) => format,
                Err(err) => {
                    log::warn!("UsbSource: {}: failed to set format: {}", name, err);
                    device.format().map_err(|err| open_error(name, err))?
                }
            };
            let pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
                open_error(name, format!("unsupported pixel format {}", format.fourcc))
            })?;

            // Low rate while the other cameras enumerate.
            let params = v4l::video::capture::Parameters::with_fps(1);
            if let Err(err) = device.set_params(&params) {
                log::warn!("UsbSource: {}: failed to set fps: {}", name, err);
            }
            if let Some(value) = brightness {
                set_brightness(name, &device, value);
            }

            log::info!(
                "UsbSource: {} connected to {} ({}x{} {})",
                name,
                selector,
                format.width,
                format.height,
                format.fourcc
            );
            Ok(Self {
                phase: Some(Phase::Configured(device)),
                format: pixel_format,
                width: format.width,
                height: format.height,
            })
        }

        pub(super) fn set_fps(&mut self, name: &str, fps: u32) -> Result<(), DeviceError> {
            use v4l::video::Capture;

            if fps == 0 {
                return Ok(());
            }
            let Some(Phase::Configured(device)) = self.phase.as_ref() else {
                return Ok(());
            };
            let params = v4l::video::capture::Parameters::with_fps(fps);
            device.set_params(&params).map(|_| ()).map_err(|err| DeviceError::Open {
                name: name.to_string(),
                reason: format!("failed to set {} fps: {}", fps, err),
            })
        }

        pub(super) fn grab(&mut self, name: &str, frame: &mut Frame) -> Result<(), DeviceError> {
            use v4l::buffer::Type;
            use v4l::io::traits::CaptureStream;

            let read_error = |reason: String| DeviceError::Read {
                name: name.to_string(),
                reason,
            };

            if let Some(Phase::Configured(device)) = self.phase.take() {
                let stream = UsbStreamBuilder {
                    device,
                    stream_builder: |device| {
                        v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    },
                }
                .try_build()
                .map_err(|err| read_error(format!("create buffer stream: {}", err)))?;
                self.phase = Some(Phase::Streaming(stream));
            }
            let Some(Phase::Streaming(stream)) = self.phase.as_mut() else {
                return Err(DeviceError::NotOpen {
                    name: name.to_string(),
                });
            };

            let (format, width, height) = (self.format, self.width, self.height);
            stream
                .with_mut(|fields| {
                    let (buf, _meta) = fields.stream.next()?;
                    Ok::<_, std::io::Error>(normalize_into(buf, width, height, format, frame))
                })
                .map_err(|err| read_error(err.to_string()))?
                .map_err(|err| read_error(err.to_string()))
        }
    }

    fn set_brightness(name: &str, device: &v4l::Device, value: i64) {
        use v4l::control::{Control, Value};

        const V4L2_CID_BRIGHTNESS: u32 = 0x0098_0900;
        let control = Control {
            id: V4L2_CID_BRIGHTNESS,
            value: Value::Integer(value),
        };
        if let Err(err) = device.set_control(control) {
            log::warn!("UsbSource: {}: failed to set brightness: {}", name, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_index_or_path() {
        assert_eq!(DeviceSelector::parse(" 2 "), DeviceSelector::Index(2));
        assert_eq!(
            DeviceSelector::parse("/dev/v4l/by-id/cam"),
            DeviceSelector::Path("/dev/v4l/by-id/cam".to_string())
        );
        assert_eq!(DeviceSelector::Index(3).device_path(), "/dev/video3");
    }

    #[test]
    fn id_used_when_no_port() {
        let cfg = ConfigStore::from_text("FRONT:\nTYPE=USB\nID=4\nBRIGHTNESS=40\n");
        let source = UsbSource::from_config("FRONT", &cfg).unwrap();
        assert_eq!(source.selector(), Some(&DeviceSelector::Index(4)));
        assert_eq!(source.brightness, Some(40));
    }

    #[test]
    fn unresolved_camera_fails_open_with_not_found() {
        let cfg = ConfigStore::from_text("FRONT:\nTYPE=USB\n");
        let mut source = UsbSource::from_config("FRONT", &cfg).unwrap();
        assert!(source.selector().is_none());
        assert_eq!(
            source.open(&CameraGeometry::default()),
            Err(DeviceError::NotFound {
                name: "FRONT".to_string()
            })
        );
    }

    #[test]
    fn bad_port_is_config_error() {
        let cfg = ConfigStore::from_text("FRONT:\nPORT=left\n");
        assert!(matches!(
            UsbSource::from_config("FRONT", &cfg),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}

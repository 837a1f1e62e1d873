//! Synthetic moving-target source.
//!
//! Draws a colored rectangle sweeping across a dark gradient at the
//! configured frame rate. Gives the detectors and the telemetry path
//! something to chew on without hardware.

use std::time::{Duration, Instant};

use crate::config::ConfigStore;
use crate::error::{ConfigError, DeviceError};
use crate::frame::Frame;

use super::source::{CameraGeometry, CameraSource};
use super::still::parse_rgb;

pub struct PatternSource {
    name: String,
    color: [u8; 3],
    paced: bool,
    frame_count: u64,
    period: Duration,
    next_due: Option<Instant>,
    open: bool,
}

impl PatternSource {
    pub fn new(name: impl Into<String>, color: [u8; 3], paced: bool) -> Self {
        Self {
            name: name.into(),
            color,
            paced,
            frame_count: 0,
            period: Duration::ZERO,
            next_due: None,
            open: false,
        }
    }

    /// `COLOR=r,g,b` (orange by default), `PACED=false` to produce frames as
    /// fast as they are requested.
    pub fn from_config(name: &str, cfg: &ConfigStore) -> Result<Self, ConfigError> {
        let color = match cfg.get_raw(name, "COLOR") {
            Some(raw) => parse_rgb(raw).ok_or_else(|| ConfigError::InvalidValue {
                section: name.to_uppercase(),
                key: "COLOR".to_string(),
                value: raw.to_string(),
                expected: "r,g,b with components 0..=255",
            })?,
            None => [255, 128, 0],
        };
        Ok(Self::new(name, color, cfg.get_bool(name, "PACED", true)?))
    }

    fn wait_for_slot(&mut self) {
        if !self.paced || self.period.is_zero() {
            return;
        }
        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now {
            std::thread::sleep(due - now);
            self.next_due = Some(due + self.period);
        } else {
            // Running behind; don't try to catch up with a burst.
            self.next_due = Some(now + self.period);
        }
    }

    fn draw(&self, frame: &mut Frame) {
        let (w, h) = (frame.width, frame.height);
        for y in 0..h {
            let shade = (y * 64 / h.max(1)) as u8;
            frame.fill_rect(0, y, w, 1, [shade, shade, shade]);
        }
        let target_w = (w / 5).max(1);
        let target_h = (target_w / 2).max(1);
        let span = w.saturating_sub(target_w).max(1) as u64;
        let x = (self.frame_count % (span * 2)) as u32;
        let x = if x as u64 >= span { (span * 2) as u32 - x } else { x };
        frame.fill_rect(x, h / 2 - target_h.min(h) / 2, target_w, target_h, self.color);
    }
}

impl CameraSource for PatternSource {
    fn kind(&self) -> &'static str {
        "PATTERN"
    }

    fn open(&mut self, geometry: &CameraGeometry) -> Result<(), DeviceError> {
        self.period = if geometry.fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(1) / geometry.fps
        };
        self.next_due = None;
        self.open = true;
        log::info!(
            "PatternSource: {} connected ({}x{} @ {} fps, synthetic)",
            self.name,
            geometry.width,
            geometry.height,
            geometry.fps
        );
        Ok(())
    }

    fn grab(&mut self, frame: &mut Frame) -> Result<(), DeviceError> {
        if !self.open {
            return Err(DeviceError::NotOpen {
                name: self.name.clone(),
            });
        }
        self.wait_for_slot();
        self.frame_count += 1;
        self.draw(frame);
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{DetectorPlugin, RectDetector, RectSettings};

    #[test]
    fn target_moves_between_frames() {
        let mut source = PatternSource::new("SIM", [255, 128, 0], false);
        source.open(&CameraGeometry::default()).unwrap();
        let mut a = Frame::zeroed(320, 240);
        let mut b = Frame::zeroed(320, 240);
        source.grab(&mut a).unwrap();
        source.grab(&mut b).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn rect_detector_finds_the_target() {
        let mut source = PatternSource::new("SIM", [255, 128, 0], false);
        source.open(&CameraGeometry::default()).unwrap();
        let mut frame = Frame::zeroed(320, 240);
        source.grab(&mut frame).unwrap();

        let mut detector = RectDetector::new(
            "TARGET",
            RectSettings {
                hsv_min: [5, 150, 150],
                hsv_max: [25, 255, 255],
                min_area: 50,
                tolerance: 0.2,
                min_aspect: 0.0,
                min_visible: 0.9,
                real_width: 10.0,
                real_height: 5.0,
                reciprocal: false,
            },
        );
        let found = detector.find_objects(&frame, 320, 240, 60.0).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].bbox.w, 64.0);
    }

    #[test]
    fn paced_source_holds_the_frame_rate() {
        let mut source = PatternSource::new("SIM", [255, 128, 0], true);
        let geometry = CameraGeometry {
            width: 16,
            height: 8,
            fps: 50,
            fov: 0.0,
        };
        source.open(&geometry).unwrap();
        let mut frame = Frame::zeroed(16, 8);
        let start = Instant::now();
        for _ in 0..4 {
            source.grab(&mut frame).unwrap();
        }
        // First frame is immediate, the next three wait 20ms each.
        assert!(start.elapsed() >= Duration::from_millis(55));
    }
}

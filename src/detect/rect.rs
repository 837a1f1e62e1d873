//! Color-range rectangle detector.
//!
//! Thresholds the frame in HSV (8-bit convention: H in 0..=180, S and V in
//! 0..=255), groups masked pixels into 4-connected blobs and keeps the blobs
//! whose bounding boxes match the configured real-world aspect ratio.

use crate::config::ConfigStore;
use crate::error::{ConfigError, DetectionError};
use crate::frame::Frame;

use super::geometry::populate;
use super::plugin::{check_frame, DetectorPlugin};
use super::target::{BoundingBox, DetectedTarget};

#[derive(Clone, Debug, PartialEq)]
pub struct RectSettings {
    pub hsv_min: [u8; 3],
    pub hsv_max: [u8; 3],
    /// Minimum bounding-box area in pixels.
    pub min_area: u32,
    /// Allowed relative deviation of the observed aspect from the real one.
    pub tolerance: f64,
    /// Minimum observed h/w.
    pub min_aspect: f64,
    /// Minimum share of the bounding box covered by the blob.
    pub min_visible: f64,
    pub real_width: f64,
    pub real_height: f64,
    /// Also accept the target rotated by 90 degrees.
    pub reciprocal: bool,
}

impl RectSettings {
    pub fn from_config(section: &str, cfg: &ConfigStore) -> Result<Self, ConfigError> {
        Ok(Self {
            hsv_min: [
                cfg.get(section, "HMIN", 0u8)?,
                cfg.get(section, "SMIN", 0u8)?,
                cfg.get(section, "VMIN", 0u8)?,
            ],
            hsv_max: [
                cfg.get(section, "HMAX", 255u8)?,
                cfg.get(section, "SMAX", 255u8)?,
                cfg.get(section, "VMAX", 255u8)?,
            ],
            min_area: cfg.get(section, "MINAREA", 0u32)?,
            tolerance: cfg.get(section, "TOLERANCE", 10.0f64)?,
            min_aspect: cfg.get(section, "MINASPECT", 0.0f64)?,
            min_visible: cfg.get(section, "MINVIS", 0.0f64)?,
            real_width: cfg.require(section, "WIDTH")?,
            real_height: cfg.require(section, "HEIGHT")?,
            reciprocal: cfg.get_bool(section, "RECIPROCAL", false)?,
        })
    }

    fn aspect(&self) -> f64 {
        self.real_height / self.real_width
    }

    fn shape_matches(&self, w: f64, h: f64) -> bool {
        let aspect = self.aspect();
        if h / w < self.min_aspect {
            return false;
        }
        let upright = (h / w / aspect - 1.0).abs() <= self.tolerance;
        let rotated = self.reciprocal && (w / h / aspect - 1.0).abs() <= self.tolerance;
        upright || rotated
    }
}

#[derive(Clone, Copy, Debug)]
struct Blob {
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    pixels: u32,
}

impl Blob {
    fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }
}

pub struct RectDetector {
    name: String,
    settings: RectSettings,
    mask: Vec<bool>,
    stack: Vec<usize>,
}

impl RectDetector {
    pub fn new(name: impl Into<String>, settings: RectSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            mask: Vec::new(),
            stack: Vec::new(),
        }
    }

    pub fn from_config(section: &str, cfg: &ConfigStore) -> Result<Self, ConfigError> {
        let settings = RectSettings::from_config(section, cfg)?;
        if !(settings.real_width > 0.0 && settings.real_height > 0.0) {
            return Err(ConfigError::InvalidValue {
                section: section.to_string(),
                key: "WIDTH".to_string(),
                value: format!("{}x{}", settings.real_width, settings.real_height),
                expected: "positive real width and height",
            });
        }
        Ok(Self::new(section, settings))
    }

    fn build_mask(&mut self, frame: &Frame) {
        let [h_lo, s_lo, v_lo] = self.settings.hsv_min;
        let [h_hi, s_hi, v_hi] = self.settings.hsv_max;
        self.mask.clear();
        self.mask.extend(frame.as_bytes().chunks_exact(3).map(|px| {
            let [h, s, v] = rgb_to_hsv([px[0], px[1], px[2]]);
            (h_lo..=h_hi).contains(&h) && (s_lo..=s_hi).contains(&s) && (v_lo..=v_hi).contains(&v)
        }));
    }

    fn blobs(&mut self, width: u32, height: u32) -> Vec<Blob> {
        let w = width as usize;
        let mut blobs = Vec::new();
        for start in 0..self.mask.len() {
            if !self.mask[start] {
                continue;
            }
            self.mask[start] = false;
            self.stack.push(start);
            let mut blob = Blob {
                min_x: u32::MAX,
                min_y: u32::MAX,
                max_x: 0,
                max_y: 0,
                pixels: 0,
            };
            while let Some(idx) = self.stack.pop() {
                let x = (idx % w) as u32;
                let y = (idx / w) as u32;
                blob.min_x = blob.min_x.min(x);
                blob.min_y = blob.min_y.min(y);
                blob.max_x = blob.max_x.max(x);
                blob.max_y = blob.max_y.max(y);
                blob.pixels += 1;

                let mut visit = |n: usize| {
                    if self.mask[n] {
                        self.mask[n] = false;
                        self.stack.push(n);
                    }
                };
                if x > 0 {
                    visit(idx - 1);
                }
                if x + 1 < width {
                    visit(idx + 1);
                }
                if y > 0 {
                    visit(idx - w);
                }
                if y + 1 < height {
                    visit(idx + w);
                }
            }
            blobs.push(blob);
        }
        blobs.sort_by(|a, b| b.pixels.cmp(&a.pixels));
        blobs
    }
}

impl DetectorPlugin for RectDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn find_objects(
        &mut self,
        frame: &Frame,
        width: u32,
        height: u32,
        fov: f64,
    ) -> Result<Vec<DetectedTarget>, DetectionError> {
        check_frame(&self.name, frame, width, height)?;
        self.build_mask(frame);

        let mut found = Vec::new();
        for blob in self.blobs(width, height) {
            let (w, h) = (blob.width(), blob.height());
            if w * h < self.settings.min_area {
                // Blobs are sorted by size; the rest are smaller still.
                break;
            }
            let (wf, hf) = (w as f64, h as f64);
            if !self.settings.shape_matches(wf, hf) {
                continue;
            }
            if (blob.pixels as f64) / (wf * hf) < self.settings.min_visible {
                continue;
            }
            let Some(bbox) = BoundingBox::new(blob.min_x as f64, blob.min_y as f64, wf, hf) else {
                continue;
            };
            let mut target = DetectedTarget::new(self.name.clone(), bbox);
            populate(&mut target, self.settings.real_width, width, height, fov);
            found.push(target);
        }
        Ok(found)
    }
}

/// RGB to 8-bit HSV (H halved to fit 0..=180).
pub fn rgb_to_hsv(rgb: [u8; 3]) -> [u8; 3] {
    let [r, g, b] = rgb.map(|c| c as f32);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    let s = if max > 0.0 { delta / max * 255.0 } else { 0.0 };
    let mut h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (g - b) / delta
    } else if max == g {
        120.0 + 60.0 * (b - r) / delta
    } else {
        240.0 + 60.0 * (r - g) / delta
    };
    if h < 0.0 {
        h += 360.0;
    }
    [
        (h / 2.0).round().min(180.0) as u8,
        s.round() as u8,
        max as u8,
    ]
}

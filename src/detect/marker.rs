//! Fiducial marker adapter.
//!
//! Marker decoding itself is done by an external engine behind
//! `MarkerBackend`. This module turns the engine's corner quads into
//! `DetectedTarget`s with the same bounding-box geometry every other detector
//! uses, optionally refining distance from the quad's vertical edges.

use crate::config::ConfigStore;
use crate::error::{ConfigError, DetectionError};
use crate::frame::Frame;

use super::geometry::{populate, refine_with_corners};
use super::plugin::{check_frame, DetectorPlugin};
use super::registry::DetectorFactory;
use super::target::{BoundingBox, DetectedTarget};

/// Default printed marker size (outer black border), in inches.
pub const DEFAULT_MARKER_SIZE: f64 = 6.5;

/// One decoded marker, in pixel coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct MarkerObservation {
    pub id: i64,
    pub corners: [[f64; 2]; 4],
    pub center: [f64; 2],
}

/// External marker engine. Receives an 8-bit grayscale image.
pub trait MarkerBackend: Send {
    fn detect(
        &mut self,
        gray: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<MarkerObservation>, String>;
}

pub struct MarkerDetector<B> {
    name: String,
    backend: B,
    marker_size: f64,
    refine: bool,
    gray: Vec<u8>,
}

impl<B: MarkerBackend> MarkerDetector<B> {
    pub fn new(name: impl Into<String>, backend: B, marker_size: f64, refine: bool) -> Self {
        Self {
            name: name.into(),
            backend,
            marker_size,
            refine,
            gray: Vec::new(),
        }
    }

    pub fn from_config(section: &str, cfg: &ConfigStore, backend: B) -> Result<Self, ConfigError> {
        let size = cfg.get(section, "SIZE", DEFAULT_MARKER_SIZE)?;
        let refine = cfg.get_bool(section, "POSE_REFINE", false)?;
        Ok(Self::new(section, backend, size, refine))
    }

    fn to_target(&self, obs: &MarkerObservation, width: u32, height: u32, fov: f64) -> Option<DetectedTarget> {
        let (min_x, max_x) = bounds(obs.corners.iter().map(|c| c[0]));
        let (min_y, max_y) = bounds(obs.corners.iter().map(|c| c[1]));
        let w = (max_x - min_x).trunc();
        let h = (max_y - min_y).trunc();
        let bbox = BoundingBox::new(
            (obs.center[0] - (w / 2.0).floor()).trunc(),
            (obs.center[1] - (h / 2.0).floor()).trunc(),
            w,
            h,
        )?;
        let mut target = DetectedTarget::new(self.name.clone(), bbox).with_ident(obs.id);
        populate(&mut target, self.marker_size, width, height, fov);
        if self.refine {
            if let Some(angle) = target.angle {
                if let Some(refined) =
                    refine_with_corners(&obs.corners, self.marker_size, width, fov, angle)
                {
                    target.distance = Some(refined);
                }
            }
        }
        Some(target)
    }
}

/// Registry constructor that builds a fresh backend for every detector
/// instance, so each pipeline worker owns its own engine.
pub fn marker_factory<B, F>(make_backend: F) -> DetectorFactory
where
    B: MarkerBackend + 'static,
    F: Fn() -> B + Send + Sync + 'static,
{
    Box::new(move |section: &str, cfg: &ConfigStore| {
        Ok(Box::new(MarkerDetector::from_config(section, cfg, make_backend())?)
            as Box<dyn DetectorPlugin>)
    })
}

impl<B: MarkerBackend> DetectorPlugin for MarkerDetector<B> {
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
        to_gray(frame, &mut self.gray);
        let observations = self
            .backend
            .detect(&self.gray, width, height)
            .map_err(|reason| DetectionError::Failed {
                detector: self.name.clone(),
                reason,
            })?;
        Ok(observations
            .iter()
            .filter_map(|obs| self.to_target(obs, width, height, fov))
            .collect())
    }
}

fn bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    })
}

/// BT.601 luma.
fn to_gray(frame: &Frame, out: &mut Vec<u8>) {
    out.clear();
    out.extend(frame.as_bytes().chunks_exact(3).map(|px| {
        ((px[0] as u32 * 299 + px[1] as u32 * 587 + px[2] as u32 * 114) / 1000) as u8
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedBackend {
        observations: Vec<MarkerObservation>,
        seen_len: usize,
    }

    impl MarkerBackend for FixedBackend {
        fn detect(
            &mut self,
            gray: &[u8],
            _width: u32,
            _height: u32,
        ) -> Result<Vec<MarkerObservation>, String> {
            self.seen_len = gray.len();
            Ok(self.observations.clone())
        }
    }

    struct FailingBackend;

    impl MarkerBackend for FailingBackend {
        fn detect(&mut self, _: &[u8], _: u32, _: u32) -> Result<Vec<MarkerObservation>, String> {
            Err("decoder crashed".to_string())
        }
    }

    fn centered_marker(id: i64) -> MarkerObservation {
        MarkerObservation {
            id,
            corners: [[128.0, 88.0], [193.0, 88.0], [193.0, 153.0], [128.0, 153.0]],
            center: [160.5, 120.5],
        }
    }

    #[test]
    fn observation_becomes_identified_target() {
        let backend = FixedBackend {
            observations: vec![centered_marker(7)],
            seen_len: 0,
        };
        let mut detector = MarkerDetector::new("APRIL", backend, DEFAULT_MARKER_SIZE, false);
        let frame = Frame::zeroed(320, 240);
        let found = detector.find_objects(&frame, 320, 240, 60.0).unwrap();
        assert_eq!(detector.backend.seen_len, 320 * 240);
        assert_eq!(found.len(), 1);
        let target = &found[0];
        assert_eq!(target.ident, Some(7));
        assert_eq!(target.bbox.w, 65.0);
        assert_eq!(target.bbox.x, 128.0);
        let distance = target.distance.unwrap();
        assert!((distance - 27.7).abs() < 0.5, "distance {}", distance);
    }

    #[test]
    fn degenerate_quad_is_dropped() {
        let backend = FixedBackend {
            observations: vec![MarkerObservation {
                id: 1,
                corners: [[10.0, 10.0]; 4],
                center: [10.0, 10.0],
            }],
            seen_len: 0,
        };
        let mut detector = MarkerDetector::new("APRIL", backend, DEFAULT_MARKER_SIZE, true);
        let frame = Frame::zeroed(32, 24);
        assert!(detector.find_objects(&frame, 32, 24, 60.0).unwrap().is_empty());
    }

    #[test]
    fn backend_failure_is_detection_error() {
        let mut detector = MarkerDetector::new("APRIL", FailingBackend, DEFAULT_MARKER_SIZE, false);
        let frame = Frame::zeroed(32, 24);
        assert!(matches!(
            detector.find_objects(&frame, 32, 24, 60.0),
            Err(DetectionError::Failed { .. })
        ));
    }

    #[test]
    fn factory_reads_marker_settings() {
        let cfg = ConfigStore::from_text("APRIL:\nTYPE=MARKER\nSIZE=8\nPOSE_REFINE=yes\n");
        let mut registry = crate::detect::DetectorRegistry::new();
        registry.register_factory("MARKER", marker_factory(|| FixedBackend {
            observations: vec![centered_marker(3)],
            seen_len: 0,
        }));
        let mut detector = registry.create("APRIL", &cfg).unwrap();
        let frame = Frame::zeroed(320, 240);
        let found = detector.find_objects(&frame, 320, 240, 60.0).unwrap();
        assert_eq!(found[0].ident, Some(3));
    }
}

//! Detector plugins and target geometry.
//!
//! - `DetectorPlugin`: per-worker detection contract
//! - `DetectorRegistry`: `TYPE` tag to constructor map
//! - `geometry`: bounding box to distance/angle/offset
//! - `RectDetector`: color-range rectangles (`RECT`)
//! - `MarkerDetector`: adapter for external fiducial engines (`MARKER`)

mod filter;
pub mod geometry;
pub mod marker;
mod plugin;
pub mod rect;
mod registry;
mod target;

pub use filter::NameFilter;
pub use marker::{marker_factory, MarkerBackend, MarkerDetector, MarkerObservation};
pub use plugin::{DetectorPlugin, NullDetector};
pub use rect::{RectDetector, RectSettings};
pub use registry::{DetectorFactory, DetectorRegistry};
pub use target::{BoundingBox, DetectedTarget};

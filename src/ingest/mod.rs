//! Camera capture.
//!
//! Sources are looked up by the `TYPE` tag of a camera's config section:
//! - `USB`: V4L2 device selected by physical port or id (feature: ingest-v4l2)
//! - `FRAME`: a solid still frame, for benches without hardware
//! - `PATTERN`: synthetic moving target, paced to the configured rate
//!
//! Every source is wrapped in a `Camera`, which owns the frame buffers and
//! turns device failures into a degraded state instead of errors that would
//! stop the pipeline.

mod camera;
#[cfg_attr(not(feature = "ingest-v4l2"), allow(dead_code))]
mod normalize;
mod pattern;
pub mod ports;
mod registry;
mod source;
mod still;
pub mod usb;

pub use camera::{Camera, CameraHealth, CameraParams, CameraState};
pub use pattern::PatternSource;
pub use registry::{SourceFactory, SourceRegistry};
pub use source::{CameraGeometry, CameraSource};
pub use still::StillSource;
pub use usb::{DeviceSelector, UsbSource};

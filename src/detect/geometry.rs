//! Bounding box to robot-relative measurement under a pinhole camera model.
//!
//! Given a target of known physical width, the observed pixel width fixes a
//! scale (units per pixel). The horizontal field of view then fixes the
//! distance to the target plane:
//!
//! ```text
//! per_pixel = real_width / w
//! planar    = per_pixel * frame_width / (2 * tan(fov / 2))
//! lateral   = per_pixel * ((x + w / 2) - frame_width / 2)
//! angle     = -atan(lateral / planar)            (degrees)
//! distance  = planar * cos(angle)
//! offset    = -lateral
//! ```
//!
//! The half-angle form `fov / 2` is used everywhere.

use super::target::DetectedTarget;

/// Result of the bounding-box conversion.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Measurement {
    pub distance: f64,
    pub angle: f64,
    pub offset: f64,
}

/// True when `measure` is defined for these inputs.
pub fn geometry_defined(pixel_width: f64, fov_degrees: f64) -> bool {
    pixel_width.is_finite() && pixel_width != 0.0 && fov_degrees.is_finite() && fov_degrees > 0.0
}

fn planar_distance(per_pixel: f64, frame_width: f64, fov_degrees: f64) -> f64 {
    per_pixel * frame_width / (2.0 * (fov_degrees / 2.0).to_radians().tan())
}

/// Pure conversion. Callers must check `geometry_defined(w, fov)` first.
pub fn measure(x: f64, w: f64, real_width: f64, frame_width: f64, fov_degrees: f64) -> Measurement {
    debug_assert!(geometry_defined(w, fov_degrees));
    let per_pixel = real_width / w;
    let planar = planar_distance(per_pixel, frame_width, fov_degrees);
    let lateral = per_pixel * ((x + w / 2.0) - frame_width / 2.0);
    let angle = -(lateral / planar).atan().to_degrees();
    Measurement {
        distance: planar * angle.to_radians().cos(),
        angle,
        offset: -lateral,
    }
}

/// Fill distance, angle, offset and screen percent on a target.
///
/// Leaves the target untouched when the geometry is undefined (zero width or
/// a non-positive field of view).
pub fn populate(
    target: &mut DetectedTarget,
    real_width: f64,
    frame_width: u32,
    frame_height: u32,
    fov_degrees: f64,
) -> bool {
    let bbox = target.bbox;
    if !geometry_defined(bbox.w, fov_degrees) {
        return false;
    }
    let m = measure(bbox.x, bbox.w, real_width, frame_width as f64, fov_degrees);
    target.distance = Some(m.distance);
    target.angle = Some(m.angle);
    target.offset = Some(m.offset);
    target.percent = screen_percent(bbox.w, bbox.h, frame_width, frame_height);
    true
}

pub fn screen_percent(w: f64, h: f64, frame_width: u32, frame_height: u32) -> Option<f64> {
    let frame_area = frame_width as f64 * frame_height as f64;
    if frame_area <= 0.0 {
        return None;
    }
    Some((w * h / frame_area * 100.0).min(100.0))
}

/// Distance from the vertical edges of a square marker's corner quad.
///
/// Vertical edges do not foreshorten when the marker is yawed relative to the
/// camera, so they give a better scale than the bounding-box width. The angle
/// from the bounding-box conversion is reused to project onto the ground.
pub fn refine_with_corners(
    corners: &[[f64; 2]; 4],
    real_size: f64,
    frame_width: u32,
    fov_degrees: f64,
    angle_degrees: f64,
) -> Option<f64> {
    let mut sorted = *corners;
    sorted.sort_by(|a, b| a[0].total_cmp(&b[0]));
    let edge = |p: [f64; 2], q: [f64; 2]| ((p[0] - q[0]).powi(2) + (p[1] - q[1]).powi(2)).sqrt();
    let vertical = (edge(sorted[0], sorted[1]) + edge(sorted[2], sorted[3])) / 2.0;
    if !geometry_defined(vertical, fov_degrees) {
        return None;
    }
    let planar = planar_distance(real_size / vertical, frame_width as f64, fov_degrees);
    Some(planar * angle_degrees.to_radians().cos())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::target::BoundingBox;

    const EPS: f64 = 1e-9;

    #[test]
    fn centered_target() {
        let m = measure(127.5, 65.0, 6.5, 320.0, 60.0);
        assert!(m.offset.abs() < EPS);
        assert!(m.angle.abs() < EPS);
        let expected = 0.1 * 320.0 / (2.0 * 30f64.to_radians().tan());
        assert!((m.distance - expected).abs() < EPS);
        assert!((m.distance - 27.7128).abs() < 1e-3);
    }

    #[test]
    fn scale_invariance() {
        let a = measure(40.0, 30.0, 6.5, 320.0, 60.0);
        let b = measure(40.0 - 15.0, 60.0, 13.0, 320.0, 60.0);
        // Same center, doubled width and doubled real size.
        assert!((a.angle - b.angle).abs() < EPS);
        assert!((a.distance - b.distance).abs() < EPS);

        let c = measure(40.0, 30.0, 13.0, 320.0, 60.0);
        assert!((c.distance - 2.0 * a.distance).abs() < 1e-9);
        assert!((c.angle - a.angle).abs() < EPS);
    }

    #[test]
    fn target_left_of_center_has_positive_angle_and_offset() {
        let m = measure(10.0, 20.0, 6.5, 320.0, 60.0);
        assert!(m.angle > 0.0);
        assert!(m.offset > 0.0);
        assert!(m.distance > 0.0);
    }

    #[test]
    fn populate_refuses_undefined_geometry() {
        let bbox = BoundingBox::new(0.0, 0.0, 10.0, 10.0).unwrap();
        let mut target = DetectedTarget::new("RING", bbox);
        assert!(!populate(&mut target, 14.0, 320, 240, 0.0));
        assert_eq!(target.distance, None);
        assert!(populate(&mut target, 14.0, 320, 240, 60.0));
        assert!(target.distance.is_some());
        assert!((target.percent.unwrap() - 100.0 * 100.0 / 76_800.0).abs() < EPS);
    }

    #[test]
    fn refined_distance_matches_unyawed_square() {
        // A 65px square centered in the frame: vertical edges equal the width.
        let corners = [[127.5, 87.5], [192.5, 87.5], [192.5, 152.5], [127.5, 152.5]];
        let m = measure(127.5, 65.0, 6.5, 320.0, 60.0);
        let refined = refine_with_corners(&corners, 6.5, 320, 60.0, m.angle).unwrap();
        assert!((refined - m.distance).abs() < 1e-9);
    }
}

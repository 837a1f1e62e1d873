use serde::Serialize;

/// Pixel-space bounding box. Width and height are always positive.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl BoundingBox {
    /// Returns `None` for degenerate boxes (zero, negative, or non-finite size).
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Option<Self> {
        if !(w.is_finite() && h.is_finite() && w > 0.0 && h > 0.0) {
            return None;
        }
        Some(Self { x, y, w, h })
    }

    pub fn center_x(&self) -> f64 {
        self.x + self.w / 2.0
    }

    pub fn area(&self) -> f64 {
        self.w * self.h
    }
}

/// One detection. Optional fields are `None` when a detector does not compute
/// them for its category; `None` is not zero.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectedTarget {
    pub category: String,
    pub bbox: BoundingBox,
    /// Distance along the ground to the target, in the units of the target's real width.
    pub distance: Option<f64>,
    /// Horizontal angle to the target in degrees; positive is left of center.
    pub angle: Option<f64>,
    /// Lateral offset from the optical axis; positive is left of center.
    pub offset: Option<f64>,
    /// Share of the frame covered by the bounding box, 0..=100.
    pub percent: Option<f64>,
    pub ident: Option<i64>,
}

impl DetectedTarget {
    pub fn new(category: impl Into<String>, bbox: BoundingBox) -> Self {
        Self {
            category: category.into(),
            bbox,
            distance: None,
            angle: None,
            offset: None,
            percent: None,
            ident: None,
        }
    }

    pub fn with_ident(mut self, ident: i64) -> Self {
        self.ident = Some(ident);
        self
    }
}

impl std::fmt::Display for DetectedTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} at ({:.0}, {:.0}) {:.0}x{:.0}",
            self.category, self.bbox.x, self.bbox.y, self.bbox.w, self.bbox.h
        )?;
        if let Some(distance) = self.distance {
            write!(f, " d={:.2}", distance)?;
        }
        if let Some(angle) = self.angle {
            write!(f, " a={:.2}", angle)?;
        }
        if let Some(offset) = self.offset {
            write!(f, " o={:.2}", offset)?;
        }
        if let Some(ident) = self.ident {
            write!(f, " id={}", ident)?;
        }
        Ok(())
    }
}

//! Normalized centre-form boxes, the canonical geometry of the output layout.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use super::PixelBox;

/// Slack allowed on edge checks so that boxes touching the image border are
/// not rejected over float rounding (e.g. `0.7 + 0.3` landing above 1.0).
const EDGE_EPSILON: f64 = 1e-9;

/// Why a box failed the validity check.
#[derive(Clone, Copy, Debug, Error, PartialEq)]
pub enum BoxError {
    #[error("coordinates are not finite")]
    NonFinite,

    #[error("center ({x:.6}, {y:.6}) lies outside [0, 1]")]
    CenterOutOfRange { x: f64, y: f64 },

    #[error("size {width:.6}x{height:.6} must be in (0, 1]")]
    SizeOutOfRange { width: f64, height: f64 },

    #[error("box edges extend past the image border")]
    EdgeOutOfBounds,
}

/// A bounding box as fractions of the image size: `(x_center, y_center, width, height)`.
///
/// Fields are private so that every value of this type has passed
/// [`NormalizedBox::new`]: `0 < width, height <= 1`, the centre lies in
/// `[0, 1]`, and all four edges lie inside the image.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct NormalizedBox {
    x_center: f64,
    y_center: f64,
    width: f64,
    height: f64,
}

impl NormalizedBox {
    /// Validates and builds a box from normalized centre-form values.
    pub fn new(x_center: f64, y_center: f64, width: f64, height: f64) -> Result<Self, BoxError> {
        if !(x_center.is_finite() && y_center.is_finite() && width.is_finite() && height.is_finite())
        {
            return Err(BoxError::NonFinite);
        }

        if !((0.0..=1.0).contains(&x_center) && (0.0..=1.0).contains(&y_center)) {
            return Err(BoxError::CenterOutOfRange {
                x: x_center,
                y: y_center,
            });
        }

        if !(width > 0.0 && width <= 1.0 && height > 0.0 && height <= 1.0) {
            return Err(BoxError::SizeOutOfRange { width, height });
        }

        let left = x_center - width / 2.0;
        let right = x_center + width / 2.0;
        let top = y_center - height / 2.0;
        let bottom = y_center + height / 2.0;

        let inside = |edge: f64| (-EDGE_EPSILON..=1.0 + EDGE_EPSILON).contains(&edge);
        if !(inside(left) && inside(right) && inside(top) && inside(bottom)) {
            return Err(BoxError::EdgeOutOfBounds);
        }

        Ok(Self {
            x_center,
            y_center,
            width,
            height,
        })
    }

    /// Normalizes an absolute XYXY box against the image size.
    ///
    /// `x_center = (xmin + xmax) / 2 / image_width`, `width = (xmax - xmin) / image_width`,
    /// and likewise for y. A zero image dimension yields a non-finite box,
    /// which is rejected.
    pub fn from_pixel(
        bbox: &PixelBox,
        image_width: f64,
        image_height: f64,
    ) -> Result<Self, BoxError> {
        let (cx, cy) = bbox.center();
        Self::new(
            cx / image_width,
            cy / image_height,
            bbox.width() / image_width,
            bbox.height() / image_height,
        )
    }

    /// The synthetic box covering the whole image, used for classification-only sources.
    pub fn full_image() -> Self {
        Self {
            x_center: 0.5,
            y_center: 0.5,
            width: 1.0,
            height: 1.0,
        }
    }

    #[inline]
    pub fn x_center(&self) -> f64 {
        self.x_center
    }

    #[inline]
    pub fn y_center(&self) -> f64 {
        self.y_center
    }

    #[inline]
    pub fn width(&self) -> f64 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> f64 {
        self.height
    }

    /// Converts back to absolute XYXY coordinates for an image of the given size.
    pub fn to_pixel(&self, image_width: f64, image_height: f64) -> PixelBox {
        let half_w = self.width / 2.0;
        let half_h = self.height / 2.0;
        PixelBox::from_xyxy(
            (self.x_center - half_w) * image_width,
            (self.y_center - half_h) * image_height,
            (self.x_center + half_w) * image_width,
            (self.y_center + half_h) * image_height,
        )
    }
}

/// Formats as the four label-file fields with fixed 6-decimal precision.
impl fmt::Display for NormalizedBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.6} {:.6} {:.6} {:.6}",
            self.x_center, self.y_center, self.width, self.height
        )
    }
}

//! Absolute pixel-space boxes in XYXY form.

use serde::{Deserialize, Serialize};

/// An axis-aligned box in absolute pixel coordinates (xmin, ymin, xmax, ymax).
///
/// This is the shape COCO, VOC and CSV annotations are read into before
/// normalization. Like the source files themselves it may be malformed
/// (inverted, negative, NaN); [`NormalizedBox::from_pixel`] is where such
/// boxes get rejected.
///
/// [`NormalizedBox::from_pixel`]: super::NormalizedBox::from_pixel
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PixelBox {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl PixelBox {
    /// Creates a box from explicit corner coordinates.
    #[inline]
    pub fn from_xyxy(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    /// Converts from XYWH format where (x, y) is the top-left corner.
    ///
    /// This is the format used by COCO annotations.
    #[inline]
    pub fn from_xywh(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self::from_xyxy(x, y, x + width, y + height)
    }

    /// Width of the box. Negative if the box is inverted.
    #[inline]
    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    /// Height of the box. Negative if the box is inverted.
    #[inline]
    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }

    /// Centre point of the box.
    #[inline]
    pub fn center(&self) -> (f64, f64) {
        (
            (self.xmin + self.xmax) / 2.0,
            (self.ymin + self.ymax) / 2.0,
        )
    }

    /// Returns true if all coordinates are finite.
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.xmin.is_finite()
            && self.ymin.is_finite()
            && self.xmax.is_finite()
            && self.ymax.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_xywh_offsets_max_corner() {
        let bbox = PixelBox::from_xywh(10.0, 20.0, 90.0, 60.0);
        assert_eq!(bbox, PixelBox::from_xyxy(10.0, 20.0, 100.0, 80.0));
    }

    #[test]
    fn dimensions_and_center() {
        let bbox = PixelBox::from_xyxy(10.0, 20.0, 100.0, 80.0);
        assert_eq!(bbox.width(), 90.0);
        assert_eq!(bbox.height(), 60.0);
        assert_eq!(bbox.center(), (55.0, 50.0));
    }

    #[test]
    fn non_finite_coordinates_are_detected() {
        assert!(PixelBox::from_xyxy(0.0, 0.0, 1.0, 1.0).is_finite());
        assert!(!PixelBox::from_xyxy(f64::NAN, 0.0, 1.0, 1.0).is_finite());
        assert!(!PixelBox::from_xyxy(0.0, 0.0, f64::INFINITY, 1.0).is_finite());
    }
}

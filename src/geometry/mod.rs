//! Bounding-box geometry.
//!
//! Source formats describe boxes in two ways: absolute pixel corners (COCO,
//! VOC, CSV) or normalized centre form (YOLO). Everything downstream of the
//! parsers works with [`NormalizedBox`], which is only handed out once it has
//! passed its validity check.
//!
//! # Example
//!
//! ```
//! use detnorm::geometry::{NormalizedBox, PixelBox};
//!
//! let coco = PixelBox::from_xywh(10.0, 20.0, 100.0, 50.0);
//! let norm = NormalizedBox::from_pixel(&coco, 640.0, 480.0).expect("box fits the image");
//! assert!((norm.x_center() - 0.09375).abs() < 1e-9);
//! ```

mod bbox;
mod normalized;

pub use bbox::PixelBox;
pub use normalized::{BoxError, NormalizedBox};

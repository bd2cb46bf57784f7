#![allow(dead_code)]

use std::path::PathBuf;

use detnorm::geometry::{NormalizedBox, PixelBox};
use detnorm::model::{Annotation, ImageRecord};
use proptest::prelude::*;
use proptest::test_runner::{Config as ProptestConfig, FileFailurePersistence};

/// Pixel round-trips lose at most this much per coordinate.
pub const EPS_PIXEL: f64 = 1e-6;

pub fn proptest_config() -> ProptestConfig {
    let cases = std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(64);

    let mut config = ProptestConfig::with_failure_persistence(FileFailurePersistence::WithSource(
        "proptest-regressions",
    ));
    config.cases = cases;
    config.max_shrink_iters = 1024;
    config
}

/// An image size and a box that lies fully inside it with non-zero area.
pub fn arb_image_and_box() -> impl Strategy<Value = ((u32, u32), PixelBox)> {
    (8u32..4096, 8u32..4096).prop_flat_map(|(w, h)| {
        (0..w - 1, 0..h - 1).prop_flat_map(move |(x0, y0)| {
            (x0 + 1..=w, y0 + 1..=h).prop_map(move |(x1, y1)| {
                (
                    (w, h),
                    PixelBox::from_xyxy(x0 as f64, y0 as f64, x1 as f64, y1 as f64),
                )
            })
        })
    })
}

/// Records with unique paths and hashes; `n_classes` distinct first-annotation classes.
pub fn arb_records(max_len: usize, n_classes: usize) -> impl Strategy<Value = Vec<ImageRecord>> {
    prop::collection::vec(0..n_classes, 1..=max_len).prop_map(|classes| {
        classes
            .into_iter()
            .enumerate()
            .map(|(index, class_id)| record(index, class_id))
            .collect()
    })
}

pub fn record(index: usize, class_id: usize) -> ImageRecord {
    ImageRecord {
        dataset: "ds".to_string(),
        key: format!("{index:05}.jpg"),
        source_path: PathBuf::from(format!("ds/{index:05}.jpg")),
        content_hash: format!("{index:064x}"),
        annotations: vec![Annotation::new(class_id, NormalizedBox::full_image())],
        width: 16,
        height: 16,
    }
}

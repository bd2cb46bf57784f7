//! COCO JSON reader.
//!
//! COCO boxes are `[x, y, width, height]` with `(x, y)` the top-left corner
//! in pixels, measured against the `width`/`height` of the owning image
//! entry. A dataset may carry several annotation files (`instances_train.json`,
//! `instances_val.json`, ...); they are read in sorted order and merged by
//! `file_name`.
//!
//! Annotation entries are decoded one at a time, so a single malformed entry
//! is counted and skipped. A file that is not valid COCO JSON is skipped as a
//! whole; the parse only fails if no file could be read.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{AnnotationParser, ImageLocator, ParsedDataset};
use crate::detect::DatasetFormat;
use crate::error::DetnormError;
use crate::geometry::PixelBox;
use crate::labels::LabelMapper;

/// Top-level COCO structure. Only the parts needed for detection are kept.
#[derive(Debug, Deserialize)]
struct CocoDataset {
    images: Vec<CocoImage>,
    annotations: Vec<serde_json::Value>,
    #[serde(default)]
    categories: Vec<CocoCategory>,
}

#[derive(Debug, Deserialize)]
struct CocoImage {
    id: u64,
    width: u32,
    height: u32,
    file_name: String,
}

#[derive(Debug, Deserialize)]
struct CocoCategory {
    id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct CocoAnnotation {
    image_id: u64,
    category_id: u64,
    /// `[x, y, width, height]`, top-left origin.
    bbox: [f64; 4],
}

/// Parser for datasets with one or more COCO annotation files.
pub struct CocoParser {
    root: PathBuf,
    annotation_files: Vec<PathBuf>,
}

impl CocoParser {
    pub fn new(root: PathBuf, annotation_files: Vec<PathBuf>) -> Self {
        Self {
            root,
            annotation_files,
        }
    }
}

impl AnnotationParser for CocoParser {
    fn format(&self) -> DatasetFormat {
        DatasetFormat::Coco
    }

    fn parse(&self, mapper: &LabelMapper) -> Result<ParsedDataset, DetnormError> {
        let mut merged = ParsedDataset::default();
        let mut first_error = None;
        let mut read_any = false;
        for path in &self.annotation_files {
            let coco = match read_coco_file(path) {
                Ok(coco) => coco,
                Err(err) => {
                    log::error!("{}", err);
                    merged.stats.malformed += 1;
                    first_error.get_or_insert(err);
                    continue;
                }
            };
            read_any = true;
            log::info!(
                "Parsing COCO JSON {} ({} images, {} annotations)",
                path.display(),
                coco.images.len(),
                coco.annotations.len()
            );
            merged.extend(coco_to_parsed(coco, mapper));
        }
        match first_error {
            Some(err) if !read_any => return Err(err),
            _ => {}
        }

        let mut locator = ImageLocator::new(&self.root);
        for (key, image) in merged.images.iter_mut() {
            image.path = locator.locate(key);
            if image.path.is_none() {
                log::warn!("Image '{}' not found under {}", key, self.root.display());
                merged.stats.missing_image += 1;
            }
        }

        Ok(merged)
    }
}

fn read_coco_file(path: &Path) -> Result<CocoDataset, DetnormError> {
    let file = File::open(path).map_err(DetnormError::io_at(path))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| DetnormError::CocoJsonParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Converts one COCO document. Image paths are left for the caller to locate.
fn coco_to_parsed(coco: CocoDataset, mapper: &LabelMapper) -> ParsedDataset {
    let images: BTreeMap<u64, &CocoImage> = coco.images.iter().map(|img| (img.id, img)).collect();
    let categories: BTreeMap<u64, &str> = coco
        .categories
        .iter()
        .map(|cat| (cat.id, cat.name.as_str()))
        .collect();

    let mut parsed = ParsedDataset::default();

    for (index, value) in coco.annotations.into_iter().enumerate() {
        let ann: CocoAnnotation = match serde_json::from_value(value) {
            Ok(ann) => ann,
            Err(err) => {
                log::warn!("Skipping malformed COCO annotation #{}: {}", index, err);
                parsed.stats.malformed += 1;
                continue;
            }
        };

        let Some(image) = images.get(&ann.image_id) else {
            log::warn!("Image ID {} not found in images list", ann.image_id);
            parsed.stats.malformed += 1;
            continue;
        };

        let Some(class_name) = categories.get(&ann.category_id) else {
            log::warn!(
                "Category ID {} not found in categories, skipping annotation on {}",
                ann.category_id,
                image.file_name
            );
            parsed.stats.unrecognized_class += 1;
            continue;
        };

        let [x, y, w, h] = ann.bbox;
        parsed.push_pixel_box(
            &image.file_name,
            class_name,
            PixelBox::from_xywh(x, y, w, h),
            (f64::from(image.width), f64::from(image.height)),
            mapper,
        );
    }

    parsed
}

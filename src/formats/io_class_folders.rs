//! Classification-style datasets: one subdirectory per class.
//!
//! There is no box information, so every image gets a single annotation
//! covering the whole frame. The directory name is the source label.

use std::path::PathBuf;

use super::{is_image_file, list_dir_sorted, rel_string, AnnotationParser, ParsedDataset};
use crate::detect::DatasetFormat;
use crate::error::DetnormError;
use crate::geometry::NormalizedBox;
use crate::labels::LabelMapper;
use crate::model::Annotation;

/// Parser for `<class>/<image>` layouts.
pub struct ClassFolderParser {
    class_dirs: Vec<PathBuf>,
}

impl ClassFolderParser {
    pub fn new(class_dirs: Vec<PathBuf>) -> Self {
        Self { class_dirs }
    }
}

impl AnnotationParser for ClassFolderParser {
    fn format(&self) -> DatasetFormat {
        DatasetFormat::ClassFolders
    }

    fn parse(&self, mapper: &LabelMapper) -> Result<ParsedDataset, DetnormError> {
        let mut parsed = ParsedDataset::default();

        for dir in &self.class_dirs {
            let Some(label) = dir.file_name().map(|name| name.to_string_lossy().to_string())
            else {
                continue;
            };
            let images: Vec<PathBuf> = list_dir_sorted(dir)?
                .into_iter()
                .filter(|path| is_image_file(path))
                .collect();

            let Some(class_id) = mapper.class_id_for(&label) else {
                log::warn!(
                    "Unknown class folder '{}', skipping {} images",
                    label,
                    images.len()
                );
                parsed.stats.unrecognized_class += images.len();
                continue;
            };

            let root = dir.parent().unwrap_or(dir);
            for image in images {
                let key = rel_string(root, &image);
                parsed
                    .entry(&key, Some(image))
                    .annotations
                    .push(Annotation::new(class_id, NormalizedBox::full_image()));
            }
        }

        Ok(parsed)
    }
}

//! Per-format annotation parsers.
//!
//! Each supported layout has one parser type implementing
//! [`AnnotationParser`]. The detector picks the layout once; [`parser_for`]
//! turns that layout into the matching parser, and from there the pipeline
//! only talks to the trait.
//!
//! Parsers never fail on a single bad annotation. Unknown classes, malformed
//! lines and boxes that fail [`NormalizedBox`] validation are logged, counted
//! in [`ParseStats`] and skipped. Errors are reserved for problems with the
//! dataset as a whole (unreadable annotation file, missing columns).

pub mod io_class_folders;
pub mod io_coco;
pub mod io_csv;
pub mod io_voc;
pub mod io_yolo;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use walkdir::WalkDir;

use crate::detect::{DatasetFormat, DatasetLayout};
use crate::error::DetnormError;
use crate::geometry::{NormalizedBox, PixelBox};
use crate::labels::LabelMapper;
use crate::model::Annotation;

/// Image encodings the pipeline accepts, by extension.
pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// Extensions that mark a directory as carrying annotations.
pub const ANNOTATION_EXTENSIONS: [&str; 3] = ["xml", "txt", "json"];

/// Converts one dataset layout into canonical annotations.
pub trait AnnotationParser: Send + Sync {
    /// The layout this parser reads.
    fn format(&self) -> DatasetFormat;

    /// Parses every annotation in the dataset, resolving labels through `mapper`.
    fn parse(&self, mapper: &LabelMapper) -> Result<ParsedDataset, DetnormError>;
}

/// Knobs that change how a layout is read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParseOptions {
    /// Image size used for CSV rows that do not carry one.
    pub assumed_resolution: (u32, u32),
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            assumed_resolution: io_csv::DEFAULT_ASSUMED_RESOLUTION,
        }
    }
}

/// Builds the parser for a detected layout. `Unknown` has no parser.
pub fn parser_for(
    root: &Path,
    layout: DatasetLayout,
    options: &ParseOptions,
) -> Option<Box<dyn AnnotationParser>> {
    let root = root.to_path_buf();
    match layout {
        DatasetLayout::Coco { annotation_files } => {
            Some(Box::new(io_coco::CocoParser::new(root, annotation_files)))
        }
        DatasetLayout::Voc {
            annotations_dir,
            images_dir,
        } => Some(Box::new(io_voc::VocParser::new(annotations_dir, images_dir))),
        DatasetLayout::Yolo {
            images_dir,
            labels_dir,
        } => Some(Box::new(io_yolo::YoloParser::new(
            root, images_dir, labels_dir,
        ))),
        DatasetLayout::Csv { csv_file } => Some(Box::new(
            io_csv::CsvParser::new(root, csv_file)
                .with_assumed_resolution(options.assumed_resolution),
        )),
        DatasetLayout::ClassFolders { class_dirs } => Some(Box::new(
            io_class_folders::ClassFolderParser::new(class_dirs),
        )),
        DatasetLayout::Unknown => None,
    }
}

/// Counters for everything a parser skipped.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ParseStats {
    /// Annotations whose label resolved outside the taxonomy, or whose class
    /// reference could not be followed.
    pub unrecognized_class: usize,
    /// Annotations dropped because their box failed validation.
    pub invalid_box: usize,
    /// Lines, rows, or files that could not be parsed at all.
    pub malformed: usize,
    /// Annotated images whose file could not be found.
    pub missing_image: usize,
}

impl ParseStats {
    pub fn merge(&mut self, other: &ParseStats) {
        self.unrecognized_class += other.unrecognized_class;
        self.invalid_box += other.invalid_box;
        self.malformed += other.malformed;
        self.missing_image += other.missing_image;
    }
}

/// One image as seen by a parser.
#[derive(Clone, Debug, Default)]
pub struct ParsedImage {
    /// Where the image file lives, if it could be located.
    pub path: Option<PathBuf>,
    pub annotations: Vec<Annotation>,
}

/// The output of [`AnnotationParser::parse`]: annotations keyed by image.
///
/// Keys are file names as the source refers to them (relative paths for
/// directory-based layouts). The map is ordered, which fixes the scan order
/// used by deduplication.
#[derive(Clone, Debug, Default)]
pub struct ParsedDataset {
    pub images: BTreeMap<String, ParsedImage>,
    pub stats: ParseStats,
}

impl ParsedDataset {
    /// Total number of annotations across all images.
    pub fn annotation_count(&self) -> usize {
        self.images.values().map(|img| img.annotations.len()).sum()
    }

    /// Returns the entry for `key`, creating it with `path` if it is new.
    pub fn entry(&mut self, key: &str, path: Option<PathBuf>) -> &mut ParsedImage {
        let image = self.images.entry(key.to_string()).or_default();
        if image.path.is_none() {
            image.path = path;
        }
        image
    }

    /// Resolves `label`, normalizes `bbox` and appends the result to `key`.
    ///
    /// Returns true if an annotation was added.
    pub fn push_pixel_box(
        &mut self,
        key: &str,
        label: &str,
        bbox: PixelBox,
        image_size: (f64, f64),
        mapper: &LabelMapper,
    ) -> bool {
        let Some(class_id) = mapper.class_id_for(label) else {
            log::warn!("Class '{}' not in taxonomy, skipping annotation in {}", label, key);
            self.stats.unrecognized_class += 1;
            return false;
        };

        match NormalizedBox::from_pixel(&bbox, image_size.0, image_size.1) {
            Ok(norm) => {
                self.entry(key, None)
                    .annotations
                    .push(Annotation::new(class_id, norm));
                true
            }
            Err(reason) => {
                log::warn!(
                    "Invalid bbox in {}: {},{},{},{} on {}x{} ({})",
                    key,
                    bbox.xmin,
                    bbox.ymin,
                    bbox.xmax,
                    bbox.ymax,
                    image_size.0,
                    image_size.1,
                    reason
                );
                self.stats.invalid_box += 1;
                false
            }
        }
    }

    /// Merges `other` into `self`, appending annotations for shared keys.
    pub fn extend(&mut self, other: ParsedDataset) {
        for (key, image) in other.images {
            let entry = self.entry(&key, image.path);
            entry.annotations.extend(image.annotations);
        }
        self.stats.merge(&other.stats);
    }
}

/// Lazily built lookup from bare file name to path, for sources (COCO, CSV)
/// that reference images by name only.
pub(crate) struct ImageLocator {
    root: PathBuf,
    by_name: Option<BTreeMap<String, PathBuf>>,
}

impl ImageLocator {
    pub(crate) fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            by_name: None,
        }
    }

    /// Finds an image by the name a source uses for it.
    ///
    /// Tries `root/<name>`, then `root/images/<name>`, then the first file in
    /// the tree (sorted by relative path) with the same file name.
    pub(crate) fn locate(&mut self, name: &str) -> Option<PathBuf> {
        let direct = self.root.join(name);
        if direct.is_file() {
            return Some(direct);
        }

        let in_images = self.root.join("images").join(name);
        if in_images.is_file() {
            return Some(in_images);
        }

        let file_name = Path::new(name).file_name()?.to_string_lossy().to_string();
        let root = &self.root;
        self.by_name
            .get_or_insert_with(|| index_files_by_name(root))
            .get(&file_name)
            .cloned()
    }
}

fn index_files_by_name(root: &Path) -> BTreeMap<String, PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect();
    files.sort_by_cached_key(|path| rel_string(root, path));

    let mut index = BTreeMap::new();
    for path in files {
        if let Some(name) = path.file_name() {
            index
                .entry(name.to_string_lossy().to_string())
                .or_insert(path);
        }
    }
    index
}

/// Recursively collects files with one of `extensions`, sorted by relative path.
pub(crate) fn collect_files_with_extensions(
    root: &Path,
    extensions: &[&str],
) -> Result<Vec<PathBuf>, DetnormError> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.map_err(|source| DetnormError::Traverse {
            path: root.to_path_buf(),
            message: source.to_string(),
        })?;

        if entry.file_type().is_file() && has_extension(entry.path(), extensions) {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_by_cached_key(|path| rel_string(root, path));
    Ok(files)
}

/// Lists the direct children of `dir`, sorted by file name.
pub(crate) fn list_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>, DetnormError> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(DetnormError::io_at(dir))? {
        let entry = entry.map_err(DetnormError::io_at(dir))?;
        entries.push(entry.path());
    }
    entries.sort_by_cached_key(|path| {
        path.file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default()
    });
    Ok(entries)
}

pub(crate) fn has_extension(path: &Path, allowed: &[&str]) -> bool {
    let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
        return false;
    };

    allowed
        .iter()
        .any(|allowed_ext| ext.eq_ignore_ascii_case(allowed_ext))
}

pub(crate) fn is_image_file(path: &Path) -> bool {
    path.is_file() && has_extension(path, &IMAGE_EXTENSIONS)
}

pub(crate) fn rel_string(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.to_string_lossy().replace('\\', "/")
}

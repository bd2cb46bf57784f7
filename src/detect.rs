//! Dataset layout detection.
//!
//! [`detect`] classifies a dataset directory by probing for each known layout
//! in a fixed priority order (COCO, VOC, YOLO, CSV, class folders). The first
//! probe that matches wins and returns a [`DatasetLayout`] carrying the paths
//! it found, which the matching parser then reads. Nothing here opens an
//! image.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::DetnormError;
use crate::formats::{has_extension, is_image_file, list_dir_sorted, rel_string, ANNOTATION_EXTENSIONS};

/// CSV columns that must be present (compared case-insensitively).
pub const CSV_REQUIRED_COLUMNS: [&str; 6] = ["filename", "xmin", "ymin", "xmax", "ymax", "class"];

/// Directory names that belong to annotated layouts and never name a class.
const RESERVED_DIR_NAMES: [&str; 4] = ["Annotations", "labels", "images", "JPEGImages"];

/// The layouts the pipeline knows how to read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DatasetFormat {
    Coco,
    Voc,
    Yolo,
    Csv,
    #[value(name = "class_folders", alias = "class-folders")]
    ClassFolders,
    #[value(skip)]
    Unknown,
}

impl DatasetFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            DatasetFormat::Coco => "coco",
            DatasetFormat::Voc => "voc",
            DatasetFormat::Yolo => "yolo",
            DatasetFormat::Csv => "csv",
            DatasetFormat::ClassFolders => "class_folders",
            DatasetFormat::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DatasetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected layout plus the evidence the detector found for it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum DatasetLayout {
    Coco {
        /// COCO JSON files, sorted by path relative to the dataset root.
        annotation_files: Vec<PathBuf>,
    },
    Voc {
        annotations_dir: PathBuf,
        images_dir: PathBuf,
    },
    Yolo {
        images_dir: PathBuf,
        labels_dir: PathBuf,
    },
    Csv {
        csv_file: PathBuf,
    },
    ClassFolders {
        /// Class subdirectories, sorted by name.
        class_dirs: Vec<PathBuf>,
    },
    Unknown,
}

impl DatasetLayout {
    pub fn format(&self) -> DatasetFormat {
        match self {
            DatasetLayout::Coco { .. } => DatasetFormat::Coco,
            DatasetLayout::Voc { .. } => DatasetFormat::Voc,
            DatasetLayout::Yolo { .. } => DatasetFormat::Yolo,
            DatasetLayout::Csv { .. } => DatasetFormat::Csv,
            DatasetLayout::ClassFolders { .. } => DatasetFormat::ClassFolders,
            DatasetLayout::Unknown => DatasetFormat::Unknown,
        }
    }
}

/// Classifies `root`. Returns [`DatasetLayout::Unknown`] when no probe matches.
///
/// Errors when `root` is missing or a directory a probe needs cannot be read.
pub fn detect(root: &Path) -> Result<DatasetLayout, DetnormError> {
    if !root.is_dir() {
        return Err(DetnormError::SourceNotFound {
            path: root.to_path_buf(),
        });
    }

    const PROBES: [DatasetFormat; 5] = [
        DatasetFormat::Coco,
        DatasetFormat::Voc,
        DatasetFormat::Yolo,
        DatasetFormat::Csv,
        DatasetFormat::ClassFolders,
    ];

    for format in PROBES {
        match probe(root, format) {
            Ok(layout) => return Ok(layout),
            Err(err) if is_layout_mismatch(&err) => {
                log::debug!("{} is not {}: {}", root.display(), format, err);
            }
            Err(err) => return Err(err),
        }
    }

    Ok(DatasetLayout::Unknown)
}

/// True for probe errors that only mean "this is not that layout". Anything
/// else (an unreadable directory, say) is a real failure.
fn is_layout_mismatch(err: &DetnormError) -> bool {
    matches!(
        err,
        DetnormError::MissingDirectory { .. } | DetnormError::MissingAnnotationFile { .. }
    )
}

/// Returns the layout for `root`, either detected or forced by the caller.
///
/// A forced format whose required files are missing is an error naming
/// what is missing. With no forced format, an undetectable dataset is an
/// error only if `require_known` is set.
pub fn layout_for(
    root: &Path,
    forced: Option<DatasetFormat>,
    require_known: bool,
) -> Result<DatasetLayout, DetnormError> {
    match forced {
        Some(DatasetFormat::Unknown) | None => {
            let layout = detect(root)?;
            if require_known && layout == DatasetLayout::Unknown {
                return Err(DetnormError::UnknownFormat {
                    path: root.to_path_buf(),
                });
            }
            Ok(layout)
        }
        Some(format) => {
            if !root.is_dir() {
                return Err(DetnormError::SourceNotFound {
                    path: root.to_path_buf(),
                });
            }
            probe(root, format)
        }
    }
}

fn probe(root: &Path, format: DatasetFormat) -> Result<DatasetLayout, DetnormError> {
    match format {
        DatasetFormat::Coco => probe_coco(root),
        DatasetFormat::Voc => probe_voc(root),
        DatasetFormat::Yolo => probe_yolo(root),
        DatasetFormat::Csv => probe_csv(root),
        DatasetFormat::ClassFolders => probe_class_folders(root),
        DatasetFormat::Unknown => Ok(DatasetLayout::Unknown),
    }
}

#[derive(Deserialize)]
struct CocoTopLevelKeys {
    #[allow(dead_code)]
    images: IgnoredAny,
    #[allow(dead_code)]
    annotations: IgnoredAny,
}

fn is_coco_file_name(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        return false;
    };
    name == "annotations.json" || (name.starts_with("instances_") && name.ends_with(".json"))
}

fn has_coco_keys(path: &Path) -> bool {
    let Ok(file) = fs::File::open(path) else {
        return false;
    };
    serde_json::from_reader::<_, CocoTopLevelKeys>(std::io::BufReader::new(file)).is_ok()
}

fn probe_coco(root: &Path) -> Result<DatasetLayout, DetnormError> {
    let mut annotation_files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file() && is_coco_file_name(entry.path()))
        .map(|entry| entry.into_path())
        .filter(|path| has_coco_keys(path))
        .collect();

    if annotation_files.is_empty() {
        return Err(DetnormError::MissingAnnotationFile {
            format: DatasetFormat::Coco,
            path: root.to_path_buf(),
            expected: "annotations.json or instances_*.json with 'images' and 'annotations'"
                .to_string(),
        });
    }

    annotation_files.sort_by_cached_key(|path| rel_string(root, path));
    Ok(DatasetLayout::Coco { annotation_files })
}

fn probe_voc(root: &Path) -> Result<DatasetLayout, DetnormError> {
    let annotations_dir = root.join("Annotations");
    if !annotations_dir.is_dir() {
        return Err(missing_dir(DatasetFormat::Voc, root, "Annotations"));
    }

    let has_xml = list_dir_sorted(&annotations_dir)?
        .iter()
        .any(|path| path.is_file() && has_extension(path, &["xml"]));
    if !has_xml {
        return Err(DetnormError::MissingAnnotationFile {
            format: DatasetFormat::Voc,
            path: annotations_dir,
            expected: "*.xml".to_string(),
        });
    }

    let images_dir = ["JPEGImages", "images"]
        .iter()
        .map(|name| root.join(name))
        .find(|dir| dir.is_dir())
        .ok_or_else(|| missing_dir(DatasetFormat::Voc, root, "JPEGImages or images"))?;

    Ok(DatasetLayout::Voc {
        annotations_dir,
        images_dir,
    })
}

fn probe_yolo(root: &Path) -> Result<DatasetLayout, DetnormError> {
    let images_dir = root.join("images");
    let labels_dir = root.join("labels");

    if !images_dir.is_dir() {
        return Err(missing_dir(DatasetFormat::Yolo, root, "images"));
    }
    if !labels_dir.is_dir() {
        return Err(missing_dir(DatasetFormat::Yolo, root, "labels"));
    }

    let has_txt = WalkDir::new(&labels_dir)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .any(|entry| entry.file_type().is_file() && has_extension(entry.path(), &["txt"]));
    if !has_txt {
        return Err(DetnormError::MissingAnnotationFile {
            format: DatasetFormat::Yolo,
            path: labels_dir,
            expected: "*.txt".to_string(),
        });
    }

    Ok(DatasetLayout::Yolo {
        images_dir,
        labels_dir,
    })
}

fn probe_csv(root: &Path) -> Result<DatasetLayout, DetnormError> {
    for path in list_dir_sorted(root)? {
        if path.is_file() && has_extension(&path, &["csv"]) && has_required_csv_columns(&path) {
            return Ok(DatasetLayout::Csv { csv_file: path });
        }
    }

    Err(DetnormError::MissingAnnotationFile {
        format: DatasetFormat::Csv,
        path: root.to_path_buf(),
        expected: format!("top-level *.csv with columns {}", CSV_REQUIRED_COLUMNS.join(",")),
    })
}

fn has_required_csv_columns(path: &Path) -> bool {
    let Ok(mut reader) = csv::ReaderBuilder::new().has_headers(true).from_path(path) else {
        return false;
    };
    let Ok(headers) = reader.headers() else {
        return false;
    };
    let headers: Vec<String> = headers.iter().map(|h| h.trim().to_lowercase()).collect();
    CSV_REQUIRED_COLUMNS
        .iter()
        .all(|required| headers.iter().any(|h| h == required))
}

fn probe_class_folders(root: &Path) -> Result<DatasetLayout, DetnormError> {
    let subdirs: Vec<PathBuf> = list_dir_sorted(root)?
        .into_iter()
        .filter(|path| path.is_dir() && !is_hidden(path))
        .collect();

    let not_class_folders = |reason: String| DetnormError::MissingDirectory {
        format: DatasetFormat::ClassFolders,
        path: root.to_path_buf(),
        expected: reason,
    };

    if subdirs.len() < 2 {
        return Err(not_class_folders(
            "at least two class subdirectories".to_string(),
        ));
    }

    for dir in &subdirs {
        let name = dir_name(dir);
        if RESERVED_DIR_NAMES.contains(&name.as_str()) {
            return Err(not_class_folders(format!(
                "class subdirectories only ('{name}' belongs to an annotated layout)"
            )));
        }

        let children = list_dir_sorted(dir)?;
        if !children.iter().any(|path| is_image_file(path)) {
            return Err(not_class_folders(format!("images inside '{name}'")));
        }
        if children
            .iter()
            .any(|path| path.is_file() && has_extension(path, &ANNOTATION_EXTENSIONS))
        {
            return Err(not_class_folders(format!(
                "no annotation files inside '{name}'"
            )));
        }
    }

    Ok(DatasetLayout::ClassFolders { class_dirs: subdirs })
}

fn missing_dir(format: DatasetFormat, root: &Path, expected: &str) -> DetnormError {
    DetnormError::MissingDirectory {
        format,
        path: root.to_path_buf(),
        expected: expected.to_string(),
    }
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn is_hidden(path: &Path) -> bool {
    dir_name(path).starts_with('.')
}

use std::path::PathBuf;
use thiserror::Error;

use crate::detect::DatasetFormat;

/// The main error type for detnorm operations.
///
/// Variants other than `Io` name the precondition that was violated so the
/// CLI can print something more useful than a generic failure.
#[derive(Debug, Error)]
pub enum DetnormError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error at {path}: {source}")]
    IoAt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Source directory not found: {path}")]
    SourceNotFound { path: PathBuf },

    #[error("Failed while traversing {path}: {message}")]
    Traverse { path: PathBuf, message: String },

    #[error("Invalid split ratios ({train}, {val}, {test}): {message}")]
    InvalidSplitRatios {
        train: f64,
        val: f64,
        test: f64,
        message: String,
    },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Failed to parse configuration {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("No dataset format recognized in {path}")]
    UnknownFormat { path: PathBuf },

    #[error("Dataset {path} is missing required {format} directory '{expected}'")]
    MissingDirectory {
        format: DatasetFormat,
        path: PathBuf,
        expected: String,
    },

    #[error("Dataset {path} has no {format} annotation file ({expected})")]
    MissingAnnotationFile {
        format: DatasetFormat,
        path: PathBuf,
        expected: String,
    },

    #[error("Failed to parse COCO JSON from {path}: {source}")]
    CocoJsonParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to read CSV from {path}: {source}")]
    CsvParse {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("CSV {path} is missing required column '{column}'")]
    CsvMissingColumn { path: PathBuf, column: String },

    #[error("Failed to parse VOC XML {path}: {message}")]
    VocXmlParse { path: PathBuf, message: String },

    #[error("Failed to parse YOLO label {path} line {line}: {message}")]
    YoloLabelParse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Failed to parse YOLO data.yaml {path}: {source}")]
    YoloDataYamlParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid class names in YOLO data.yaml {path}: {message}")]
    YoloDataYamlNames { path: PathBuf, message: String },

    #[error("Empty working set: {message}")]
    EmptyWorkingSet { message: String },

    #[error("Failed to write {path}: {source}")]
    JsonWrite {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Run cancelled before the manifest was written")]
    Cancelled,
}

impl DetnormError {
    /// Attaches a path to a bare I/O error.
    pub(crate) fn io_at(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| DetnormError::IoAt { path, source }
    }
}

//! Core records that flow through the ingestion pipeline.
//!
//! Parsers produce [`Annotation`] lists keyed by image; verification turns
//! each located image into an [`ImageRecord`]; the deduplicator and splitter
//! only ever move whole records around.

use std::path::PathBuf;

use serde::Serialize;

use crate::error::DetnormError;
use crate::geometry::NormalizedBox;
use crate::labels::normalize_label;

/// The default target taxonomy.
pub const DEFAULT_TAXONOMY: [&str; 6] = ["plastic", "metal", "glass", "paper", "cardboard", "other"];

/// A labelled box. `class_id` indexes the run's [`ClassTaxonomy`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Annotation {
    pub class_id: usize,
    #[serde(rename = "box")]
    pub bbox: NormalizedBox,
}

impl Annotation {
    pub fn new(class_id: usize, bbox: NormalizedBox) -> Self {
        Self { class_id, bbox }
    }

    /// Renders the annotation as one canonical label-file line.
    pub fn to_label_line(&self) -> String {
        format!("{} {}", self.class_id, self.bbox)
    }
}

/// A verified source image together with its normalized annotations.
#[derive(Clone, Debug, Serialize)]
pub struct ImageRecord {
    /// Name of the dataset directory the image came from.
    pub dataset: String,
    /// Key the parser used for the image (file name or path relative to the dataset).
    pub key: String,
    pub source_path: PathBuf,
    /// Lowercase hex SHA-256 of the file bytes.
    pub content_hash: String,
    pub annotations: Vec<Annotation>,
    pub width: u32,
    pub height: u32,
}

impl ImageRecord {
    /// Class used to stratify this record: the class of its first annotation.
    pub fn representative_class(&self) -> Option<usize> {
        self.annotations.first().map(|ann| ann.class_id)
    }
}

/// The fixed, ordered list of target class names for a run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ClassTaxonomy {
    names: Vec<String>,
}

impl ClassTaxonomy {
    /// Builds a taxonomy, rejecting empty names and names that collide after
    /// label normalization (they could never be told apart by the mapper).
    pub fn new<I, S>(names: I) -> Result<Self, DetnormError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(DetnormError::InvalidConfig {
                message: "taxonomy must contain at least one class".to_string(),
            });
        }

        let mut seen = std::collections::BTreeMap::new();
        for (index, name) in names.iter().enumerate() {
            let normalized = normalize_label(name);
            if normalized.is_empty() {
                return Err(DetnormError::InvalidConfig {
                    message: format!("taxonomy entry {index} is empty"),
                });
            }
            if let Some(first) = seen.insert(normalized, index) {
                return Err(DetnormError::InvalidConfig {
                    message: format!(
                        "taxonomy entries {first} and {index} ('{name}') are the same class"
                    ),
                });
            }
        }

        Ok(Self { names })
    }

    /// Class names in id order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Class id for a taxonomy name, compared after label normalization.
    pub fn class_id(&self, name: &str) -> Option<usize> {
        let wanted = normalize_label(name);
        self.names
            .iter()
            .position(|candidate| normalize_label(candidate) == wanted)
    }

    pub fn name(&self, class_id: usize) -> Option<&str> {
        self.names.get(class_id).map(String::as_str)
    }
}

impl Default for ClassTaxonomy {
    fn default() -> Self {
        Self {
            names: DEFAULT_TAXONOMY.iter().map(|s| s.to_string()).collect(),
        }
    }
}

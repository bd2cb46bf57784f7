//! Pipeline configuration.
//!
//! Every field has a default, so an empty YAML file (or none at all) is a
//! valid configuration. The CLI loads the file first and then overrides
//! individual fields from flags; [`PipelineConfig::validate`] runs on the
//! merged result before any dataset is touched.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::DetnormError;
use crate::formats::ParseOptions;
use crate::labels::{LabelMapper, DEFAULT_FALLBACK_CLASS, DEFAULT_FUZZY_THRESHOLD};
use crate::model::{ClassTaxonomy, DEFAULT_TAXONOMY};
use crate::split::SplitRatios;

/// Seed used when none is configured.
pub const DEFAULT_SEED: u64 = 42;

/// Split ratios as written in the file; validated into [`SplitRatios`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SplitConfig {
    pub train: f64,
    pub val: f64,
    pub test: f64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        let ratios = SplitRatios::default();
        Self {
            train: ratios.train(),
            val: ratios.val(),
            test: ratios.test(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        let (width, height) = crate::formats::io_csv::DEFAULT_ASSUMED_RESOLUTION;
        Self { width, height }
    }
}

/// Settings for one `prepare` run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Target class names; a class id is the position in this list.
    pub taxonomy: Vec<String>,
    /// Class assigned when no resolution stage matches.
    pub fallback_class: String,
    /// Minimum fuzzy similarity, in percent.
    pub fuzzy_threshold: f64,
    /// Source label -> target class, checked before anything else.
    pub overrides: BTreeMap<String, String>,
    pub split: SplitConfig,
    pub seed: u64,
    /// Image size assumed for CSV rows without width/height columns.
    pub assumed_resolution: Resolution,
    /// Fail instead of skipping datasets whose layout is not recognized.
    pub require_known_format: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            taxonomy: DEFAULT_TAXONOMY.iter().map(|s| s.to_string()).collect(),
            fallback_class: DEFAULT_FALLBACK_CLASS.to_string(),
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            overrides: BTreeMap::new(),
            split: SplitConfig::default(),
            seed: DEFAULT_SEED,
            assumed_resolution: Resolution::default(),
            require_known_format: false,
        }
    }
}

impl PipelineConfig {
    /// Reads a YAML configuration file.
    pub fn load(path: &Path) -> Result<Self, DetnormError> {
        let raw = fs::read_to_string(path).map_err(DetnormError::io_at(path))?;
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&raw).map_err(|source| DetnormError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Checks everything that can be checked without touching a dataset.
    pub fn validate(&self) -> Result<(), DetnormError> {
        self.ratios()?;
        let taxonomy = self.taxonomy()?;

        if !(0.0..=100.0).contains(&self.fuzzy_threshold) {
            return Err(DetnormError::InvalidConfig {
                message: format!(
                    "fuzzy_threshold {} must be between 0 and 100",
                    self.fuzzy_threshold
                ),
            });
        }

        if self.fallback_class.trim().is_empty() {
            return Err(DetnormError::InvalidConfig {
                message: "fallback_class must not be empty".to_string(),
            });
        }
        if taxonomy.class_id(&self.fallback_class).is_none() {
            log::warn!(
                "Fallback class '{}' is not in the taxonomy; unmatched labels will be dropped",
                self.fallback_class
            );
        }

        if self.assumed_resolution.width == 0 || self.assumed_resolution.height == 0 {
            return Err(DetnormError::InvalidConfig {
                message: "assumed_resolution must be non-zero".to_string(),
            });
        }

        Ok(())
    }

    pub fn taxonomy(&self) -> Result<ClassTaxonomy, DetnormError> {
        ClassTaxonomy::new(self.taxonomy.iter().cloned())
    }

    pub fn ratios(&self) -> Result<SplitRatios, DetnormError> {
        SplitRatios::new(self.split.train, self.split.val, self.split.test)
    }

    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            assumed_resolution: (
                self.assumed_resolution.width,
                self.assumed_resolution.height,
            ),
        }
    }

    /// Builds the label mapper described by this configuration.
    pub fn label_mapper(&self) -> Result<LabelMapper, DetnormError> {
        Ok(LabelMapper::new(self.taxonomy()?)
            .with_overrides(self.overrides.iter().map(|(k, v)| (k.as_str(), v.clone())))
            .with_fuzzy_threshold(self.fuzzy_threshold)
            .with_fallback_class(self.fallback_class.clone()))
    }
}

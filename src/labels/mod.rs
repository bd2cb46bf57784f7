//! Label reconciliation against the target taxonomy.
//!
//! Source datasets name their classes however they like ("PET_bottle",
//! "Aluminium can", "trash"). [`LabelMapper`] runs each distinct name through
//! the resolution cascade in [`cascade::CASCADE`] and keeps an audit entry for
//! it. Resolution itself is pure; only the audit log is shared state.

pub mod cascade;
mod similarity;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;

use serde::Serialize;

use crate::model::ClassTaxonomy;
use cascade::{ResolveContext, CASCADE, FALLBACK_CONFIDENCE};

pub use similarity::similarity_ratio;

/// Default fuzzy acceptance threshold, in percent.
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 80.0;

/// Default catch-all class.
pub const DEFAULT_FALLBACK_CLASS: &str = "other";

/// Canonical comparison form of a label: lowercase, trimmed, `_` and `-` as spaces.
pub fn normalize_label(label: &str) -> String {
    label.trim().to_lowercase().replace(['_', '-'], " ")
}

/// Which stage of the cascade produced a resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    Manual,
    Exact,
    Fuzzy,
    Substring,
    Keyword,
    Fallback,
}

impl ResolutionMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            ResolutionMethod::Manual => "manual",
            ResolutionMethod::Exact => "exact",
            ResolutionMethod::Fuzzy => "fuzzy",
            ResolutionMethod::Substring => "substring",
            ResolutionMethod::Keyword => "keyword",
            ResolutionMethod::Fallback => "fallback",
        }
    }
}

impl fmt::Display for ResolutionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit record for one distinct source label.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LabelResolution {
    pub source_label: String,
    pub target_class: String,
    /// Index of `target_class` in the taxonomy; `None` when the resolved
    /// name is not part of it (annotations with that label are dropped).
    pub class_id: Option<usize>,
    pub method: ResolutionMethod,
    pub confidence: f64,
}

/// An audit entry plus how many annotations carried the label.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AuditEntry {
    #[serde(flatten)]
    pub resolution: LabelResolution,
    pub occurrences: usize,
}

/// Resolves source labels to taxonomy classes and records every resolution.
///
/// `LabelMapper` is `Sync`; parsers running on the worker pool share one
/// instance. The audit log is the only mutable part and sits behind a mutex.
#[derive(Debug)]
pub struct LabelMapper {
    taxonomy: ClassTaxonomy,
    overrides: BTreeMap<String, String>,
    fuzzy_threshold: f64,
    fallback_class: String,
    audit: Mutex<BTreeMap<String, AuditEntry>>,
}

impl LabelMapper {
    /// Creates a mapper with the default threshold, fallback and no caller overrides.
    pub fn new(taxonomy: ClassTaxonomy) -> Self {
        Self {
            taxonomy,
            overrides: BTreeMap::new(),
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            fallback_class: DEFAULT_FALLBACK_CLASS.to_string(),
            audit: Mutex::new(BTreeMap::new()),
        }
    }

    /// Adds caller overrides. Keys are normalized so lookups match the cascade.
    pub fn with_overrides<I, K, V>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        self.overrides.extend(
            overrides
                .into_iter()
                .map(|(source, target)| (normalize_label(source.as_ref()), target.into())),
        );
        self
    }

    pub fn with_fuzzy_threshold(mut self, threshold: f64) -> Self {
        self.fuzzy_threshold = threshold;
        self
    }

    pub fn with_fallback_class(mut self, class: impl Into<String>) -> Self {
        self.fallback_class = class.into();
        self
    }

    pub fn taxonomy(&self) -> &ClassTaxonomy {
        &self.taxonomy
    }

    /// Runs the cascade for one label without touching the audit log.
    pub fn resolve(&self, source_label: &str) -> LabelResolution {
        let normalized = normalize_label(source_label);
        let ctx = ResolveContext {
            taxonomy: &self.taxonomy,
            overrides: &self.overrides,
            fuzzy_threshold: self.fuzzy_threshold,
        };

        let (target, method, confidence) = CASCADE
            .iter()
            .find_map(|(method, resolver)| {
                resolver(&normalized, &ctx).map(|hit| (hit.target, *method, hit.confidence))
            })
            .unwrap_or_else(|| {
                (
                    self.fallback_class.clone(),
                    ResolutionMethod::Fallback,
                    FALLBACK_CONFIDENCE,
                )
            });

        LabelResolution {
            source_label: source_label.to_string(),
            class_id: self.taxonomy.class_id(&target),
            target_class: target,
            method,
            confidence,
        }
    }

    /// Resolves a label to a class id, recording the resolution in the audit log.
    ///
    /// Returns `None` when the label resolves to a class outside the taxonomy.
    pub fn class_id_for(&self, source_label: &str) -> Option<usize> {
        let mut audit = self
            .audit
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(entry) = audit.get_mut(source_label) {
            entry.occurrences += 1;
            return entry.resolution.class_id;
        }

        let resolution = self.resolve(source_label);
        if resolution.class_id.is_none() {
            log::warn!(
                "Label '{}' resolved to '{}' ({}), which is not in the taxonomy; its annotations will be skipped",
                source_label,
                resolution.target_class,
                resolution.method
            );
        } else if resolution.method == ResolutionMethod::Fallback {
            log::warn!(
                "Label '{}' matched nothing; assigned fallback class '{}'",
                source_label,
                resolution.target_class
            );
        } else {
            log::debug!(
                "Label '{}' -> '{}' via {} ({:.2})",
                source_label,
                resolution.target_class,
                resolution.method,
                resolution.confidence
            );
        }

        let class_id = resolution.class_id;
        audit.insert(
            source_label.to_string(),
            AuditEntry {
                resolution,
                occurrences: 1,
            },
        );
        class_id
    }

    /// Snapshot of the audit log, ordered by source label.
    pub fn audit(&self) -> Vec<AuditEntry> {
        self.audit
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect()
    }
}

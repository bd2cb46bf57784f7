//! Run report: what a `prepare` run did, as text or JSON.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::dedup::DuplicateEntry;
use crate::labels::AuditEntry;
use crate::manifest::DatasetManifest;
use crate::split::Split;

/// A dataset directory whose layout was not recognized.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SkippedSource {
    pub dataset: String,
    pub path: PathBuf,
}

/// A dataset whose annotations could not be read at all.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FailedSource {
    pub dataset: String,
    pub path: PathBuf,
    pub error: String,
}

/// Outcome of [`super::Pipeline::run`].
#[derive(Clone, Debug, Serialize)]
pub struct PipelineReport {
    pub out_dir: PathBuf,
    pub dry_run: bool,
    /// Images that decoded and hashed cleanly, before deduplication.
    pub verified: usize,
    pub skipped_sources: Vec<SkippedSource>,
    pub failed_sources: Vec<FailedSource>,
    pub manifest: Option<DatasetManifest>,
    #[serde(skip)]
    pub duplicates: Vec<DuplicateEntry>,
    #[serde(skip)]
    pub label_resolutions: Vec<AuditEntry>,
}

impl PipelineReport {
    pub(crate) fn new(out_dir: &Path, dry_run: bool) -> Self {
        Self {
            out_dir: out_dir.to_path_buf(),
            dry_run,
            verified: 0,
            skipped_sources: Vec::new(),
            failed_sources: Vec::new(),
            manifest: None,
            duplicates: Vec::new(),
            label_resolutions: Vec::new(),
        }
    }

    /// Sum of images rejected by verification across all sources.
    pub fn rejected_images(&self) -> usize {
        self.manifest
            .as_ref()
            .map(|m| m.sources.iter().map(|s| s.rejected_images).sum())
            .unwrap_or(0)
    }
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(manifest) = &self.manifest else {
            return writeln!(f, "No output produced.");
        };

        if self.dry_run {
            writeln!(f, "Dry run (nothing written): {}", self.out_dir.display())?;
        } else {
            writeln!(f, "Prepared dataset: {}", self.out_dir.display())?;
        }
        writeln!(f)?;

        writeln!(f, "Sources:")?;
        for source in &manifest.sources {
            writeln!(
                f,
                "  {:<24} {:<14} {:>8} images {:>9} boxes",
                source.dataset,
                source.format.as_str(),
                format_number(source.images),
                format_number(source.annotations),
            )?;
            let skipped = &source.skipped;
            let total_skipped = skipped.unrecognized_class
                + skipped.invalid_box
                + skipped.malformed
                + skipped.missing_image;
            if total_skipped > 0 || source.rejected_images > 0 {
                writeln!(
                    f,
                    "    skipped: {} unrecognized, {} invalid box, {} malformed, {} missing image; {} rejected",
                    skipped.unrecognized_class,
                    skipped.invalid_box,
                    skipped.malformed,
                    skipped.missing_image,
                    source.rejected_images,
                )?;
            }
        }
        for source in &self.skipped_sources {
            writeln!(f, "  {:<24} unknown (skipped)", source.dataset)?;
        }
        for source in &self.failed_sources {
            writeln!(f, "  {:<24} failed: {}", source.dataset, source.error)?;
        }
        writeln!(f)?;

        writeln!(f, "Images:")?;
        writeln!(f, "  Verified:            {:>8}", format_number(self.verified))?;
        writeln!(
            f,
            "  Duplicates removed:  {:>8}",
            format_number(manifest.duplicates_removed)
        )?;
        writeln!(
            f,
            "  Unique:              {:>8}",
            format_number(manifest.total_unique_images)
        )?;
        writeln!(
            f,
            "  Excluded (no boxes): {:>8}",
            format_number(manifest.excluded_unannotated)
        )?;
        writeln!(f)?;

        writeln!(f, "Splits (seed {}):", manifest.seed)?;
        for split in Split::ALL {
            if let Some(summary) = manifest.splits.get(&split) {
                writeln!(
                    f,
                    "  {:<6} {:>8} images {:>9} boxes",
                    split.as_str(),
                    format_number(summary.images),
                    format_number(summary.annotations),
                )?;
            }
        }

        let mut fuzzy_or_fallback = self
            .label_resolutions
            .iter()
            .filter(|entry| entry.resolution.confidence < 1.0)
            .peekable();
        if fuzzy_or_fallback.peek().is_some() {
            writeln!(f)?;
            writeln!(f, "Inexact label resolutions:")?;
            for entry in fuzzy_or_fallback {
                writeln!(
                    f,
                    "  {:<24} -> {:<12} {:<10} {:.2} ({}x)",
                    entry.resolution.source_label,
                    entry.resolution.target_class,
                    entry.resolution.method.as_str(),
                    entry.resolution.confidence,
                    entry.occurrences,
                )?;
            }
        }

        Ok(())
    }
}

fn format_number(n: usize) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

//! End-to-end ingestion: detect, parse, verify, deduplicate, split, emit.
//!
//! A source root is either a collection of dataset directories (each one
//! detected on its own, in name order) or a single dataset. Verification
//! and hashing run on the rayon pool; everything that decides *which*
//! record survives (deduplication, splitting, output naming) runs on sorted
//! data in a single pass, so the result does not depend on scheduling.
//!
//! A dataset whose annotations cannot be read is recorded in the report and
//! left out; the remaining datasets still produce output.

mod report;

pub use report::{FailedSource, PipelineReport, SkippedSource};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;

use crate::config::PipelineConfig;
use crate::dedup::deduplicate;
use crate::detect::{layout_for, DatasetFormat, DatasetLayout};
use crate::error::DetnormError;
use crate::formats::{list_dir_sorted, parser_for};
use crate::labels::LabelMapper;
use crate::manifest::{emit, DatasetManifest, SourceSummary};
use crate::model::{Annotation, ImageRecord};
use crate::split::split;
use crate::verify::{hash, verify, ImageCheck};

/// Per-run switches that are not part of the persisted configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Treat the source root as one dataset instead of a collection.
    pub single: bool,
    /// Skip detection and read every dataset as this format.
    pub format: Option<DatasetFormat>,
    /// Run everything except writing the output tree.
    pub dry_run: bool,
}

/// A dataset directory found under the source root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatasetSource {
    pub name: String,
    pub path: PathBuf,
}

/// A parsed image waiting for verification.
struct Candidate {
    source_index: usize,
    key: String,
    path: PathBuf,
    annotations: Vec<Annotation>,
}

/// The ingestion pipeline for one configuration.
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    cancel: Arc<AtomicBool>,
}

impl Pipeline {
    /// Validates `config` and builds a pipeline. Nothing is read from disk.
    pub fn new(config: PipelineConfig) -> Result<Self, DetnormError> {
        config.validate()?;
        Ok(Self {
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Flag that stops the run when set. No new file task starts once it is
    /// raised, and the run ends with [`DetnormError::Cancelled`].
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn check_cancelled(&self) -> Result<(), DetnormError> {
        if self.cancel.load(Ordering::Relaxed) {
            Err(DetnormError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Runs every stage and, unless `options.dry_run` is set, writes `out_dir`.
    pub fn run(
        &self,
        source_root: &Path,
        out_dir: &Path,
        options: &RunOptions,
    ) -> Result<PipelineReport, DetnormError> {
        let ratios = self.config.ratios()?;
        let taxonomy = self.config.taxonomy()?;
        let mapper = self.config.label_mapper()?;

        let sources = discover_datasets(source_root, options.single)?;
        log::info!(
            "Found {} dataset(s) under {}",
            sources.len(),
            source_root.display()
        );

        let mut report = PipelineReport::new(out_dir, options.dry_run);
        let mut summaries: Vec<SourceSummary> = Vec::new();
        let mut candidates: Vec<Candidate> = Vec::new();

        for source in &sources {
            self.check_cancelled()?;

            let layout = layout_for(
                &source.path,
                options.format,
                self.config.require_known_format,
            )?;
            if layout == DatasetLayout::Unknown {
                log::warn!("Unknown format for {}, skipping", source.path.display());
                report.skipped_sources.push(SkippedSource {
                    dataset: source.name.clone(),
                    path: source.path.clone(),
                });
                continue;
            }

            let format = layout.format();
            log::info!("Dataset '{}': {}", source.name, format);
            let Some(parser) = parser_for(&source.path, layout, &self.config.parse_options())
            else {
                continue;
            };
            let parsed = match parser.parse(&mapper) {
                Ok(parsed) => parsed,
                Err(err) => {
                    log::warn!("Failed to parse dataset '{}': {}", source.name, err);
                    report.failed_sources.push(FailedSource {
                        dataset: source.name.clone(),
                        path: source.path.clone(),
                        error: err.to_string(),
                    });
                    continue;
                }
            };

            let source_index = summaries.len();
            summaries.push(SourceSummary {
                dataset: source.name.clone(),
                path: source.path.clone(),
                format,
                images: parsed.images.len(),
                annotations: parsed.annotation_count(),
                rejected_images: 0,
                skipped: parsed.stats.clone(),
            });

            for (key, image) in parsed.images {
                if let Some(path) = image.path {
                    candidates.push(Candidate {
                        source_index,
                        key,
                        path,
                        annotations: image.annotations,
                    });
                }
            }
        }

        let verified = self.verify_candidates(&candidates, &summaries)?;
        report.verified = verified.iter().filter(|record| record.is_some()).count();
        for (candidate, record) in candidates.iter().zip(&verified) {
            if record.is_none() {
                summaries[candidate.source_index].rejected_images += 1;
            }
        }
        let records: Vec<ImageRecord> = verified.into_iter().flatten().collect();

        let dedup = deduplicate(records);
        if dedup.unique.is_empty() {
            return Err(DetnormError::EmptyWorkingSet {
                message: format!(
                    "no usable images found under {}",
                    source_root.display()
                ),
            });
        }

        let duplicates_removed = dedup.removed();
        let outcome = split(dedup.unique, &ratios, self.config.seed)?;
        let manifest = DatasetManifest::new(
            &taxonomy,
            &outcome,
            ratios,
            self.config.seed,
            duplicates_removed,
            summaries,
        );
        let audit = mapper.audit();

        if options.dry_run {
            log::info!("Dry run: nothing written to {}", out_dir.display());
        } else {
            self.check_cancelled()?;
            emit(
                out_dir,
                &outcome,
                &manifest,
                &audit,
                &dedup.duplicates,
                &self.cancel,
            )?;
        }

        report.duplicates = dedup.duplicates;
        report.label_resolutions = audit;
        report.manifest = Some(manifest);
        Ok(report)
    }

    /// Decodes and hashes every candidate on the worker pool.
    ///
    /// The result is index-aligned with `candidates`; `None` marks a
    /// rejected image.
    fn verify_candidates(
        &self,
        candidates: &[Candidate],
        sources: &[SourceSummary],
    ) -> Result<Vec<Option<ImageRecord>>, DetnormError> {
        log::info!("Verifying {} images", candidates.len());

        candidates
            .par_iter()
            .map(|candidate| -> Result<Option<ImageRecord>, DetnormError> {
                self.check_cancelled()?;

                let info = match verify(&candidate.path) {
                    ImageCheck::Valid(info) => info,
                    ImageCheck::Invalid(reason) => {
                        log::warn!("Invalid: {} - {}", candidate.path.display(), reason);
                        return Ok(None);
                    }
                };

                let content_hash = match hash(&candidate.path) {
                    Ok(digest) => digest,
                    Err(err) => {
                        log::warn!("Cannot hash {}: {}", candidate.path.display(), err);
                        return Ok(None);
                    }
                };

                Ok(Some(ImageRecord {
                    dataset: sources[candidate.source_index].dataset.clone(),
                    key: candidate.key.clone(),
                    source_path: candidate.path.clone(),
                    content_hash,
                    annotations: candidate.annotations.clone(),
                    width: info.width,
                    height: info.height,
                }))
            })
            .collect()
    }
}

/// Lists the datasets under `root`, sorted by name.
///
/// With `single`, `root` itself is the only dataset. Otherwise every
/// non-hidden subdirectory is one.
pub fn discover_datasets(root: &Path, single: bool) -> Result<Vec<DatasetSource>, DetnormError> {
    if !root.is_dir() {
        return Err(DetnormError::SourceNotFound {
            path: root.to_path_buf(),
        });
    }

    if single {
        let name = root
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "dataset".to_string());
        return Ok(vec![DatasetSource {
            name,
            path: root.to_path_buf(),
        }]);
    }

    Ok(list_dir_sorted(root)?
        .into_iter()
        .filter(|path| path.is_dir())
        .filter_map(|path| {
            let name = path.file_name()?.to_string_lossy().to_string();
            (!name.starts_with('.')).then_some(DatasetSource { name, path })
        })
        .collect())
}

/// Detects the layout of every dataset under `root` without parsing anything.
pub fn detect_all(
    root: &Path,
    single: bool,
) -> Result<Vec<(DatasetSource, DatasetLayout)>, DetnormError> {
    discover_datasets(root, single)?
        .into_iter()
        .map(|source| -> Result<_, DetnormError> {
            let layout = crate::detect::detect(&source.path)?;
            Ok((source, layout))
        })
        .collect()
}

/// Convenience wrapper used by the `map-labels` command.
pub fn resolve_labels<'a>(
    mapper: &LabelMapper,
    labels: impl IntoIterator<Item = &'a str>,
) -> Vec<crate::labels::LabelResolution> {
    labels.into_iter().map(|label| mapper.resolve(label)).collect()
}

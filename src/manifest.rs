//! Output layout and the run manifest.
//!
//! The emitter writes `<out>/<split>/images/` and `<out>/<split>/labels/`,
//! then the side files (`data.yaml`, `label_resolutions.json`,
//! `duplicates.json`), and only then `manifest.json`. The manifest goes
//! through a temporary file and a rename, so a manifest on disk always
//! describes a finished output tree.

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use serde::Serialize;

use crate::dedup::DuplicateEntry;
use crate::detect::DatasetFormat;
use crate::error::DetnormError;
use crate::formats::ParseStats;
use crate::labels::AuditEntry;
use crate::model::{ClassTaxonomy, ImageRecord};
use crate::split::{Split, SplitOutcome, SplitRatios};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const DATA_YAML_FILE: &str = "data.yaml";
pub const LABEL_AUDIT_FILE: &str = "label_resolutions.json";
pub const DUPLICATES_FILE: &str = "duplicates.json";

const LABEL_EXTENSION: &str = "txt";

/// Per-dataset summary of detection and parsing.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SourceSummary {
    pub dataset: String,
    pub path: PathBuf,
    pub format: DatasetFormat,
    /// Images the parser produced an entry for.
    pub images: usize,
    pub annotations: usize,
    /// Images that failed verification.
    pub rejected_images: usize,
    pub skipped: ParseStats,
}

/// Counts for one split.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SplitSummary {
    pub images: usize,
    pub annotations: usize,
    /// Annotation count per class name, over every annotation in the split.
    pub class_distribution: BTreeMap<String, usize>,
}

impl SplitSummary {
    fn from_records(records: &[ImageRecord], taxonomy: &ClassTaxonomy) -> Self {
        let mut summary = SplitSummary {
            images: records.len(),
            ..Default::default()
        };
        for name in taxonomy.names() {
            summary.class_distribution.insert(name.clone(), 0);
        }
        for annotation in records.iter().flat_map(|record| &record.annotations) {
            summary.annotations += 1;
            if let Some(name) = taxonomy.name(annotation.class_id) {
                *summary.class_distribution.entry(name.to_string()).or_default() += 1;
            }
        }
        summary
    }
}

/// Where things live under the output root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OutputLayout {
    pub images: String,
    pub labels: String,
    pub label_format: String,
}

impl Default for OutputLayout {
    fn default() -> Self {
        Self {
            images: "{split}/images".to_string(),
            labels: "{split}/labels".to_string(),
            label_format: "class_id x_center y_center width height".to_string(),
        }
    }
}

/// The completion record of a run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DatasetManifest {
    pub version: String,
    pub taxonomy: ClassTaxonomy,
    pub splits: BTreeMap<Split, SplitSummary>,
    pub total_unique_images: usize,
    pub duplicates_removed: usize,
    pub excluded_unannotated: usize,
    pub ratios: SplitRatios,
    pub seed: u64,
    pub sources: Vec<SourceSummary>,
    pub layout: OutputLayout,
}

impl DatasetManifest {
    pub fn new(
        taxonomy: &ClassTaxonomy,
        outcome: &SplitOutcome,
        ratios: SplitRatios,
        seed: u64,
        duplicates_removed: usize,
        sources: Vec<SourceSummary>,
    ) -> Self {
        let splits: BTreeMap<Split, SplitSummary> = Split::ALL
            .iter()
            .map(|&split| (split, SplitSummary::from_records(outcome.get(split), taxonomy)))
            .collect();
        let placed: usize = splits.values().map(|summary| summary.images).sum();

        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            taxonomy: taxonomy.clone(),
            splits,
            total_unique_images: placed + outcome.excluded.len(),
            duplicates_removed,
            excluded_unannotated: outcome.excluded.len(),
            ratios,
            seed,
            sources,
            layout: OutputLayout::default(),
        }
    }
}

/// One image copy and its label file, with collision-free target names.
#[derive(Clone, Debug, PartialEq)]
pub struct PlannedOutput {
    pub split: Split,
    pub source: PathBuf,
    pub image_path: PathBuf,
    pub label_path: PathBuf,
    pub label_contents: String,
}

/// Assigns every record its output paths.
///
/// The source file name is kept. When a stem is already taken in the same
/// split (two datasets with `0001.jpg`, or `a.jpg` next to `a.png`) the later
/// record in split/path order gets `<stem>_<n>` with the smallest free `n`.
pub fn plan_outputs(out_dir: &Path, outcome: &SplitOutcome) -> Vec<PlannedOutput> {
    let mut planned = Vec::new();

    for split in Split::ALL {
        let images_dir = out_dir.join(split.as_str()).join("images");
        let labels_dir = out_dir.join(split.as_str()).join("labels");
        let mut taken: HashSet<String> = HashSet::new();

        for record in outcome.get(split) {
            let stem = record
                .source_path
                .file_stem()
                .map(|stem| stem.to_string_lossy().to_string())
                .unwrap_or_else(|| "image".to_string());
            let extension = record
                .source_path
                .extension()
                .map(|ext| ext.to_string_lossy().to_string());

            let mut candidate = stem.clone();
            let mut suffix = 1;
            while taken.contains(&candidate) {
                candidate = format!("{stem}_{suffix}");
                suffix += 1;
            }
            taken.insert(candidate.clone());

            let image_name = match &extension {
                Some(ext) => format!("{candidate}.{ext}"),
                None => candidate.clone(),
            };

            let mut label_contents = String::new();
            for annotation in &record.annotations {
                label_contents.push_str(&annotation.to_label_line());
                label_contents.push('\n');
            }

            planned.push(PlannedOutput {
                split,
                source: record.source_path.clone(),
                image_path: images_dir.join(image_name),
                label_path: labels_dir.join(format!("{candidate}.{LABEL_EXTENSION}")),
                label_contents,
            });
        }
    }

    planned
}

/// Writes the split tree, side files, and finally the manifest.
///
/// A manifest left by an earlier run is removed before anything else is
/// written, and each `<split>/images` and `<split>/labels` directory is
/// emptied so the tree holds exactly what the new manifest lists. If `cancel` is raised, no new copies start and the function
/// returns [`DetnormError::Cancelled`] without writing a manifest.
pub fn emit(
    out_dir: &Path,
    outcome: &SplitOutcome,
    manifest: &DatasetManifest,
    audit: &[AuditEntry],
    duplicates: &[DuplicateEntry],
    cancel: &AtomicBool,
) -> Result<(), DetnormError> {
    let manifest_path = out_dir.join(MANIFEST_FILE);
    if manifest_path.exists() {
        log::info!("Removing stale manifest {}", manifest_path.display());
        fs::remove_file(&manifest_path).map_err(DetnormError::io_at(&manifest_path))?;
    }

    for split in Split::ALL {
        for sub in ["images", "labels"] {
            let dir = out_dir.join(split.as_str()).join(sub);
            if dir.exists() {
                log::debug!("Clearing {}", dir.display());
                fs::remove_dir_all(&dir).map_err(DetnormError::io_at(&dir))?;
            }
            fs::create_dir_all(&dir).map_err(DetnormError::io_at(&dir))?;
        }
    }

    let planned = plan_outputs(out_dir, outcome);
    log::info!("Writing {} images to {}", planned.len(), out_dir.display());

    planned.par_iter().try_for_each(|output| {
        if cancel.load(Ordering::Relaxed) {
            return Err(DetnormError::Cancelled);
        }
        fs::copy(&output.source, &output.image_path)
            .map_err(DetnormError::io_at(&output.source))?;
        fs::write(&output.label_path, &output.label_contents)
            .map_err(DetnormError::io_at(&output.label_path))
    })?;

    write_data_yaml(out_dir, &manifest.taxonomy)?;
    write_json(&out_dir.join(LABEL_AUDIT_FILE), audit)?;
    write_json(&out_dir.join(DUPLICATES_FILE), duplicates)?;

    if cancel.load(Ordering::Relaxed) {
        return Err(DetnormError::Cancelled);
    }

    write_json_atomic(&manifest_path, manifest)?;
    log::info!("Manifest written to {}", manifest_path.display());
    Ok(())
}

fn write_data_yaml(out_dir: &Path, taxonomy: &ClassTaxonomy) -> Result<(), DetnormError> {
    let mut yaml = format!(
        "path: {}\n",
        yaml_single_quoted(&out_dir.to_string_lossy())
    );
    for split in Split::ALL {
        yaml.push_str(&format!("{}: {}/images\n", split, split));
    }
    yaml.push_str(&format!("nc: {}\n", taxonomy.len()));
    yaml.push_str("names:\n");
    for (idx, name) in taxonomy.names().iter().enumerate() {
        yaml.push_str(&format!("  {}: {}\n", idx, yaml_single_quoted(name)));
    }

    let path = out_dir.join(DATA_YAML_FILE);
    fs::write(&path, yaml).map_err(DetnormError::io_at(&path))
}

fn yaml_single_quoted(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', "''"))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), DetnormError> {
    let file = File::create(path).map_err(DetnormError::io_at(path))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value).map_err(|source| {
        DetnormError::JsonWrite {
            path: path.to_path_buf(),
            source,
        }
    })?;
    writer.write_all(b"\n").map_err(DetnormError::io_at(path))?;
    writer.flush().map_err(DetnormError::io_at(path))
}

fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), DetnormError> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    write_json(&tmp_path, value)?;
    fs::rename(&tmp_path, path).map_err(DetnormError::io_at(path))
}

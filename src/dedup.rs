//! Content-hash deduplication.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::model::ImageRecord;

/// A discarded record and the record it duplicates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DuplicateEntry {
    pub path: PathBuf,
    pub original: PathBuf,
    pub content_hash: String,
}

/// Survivors and casualties of [`deduplicate`].
#[derive(Clone, Debug, Default)]
pub struct DedupOutcome {
    pub unique: Vec<ImageRecord>,
    pub duplicates: Vec<DuplicateEntry>,
}

impl DedupOutcome {
    pub fn removed(&self) -> usize {
        self.duplicates.len()
    }
}

/// Keeps the first record for every content hash, in scan order.
///
/// Records are ordered by (dataset, key) first so that which copy survives
/// does not depend on the order verification finished in.
pub fn deduplicate(mut records: Vec<ImageRecord>) -> DedupOutcome {
    records.sort_by(|a, b| (&a.dataset, &a.key).cmp(&(&b.dataset, &b.key)));

    let mut first_seen: HashMap<String, PathBuf> = HashMap::with_capacity(records.len());
    let mut outcome = DedupOutcome::default();

    for record in records {
        if let Some(original) = first_seen.get(&record.content_hash) {
            log::debug!(
                "Duplicate {} of {}",
                record.source_path.display(),
                original.display()
            );
            outcome.duplicates.push(DuplicateEntry {
                path: record.source_path,
                original: original.clone(),
                content_hash: record.content_hash,
            });
            continue;
        }

        first_seen.insert(record.content_hash.clone(), record.source_path.clone());
        outcome.unique.push(record);
    }

    if !outcome.duplicates.is_empty() {
        log::info!(
            "Removed {} duplicate images, {} unique remain",
            outcome.removed(),
            outcome.unique.len()
        );
    }

    outcome
}

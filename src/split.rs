//! Seeded, stratified train/val/test partitioning.
//!
//! Splitting happens in two stages with the same seed: train against the
//! rest, then the rest into val and test. Each stage is stratified on the
//! class of a record's first annotation, so every class is spread over the
//! splits in roughly the requested proportions.
//!
//! The procedure is fully determined by the input set, the ratios and the
//! seed: input is sorted by path first, quotas are computed with integer
//! arithmetic, and the RNG only ever shuffles within a class group.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};
use serde::Serialize;

use crate::error::DetnormError;
use crate::model::ImageRecord;

/// Allowed slack when checking that the ratios sum to one.
pub const RATIO_SUM_TOLERANCE: f64 = 1e-3;

/// Absorbs float error in `fraction * n` before flooring.
const QUOTA_EPSILON: f64 = 1e-9;

/// The three output partitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    pub const ALL: [Split; 3] = [Split::Train, Split::Val, Split::Test];

    pub fn as_str(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated split ratios.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SplitRatios {
    train: f64,
    val: f64,
    test: f64,
}

impl SplitRatios {
    /// Checks each ratio is in `[0, 1]` and that they sum to one.
    pub fn new(train: f64, val: f64, test: f64) -> Result<Self, DetnormError> {
        let invalid = |message: String| DetnormError::InvalidSplitRatios {
            train,
            val,
            test,
            message,
        };

        for (name, value) in [("train", train), ("val", val), ("test", test)] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(invalid(format!("{name} ratio {value} is outside [0, 1]")));
            }
        }

        let sum = train + val + test;
        if (sum - 1.0).abs() > RATIO_SUM_TOLERANCE {
            return Err(invalid(format!("ratios sum to {sum}, expected 1.0")));
        }

        Ok(Self { train, val, test })
    }

    pub fn train(&self) -> f64 {
        self.train
    }

    pub fn val(&self) -> f64 {
        self.val
    }

    pub fn test(&self) -> f64 {
        self.test
    }

    /// Share of the non-train remainder that goes to val.
    fn val_share(&self) -> f64 {
        let rest = self.val + self.test;
        if rest > 0.0 {
            self.val / rest
        } else {
            0.0
        }
    }
}

impl Default for SplitRatios {
    fn default() -> Self {
        Self {
            train: 0.8,
            val: 0.1,
            test: 0.1,
        }
    }
}

/// The partitions plus the records that could not be placed.
#[derive(Clone, Debug, Default)]
pub struct SplitOutcome {
    pub train: Vec<ImageRecord>,
    pub val: Vec<ImageRecord>,
    pub test: Vec<ImageRecord>,
    /// Records with no annotations, which have no stratification key.
    pub excluded: Vec<PathBuf>,
}

impl SplitOutcome {
    pub fn get(&self, split: Split) -> &[ImageRecord] {
        match split {
            Split::Train => &self.train,
            Split::Val => &self.val,
            Split::Test => &self.test,
        }
    }
}

/// Partitions `records` into train/val/test.
///
/// Records without annotations are excluded with a warning. The three
/// outputs are disjoint, cover every annotated record, and are each sorted
/// by source path. Fails if no annotated record remains.
pub fn split(
    records: Vec<ImageRecord>,
    ratios: &SplitRatios,
    seed: u64,
) -> Result<SplitOutcome, DetnormError> {
    let mut outcome = SplitOutcome::default();

    let (mut keyed, unkeyed): (Vec<ImageRecord>, Vec<ImageRecord>) = records
        .into_iter()
        .partition(|record| record.representative_class().is_some());

    for record in &unkeyed {
        log::debug!(
            "Excluding {} from split: no annotations",
            record.source_path.display()
        );
    }
    if !unkeyed.is_empty() {
        log::warn!(
            "Excluded {} images without annotations from the split",
            unkeyed.len()
        );
    }
    outcome.excluded = unkeyed.into_iter().map(|record| record.source_path).collect();
    outcome.excluded.sort();

    if keyed.is_empty() {
        return Err(DetnormError::EmptyWorkingSet {
            message: "no annotated images left to split".to_string(),
        });
    }

    keyed.sort_by(|a, b| a.source_path.cmp(&b.source_path));
    let keys: Vec<usize> = keyed
        .iter()
        .map(|record| record.representative_class().unwrap_or_default())
        .collect();

    let first_stage = stratified_partition(&keys, ratios.train(), seed);
    let rest_indices: Vec<usize> = (0..keyed.len()).filter(|&i| !first_stage[i]).collect();
    let rest_keys: Vec<usize> = rest_indices.iter().map(|&i| keys[i]).collect();
    let second_stage = stratified_partition(&rest_keys, ratios.val_share(), seed);

    let mut assignment = vec![Split::Train; keyed.len()];
    for (pos, &index) in rest_indices.iter().enumerate() {
        assignment[index] = if second_stage[pos] {
            Split::Val
        } else {
            Split::Test
        };
    }

    for (record, target) in keyed.into_iter().zip(assignment) {
        match target {
            Split::Train => outcome.train.push(record),
            Split::Val => outcome.val.push(record),
            Split::Test => outcome.test.push(record),
        }
    }

    log::info!(
        "Split {} images: train={} val={} test={}",
        outcome.train.len() + outcome.val.len() + outcome.test.len(),
        outcome.train.len(),
        outcome.val.len(),
        outcome.test.len()
    );

    Ok(outcome)
}

/// Marks which items go to the first side of a stratified two-way split.
///
/// `keys[i]` is the class of item `i`. Exactly `floor(fraction * n)` items
/// are marked. Each class gets `floor(count * n_first / n)` of them, and the
/// slots left over go to the classes with the largest fractional remainder
/// (ties: larger class first, then lower class id).
pub fn stratified_partition(keys: &[usize], fraction: f64, seed: u64) -> Vec<bool> {
    let n = keys.len();
    let mut first = vec![false; n];
    if n == 0 {
        return first;
    }

    let n_first = ((fraction * n as f64 + QUOTA_EPSILON).floor() as usize).min(n);

    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (index, &key) in keys.iter().enumerate() {
        groups.entry(key).or_default().push(index);
    }

    let mut quotas: BTreeMap<usize, usize> = BTreeMap::new();
    let mut remainders: Vec<(usize, usize, usize)> = Vec::with_capacity(groups.len());
    for (&class, members) in &groups {
        let scaled = members.len() * n_first;
        quotas.insert(class, scaled / n);
        remainders.push((scaled % n, members.len(), class));
    }

    let assigned: usize = quotas.values().sum();
    remainders.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)).then(a.2.cmp(&b.2)));
    for &(_, _, class) in remainders.iter().take(n_first - assigned) {
        if let Some(quota) = quotas.get_mut(&class) {
            *quota += 1;
        }
    }

    let mut rng = StdRng::seed_from_u64(seed);
    for (class, members) in groups.iter_mut() {
        members.shuffle(&mut rng);
        let quota = quotas.get(class).copied().unwrap_or(0);
        for &index in members.iter().take(quota) {
            first[index] = true;
        }
    }

    first
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::NormalizedBox;
    use crate::model::Annotation;

    fn record(name: &str, class_id: Option<usize>) -> ImageRecord {
        ImageRecord {
            dataset: "ds".to_string(),
            key: name.to_string(),
            source_path: PathBuf::from(format!("ds/{name}")),
            content_hash: name.to_string(),
            annotations: class_id
                .map(|id| vec![Annotation::new(id, NormalizedBox::full_image())])
                .unwrap_or_default(),
            width: 10,
            height: 10,
        }
    }

    fn records(n: usize, classes: usize) -> Vec<ImageRecord> {
        (0..n)
            .map(|i| record(&format!("{i:04}.jpg"), Some(i % classes)))
            .collect()
    }

    fn names(records: &[ImageRecord]) -> Vec<String> {
        records.iter().map(|r| r.key.clone()).collect()
    }

    #[test]
    fn ratios_must_sum_to_one() {
        let err = SplitRatios::new(0.8, 0.1, 0.05).unwrap_err();
        assert!(matches!(err, DetnormError::InvalidSplitRatios { .. }));
        assert!(SplitRatios::new(0.7, 0.2, 0.1).is_ok());
        assert!(SplitRatios::new(0.8, 0.1, 0.1005).is_ok());
    }

    #[test]
    fn ratios_must_each_be_in_unit_range() {
        assert!(SplitRatios::new(1.2, -0.1, -0.1).is_err());
        assert!(SplitRatios::new(f64::NAN, 0.5, 0.5).is_err());
    }

    #[test]
    fn partition_hits_exact_quota_per_class() {
        // 6 of class 0, 4 of class 1; 50% -> 3 + 2.
        let keys = vec![0, 0, 0, 0, 0, 0, 1, 1, 1, 1];
        let first = stratified_partition(&keys, 0.5, 7);
        let picked: Vec<usize> = keys
            .iter()
            .zip(&first)
            .filter(|(_, f)| **f)
            .map(|(k, _)| *k)
            .collect();
        assert_eq!(picked.iter().filter(|&&k| k == 0).count(), 3);
        assert_eq!(picked.iter().filter(|&&k| k == 1).count(), 2);
    }

    #[test]
    fn leftover_slots_go_to_largest_remainder() {
        // n=5, n_first=floor(0.6*5)=3. Class 0 (3 items): 9/5 -> 1 r4.
        // Class 1 (2 items): 6/5 -> 1 r1. One slot left, class 0 takes it.
        let keys = vec![0, 1, 0, 1, 0];
        let first = stratified_partition(&keys, 0.6, 1);
        let class0 = (0..5).filter(|&i| keys[i] == 0 && first[i]).count();
        let class1 = (0..5).filter(|&i| keys[i] == 1 && first[i]).count();
        assert_eq!((class0, class1), (2, 1));
    }

    #[test]
    fn split_is_disjoint_and_complete() {
        let outcome = split(records(50, 3), &SplitRatios::default(), 42).expect("split");
        assert_eq!(outcome.train.len(), 40);
        assert_eq!(outcome.val.len(), 5);
        assert_eq!(outcome.test.len(), 5);

        let mut all = names(&outcome.train);
        all.extend(names(&outcome.val));
        all.extend(names(&outcome.test));
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 50);
    }

    #[test]
    fn split_is_deterministic_and_order_independent() {
        let a = split(records(40, 4), &SplitRatios::default(), 9).expect("split");
        let mut shuffled = records(40, 4);
        shuffled.reverse();
        let b = split(shuffled, &SplitRatios::default(), 9).expect("split");

        assert_eq!(names(&a.train), names(&b.train));
        assert_eq!(names(&a.val), names(&b.val));
        assert_eq!(names(&a.test), names(&b.test));
    }

    #[test]
    fn outputs_keep_path_order() {
        let outcome = split(records(30, 2), &SplitRatios::default(), 3).expect("split");
        for part in [&outcome.train, &outcome.val, &outcome.test] {
            let keys = names(part);
            let mut sorted = keys.clone();
            sorted.sort();
            assert_eq!(keys, sorted);
        }
    }

    #[test]
    fn unannotated_records_are_excluded() {
        let mut input = records(10, 2);
        input.push(record("empty.jpg", None));
        let outcome = split(input, &SplitRatios::default(), 1).expect("split");
        assert_eq!(outcome.excluded, vec![PathBuf::from("ds/empty.jpg")]);
        assert_eq!(
            outcome.train.len() + outcome.val.len() + outcome.test.len(),
            10
        );
    }

    #[test]
    fn nothing_to_split_is_fatal() {
        let err = split(vec![record("empty.jpg", None)], &SplitRatios::default(), 1).unwrap_err();
        assert!(matches!(err, DetnormError::EmptyWorkingSet { .. }));
    }

    #[test]
    fn all_train_leaves_remainder_empty() {
        let ratios = SplitRatios::new(1.0, 0.0, 0.0).expect("ratios");
        let outcome = split(records(7, 2), &ratios, 5).expect("split");
        assert_eq!(outcome.train.len(), 7);
        assert!(outcome.val.is_empty() && outcome.test.is_empty());
    }
}

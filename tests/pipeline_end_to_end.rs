//! End-to-end runs of the ingestion pipeline over mixed-format sources.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use detnorm::config::{PipelineConfig, SplitConfig};
use detnorm::error::DetnormError;
use detnorm::manifest::{DUPLICATES_FILE, LABEL_AUDIT_FILE, MANIFEST_FILE};
use detnorm::pipeline::{Pipeline, RunOptions};
use detnorm::split::Split;

mod common;

/// Three datasets plus one unrecognized directory:
/// - `coco_set`: 4 images
/// - `voc_set`: 6 images, two of them byte-identical
/// - `yolo_set`: 6 images, one corrupt, one without labels
/// - `zz_notes`: unknown layout
fn build_source(root: &Path) {
    common::write_coco_dataset(
        &root.join("coco_set"),
        &[
            ("c1", 10, "metal"),
            ("c2", 11, "metal"),
            ("c3", 12, "paper"),
            ("c4", 13, "paper"),
        ],
    );

    common::write_voc_dataset(
        &root.join("voc_set"),
        &[
            ("v1", 20, "glass"),
            ("v2", 21, "glass"),
            ("v3", 22, "glass"),
            ("v4", 23, "PET_bottle"),
            ("v5", 24, "aluminium_can"),
            ("v6", 20, "glass"),
        ],
    );

    let yolo = root.join("yolo_set");
    common::write_yolo_dataset(
        &yolo,
        &["plastic", "cardboard"],
        &[
            ("y1", 30, "0 0.5 0.5 0.2 0.2\n"),
            ("y2", 31, "0 0.5 0.5 0.2 0.2\n"),
            ("y3", 32, "1 0.5 0.5 0.2 0.2\n"),
            ("y4", 33, "1 0.5 0.5 0.2 0.2\n"),
            ("y5", 34, ""),
        ],
    );
    common::write_file(&yolo.join("images/broken.bmp"), b"BM not really an image");
    common::write_file(&yolo.join("labels/broken.txt"), "0 0.5 0.5 0.2 0.2\n");

    common::write_file(&root.join("zz_notes/readme.md"), "notes");
}

fn list_dir(dir: &Path) -> BTreeSet<String> {
    fs::read_dir(dir)
        .expect("read dir")
        .map(|entry| entry.expect("dir entry").file_name().to_string_lossy().to_string())
        .collect()
}

#[test]
fn mixed_sources_are_normalized_into_one_tree() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let source = temp.path().join("source");
    let out = temp.path().join("out");
    build_source(&source);

    let pipeline = Pipeline::new(PipelineConfig::default()).expect("valid config");
    let report = pipeline
        .run(&source, &out, &RunOptions::default())
        .expect("pipeline run");

    let manifest = report.manifest.as_ref().expect("manifest in report");
    assert_eq!(manifest.sources.len(), 3);
    assert_eq!(report.skipped_sources.len(), 1);
    assert_eq!(report.skipped_sources[0].dataset, "zz_notes");

    // 16 parsed images: one corrupt, 15 verified, one duplicate.
    assert_eq!(report.verified, 15);
    assert_eq!(report.rejected_images(), 1);
    assert_eq!(manifest.duplicates_removed, 1);
    assert_eq!(report.duplicates.len(), 1);
    assert!(report.duplicates[0].path.ends_with("JPEGImages/v6.bmp"));
    assert_eq!(manifest.total_unique_images, 14);
    assert_eq!(manifest.excluded_unannotated, 1);

    let placed: usize = manifest.splits.values().map(|s| s.images).sum();
    assert_eq!(placed, 13);

    for split in Split::ALL {
        let split_dir = out.join(split.as_str());
        let images = list_dir(&split_dir.join("images"));
        let labels = list_dir(&split_dir.join("labels"));
        assert_eq!(images.len(), labels.len());
        assert_eq!(images.len(), manifest.splits[&split].images);

        for label in labels {
            let contents = fs::read_to_string(split_dir.join("labels").join(&label))
                .expect("read label file");
            for line in contents.lines() {
                let fields: Vec<&str> = line.split(' ').collect();
                assert_eq!(fields.len(), 5, "bad line {line:?}");
                fields[0].parse::<usize>().expect("class id");
                for value in &fields[1..] {
                    let (_, decimals) = value.split_once('.').expect("decimal point");
                    assert_eq!(decimals.len(), 6, "bad precision in {line:?}");
                    let parsed: f64 = value.parse().expect("float");
                    assert!((0.0..=1.0).contains(&parsed));
                }
            }
        }
    }

    assert!(out.join(MANIFEST_FILE).is_file());
    assert!(out.join("data.yaml").is_file());
    assert!(out.join(LABEL_AUDIT_FILE).is_file());
    assert!(out.join(DUPLICATES_FILE).is_file());

    let audit: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(out.join(LABEL_AUDIT_FILE)).expect("read audit"),
    )
    .expect("audit json");
    let entries = audit.as_array().expect("audit array");
    let pet = entries
        .iter()
        .find(|entry| entry["source_label"] == "PET_bottle")
        .expect("PET_bottle resolved");
    assert_eq!(pet["target_class"], "plastic");
    assert_eq!(pet["method"], "keyword");
}

#[test]
fn repeated_runs_produce_identical_splits() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let source = temp.path().join("source");
    build_source(&source);

    let pipeline = Pipeline::new(PipelineConfig::default()).expect("valid config");
    let out_a = temp.path().join("out_a");
    let out_b = temp.path().join("out_b");
    pipeline
        .run(&source, &out_a, &RunOptions::default())
        .expect("first run");
    pipeline
        .run(&source, &out_b, &RunOptions::default())
        .expect("second run");

    for split in ["train", "val", "test"] {
        assert_eq!(
            list_dir(&out_a.join(split).join("images")),
            list_dir(&out_b.join(split).join("images")),
        );
    }
    assert_eq!(
        fs::read_to_string(out_a.join(MANIFEST_FILE)).expect("read manifest a"),
        fs::read_to_string(out_b.join(MANIFEST_FILE)).expect("read manifest b"),
    );
}

#[test]
fn bad_ratios_fail_before_touching_the_filesystem() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let config = PipelineConfig {
        split: SplitConfig {
            train: 0.8,
            val: 0.1,
            test: 0.05,
        },
        ..Default::default()
    };

    let err = Pipeline::new(config).unwrap_err();
    assert!(matches!(err, DetnormError::InvalidSplitRatios { .. }));
    assert!(!temp.path().join("out").exists());
}

#[test]
fn dry_run_reports_without_writing() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let source = temp.path().join("source");
    let out = temp.path().join("out");
    build_source(&source);

    let pipeline = Pipeline::new(PipelineConfig::default()).expect("valid config");
    let options = RunOptions {
        dry_run: true,
        ..Default::default()
    };
    let report = pipeline.run(&source, &out, &options).expect("dry run");

    assert!(report.dry_run);
    assert_eq!(
        report.manifest.as_ref().map(|m| m.duplicates_removed),
        Some(1)
    );
    assert!(!out.exists());
    assert!(report.to_string().contains("Dry run"));
}

#[test]
fn stale_manifest_is_replaced() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let source = temp.path().join("source");
    let out = temp.path().join("out");
    build_source(&source);
    common::write_file(&out.join(MANIFEST_FILE), "{\"stale\": true}");

    let pipeline = Pipeline::new(PipelineConfig::default()).expect("valid config");
    pipeline
        .run(&source, &out, &RunOptions::default())
        .expect("pipeline run");

    let manifest: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.join(MANIFEST_FILE)).expect("read"))
            .expect("manifest json");
    assert!(manifest.get("stale").is_none());
    assert_eq!(manifest["seed"], 42);
}

#[test]
fn single_dataset_without_annotations_is_an_empty_working_set() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let dataset = temp.path().join("only");
    common::write_yolo_dataset(&dataset, &["glass"], &[("a", 1, "")]);

    let pipeline = Pipeline::new(PipelineConfig::default()).expect("valid config");
    let options = RunOptions {
        single: true,
        ..Default::default()
    };
    let err = pipeline
        .run(&dataset, &temp.path().join("out"), &options)
        .unwrap_err();
    assert!(matches!(err, DetnormError::EmptyWorkingSet { .. }));
    assert!(!temp.path().join("out").join(MANIFEST_FILE).exists());
}

#[test]
fn required_known_format_turns_unknown_into_an_error() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let source = temp.path().join("source");
    build_source(&source);

    let config = PipelineConfig {
        require_known_format: true,
        ..Default::default()
    };
    let pipeline = Pipeline::new(config).expect("valid config");
    let err = pipeline
        .run(&source, &temp.path().join("out"), &RunOptions::default())
        .unwrap_err();
    assert!(matches!(err, DetnormError::UnknownFormat { .. }));
}

#[test]
fn broken_datasets_are_reported_and_the_rest_still_emit() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let source = temp.path().join("source");
    let out = temp.path().join("out");

    common::write_voc_dataset(
        &source.join("a_voc"),
        &[("v1", 1, "glass"), ("v2", 2, "metal"), ("v3", 3, "paper")],
    );

    // Has the top-level keys detection looks for, but the image entries
    // are missing required fields.
    let coco = source.join("b_coco");
    common::write_bmp(&coco.join("images/c1.bmp"), 8, 8, 4);
    common::write_file(
        &coco.join("annotations.json"),
        r#"{"images": [{"id": 1}], "annotations": []}"#,
    );

    let yolo = source.join("c_yolo");
    common::write_yolo_dataset(&yolo, &["glass"], &[("y1", 5, "0 0.5 0.5 0.2 0.2\n")]);
    common::write_file(
        &yolo.join("data.yaml"),
        "names:\n  0: glass\n  4000000000000000000: metal\n",
    );

    let pipeline = Pipeline::new(PipelineConfig::default()).expect("valid config");
    let report = pipeline
        .run(&source, &out, &RunOptions::default())
        .expect("pipeline run");

    let failed: Vec<&str> = report
        .failed_sources
        .iter()
        .map(|source| source.dataset.as_str())
        .collect();
    assert_eq!(failed, vec!["b_coco", "c_yolo"]);
    assert!(report.failed_sources[0].error.contains("COCO"));

    let manifest = report.manifest.as_ref().expect("manifest in report");
    assert_eq!(manifest.sources.len(), 1);
    assert_eq!(manifest.sources[0].dataset, "a_voc");
    assert_eq!(manifest.total_unique_images, 3);
    assert!(out.join(MANIFEST_FILE).is_file());
    assert!(report.to_string().contains("failed"));
}

#[test]
fn rerun_into_the_same_out_dir_leaves_only_the_new_split() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let source = temp.path().join("source");
    let out = temp.path().join("out");

    let images: Vec<(String, u8, &str)> = (0..20u8)
        .map(|i| (format!("img{i:02}"), i, if i % 2 == 0 { "glass" } else { "metal" }))
        .collect();
    let entries: Vec<(&str, u8, &str)> = images
        .iter()
        .map(|(stem, fill, class)| (stem.as_str(), *fill, *class))
        .collect();
    common::write_voc_dataset(&source.join("voc_set"), &entries);

    for seed in [1, 999] {
        let config = PipelineConfig {
            seed,
            ..Default::default()
        };
        let pipeline = Pipeline::new(config).expect("valid config");
        let report = pipeline
            .run(&source, &out, &RunOptions::default())
            .expect("pipeline run");
        let manifest = report.manifest.expect("manifest in report");

        let mut seen = BTreeSet::new();
        let mut total = 0;
        for split in Split::ALL {
            let split_dir = out.join(split.as_str());
            let images = list_dir(&split_dir.join("images"));
            assert_eq!(images.len(), manifest.splits[&split].images);
            assert_eq!(list_dir(&split_dir.join("labels")).len(), images.len());
            total += images.len();
            seen.extend(images);
        }
        assert_eq!(total, 20);
        assert_eq!(seen.len(), 20, "an image landed in two splits");
    }
}

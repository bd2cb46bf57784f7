//! Ultralytics-style YOLO reader.
//!
//! Every image under `images/` becomes an entry; its label file is the same
//! relative path under `labels/` with a `.txt` extension. A missing label
//! file means the image has no annotations.
//!
//! Source class ids are only meaningful next to the dataset's class list.
//! When one is present (`data.yaml` `names`, else `classes.txt`) ids are
//! turned back into names and resolved through the label mapper; otherwise
//! they are taken to be target taxonomy ids already.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{collect_files_with_extensions, rel_string, AnnotationParser, ParsedDataset, IMAGE_EXTENSIONS};
use crate::detect::DatasetFormat;
use crate::error::DetnormError;
use crate::geometry::NormalizedBox;
use crate::labels::LabelMapper;
use crate::model::Annotation;

const LABEL_EXTENSION: &str = "txt";

/// Largest class id a `data.yaml` `names` mapping may use.
const MAX_SOURCE_CLASS_ID: usize = 9_999;

/// Parser for `images/` + `labels/` datasets.
pub struct YoloParser {
    root: PathBuf,
    images_dir: PathBuf,
    labels_dir: PathBuf,
}

impl YoloParser {
    pub fn new(root: PathBuf, images_dir: PathBuf, labels_dir: PathBuf) -> Self {
        Self {
            root,
            images_dir,
            labels_dir,
        }
    }
}

#[derive(Debug, PartialEq)]
struct YoloLabelRow {
    class_id: usize,
    cx: f64,
    cy: f64,
    w: f64,
    h: f64,
}

#[derive(Debug, Deserialize)]
struct DataYaml {
    names: DataYamlNames,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DataYamlNames {
    Sequence(Vec<String>),
    Mapping(BTreeMap<usize, String>),
}

impl AnnotationParser for YoloParser {
    fn format(&self) -> DatasetFormat {
        DatasetFormat::Yolo
    }

    fn parse(&self, mapper: &LabelMapper) -> Result<ParsedDataset, DetnormError> {
        let class_names = read_class_names(&self.root)?;
        if class_names.is_none() {
            log::info!(
                "No data.yaml or classes.txt in {}; reading class ids as taxonomy ids",
                self.root.display()
            );
        }

        let images = collect_files_with_extensions(&self.images_dir, &IMAGE_EXTENSIONS)?;
        let mut parsed = ParsedDataset::default();

        for image_path in images {
            let key = rel_string(&self.images_dir, &image_path);
            let label_path = self
                .labels_dir
                .join(Path::new(&key).with_extension(LABEL_EXTENSION));
            parsed.entry(&key, Some(image_path));

            if !label_path.is_file() {
                continue;
            }

            let contents = match fs::read_to_string(&label_path) {
                Ok(contents) => contents,
                Err(err) => {
                    log::warn!("Skipping unreadable label file {}: {}", label_path.display(), err);
                    parsed.stats.malformed += 1;
                    continue;
                }
            };
            for (idx, line) in contents.lines().enumerate() {
                let row = match parse_label_line(line, &label_path, idx + 1) {
                    Ok(Some(row)) => row,
                    Ok(None) => continue,
                    Err(err) => {
                        log::warn!("{}", err);
                        parsed.stats.malformed += 1;
                        continue;
                    }
                };

                let class_id = match &class_names {
                    Some(names) => names
                        .get(row.class_id)
                        .and_then(|name| mapper.class_id_for(name)),
                    None => Some(row.class_id).filter(|id| *id < mapper.taxonomy().len()),
                };
                let Some(class_id) = class_id else {
                    log::warn!(
                        "Class id {} in {} line {} has no taxonomy class, skipping",
                        row.class_id,
                        label_path.display(),
                        idx + 1
                    );
                    parsed.stats.unrecognized_class += 1;
                    continue;
                };

                match NormalizedBox::new(row.cx, row.cy, row.w, row.h) {
                    Ok(bbox) => parsed
                        .entry(&key, None)
                        .annotations
                        .push(Annotation::new(class_id, bbox)),
                    Err(reason) => {
                        log::warn!(
                            "Invalid bbox in {} line {}: {}",
                            label_path.display(),
                            idx + 1,
                            reason
                        );
                        parsed.stats.invalid_box += 1;
                    }
                }
            }
        }

        Ok(parsed)
    }
}

/// Source class names from `data.yaml`, else `classes.txt`, else `None`.
fn read_class_names(root: &Path) -> Result<Option<Vec<String>>, DetnormError> {
    let data_yaml = root.join("data.yaml");
    if data_yaml.is_file() {
        return read_data_yaml_names(&data_yaml).map(Some);
    }

    let classes_txt = root.join("classes.txt");
    if classes_txt.is_file() {
        return read_classes_txt(&classes_txt).map(Some);
    }

    Ok(None)
}

fn read_data_yaml_names(path: &Path) -> Result<Vec<String>, DetnormError> {
    let data = fs::read_to_string(path).map_err(DetnormError::io_at(path))?;
    let parsed: DataYaml =
        serde_yaml::from_str(&data).map_err(|source| DetnormError::YoloDataYamlParse {
            path: path.to_path_buf(),
            source,
        })?;

    let names = match parsed.names {
        DataYamlNames::Sequence(names) => names,
        DataYamlNames::Mapping(mapping) => names_from_mapping(mapping, path)?,
    };

    Ok(names)
}

/// Flattens an id -> name mapping into a list. Gaps and blank names become
/// `class_<id>`.
fn names_from_mapping(
    mapping: BTreeMap<usize, String>,
    path: &Path,
) -> Result<Vec<String>, DetnormError> {
    if let Some(&max) = mapping.keys().next_back() {
        if max > MAX_SOURCE_CLASS_ID {
            return Err(DetnormError::YoloDataYamlNames {
                path: path.to_path_buf(),
                message: format!("class id {max} exceeds the limit of {MAX_SOURCE_CLASS_ID}"),
            });
        }
    }

    let mut names = Vec::with_capacity(mapping.len());
    for (index, name) in mapping {
        while names.len() < index {
            names.push(format!("class_{}", names.len()));
        }
        if name.trim().is_empty() {
            names.push(format!("class_{}", index));
        } else {
            names.push(name);
        }
    }
    Ok(names)
}

fn read_classes_txt(path: &Path) -> Result<Vec<String>, DetnormError> {
    let data = fs::read_to_string(path).map_err(DetnormError::io_at(path))?;
    Ok(data
        .trim_end()
        .lines()
        .enumerate()
        .map(|(index, line)| match line.trim() {
            "" => format!("class_{}", index),
            name => name.to_string(),
        })
        .collect())
}

fn parse_label_line(
    line: &str,
    file_path: &Path,
    line_num: usize,
) -> Result<Option<YoloLabelRow>, DetnormError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    // Take at most 6 tokens so pathological inputs do not allocate unbounded memory.
    let tokens: Vec<&str> = trimmed.split_whitespace().take(6).collect();

    if tokens.len() != 5 {
        return Err(DetnormError::YoloLabelParse {
            path: file_path.to_path_buf(),
            line: line_num,
            message: format!(
                "expected 5 tokens, found {}{}",
                if tokens.len() > 5 { "more than " } else { "" },
                tokens.len().min(5)
            ),
        });
    }

    let class_id = tokens[0]
        .parse::<usize>()
        .map_err(|_| DetnormError::YoloLabelParse {
            path: file_path.to_path_buf(),
            line: line_num,
            message: format!(
                "invalid class_id '{}'; expected non-negative integer",
                tokens[0]
            ),
        })?;

    let cx = parse_f64_token(tokens[1], "x_center", file_path, line_num)?;
    let cy = parse_f64_token(tokens[2], "y_center", file_path, line_num)?;
    let w = parse_f64_token(tokens[3], "width", file_path, line_num)?;
    let h = parse_f64_token(tokens[4], "height", file_path, line_num)?;

    Ok(Some(YoloLabelRow {
        class_id,
        cx,
        cy,
        w,
        h,
    }))
}

/// Fuzz entry point for the label line parser.
#[cfg(feature = "fuzzing")]
pub fn fuzz_parse_label_line(input: &str) -> Result<(), DetnormError> {
    let _ = parse_label_line(input, Path::new("<fuzz>"), 1)?;
    Ok(())
}

fn parse_f64_token(
    raw: &str,
    field_name: &str,
    file_path: &Path,
    line_num: usize,
) -> Result<f64, DetnormError> {
    raw.parse::<f64>()
        .map_err(|_| DetnormError::YoloLabelParse {
            path: file_path.to_path_buf(),
            line: line_num,
            message: format!("invalid {field_name} '{raw}'; expected floating-point number"),
        })
}

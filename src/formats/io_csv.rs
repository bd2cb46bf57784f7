//! Bounding-box CSV reader.
//!
//! One row per box with at least `filename, xmin, ymin, xmax, ymax, class`
//! (header names compared case-insensitively, any column order). Coordinates
//! are absolute pixels. Optional `width`/`height` columns give the image
//! size; without them every row is measured against a fixed assumed
//! resolution, which is only correct if the whole dataset shares it.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use super::{AnnotationParser, ImageLocator, ParsedDataset};
use crate::detect::{DatasetFormat, CSV_REQUIRED_COLUMNS};
use crate::error::DetnormError;
use crate::geometry::PixelBox;
use crate::labels::LabelMapper;

/// Resolution assumed for CSV rows that carry no image size.
pub const DEFAULT_ASSUMED_RESOLUTION: (u32, u32) = (640, 640);

/// Parser for a single top-level annotation CSV.
pub struct CsvParser {
    root: PathBuf,
    csv_file: PathBuf,
    assumed_resolution: (u32, u32),
}

impl CsvParser {
    pub fn new(root: PathBuf, csv_file: PathBuf) -> Self {
        Self {
            root,
            csv_file,
            assumed_resolution: DEFAULT_ASSUMED_RESOLUTION,
        }
    }

    pub fn with_assumed_resolution(mut self, resolution: (u32, u32)) -> Self {
        self.assumed_resolution = resolution;
        self
    }
}

/// Column positions resolved from the header row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CsvColumns {
    filename: usize,
    xmin: usize,
    ymin: usize,
    xmax: usize,
    ymax: usize,
    class: usize,
    size: Option<(usize, usize)>,
}

impl CsvColumns {
    fn from_headers(headers: &csv::StringRecord, path: &Path) -> Result<Self, DetnormError> {
        let lowered: Vec<String> = headers.iter().map(|h| h.trim().to_lowercase()).collect();
        let find = |name: &str| lowered.iter().position(|h| h == name);
        let require = |name: &str| {
            find(name).ok_or_else(|| DetnormError::CsvMissingColumn {
                path: path.to_path_buf(),
                column: name.to_string(),
            })
        };

        for column in CSV_REQUIRED_COLUMNS {
            require(column)?;
        }

        Ok(Self {
            filename: require("filename")?,
            xmin: require("xmin")?,
            ymin: require("ymin")?,
            xmax: require("xmax")?,
            ymax: require("ymax")?,
            class: require("class")?,
            size: find("width").zip(find("height")),
        })
    }
}

/// A row that survived field parsing.
#[derive(Debug, Clone, PartialEq)]
struct CsvRow {
    filename: String,
    class_name: String,
    bbox: PixelBox,
    size: Option<(f64, f64)>,
}

fn parse_row(record: &csv::StringRecord, columns: &CsvColumns) -> Result<CsvRow, String> {
    let field = |index: usize, name: &str| {
        record
            .get(index)
            .map(str::trim)
            .ok_or_else(|| format!("missing '{name}' field"))
    };
    let number = |index: usize, name: &str| {
        let raw = field(index, name)?;
        raw.parse::<f64>()
            .map_err(|_| format!("invalid {name} '{raw}'; expected a number"))
    };

    let filename = field(columns.filename, "filename")?;
    if filename.is_empty() {
        return Err("empty filename".to_string());
    }

    let size = match columns.size {
        Some((w, h)) => Some((number(w, "width")?, number(h, "height")?)),
        None => None,
    };

    Ok(CsvRow {
        filename: filename.to_string(),
        class_name: field(columns.class, "class")?.to_string(),
        bbox: PixelBox::from_xyxy(
            number(columns.xmin, "xmin")?,
            number(columns.ymin, "ymin")?,
            number(columns.xmax, "xmax")?,
            number(columns.ymax, "ymax")?,
        ),
        size,
    })
}

impl AnnotationParser for CsvParser {
    fn format(&self) -> DatasetFormat {
        DatasetFormat::Csv
    }

    fn parse(&self, mapper: &LabelMapper) -> Result<ParsedDataset, DetnormError> {
        let path = self.csv_file.as_path();
        let file = File::open(path).map_err(DetnormError::io_at(path))?;
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(BufReader::new(file));

        let headers = reader.headers().map_err(|source| DetnormError::CsvParse {
            path: path.to_path_buf(),
            source,
        })?;
        let columns = CsvColumns::from_headers(headers, path)?;

        let assumed = (
            f64::from(self.assumed_resolution.0),
            f64::from(self.assumed_resolution.1),
        );
        if columns.size.is_none() {
            log::warn!(
                "{} has no width/height columns; assuming every image is {}x{}",
                path.display(),
                self.assumed_resolution.0,
                self.assumed_resolution.1
            );
        }

        log::info!("Parsing CSV: {}", path.display());

        let mut parsed = ParsedDataset::default();
        for (index, record) in reader.records().enumerate() {
            // Header is line 1.
            let line = index + 2;
            let record = match record {
                Ok(record) => record,
                Err(source) if source.is_io_error() => {
                    return Err(DetnormError::CsvParse {
                        path: path.to_path_buf(),
                        source,
                    });
                }
                Err(err) => {
                    log::warn!("Skipping {} line {}: {}", path.display(), line, err);
                    parsed.stats.malformed += 1;
                    continue;
                }
            };

            let row = match parse_row(&record, &columns) {
                Ok(row) => row,
                Err(message) => {
                    log::warn!("Skipping {} line {}: {}", path.display(), line, message);
                    parsed.stats.malformed += 1;
                    continue;
                }
            };

            parsed.push_pixel_box(
                &row.filename,
                &row.class_name,
                row.bbox,
                row.size.unwrap_or(assumed),
                mapper,
            );
        }

        let mut locator = ImageLocator::new(&self.root);
        for (key, image) in parsed.images.iter_mut() {
            image.path = locator.locate(key);
            if image.path.is_none() {
                log::warn!("Image '{}' not found under {}", key, self.root.display());
                parsed.stats.missing_image += 1;
            }
        }

        log::info!(
            "Parsed {} images with {} annotations",
            parsed.images.len(),
            parsed.annotation_count()
        );
        Ok(parsed)
    }
}

/// Fuzz entry point: reads CSV bytes through header and row parsing.
#[cfg(feature = "fuzzing")]
pub fn fuzz_parse_csv(bytes: &[u8]) -> Result<(), DetnormError> {
    let path = Path::new("<fuzz>");
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(bytes);
    let headers = reader.headers().map_err(|source| DetnormError::CsvParse {
        path: path.to_path_buf(),
        source,
    })?;
    let columns = CsvColumns::from_headers(headers, path)?;
    for record in reader.records() {
        let record = record.map_err(|source| DetnormError::CsvParse {
            path: path.to_path_buf(),
            source,
        })?;
        let _ = parse_row(&record, &columns);
    }
    Ok(())
}

//! Pascal VOC XML reader.
//!
//! Expects one XML file per image directly inside `Annotations/`, with images
//! under `JPEGImages/` (or `images/`). XML files are parsed on the rayon pool;
//! results are consumed in sorted file order so label resolution and logging
//! stay deterministic. A file that fails to parse is logged and skipped.

use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use roxmltree::Node;

use super::{has_extension, list_dir_sorted, AnnotationParser, ParsedDataset};
use crate::detect::DatasetFormat;
use crate::error::DetnormError;
use crate::geometry::PixelBox;
use crate::labels::LabelMapper;

/// Parser for `Annotations/` + `JPEGImages/` datasets.
pub struct VocParser {
    annotations_dir: PathBuf,
    images_dir: PathBuf,
}

impl VocParser {
    pub fn new(annotations_dir: PathBuf, images_dir: PathBuf) -> Self {
        Self {
            annotations_dir,
            images_dir,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct VocAnnotation {
    pub filename: String,
    pub width: u32,
    pub height: u32,
    pub objects: Vec<VocObject>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct VocObject {
    pub name: String,
    pub bbox: PixelBox,
}

impl AnnotationParser for VocParser {
    fn format(&self) -> DatasetFormat {
        DatasetFormat::Voc
    }

    fn parse(&self, mapper: &LabelMapper) -> Result<ParsedDataset, DetnormError> {
        let xml_files: Vec<PathBuf> = list_dir_sorted(&self.annotations_dir)?
            .into_iter()
            .filter(|path| path.is_file() && has_extension(path, &["xml"]))
            .collect();

        log::info!(
            "Parsing {} VOC XML files from {}",
            xml_files.len(),
            self.annotations_dir.display()
        );

        let documents: Vec<Result<VocAnnotation, DetnormError>> =
            xml_files.par_iter().map(|path| parse_voc_xml(path)).collect();

        let mut parsed = ParsedDataset::default();
        for document in documents {
            let annotation = match document {
                Ok(annotation) => annotation,
                Err(err) => {
                    log::error!("{}", err);
                    parsed.stats.malformed += 1;
                    continue;
                }
            };

            let image_path = self.images_dir.join(&annotation.filename);
            let path = if image_path.is_file() {
                Some(image_path)
            } else {
                log::warn!(
                    "Image '{}' not found in {}",
                    annotation.filename,
                    self.images_dir.display()
                );
                parsed.stats.missing_image += 1;
                None
            };
            parsed.entry(&annotation.filename, path);

            let size = (f64::from(annotation.width), f64::from(annotation.height));
            for object in annotation.objects {
                parsed.push_pixel_box(&annotation.filename, &object.name, object.bbox, size, mapper);
            }
        }

        Ok(parsed)
    }
}

fn parse_voc_xml(path: &Path) -> Result<VocAnnotation, DetnormError> {
    let xml = fs::read_to_string(path).map_err(DetnormError::io_at(path))?;
    parse_voc_xml_str(&xml, path)
}

pub(crate) fn parse_voc_xml_str(xml: &str, path: &Path) -> Result<VocAnnotation, DetnormError> {
    let document =
        roxmltree::Document::parse(xml).map_err(|source| DetnormError::VocXmlParse {
            path: path.to_path_buf(),
            message: source.to_string(),
        })?;

    let annotation = document.root_element();
    if annotation.tag_name().name() != "annotation" {
        return Err(DetnormError::VocXmlParse {
            path: path.to_path_buf(),
            message: "missing <annotation> root element".to_string(),
        });
    }

    let filename = required_child_text(annotation, "filename", path, "<annotation>")?;

    let size = required_child_element(annotation, "size", path, "<annotation>")?;
    let width = parse_required_u32(size, "width", path, "<size>")?;
    let height = parse_required_u32(size, "height", path, "<size>")?;

    let mut objects = Vec::new();
    for object in annotation
        .children()
        .filter(|node| node.is_element() && node.tag_name().name() == "object")
    {
        let name = required_child_text(object, "name", path, "<object>")?;
        let bndbox = required_child_element(object, "bndbox", path, "<object>")?;

        let xmin = parse_required_f64(bndbox, "xmin", path, "<bndbox>")?;
        let ymin = parse_required_f64(bndbox, "ymin", path, "<bndbox>")?;
        let xmax = parse_required_f64(bndbox, "xmax", path, "<bndbox>")?;
        let ymax = parse_required_f64(bndbox, "ymax", path, "<bndbox>")?;

        objects.push(VocObject {
            name,
            bbox: PixelBox::from_xyxy(xmin, ymin, xmax, ymax),
        });
    }

    Ok(VocAnnotation {
        filename,
        width,
        height,
        objects,
    })
}

/// Fuzz entry point: parses a VOC document and discards the result.
#[cfg(feature = "fuzzing")]
pub fn fuzz_parse_voc_xml(bytes: &[u8]) -> Result<(), DetnormError> {
    let xml = std::str::from_utf8(bytes).map_err(|source| DetnormError::VocXmlParse {
        path: PathBuf::from("<fuzz>"),
        message: source.to_string(),
    })?;
    parse_voc_xml_str(xml, Path::new("<fuzz>")).map(|_| ())
}

fn required_child_element<'a, 'input>(
    node: Node<'a, 'input>,
    tag: &str,
    path: &Path,
    context: &str,
) -> Result<Node<'a, 'input>, DetnormError> {
    child_element(node, tag).ok_or_else(|| DetnormError::VocXmlParse {
        path: path.to_path_buf(),
        message: format!("missing <{tag}> in {context}"),
    })
}

fn required_child_text(
    node: Node<'_, '_>,
    tag: &str,
    path: &Path,
    context: &str,
) -> Result<String, DetnormError> {
    optional_child_text(node, tag).ok_or_else(|| DetnormError::VocXmlParse {
        path: path.to_path_buf(),
        message: format!("missing <{tag}> in {context}"),
    })
}

fn parse_required_u32(
    node: Node<'_, '_>,
    tag: &str,
    path: &Path,
    context: &str,
) -> Result<u32, DetnormError> {
    let raw = required_child_text(node, tag, path, context)?;
    raw.parse::<u32>().map_err(|_| DetnormError::VocXmlParse {
        path: path.to_path_buf(),
        message: format!("invalid <{tag}> value '{raw}' in {context}; expected u32"),
    })
}

fn parse_required_f64(
    node: Node<'_, '_>,
    tag: &str,
    path: &Path,
    context: &str,
) -> Result<f64, DetnormError> {
    let raw = required_child_text(node, tag, path, context)?;
    raw.parse::<f64>().map_err(|_| DetnormError::VocXmlParse {
        path: path.to_path_buf(),
        message: format!(
            "invalid <{tag}> value '{raw}' in {context}; expected floating-point number"
        ),
    })
}

fn child_element<'a, 'input>(node: Node<'a, 'input>, tag: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|child| child.is_element() && child.tag_name().name() == tag)
}

fn optional_child_text(node: Node<'_, '_>, tag: &str) -> Option<String> {
    child_element(node, tag)
        .and_then(|child| child.text())
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(ToOwned::to_owned)
}

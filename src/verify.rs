//! Image verification and content hashing.
//!
//! [`verify`] fully decodes a file and reports why it is unusable instead of
//! failing; a corrupt image is an ordinary, skippable outcome for the
//! pipeline. [`hash`] is the equality oracle used by deduplication.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use image::{GenericImageView, ImageFormat, ImageReader};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Image encodings the pipeline accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageEncoding {
    Jpeg,
    Png,
    Bmp,
}

impl ImageEncoding {
    fn from_format(format: ImageFormat) -> Option<Self> {
        match format {
            ImageFormat::Jpeg => Some(ImageEncoding::Jpeg),
            ImageFormat::Png => Some(ImageEncoding::Png),
            ImageFormat::Bmp => Some(ImageEncoding::Bmp),
            _ => None,
        }
    }
}

impl fmt::Display for ImageEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImageEncoding::Jpeg => "jpeg",
            ImageEncoding::Png => "png",
            ImageEncoding::Bmp => "bmp",
        };
        f.write_str(name)
    }
}

/// What a successful check learned about the image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ImageInfo {
    pub encoding: ImageEncoding,
    pub width: u32,
    pub height: u32,
}

/// Outcome of [`verify`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImageCheck {
    Valid(ImageInfo),
    Invalid(String),
}

impl ImageCheck {
    pub fn is_valid(&self) -> bool {
        matches!(self, ImageCheck::Valid(_))
    }

    /// Why the image was rejected, if it was.
    pub fn reason(&self) -> Option<&str> {
        match self {
            ImageCheck::Valid(_) => None,
            ImageCheck::Invalid(reason) => Some(reason),
        }
    }
}

/// Decodes the image at `path` and checks that it is a non-empty JPEG, PNG or BMP.
///
/// The encoding is sniffed from the file contents, not the extension.
pub fn verify(path: &Path) -> ImageCheck {
    if !path.is_file() {
        return ImageCheck::Invalid("not a regular file".to_string());
    }

    let reader = match ImageReader::open(path).and_then(|reader| reader.with_guessed_format()) {
        Ok(reader) => reader,
        Err(err) => return ImageCheck::Invalid(format!("cannot open: {err}")),
    };

    let encoding = match reader.format() {
        Some(format) => match ImageEncoding::from_format(format) {
            Some(encoding) => encoding,
            None => {
                return ImageCheck::Invalid(format!("unsupported encoding {format:?}"));
            }
        },
        None => return ImageCheck::Invalid("unrecognized image encoding".to_string()),
    };

    let decoded = match reader.decode() {
        Ok(decoded) => decoded,
        Err(err) => return ImageCheck::Invalid(format!("decode failed: {err}")),
    };

    let (width, height) = decoded.dimensions();
    if width == 0 || height == 0 {
        return ImageCheck::Invalid(format!("empty image ({width}x{height})"));
    }

    ImageCheck::Valid(ImageInfo {
        encoding,
        width,
        height,
    })
}

/// Lowercase hex SHA-256 of the file contents, read in a streaming fashion.
pub fn hash(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

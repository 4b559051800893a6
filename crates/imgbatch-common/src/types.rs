//! Core type definitions for conversion requests and uploaded inputs.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Output image format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    /// JPEG, written with the `.jpg` extension.
    #[default]
    #[serde(alias = "jpg")]
    Jpeg,
    /// PNG.
    Png,
    /// WebP.
    Webp,
}

impl TargetFormat {
    /// All supported formats.
    pub const ALL: [TargetFormat; 3] = [TargetFormat::Jpeg, TargetFormat::Png, TargetFormat::Webp];

    /// Coder name understood by the converter (`jpeg`, `png`, `webp`).
    pub fn coder(self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Webp => "webp",
        }
    }

    /// File extension used for archive entries, without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Webp => "webp",
        }
    }

    /// MIME type of the converted output.
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Webp => "image/webp",
        }
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.coder())
    }
}

impl FromStr for TargetFormat {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            "webp" => Ok(Self::Webp),
            other => Err(Error::invalid_input(format!(
                "unknown target format '{other}' (expected jpeg, png or webp)"
            ))),
        }
    }
}

/// Encoder quality, 1 to 100 inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Quality(u8);

impl Quality {
    /// Lowest accepted quality.
    pub const MIN: u8 = 1;
    /// Highest accepted quality.
    pub const MAX: u8 = 100;
    /// Quality used when the request does not name one.
    pub const DEFAULT: Quality = Quality(90);

    /// Validate a quality value.
    pub fn new(value: u32) -> Result<Self> {
        if (Self::MIN as u32..=Self::MAX as u32).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(Error::invalid_input(format!(
                "quality must be between {} and {}, got {value}",
                Self::MIN,
                Self::MAX
            )))
        }
    }

    /// Parse an optional request parameter; absent or blank means the default.
    pub fn parse_param(raw: Option<&str>) -> Result<Self> {
        match raw.map(str::trim).filter(|s| !s.is_empty()) {
            None => Ok(Self::DEFAULT),
            Some(s) => {
                let value: u32 = s
                    .parse()
                    .map_err(|_| Error::invalid_input(format!("quality '{s}' is not a number")))?;
                Self::new(value)
            }
        }
    }

    /// The raw value.
    pub fn get(self) -> u8 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u32> for Quality {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Quality> for u32 {
    fn from(q: Quality) -> Self {
        q.0 as u32
    }
}

/// Parameters shared read-only by every job of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConversionRequest {
    /// Output format.
    pub format: TargetFormat,
    /// Encoder quality.
    #[serde(default)]
    pub quality: Quality,
}

impl ConversionRequest {
    /// Create a request.
    pub fn new(format: TargetFormat, quality: Quality) -> Self {
        Self { format, quality }
    }
}

/// One uploaded file, immutable once received.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    bytes: Bytes,
    filename: String,
    content_type: String,
}

impl UploadedImage {
    /// Wrap a received payload.
    pub fn new(
        bytes: impl Into<Bytes>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            bytes: bytes.into(),
            filename: filename.into(),
            content_type: content_type.into(),
        }
    }

    /// The raw payload. Cloning the returned handle does not copy the data.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// The filename as supplied by the client.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// The declared content type, possibly empty.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Boundary limits for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchLimits {
    /// Maximum number of files per batch.
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    /// Maximum payload size per file, in bytes.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

fn default_max_files() -> usize {
    50
}

fn default_max_file_bytes() -> u64 {
    100 * 1024 * 1024
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_files: default_max_files(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

impl BatchLimits {
    /// Check a batch against the limits. Runs before any job is created.
    pub fn check(&self, images: &[UploadedImage]) -> Result<()> {
        self.check_count(images.len())?;
        images
            .iter()
            .try_for_each(|img| self.check_size(img.filename(), img.len() as u64))
    }

    /// Check the number of files in a batch.
    pub fn check_count(&self, files: usize) -> Result<()> {
        if files == 0 {
            return Err(Error::rejected("no images supplied"));
        }
        if files > self.max_files {
            return Err(Error::rejected(format!(
                "too many files: {} > {}",
                files, self.max_files
            )));
        }
        Ok(())
    }

    /// Check one file's size, known before its bytes are loaded.
    pub fn check_size(&self, filename: &str, bytes: u64) -> Result<()> {
        if bytes > self.max_file_bytes {
            return Err(Error::rejected(format!(
                "{filename} is {bytes} bytes, limit is {}",
                self.max_file_bytes
            )));
        }
        Ok(())
    }
}

use imgbatch_common::{BatchLimits, ConversionRequest, Quality, TargetFormat};
use imgbatch_convert::ConverterConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub converter: ConverterConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub archive: ArchiveConfig,

    #[serde(default)]
    pub defaults: DefaultsConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct LimitsConfig {
    /// Maximum number of files in one batch (default: 50)
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    /// Maximum size of one uploaded file in bytes (default: 100 MiB)
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,

    /// Converter processes allowed to run at once (default: 8)
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
}

fn default_max_files() -> usize {
    BatchLimits::default().max_files
}

fn default_max_file_bytes() -> u64 {
    BatchLimits::default().max_file_bytes
}

fn default_max_concurrent_jobs() -> usize {
    8
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_files: default_max_files(),
            max_file_bytes: default_max_file_bytes(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
        }
    }
}

impl LimitsConfig {
    pub fn batch_limits(&self) -> BatchLimits {
        BatchLimits {
            max_files: self.max_files,
            max_file_bytes: self.max_file_bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ArchiveConfig {
    /// Deflate level, 0 (store) to 9 (best)
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,

    /// Suggested download filename
    #[serde(default = "default_filename")]
    pub filename: String,
}

fn default_compression_level() -> u32 {
    9
}

fn default_filename() -> String {
    "converted_images.zip".to_string()
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            compression_level: default_compression_level(),
            filename: default_filename(),
        }
    }
}

/// Conversion settings used when a request leaves them out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct DefaultsConfig {
    #[serde(default)]
    pub format: TargetFormat,

    #[serde(default)]
    pub quality: Quality,
}

impl DefaultsConfig {
    pub fn request(&self) -> ConversionRequest {
        ConversionRequest::new(self.format, self.quality)
    }
}

//! Output naming for archive entries.
//!
//! An entry is named after the uploaded file's stem plus the target format's
//! extension. Client-supplied directory components are dropped so a name can
//! never point outside the archive root. Two inputs with the same stem map to
//! the same entry name; that collision is left to the archive.

use std::path::Path;

use crate::types::TargetFormat;

/// Stem used when an upload has no usable filename.
const FALLBACK_STEM: &str = "image";

/// Derive the archive entry name for an uploaded file.
///
/// # Examples
///
/// ```
/// use imgbatch_common::paths::output_name;
/// use imgbatch_common::TargetFormat;
///
/// assert_eq!(output_name("photo.heic", TargetFormat::Jpeg), "photo.jpg");
/// assert_eq!(output_name("C:\\Users\\me\\scan.tiff", TargetFormat::Png), "scan.png");
/// assert_eq!(output_name("", TargetFormat::Webp), "image.webp");
/// ```
pub fn output_name(original: &str, format: TargetFormat) -> String {
    format!("{}.{}", file_stem(original), format.extension())
}

/// The last path component of `original` without its extension.
///
/// Both `/` and `\` count as separators since uploads come from any client OS.
pub fn file_stem(original: &str) -> &str {
    let base = original
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original)
        .trim();

    let stem = Path::new(base)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("");

    if stem.is_empty() || stem == "." || stem == ".." {
        FALLBACK_STEM
    } else {
        stem
    }
}

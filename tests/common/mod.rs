//! Shared helpers for integration tests.
//!
//! Most tests stand in for ImageMagick with small shell converters (`cat`,
//! `sh -c ...`) so they run anywhere. Tests that need the real converter call
//! [`magick_available`] and return early without it.

#![allow(dead_code)]

use std::io::{Cursor, Read};

use bytes::Bytes;
use imgbatch::pipeline::{BatchResult, PipelineOrchestrator};
use imgbatch_archive::DosTimestamp;
use imgbatch_common::{ConversionRequest, UploadedImage};
use imgbatch_convert::Converter;
use tokio_util::sync::CancellationToken;

/// Converter that copies its input unchanged.
pub fn identity_converter() -> Converter {
    Converter::new("cat")
}

/// Converter running a shell script; `$0` is the first extra argument.
pub fn script_converter(script: &str) -> Converter {
    Converter::new("sh").arg("-c").arg(script.to_string())
}

/// Orchestrator with a fixed entry timestamp so archives are reproducible.
pub fn orchestrator(converter: Converter) -> PipelineOrchestrator {
    PipelineOrchestrator::new(converter).with_timestamp(DosTimestamp::EPOCH)
}

pub fn upload(filename: &str, bytes: impl Into<Bytes>) -> UploadedImage {
    UploadedImage::new(bytes, filename, "image/png")
}

/// Prepare and run a batch, collecting the archive in memory.
pub async fn run_batch(
    orchestrator: &PipelineOrchestrator,
    images: Vec<UploadedImage>,
    request: ConversionRequest,
) -> (Vec<u8>, BatchResult) {
    let batch = orchestrator
        .prepare(images, request)
        .expect("batch should be accepted");
    let mut out = Vec::new();
    let result = orchestrator
        .run(batch, &mut out, CancellationToken::new())
        .await;
    (out, result)
}

/// Read every entry of an archive, in archive order.
pub fn read_entries(archive: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive)).expect("valid zip archive");
    (0..zip.len())
        .map(|i| {
            let mut file = zip.by_index(i).expect("entry readable");
            let mut data = Vec::new();
            file.read_to_end(&mut data).expect("entry content readable");
            (file.name().to_string(), data)
        })
        .collect()
}

/// Whether the stream ends with an end-of-central-directory record.
pub fn has_trailer(archive: &[u8]) -> bool {
    imgbatch_archive::format::has_trailer(archive)
}

pub fn magick_available() -> bool {
    which::which("magick").is_ok()
}

/// A small gradient image encoded in `format`.
pub fn encoded_image(width: u32, height: u32, format: image::ImageFormat) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x * 255 / width.max(1)) as u8, (y * 255 / height.max(1)) as u8, 128])
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, format).expect("encode fixture");
    out.into_inner()
}

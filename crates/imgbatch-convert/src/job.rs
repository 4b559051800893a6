//! Conversion jobs: one input file driven through one converter process.

use imgbatch_common::paths::output_name;
use imgbatch_common::{ConversionRequest, Error, JobError, UploadedImage};
use tokio_util::sync::CancellationToken;

use crate::process::{Converter, ConverterOutput};

/// Byte stream that becomes the body of one archive entry.
pub type EntryContent = ConverterOutput;

/// A named entry ready to be appended to the archive.
pub struct ArchiveEntry {
    /// Entry name inside the archive.
    pub name: String,
    /// Converted bytes; ends with an error if the conversion failed.
    pub content: EntryContent,
}

impl std::fmt::Debug for ArchiveEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveEntry")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// One uploaded image paired with its output name and conversion settings.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    index: usize,
    input: UploadedImage,
    output_name: String,
    request: ConversionRequest,
}

impl ConversionJob {
    /// Screen `input` and build the job for it.
    ///
    /// # Errors
    ///
    /// Returns a [`JobError`] wrapping [`Error::Unsupported`] when the input
    /// does not look like an image.
    pub fn new(
        index: usize,
        input: UploadedImage,
        request: ConversionRequest,
    ) -> Result<Self, JobError> {
        screen_input(&input).map_err(|e| JobError::new(input.filename(), e))?;
        let output_name = output_name(input.filename(), request.format);
        Ok(Self {
            index,
            input,
            output_name,
            request,
        })
    }

    /// Position of the input in the submitted batch.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Filename as uploaded.
    pub fn filename(&self) -> &str {
        self.input.filename()
    }

    /// Name of the entry this job produces.
    pub fn output_name(&self) -> &str {
        &self.output_name
    }

    /// Launch the converter and feed it this job's bytes.
    ///
    /// The returned entry streams the converter's output; the process exit
    /// status is only known once that stream has been drained, and a failure
    /// surfaces as its final item.
    ///
    /// # Errors
    ///
    /// Returns a [`JobError`] if the converter could not be started.
    pub fn run(
        &self,
        converter: &Converter,
        cancel: CancellationToken,
    ) -> Result<ArchiveEntry, JobError> {
        let attribute = |e: Error| JobError::new(self.filename(), e);

        let mut process = converter
            .start(self.request, self.filename(), cancel)
            .map_err(attribute)?;
        process
            .write_input(self.input.bytes().clone())
            .map_err(attribute)?;

        tracing::debug!(
            job = self.index,
            input = self.filename(),
            entry = %self.output_name,
            bytes = self.input.len(),
            "conversion started"
        );

        Ok(ArchiveEntry {
            name: self.output_name.clone(),
            content: process.output(),
        })
    }
}

/// Whether an upload looks like an image the converter can be asked to read.
///
/// Accepts any non-empty payload declared as `image/*`. Payloads with no
/// useful content type (empty or `application/octet-stream`) are accepted
/// when their magic bytes identify a known image format.
pub fn screen_input(input: &UploadedImage) -> Result<(), Error> {
    if input.is_empty() {
        return Err(Error::unsupported("empty file"));
    }

    let content_type = input
        .content_type()
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if content_type.starts_with("image/") {
        return Ok(());
    }

    if content_type.is_empty() || content_type == "application/octet-stream" {
        return match image::guess_format(input.bytes()) {
            Ok(format) => {
                tracing::debug!(input = input.filename(), ?format, "untyped upload sniffed as image");
                Ok(())
            }
            Err(_) => Err(Error::unsupported(format!(
                "unrecognised image data in {}",
                input.filename()
            ))),
        };
    }

    Err(Error::unsupported(format!(
        "content type {content_type} is not an image"
    )))
}

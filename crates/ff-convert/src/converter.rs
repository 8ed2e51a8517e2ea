//! The [`Converter`] trait and its input/output types.

use async_trait::async_trait;
use bytes::Bytes;

use ff_core::{Error, Operation, Result};

/// Longest accepted format / extension.
const MAX_FORMAT_LEN: usize = 10;

/// One conversion request, already admitted.
#[derive(Debug, Clone)]
pub struct ConversionInput {
    pub operation: Operation,
    /// Raw bytes of the uploaded file.
    pub data: Bytes,
    /// Extension of the uploaded file, when the client sent a file name.
    pub source_ext: Option<String>,
    /// Target extension, e.g. `mp4` or `pdf`.
    pub target_format: String,
}

/// Converted file.
#[derive(Debug, Clone)]
pub struct ConversionOutput {
    pub data: Bytes,
    pub format: String,
    pub content_type: &'static str,
}

impl ConversionOutput {
    pub fn new(data: impl Into<Bytes>, format: impl Into<String>) -> Self {
        let format = format.into();
        Self {
            data: data.into(),
            content_type: content_type_for(&format),
            format,
        }
    }
}

/// Runs a single conversion.
///
/// Implementations must not retain the input after returning; the caller
/// holds the admission slot only for the duration of the call.
#[async_trait]
pub trait Converter: Send + Sync {
    async fn convert(&self, input: ConversionInput) -> Result<ConversionOutput>;
}

/// Lowercase a client-supplied format and reject anything that is not a
/// short alphanumeric extension.
pub fn normalize_format(raw: &str) -> Result<String> {
    let format = raw.trim().trim_start_matches('.').to_ascii_lowercase();
    if format.is_empty() {
        return Err(Error::Validation("format must not be empty".into()));
    }
    if format.len() > MAX_FORMAT_LEN {
        return Err(Error::Validation(format!(
            "format must be at most {MAX_FORMAT_LEN} characters"
        )));
    }
    if !format.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(Error::Validation(format!("invalid format: {raw}")));
    }
    Ok(format)
}

/// MIME type for a target extension. Unknown formats are served as
/// `application/octet-stream`.
pub fn content_type_for(format: &str) -> &'static str {
    match format {
        "pdf" => "application/pdf",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "odt" => "application/vnd.oasis.opendocument.text",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "avif" => "image/avif",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "zip" => "application/zip",
        "7z" => "application/x-7z-compressed",
        "tar" => "application/x-tar",
        "html" => "text/html",
        "md" => "text/markdown",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

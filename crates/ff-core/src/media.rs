//! Conversion-domain enums: resource classes, heavyweight job types, and the
//! operations exposed by the conversion endpoint.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A category of conversion work with its own concurrency limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ResourceClass {
    Pdf,
    Image,
    Video,
    Audio,
    Archive,
    Text,
}

impl ResourceClass {
    /// Number of classes.
    pub const COUNT: usize = 6;

    /// Every class, in a stable order.
    pub const ALL: [ResourceClass; Self::COUNT] = [
        ResourceClass::Pdf,
        ResourceClass::Image,
        ResourceClass::Video,
        ResourceClass::Audio,
        ResourceClass::Archive,
        ResourceClass::Text,
    ];

    /// Whether work of this class goes through the sequential job queue
    /// instead of the fail-fast semaphore.
    pub fn is_queued(self) -> bool {
        matches!(self, ResourceClass::Video)
    }

    /// Stable index into per-class arrays.
    pub fn index(self) -> usize {
        match self {
            ResourceClass::Pdf => 0,
            ResourceClass::Image => 1,
            ResourceClass::Video => 2,
            ResourceClass::Audio => 3,
            ResourceClass::Archive => 4,
            ResourceClass::Text => 5,
        }
    }

    /// Lowercase name used in logs, metrics labels and JSON.
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceClass::Pdf => "pdf",
            ResourceClass::Image => "image",
            ResourceClass::Video => "video",
            ResourceClass::Audio => "audio",
            ResourceClass::Archive => "archive",
            ResourceClass::Text => "text",
        }
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceClass::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown resource class: {s}"))
    }
}

/// Kind of heavyweight job held in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    VideoConvert,
    VideoCompress,
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobType::VideoConvert => f.write_str("video-convert"),
            JobType::VideoCompress => f.write_str("video-compress"),
        }
    }
}

/// A conversion operation a caller can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    PdfConvert,
    ImageConvert,
    VideoConvert,
    VideoCompress,
    AudioConvert,
    ArchiveConvert,
    TextConvert,
}

impl Operation {
    pub const ALL: [Operation; 7] = [
        Operation::PdfConvert,
        Operation::ImageConvert,
        Operation::VideoConvert,
        Operation::VideoCompress,
        Operation::AudioConvert,
        Operation::ArchiveConvert,
        Operation::TextConvert,
    ];

    /// The resource class this operation is accounted against.
    pub fn class(self) -> ResourceClass {
        match self {
            Operation::PdfConvert => ResourceClass::Pdf,
            Operation::ImageConvert => ResourceClass::Image,
            Operation::VideoConvert | Operation::VideoCompress => ResourceClass::Video,
            Operation::AudioConvert => ResourceClass::Audio,
            Operation::ArchiveConvert => ResourceClass::Archive,
            Operation::TextConvert => ResourceClass::Text,
        }
    }

    /// The queue job type, for heavyweight operations only.
    pub fn job_type(self) -> Option<JobType> {
        match self {
            Operation::VideoConvert => Some(JobType::VideoConvert),
            Operation::VideoCompress => Some(JobType::VideoCompress),
            _ => None,
        }
    }

    /// Route segment for this operation (e.g. `video-compress`).
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::PdfConvert => "pdf-convert",
            Operation::ImageConvert => "image-convert",
            Operation::VideoConvert => "video-convert",
            Operation::VideoCompress => "video-compress",
            Operation::AudioConvert => "audio-convert",
            Operation::ArchiveConvert => "archive-convert",
            Operation::TextConvert => "text-convert",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| format!("unknown operation: {s}"))
    }
}

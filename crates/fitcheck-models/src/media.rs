//! Uploaded media models.
//!
//! An upload is reduced to its bytes, a validated container type and a
//! content-derived [`ContentIdentity`]. The identity is the cache key for
//! the whole pipeline, so it must depend on the bytes only and never on the
//! filename the client happened to send.

use std::fmt;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Deterministic, content-derived key for a media input (hex SHA-256).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ContentIdentity(String);

impl ContentIdentity {
    /// Hash the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        Self(format!("{:x}", digest))
    }

    /// Get the inner hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for ContentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rejected media type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaTypeError {
    #[error("Unsupported media type: {0}")]
    Unsupported(String),

    #[error("No media type or file extension provided")]
    Missing,
}

/// Accepted video containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Mp4,
    Mov,
    Avi,
    Webm,
}

impl MediaType {
    pub const ALL: [MediaType; 4] = [Self::Mp4, Self::Mov, Self::Avi, Self::Webm];

    /// Canonical MIME type sent to downstream services.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Mp4 => "video/mp4",
            Self::Mov => "video/quicktime",
            Self::Avi => "video/x-msvideo",
            Self::Webm => "video/webm",
        }
    }

    /// Canonical file extension (no dot).
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Mov => "mov",
            Self::Avi => "avi",
            Self::Webm => "webm",
        }
    }

    /// Parse a declared MIME type. Parameters (`; codecs=...`) are ignored.
    pub fn from_mime(mime: &str) -> Result<Self, MediaTypeError> {
        let essence = mime
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            "video/mp4" => Ok(Self::Mp4),
            "video/quicktime" => Ok(Self::Mov),
            "video/x-msvideo" | "video/avi" | "video/msvideo" => Ok(Self::Avi),
            "video/webm" => Ok(Self::Webm),
            "" => Err(MediaTypeError::Missing),
            _ => Err(MediaTypeError::Unsupported(mime.to_string())),
        }
    }

    /// Parse the extension of a filename, case-insensitively.
    pub fn from_filename(filename: &str) -> Result<Self, MediaTypeError> {
        let (_, ext) = filename.rsplit_once('.').ok_or(MediaTypeError::Missing)?;
        let ext = ext.to_ascii_lowercase();

        Self::ALL
            .into_iter()
            .find(|t| t.extension() == ext)
            .ok_or_else(|| MediaTypeError::Unsupported(format!(".{}", ext)))
    }

    /// Resolve an upload's type: the filename extension decides when present,
    /// then the declared MIME type. Generic MIME types such as
    /// `application/octet-stream` are not trusted on their own.
    pub fn resolve(filename: Option<&str>, mime: Option<&str>) -> Result<Self, MediaTypeError> {
        match filename.filter(|f| !f.trim().is_empty()) {
            Some(name) => Self::from_filename(name),
            None => Self::from_mime(mime.unwrap_or_default()),
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// Media bytes plus their container type. Cloning shares the buffer.
#[derive(Debug, Clone)]
pub struct MediaPayload {
    data: Arc<[u8]>,
    media_type: MediaType,
}

impl MediaPayload {
    pub fn new(data: impl Into<Arc<[u8]>>, media_type: MediaType) -> Self {
        Self {
            data: data.into(),
            media_type,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// One analysis submission.
///
/// Built once at ingestion and dropped when the pipeline run ends; only the
/// derived record outlives it (in the cache).
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub identity: ContentIdentity,
    pub media: MediaPayload,
    /// Client-supplied filename, kept for diagnostics only.
    pub filename: Option<String>,
}

impl AnalysisRequest {
    /// Create a request, deriving the identity from the bytes.
    pub fn new(data: impl Into<Arc<[u8]>>, media_type: MediaType) -> Self {
        let media = MediaPayload::new(data, media_type);
        let identity = ContentIdentity::from_bytes(media.data());
        Self {
            identity,
            media,
            filename: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

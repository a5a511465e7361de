use reqwest::StatusCode;
use std::sync::Arc;

/// Errors produced by the recorder pipeline.
///
/// Retryable variants are absorbed by the synchronizer's bounded retry loop;
/// everything else is surfaced to the caller and halts the playhead.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RecorderError {
    #[error("recording cancelled")]
    Cancelled,

    #[error("invalid source URI `{input}`: {reason}")]
    InvalidSource { input: String, reason: String },

    #[error("HTTP request failed: {source}")]
    Network { source: Arc<reqwest::Error> },

    #[error("request timed out fetching {url}")]
    Timeout { url: String },

    #[error("request returned HTTP {status} for {url}")]
    HttpStatus { status: StatusCode, url: String },

    #[error("playlist error: {reason}")]
    Playlist { reason: String },

    #[error("variant playlists out of sync, media sequences {sequences:?}")]
    Misaligned { sequences: Vec<u64> },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl RecorderError {
    pub fn playlist(reason: impl Into<String>) -> Self {
        Self::Playlist {
            reason: reason.into(),
        }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    pub fn invalid_source(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSource {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Whether the synchronizer may recover from this error by retrying the
    /// whole fetch batch. Non-2xx statuses are transient by policy: a variant
    /// playlist briefly returning 404/503 mid-rotation is expected noise.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. }
            | Self::Timeout { .. }
            | Self::HttpStatus { .. }
            | Self::Misaligned { .. } => true,
            Self::Cancelled
            | Self::InvalidSource { .. }
            | Self::Playlist { .. }
            | Self::Internal { .. } => false,
        }
    }
}

impl From<reqwest::Error> for RecorderError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network {
            source: Arc::new(err),
        }
    }
}

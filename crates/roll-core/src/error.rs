//! Error types for Roll Core

use crate::types::{MediaId, TabId};
use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types
#[derive(Error, Debug)]
pub enum Error {
    // Audio pipeline errors
    #[error("Failed to create capture surface: {0}")]
    CaptureSurface(String),

    #[error("Failed to acquire capture stream for tab {tab}: {reason}")]
    StreamAcquisition { tab: TabId, reason: String },

    // Document errors
    #[error("Document cannot be inspected: {origin}")]
    CrossOriginDocument { origin: String },

    // Session errors
    #[error("No session for tab {0}")]
    SessionNotFound(TabId),

    #[error("No media element with id {0}")]
    MediaNotFound(MediaId),

    #[error("Session for tab {0} is disabled")]
    SessionDisabled(TabId),

    // Loop errors
    #[error("Invalid timestamp: {0:?}")]
    InvalidTimestamp(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a capture surface error
    pub fn capture(msg: impl Into<String>) -> Self {
        Error::CaptureSurface(msg.into())
    }

    /// Create a stream acquisition error
    pub fn stream(tab: TabId, reason: impl Into<String>) -> Self {
        Error::StreamAcquisition {
            tab,
            reason: reason.into(),
        }
    }

    /// Returns true if this error is recoverable
    ///
    /// Recoverable errors degrade to "no player", "no audio mode" or
    /// "skip this document" instead of aborting the current operation.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::CaptureSurface(_)
                | Error::StreamAcquisition { .. }
                | Error::CrossOriginDocument { .. }
                | Error::MediaNotFound(_)
                | Error::InvalidTimestamp(_)
        )
    }

    /// Returns the error code used in logs and notifications
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::CaptureSurface(_) => "CAPTURE_SURFACE",
            Error::StreamAcquisition { .. } => "STREAM_ACQUIRE",
            Error::CrossOriginDocument { .. } => "CROSS_ORIGIN",
            Error::SessionNotFound(_) => "NO_SESSION",
            Error::MediaNotFound(_) => "NO_MEDIA",
            Error::SessionDisabled(_) => "SESSION_DISABLED",
            Error::InvalidTimestamp(_) => "INVALID_TIMESTAMP",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::Json(_) => "JSON",
            Error::Internal(_) => "INTERNAL",
        }
    }
}

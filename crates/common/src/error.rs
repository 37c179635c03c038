//! Error types for UiDriver

use std::time::Duration;
use thiserror::Error;

/// Result type alias using UiDriver Error
pub type Result<T> = std::result::Result<T, Error>;

/// UiDriver error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("no managed application registered as '{0}'")]
    NotFound(String),

    #[error("launch failed: {0}")]
    Launch(String),

    #[error("registration failed: {0}")]
    Registration(String),

    #[error("condition not met after {attempts} attempt(s) in {elapsed:?}{}", fmt_observed(.last_observed))]
    Timeout {
        attempts: u32,
        elapsed: Duration,
        last_observed: Option<String>,
    },

    #[error("wait cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },

    #[error("window operation failed: {0}")]
    WindowOperation(String),

    #[error("window {0:#x} is no longer valid")]
    WindowGone(u64),

    #[error("image matching backend error: {0}")]
    ImageMatch(String),

    #[error("OCR backend error: {0}")]
    Ocr(String),

    #[error("template '{template}' not on screen (best confidence {best_confidence:.3})")]
    TargetNotFound {
        template: String,
        best_confidence: f32,
    },

    #[error("screen capture failed: {0}")]
    Capture(String),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidState { from: String, to: String },

    #[error("not supported on this platform: {0}")]
    PlatformUnsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

fn fmt_observed(observed: &Option<String>) -> String {
    match observed {
        Some(s) => format!(" (last observed: {s})"),
        None => String::new(),
    }
}

impl Error {
    /// Whether this error represents a transient condition that a wait loop
    /// may absorb as retry fuel. Infrastructure failures (spawn errors,
    /// unreadable templates, missing OCR backend) are never transient.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Timeout { .. }
                | Error::WindowOperation(_)
                | Error::TargetNotFound { .. }
                | Error::Capture(_)
        )
    }
}

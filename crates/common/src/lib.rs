//! UiDriver Common Library
//!
//! Shared types, errors, configuration, evidence output, and the
//! wait/retry synchronization primitive for the UiDriver engine.

pub mod config;
pub mod error;
pub mod evidence;
pub mod types;
pub mod wait;

// Re-export commonly used types
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use evidence::{EvidenceLog, VerificationRecord};
pub use types::*;
pub use wait::{await_condition, await_condition_cancellable, Backoff, Probe, WaitPolicy};

/// UiDriver version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

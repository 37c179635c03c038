//! Capture quiescence gate
//!
//! Window geometry changes and screen captures race: a capture taken while a
//! window is mid-move sees torn pixels. Captures take the gate shared, so any
//! number run concurrently; geometry mutations take it exclusive and drain
//! in-flight captures first.

use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Clone, Default)]
pub struct CaptureGate {
    inner: Arc<RwLock<()>>,
}

impl CaptureGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Held for the duration of a capture
    pub async fn capture(&self) -> RwLockReadGuard<'_, ()> {
        self.inner.read().await
    }

    /// Held for the duration of a geometry mutation and its verification
    pub async fn mutate(&self) -> RwLockWriteGuard<'_, ()> {
        self.inner.write().await
    }
}

//! Evidence output for verification steps
//!
//! Screenshots, OCR text, and pass/fail records produced by the engine and
//! consumed by an external reporting layer.

use crate::error::Result;
use crate::types::OcrResult;
use image::DynamicImage;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A single pass/fail verification record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub id: String,
    /// Logical name of the managed application involved
    pub app: String,
    /// Operation that produced this record, e.g. "assert_visible_text"
    pub operation: String,
    pub passed: bool,
    pub details: Option<String>,
    pub screenshot: Option<PathBuf>,
    pub elapsed_ms: u64,
    pub timestamp: i64,
}

impl VerificationRecord {
    pub fn new(app: &str, operation: &str, passed: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            app: app.to_string(),
            operation: operation.to_string(),
            passed,
            details: None,
            screenshot: None,
            elapsed_ms: 0,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_screenshot(mut self, path: PathBuf) -> Self {
        self.screenshot = Some(path);
        self
    }

    pub fn with_elapsed(mut self, elapsed: std::time::Duration) -> Self {
        self.elapsed_ms = elapsed.as_millis() as u64;
        self
    }
}

/// Collects evidence artifacts for the duration of a scenario
pub struct EvidenceLog {
    screenshot_dir: PathBuf,
    records: Mutex<Vec<VerificationRecord>>,
    /// OCR text keyed by region label
    texts: Mutex<HashMap<String, String>>,
}

impl EvidenceLog {
    pub fn new(screenshot_dir: impl Into<PathBuf>) -> Result<Self> {
        let screenshot_dir = screenshot_dir.into();
        std::fs::create_dir_all(&screenshot_dir)?;
        Ok(Self {
            screenshot_dir,
            records: Mutex::new(Vec::new()),
            texts: Mutex::new(HashMap::new()),
        })
    }

    pub fn screenshot_dir(&self) -> &Path {
        &self.screenshot_dir
    }

    /// Save a labeled PNG screenshot, overwriting any previous one with the
    /// same label
    pub fn save_screenshot(&self, label: &str, image: &DynamicImage) -> Result<PathBuf> {
        let path = self.screenshot_dir.join(format!("{}.png", sanitize(label)));
        image.save(&path)?;
        debug!("Saved screenshot '{}' to {}", label, path.display());
        Ok(path)
    }

    /// Record OCR output under a region label
    pub fn record_text(&self, label: &str, result: &OcrResult) {
        self.texts
            .lock()
            .insert(label.to_string(), result.text.clone());
    }

    pub fn text(&self, label: &str) -> Option<String> {
        self.texts.lock().get(label).cloned()
    }

    pub fn record(&self, record: VerificationRecord) {
        if record.passed {
            debug!("✓ {} / {}", record.app, record.operation);
        } else {
            info!(
                "✗ {} / {} - {}",
                record.app,
                record.operation,
                record.details.as_deref().unwrap_or("no details")
            );
        }
        self.records.lock().push(record);
    }

    pub fn records(&self) -> Vec<VerificationRecord> {
        self.records.lock().clone()
    }

    /// Write all verification records to a JSON file
    pub fn write_json(&self, path: &Path) -> Result<PathBuf> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&*self.records.lock())?;
        std::fs::write(path, json)?;
        info!("Evidence records written to {}", path.display());
        Ok(path.to_path_buf())
    }
}

/// Keep labels filesystem-safe
fn sanitize(label: &str) -> String {
    label
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

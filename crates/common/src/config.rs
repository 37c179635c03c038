//! Engine configuration
//!
//! Consumed by the engine, owned by the embedding test runner.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory for template images
    pub template_dir: PathBuf,

    /// Directory for evidence screenshots
    pub screenshot_dir: PathBuf,

    /// Image matching configuration
    pub matching: MatchConfig,

    /// OCR configuration
    pub ocr: OcrConfig,

    /// Wait/retry configuration
    pub wait: WaitConfig,

    /// Process launch configuration
    pub launch: LaunchConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            template_dir: PathBuf::from("templates"),
            screenshot_dir: PathBuf::from("screenshots"),
            matching: MatchConfig::default(),
            ocr: OcrConfig::default(),
            wait: WaitConfig::default(),
            launch: LaunchConfig::default(),
        }
    }
}

/// Image matching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchConfig {
    /// Minimum similarity for a match to count as found (0.0 - 1.0)
    pub min_similarity: f32,

    /// Scale factors to re-scan at when the template was captured at a
    /// different DPI than the runtime screen
    pub scale_factors: Vec<f32>,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            min_similarity: 0.8,
            scale_factors: vec![1.0, 1.25, 1.5],
        }
    }
}

/// OCR configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    /// Minimum confidence for extracted text (0.0 - 1.0)
    pub min_confidence: f32,

    /// Language hint passed to the recognition backend
    pub language: String,

    /// Upscale factor applied during preprocessing; small UI fonts recognize
    /// poorly at native resolution
    pub upscale_factor: f32,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.70,
            language: "en-US".to_string(),
            upscale_factor: 2.0,
        }
    }
}

/// Wait/retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitConfig {
    /// Default verification timeout in milliseconds
    pub timeout_ms: u64,

    /// Default poll interval in milliseconds
    pub poll_interval_ms: u64,

    /// Use exponential backoff instead of fixed polling
    pub exponential_backoff: bool,

    /// Attempt cap for short operation-verification waits (focus, geometry)
    pub max_retries: u32,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            poll_interval_ms: 500,
            exponential_backoff: false,
            max_retries: 3,
        }
    }
}

/// Process launch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchConfig {
    /// How long to wait for a launched process to show a visible window
    pub window_timeout_ms: u64,

    /// Grace period between a window-close signal and a forced kill
    pub grace_timeout_ms: u64,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            window_timeout_ms: 30_000,
            grace_timeout_ms: 5_000,
        }
    }
}

impl EngineConfig {
    /// Load configuration from file, falling back to defaults when missing
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.wait.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.wait.poll_interval_ms)
    }

    pub fn window_timeout(&self) -> Duration {
        Duration::from_millis(self.launch.window_timeout_ms)
    }

    pub fn grace_timeout(&self) -> Duration {
        Duration::from_millis(self.launch.grace_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.matching.min_similarity, 0.8);
        assert_eq!(config.ocr.min_confidence, 0.70);
        assert_eq!(config.ocr.upscale_factor, 2.0);
        assert_eq!(config.wait.timeout_ms, 30_000);
        assert_eq!(config.wait.poll_interval_ms, 500);
        assert_eq!(config.wait.max_retries, 3);
    }

    #[test]
    fn roundtrips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");

        let mut config = EngineConfig::default();
        config.matching.min_similarity = 0.9;
        config.ocr.language = "de-DE".to_string();
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.matching.min_similarity, 0.9);
        assert_eq!(loaded.ocr.language, "de-DE");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let loaded = EngineConfig::load(std::path::Path::new("/nonexistent/engine.toml")).unwrap();
        assert_eq!(loaded.wait.timeout_ms, 30_000);
    }
}

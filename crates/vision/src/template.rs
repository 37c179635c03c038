//! Template images and the process-lifetime template cache

use image::{DynamicImage, GrayImage};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use uidriver_common::{Error, Result};

/// A decoded reference image searched for on screen.
///
/// Read-only after first load; matching works on the grayscale plane.
#[derive(Debug)]
pub struct Template {
    path: PathBuf,
    gray: GrayImage,
    /// Per-template similarity threshold, overrides the engine default
    pub threshold_override: Option<f32>,
}

impl Template {
    /// Decode a template from disk
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let decoded = image::open(&path).map_err(|e| {
            Error::ImageMatch(format!("template '{}' unreadable: {}", path.display(), e))
        })?;
        debug!(
            "Loaded template {} ({}x{})",
            path.display(),
            decoded.width(),
            decoded.height()
        );
        Ok(Self {
            path,
            gray: decoded.to_luma8(),
            threshold_override: None,
        })
    }

    /// Build a template from an in-memory image (tests, synthetic templates)
    pub fn from_image(label: impl Into<PathBuf>, image: &DynamicImage) -> Self {
        Self {
            path: label.into(),
            gray: image.to_luma8(),
            threshold_override: None,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold_override = Some(threshold);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn gray(&self) -> &GrayImage {
        &self.gray
    }

    pub fn width(&self) -> u32 {
        self.gray.width()
    }

    pub fn height(&self) -> u32 {
        self.gray.height()
    }
}

/// Caches decoded templates by path for the process lifetime
pub struct TemplateStore {
    root: PathBuf,
    cache: RwLock<HashMap<PathBuf, Arc<Template>>>,
}

impl TemplateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve a template path (relative paths are joined onto the store
    /// root), loading and caching it on first use.
    pub fn get(&self, path: impl AsRef<Path>) -> Result<Arc<Template>> {
        let resolved = if path.as_ref().is_absolute() {
            path.as_ref().to_path_buf()
        } else {
            self.root.join(path.as_ref())
        };

        if let Some(hit) = self.cache.read().get(&resolved) {
            return Ok(hit.clone());
        }

        let template = Arc::new(Template::load(&resolved)?);
        self.cache
            .write()
            .entry(resolved)
            .or_insert_with(|| template.clone());
        Ok(template)
    }

    /// Number of cached templates
    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;

    fn checker(width: u32, height: u32) -> DynamicImage {
        let img = RgbaImage::from_fn(width, height, |x, y| {
            if (x + y) % 2 == 0 {
                image::Rgba([255, 255, 255, 255])
            } else {
                image::Rgba([0, 0, 0, 255])
            }
        });
        DynamicImage::ImageRgba8(img)
    }

    #[test]
    fn loads_and_caches_by_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("button.png");
        checker(8, 6).save(&path).unwrap();

        let store = TemplateStore::new(dir.path());
        let first = store.get("button.png").unwrap();
        let second = store.get("button.png").unwrap();

        assert_eq!(first.width(), 8);
        assert_eq!(first.height(), 6);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn unreadable_template_is_a_backend_error() {
        let store = TemplateStore::new("/nonexistent");
        let err = store.get("missing.png").unwrap_err();
        assert!(matches!(err, Error::ImageMatch(_)));
    }

    #[test]
    fn threshold_override_survives_construction() {
        let template = Template::from_image("synthetic", &checker(4, 4)).with_threshold(0.95);
        assert_eq!(template.threshold_override, Some(0.95));
    }
}

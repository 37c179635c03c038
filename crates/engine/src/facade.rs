//! Managed application facade
//!
//! `Engine` composes the registry, the vision crates, and the evidence log
//! behind logical-name keyed operations. Side-effecting operations (click,
//! type) are single-shot; only verifications poll through the wait
//! primitive. Every facade call holds the per-app lock for its duration, so
//! two tasks driving the same logical name serialize while different apps
//! proceed independently.

use crate::gate::CaptureGate;
use crate::platform::{Desktop, NativeDesktop};
use crate::registry::{AppRegistry, LaunchSpec, ManagedApp};
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uidriver_common::{
    await_condition_cancellable, Backoff, EngineConfig, Error, EvidenceLog, KeyCombo, MatchResult,
    MouseButton, OcrResult, Point, Probe, ProcessMatcher, Rect, Result, VerificationRecord,
    WaitPolicy, WindowInfo,
};
use uidriver_vision::{Matcher, OcrEngine, TemplateStore};

/// Where a click lands, in window-local coordinates
#[derive(Debug, Clone)]
pub enum ClickTarget {
    /// Fixed offset from the window origin
    At(Point),
    /// Center of the best match for a template image (path resolved against
    /// the configured template directory)
    Image(PathBuf),
}

/// The automation engine facade
pub struct Engine {
    config: EngineConfig,
    registry: AppRegistry,
    templates: TemplateStore,
    matcher: Matcher,
    ocr: Option<OcrEngine>,
    evidence: EvidenceLog,
    gate: CaptureGate,
}

impl Engine {
    /// Engine over the real desktop. OCR is available where the platform
    /// ships a backend; text assertions on other platforms report
    /// [`Error::PlatformUnsupported`] at call time.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let ocr = OcrEngine::platform_default(config.ocr.clone()).ok();
        Self::with_components(config, Arc::new(NativeDesktop::new()), ocr)
    }

    /// Engine over injected components (tests, custom backends)
    pub fn with_components(
        config: EngineConfig,
        desktop: Arc<dyn Desktop>,
        ocr: Option<OcrEngine>,
    ) -> Result<Self> {
        let evidence = EvidenceLog::new(&config.screenshot_dir)?;
        let gate = CaptureGate::new();
        let registry = AppRegistry::new(desktop, config.clone(), gate.clone());
        let templates = TemplateStore::new(&config.template_dir);
        let matcher = Matcher::new(config.matching.clone());
        Ok(Self {
            config,
            registry,
            templates,
            matcher,
            ocr,
            evidence,
            gate,
        })
    }

    pub fn registry(&self) -> &AppRegistry {
        &self.registry
    }

    pub fn evidence(&self) -> &EvidenceLog {
        &self.evidence
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn ocr(&self) -> Result<&OcrEngine> {
        self.ocr.as_ref().ok_or_else(|| {
            Error::PlatformUnsupported("no OCR backend configured".to_string())
        })
    }

    fn verify_policy(&self) -> WaitPolicy {
        let backoff = if self.config.wait.exponential_backoff {
            Backoff::Exponential
        } else {
            Backoff::Fixed
        };
        WaitPolicy::new(self.config.default_timeout(), self.config.poll_interval())
            .with_backoff(backoff)
    }

    // -- lifecycle pass-throughs ------------------------------------------

    pub async fn launch(&self, app: &str, spec: LaunchSpec) -> Result<ManagedApp> {
        self.registry.launch(app, spec).await
    }

    pub fn register_existing(&self, app: &str, matcher: ProcessMatcher) -> Result<ManagedApp> {
        self.registry.register_existing(app, matcher)
    }

    pub async fn switch_to(&self, app: &str) -> Result<()> {
        let _op = self.registry.op_lock(app)?.lock_owned().await;
        self.registry.switch_to(app).await
    }

    pub async fn terminate(&self, app: &str) -> Result<()> {
        self.registry.terminate(app).await
    }

    /// Best-effort teardown for scenario-abort paths: terminate everything,
    /// flush the evidence records.
    pub async fn cleanup(&self) {
        info!("Engine cleanup: terminating all managed apps");
        self.registry.terminate_all().await;
        let out = self.evidence.screenshot_dir().join("results.json");
        if let Err(e) = self.evidence.write_json(&out) {
            warn!("failed to write evidence records: {}", e);
        }
    }

    // -- input -------------------------------------------------------------

    /// Focus the app, then click a window-local point or the center of a
    /// template match. A template that is not on screen right now is
    /// [`Error::TargetNotFound`]; callers that expect the target to appear
    /// asynchronously assert on it first.
    pub async fn click(&self, app: &str, target: ClickTarget) -> Result<()> {
        self.click_with(app, target, MouseButton::Left).await
    }

    pub async fn click_with(
        &self,
        app: &str,
        target: ClickTarget,
        button: MouseButton,
    ) -> Result<()> {
        let _op = self.registry.op_lock(app)?.lock_owned().await;
        self.registry.focus(app).await?;
        let window = self.registry.main_window(app)?;

        let point = match target {
            ClickTarget::At(p) => Point::new(window.rect.x + p.x, window.rect.y + p.y),
            ClickTarget::Image(path) => {
                let template = self.templates.get(&path)?;
                let shot = self.capture_window(&window).await?;
                let found = self.matcher.find_best_match(&shot, &template, None)?;
                if !found.found {
                    return Err(Error::TargetNotFound {
                        template: path.display().to_string(),
                        best_confidence: found.confidence,
                    });
                }
                let center = found.rect.center();
                Point::new(window.rect.x + center.x, window.rect.y + center.y)
            }
        };

        debug!("click {:?} at ({}, {}) in '{}'", button, point.x, point.y, app);
        self.registry.desktop().click_at(point, button)
    }

    /// Focus the app, then type literal text into it
    pub async fn type_text(&self, app: &str, text: &str) -> Result<()> {
        let _op = self.registry.op_lock(app)?.lock_owned().await;
        self.registry.focus(app).await?;
        debug!("type {} chars into '{}'", text.chars().count(), app);
        self.registry.desktop().send_text(text)
    }

    /// Focus the app, then press a key combo such as `ctrl+s`
    pub async fn press_key(&self, app: &str, combo: &KeyCombo) -> Result<()> {
        let _op = self.registry.op_lock(app)?.lock_owned().await;
        self.registry.focus(app).await?;
        self.registry.desktop().send_key_combo(combo)
    }

    // -- capture & verification --------------------------------------------

    /// Capture the app's main window and save it as labeled evidence
    pub async fn capture_screenshot(&self, app: &str, label: &str) -> Result<PathBuf> {
        let _op = self.registry.op_lock(app)?.lock_owned().await;
        let window = self.registry.main_window(app)?;
        let shot = self.capture_window(&window).await?;
        self.evidence.save_screenshot(label, &shot)
    }

    /// Poll until OCR over `region` (window-local; whole window when `None`)
    /// contains `expected`, case-insensitively. Low-confidence text never
    /// satisfies the assertion. Records a verification outcome either way.
    pub async fn assert_visible_text(
        &self,
        app: &str,
        region: Option<Rect>,
        expected: &str,
    ) -> Result<OcrResult> {
        self.assert_visible_text_with(app, region, expected, self.verify_policy())
            .await
    }

    pub async fn assert_visible_text_with(
        &self,
        app: &str,
        region: Option<Rect>,
        expected: &str,
        policy: WaitPolicy,
    ) -> Result<OcrResult> {
        let _op = self.registry.op_lock(app)?.lock_owned().await;
        let ocr = self.ocr()?;
        let start = Instant::now();
        let cancel = self.registry.cancellation_token();

        let outcome = await_condition_cancellable(policy, &cancel, move || async move {
            let window = self.registry.main_window(app)?;
            let shot = self.capture_window(&window).await?;
            let (cropped, source) = crop_region(&shot, &window, region);
            let result = ocr.extract_text(&cropped, source, None).await?;
            if !result.low_confidence && result.contains(expected) {
                Ok(Probe::Ready(result))
            } else if result.text.is_empty() {
                Ok(Probe::pending("no text recognized"))
            } else {
                Ok(Probe::pending(format!(
                    "saw {:?} (confidence {:.2})",
                    excerpt(&result.text),
                    result.confidence
                )))
            }
        })
        .await;

        match outcome {
            Ok(result) => {
                self.evidence
                    .record_text(&format!("{app}:{expected}"), &result);
                let details =
                    format!("found {:?} (confidence {:.2})", expected, result.confidence);
                self.record_pass(app, "assert_visible_text", start, details)
                    .await;
                Ok(result)
            }
            Err(e) => Err(self.record_fail(app, "assert_visible_text", start, e).await),
        }
    }

    /// Poll until a template matches in the app's main window at or above
    /// the similarity threshold. Records a verification outcome either way.
    pub async fn assert_image_present(
        &self,
        app: &str,
        template: impl AsRef<Path>,
    ) -> Result<MatchResult> {
        self.assert_image_present_with(app, template, self.verify_policy())
            .await
    }

    pub async fn assert_image_present_with(
        &self,
        app: &str,
        template: impl AsRef<Path>,
        policy: WaitPolicy,
    ) -> Result<MatchResult> {
        let _op = self.registry.op_lock(app)?.lock_owned().await;
        let template = self.templates.get(template)?;
        let template = &template;
        let start = Instant::now();
        let cancel = self.registry.cancellation_token();

        let outcome = await_condition_cancellable(policy, &cancel, move || async move {
            let window = self.registry.main_window(app)?;
            let shot = self.capture_window(&window).await?;
            let result = self.matcher.find_best_match(&shot, template, None)?;
            if result.found {
                Ok(Probe::Ready(result))
            } else {
                Ok(Probe::pending(format!(
                    "best confidence {:.3}",
                    result.confidence
                )))
            }
        })
        .await;

        match outcome {
            Ok(result) => {
                let details = format!(
                    "matched {} at {:?} (confidence {:.3})",
                    template.path().display(),
                    result.rect,
                    result.confidence
                );
                self.record_pass(app, "assert_image_present", start, details)
                    .await;
                Ok(result)
            }
            Err(e) => Err(self.record_fail(app, "assert_image_present", start, e).await),
        }
    }

    async fn capture_window(&self, window: &WindowInfo) -> Result<DynamicImage> {
        let _quiesce = self.gate.capture().await;
        self.registry.desktop().capture_window(window.handle)
    }

    /// Best-effort screenshot of the app's main window, saved as evidence
    async fn evidence_screenshot(&self, app: &str, label: &str) -> Option<PathBuf> {
        let window = self.registry.main_window(app).ok()?;
        let shot = self.capture_window(&window).await.ok()?;
        self.evidence.save_screenshot(label, &shot).ok()
    }

    async fn record_pass(&self, app: &str, operation: &str, start: Instant, details: String) {
        let screenshot = self
            .evidence_screenshot(app, &format!("{app}_{operation}"))
            .await;
        let mut record = VerificationRecord::new(app, operation, true)
            .with_details(details)
            .with_elapsed(start.elapsed());
        if let Some(path) = screenshot {
            record = record.with_screenshot(path);
        }
        self.evidence.record(record);
    }

    /// Record the failure and fold the evidence path into the returned
    /// timeout so test reports point straight at the artifact
    async fn record_fail(&self, app: &str, operation: &str, start: Instant, e: Error) -> Error {
        let screenshot = self
            .evidence_screenshot(app, &format!("{app}_{operation}"))
            .await;
        let mut record = VerificationRecord::new(app, operation, false)
            .with_details(e.to_string())
            .with_elapsed(start.elapsed());

        let annotated = match (&e, &screenshot) {
            (
                Error::Timeout {
                    attempts,
                    elapsed,
                    last_observed,
                },
                Some(path),
            ) => Error::Timeout {
                attempts: *attempts,
                elapsed: *elapsed,
                last_observed: Some(format!(
                    "'{app}' {operation}: {}; evidence {}",
                    last_observed.as_deref().unwrap_or("nothing observed"),
                    path.display()
                )),
            },
            _ => e,
        };

        if let Some(path) = screenshot {
            record = record.with_screenshot(path);
        }
        self.evidence.record(record);
        annotated
    }
}

/// Crop a window-local region out of a window capture; the returned rect is
/// the region in screen coordinates. Out-of-bounds regions are clamped.
fn crop_region(
    shot: &DynamicImage,
    window: &WindowInfo,
    region: Option<Rect>,
) -> (DynamicImage, Rect) {
    match region {
        None => (shot.clone(), window.rect),
        Some(r) => {
            let x = r.x.max(0) as u32;
            let y = r.y.max(0) as u32;
            let x = x.min(shot.width());
            let y = y.min(shot.height());
            let w = r.width.min(shot.width() - x);
            let h = r.height.min(shot.height() - y);
            (
                shot.crop_imm(x, y, w, h),
                r.offset(window.rect.x, window.rect.y),
            )
        }
    }
}

/// Cap diagnostic text so timeout messages stay one line
fn excerpt(text: &str) -> String {
    const MAX: usize = 60;
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= MAX {
        flat
    } else {
        let cut: String = flat.chars().take(MAX).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;
    use uidriver_common::WindowHandle;

    fn window(x: i32, y: i32, w: u32, h: u32) -> WindowInfo {
        WindowInfo {
            handle: WindowHandle(1),
            pid: 100,
            title: "t".to_string(),
            app_name: "a".to_string(),
            rect: Rect::new(x, y, w, h),
            visible: true,
            minimized: false,
            maximized: false,
            focused: true,
            z_index: 0,
        }
    }

    #[test]
    fn crop_region_clamps_and_translates() {
        let shot = DynamicImage::ImageRgba8(RgbaImage::new(200, 100));
        let win = window(50, 60, 200, 100);

        let (whole, source) = crop_region(&shot, &win, None);
        assert_eq!((whole.width(), whole.height()), (200, 100));
        assert_eq!(source, Rect::new(50, 60, 200, 100));

        let (cropped, source) = crop_region(&shot, &win, Some(Rect::new(150, 40, 100, 100)));
        assert_eq!((cropped.width(), cropped.height()), (50, 60));
        assert_eq!(source, Rect::new(200, 100, 100, 100));
    }

    #[test]
    fn excerpt_keeps_short_text_and_caps_long() {
        assert_eq!(excerpt("579"), "579");
        let long = "x".repeat(200);
        assert!(excerpt(&long).chars().count() <= 61);
    }
}

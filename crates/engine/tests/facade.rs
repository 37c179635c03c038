//! Engine facade tests: input, capture, and polled verifications over a
//! scripted desktop and OCR backend

mod support;

use image::imageops;
use image::{DynamicImage, GrayImage, Luma};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use support::{FakeDesktop, FakeOcr, InputEvent};
use uidriver_common::{
    EngineConfig, Error, KeyCombo, MouseButton, Point, ProcessMatcher, Rect, WaitPolicy,
};
use uidriver_engine::{ClickTarget, Engine};
use uidriver_vision::OcrEngine;

fn textured(width: u32, height: u32) -> GrayImage {
    GrayImage::from_fn(width, height, |x, y| {
        Luma([((x * 31 + y * 57 + (x * y) % 13) % 251) as u8])
    })
}

fn engine_with(
    desktop: &Arc<FakeDesktop>,
    ocr: Option<Arc<FakeOcr>>,
    dir: &Path,
) -> Engine {
    support::init_tracing();
    let mut config = EngineConfig::default();
    config.template_dir = dir.join("templates");
    config.screenshot_dir = dir.join("screenshots");
    config.wait.timeout_ms = 1_000;
    config.wait.poll_interval_ms = 10;
    config.launch.window_timeout_ms = 1_500;
    config.launch.grace_timeout_ms = 200;
    std::fs::create_dir_all(&config.template_dir).unwrap();

    let ocr = ocr.map(|backend| OcrEngine::new(backend, config.ocr.clone()));
    Engine::with_components(config, desktop.clone(), ocr).unwrap()
}

fn own_pid() -> u32 {
    std::process::id()
}

/// Register a window for this test process and give it textured content
/// with a known 12x10 patch at (30, 20); the patch is saved as a template.
fn seed_app(desktop: &Arc<FakeDesktop>, engine: &Engine, name: &str) {
    let screen = textured(200, 120);
    desktop.add_window(FakeDesktop::window(
        1,
        own_pid(),
        name,
        Rect::new(100, 50, 200, 120),
    ));
    desktop.set_capture(1, DynamicImage::ImageLuma8(screen.clone()));

    let patch = imageops::crop_imm(&screen, 30, 20, 12, 10).to_image();
    patch
        .save(engine.config().template_dir.join("button.png"))
        .unwrap();

    engine
        .register_existing(name, ProcessMatcher::Pid(own_pid()))
        .unwrap();
}

#[tokio::test]
async fn click_template_lands_on_match_center() {
    let dir = tempfile::tempdir().unwrap();
    let desktop = FakeDesktop::new();
    let engine = engine_with(&desktop, None, dir.path());
    seed_app(&desktop, &engine, "calc");

    engine
        .click("calc", ClickTarget::Image("button.png".into()))
        .await
        .unwrap();

    // Patch center (36, 25) translated by the window origin (100, 50)
    assert_eq!(
        desktop.events().last(),
        Some(&InputEvent::Click(Point::new(136, 75), MouseButton::Left))
    );
    assert!(desktop.is_focused(1));
}

#[tokio::test]
async fn click_absent_template_reports_target_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let desktop = FakeDesktop::new();
    let engine = engine_with(&desktop, None, dir.path());
    seed_app(&desktop, &engine, "calc");

    // A patch that exists nowhere on screen
    let inverted = GrayImage::from_fn(12, 10, |x, y| {
        Luma([255 - textured(200, 120).get_pixel(x + 30, y + 20).0[0]])
    });
    inverted
        .save(engine.config().template_dir.join("missing.png"))
        .unwrap();

    let err = engine
        .click("calc", ClickTarget::Image("missing.png".into()))
        .await
        .unwrap_err();
    match err {
        Error::TargetNotFound {
            best_confidence, ..
        } => assert!(best_confidence < 0.8, "confidence {best_confidence}"),
        other => panic!("expected TargetNotFound, got {other}"),
    }
    assert!(desktop.events().is_empty());
}

#[tokio::test]
async fn click_point_is_window_relative() {
    let dir = tempfile::tempdir().unwrap();
    let desktop = FakeDesktop::new();
    let engine = engine_with(&desktop, None, dir.path());
    seed_app(&desktop, &engine, "calc");

    engine
        .click_with(
            "calc",
            ClickTarget::At(Point::new(10, 15)),
            MouseButton::Right,
        )
        .await
        .unwrap();

    assert_eq!(
        desktop.events().last(),
        Some(&InputEvent::Click(Point::new(110, 65), MouseButton::Right))
    );
}

#[tokio::test]
async fn type_text_focuses_the_app_first() {
    let dir = tempfile::tempdir().unwrap();
    let desktop = FakeDesktop::new();
    let engine = engine_with(&desktop, None, dir.path());
    seed_app(&desktop, &engine, "editor");
    assert!(!desktop.is_focused(1));

    engine.type_text("editor", "2+3=").await.unwrap();

    assert!(desktop.is_focused(1));
    assert_eq!(
        desktop.events(),
        vec![InputEvent::Text("2+3=".to_string())]
    );
}

#[tokio::test]
async fn press_key_sends_the_combo() {
    let dir = tempfile::tempdir().unwrap();
    let desktop = FakeDesktop::new();
    let engine = engine_with(&desktop, None, dir.path());
    seed_app(&desktop, &engine, "editor");

    let combo = KeyCombo::parse("ctrl+s").unwrap();
    engine.press_key("editor", &combo).await.unwrap();

    assert_eq!(desktop.events(), vec![InputEvent::Combo(combo)]);
}

#[tokio::test]
async fn unregistered_app_fails_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let desktop = FakeDesktop::new();
    let engine = engine_with(&desktop, None, dir.path());

    let start = Instant::now();
    let err = engine
        .click("ghost", ClickTarget::At(Point::new(0, 0)))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NotFound(_)));
    // Name resolution failures are never retried
    assert!(start.elapsed() < Duration::from_millis(200));
}

#[tokio::test]
async fn capture_screenshot_saves_labeled_png() {
    let dir = tempfile::tempdir().unwrap();
    let desktop = FakeDesktop::new();
    let engine = engine_with(&desktop, None, dir.path());
    seed_app(&desktop, &engine, "calc");

    let path = engine
        .capture_screenshot("calc", "result-panel")
        .await
        .unwrap();

    assert!(path.exists());
    assert_eq!(path.file_name().unwrap(), "result-panel.png");
    assert!(path.starts_with(engine.evidence().screenshot_dir()));
    assert!(image::open(&path).is_ok());
}

#[tokio::test]
async fn assert_visible_text_passes_once_text_appears() {
    let dir = tempfile::tempdir().unwrap();
    let desktop = FakeDesktop::new();
    let ocr = FakeOcr::saying(["Result:", "Result:", "Result: 579"]);
    let engine = engine_with(&desktop, Some(ocr), dir.path());
    seed_app(&desktop, &engine, "calc");

    let result = engine
        .assert_visible_text("calc", None, "579")
        .await
        .unwrap();

    assert!(result.contains("579"));
    assert!(!result.low_confidence);

    let records = engine.evidence().records();
    assert_eq!(records.len(), 1);
    assert!(records[0].passed);
    assert_eq!(records[0].operation, "assert_visible_text");
    assert_eq!(engine.evidence().text("calc:579").as_deref(), Some("Result: 579"));
}

#[tokio::test]
async fn assert_visible_text_timeout_carries_observation_and_evidence() {
    let dir = tempfile::tempdir().unwrap();
    let desktop = FakeDesktop::new();
    let ocr = FakeOcr::saying(["Result: 578"]);
    let engine = engine_with(&desktop, Some(ocr), dir.path());
    seed_app(&desktop, &engine, "calc");

    let policy = WaitPolicy::new(Duration::from_millis(120), Duration::from_millis(10));
    let err = engine
        .assert_visible_text_with("calc", None, "579", policy)
        .await
        .unwrap_err();

    match err {
        Error::Timeout { last_observed, .. } => {
            let observed = last_observed.unwrap();
            assert!(observed.contains("Result: 578"), "observed: {observed}");
            assert!(observed.contains("evidence"), "observed: {observed}");
        }
        other => panic!("expected Timeout, got {other}"),
    }

    let records = engine.evidence().records();
    assert_eq!(records.len(), 1);
    assert!(!records[0].passed);
    assert!(records[0].screenshot.as_ref().unwrap().exists());
}

#[tokio::test]
async fn assert_visible_text_needs_an_ocr_backend() {
    let dir = tempfile::tempdir().unwrap();
    let desktop = FakeDesktop::new();
    let engine = engine_with(&desktop, None, dir.path());
    seed_app(&desktop, &engine, "calc");

    let err = engine
        .assert_visible_text("calc", None, "579")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PlatformUnsupported(_)));
}

#[tokio::test]
async fn assert_image_present_waits_for_the_template() {
    let dir = tempfile::tempdir().unwrap();
    let desktop = FakeDesktop::new();
    let engine = engine_with(&desktop, None, dir.path());
    seed_app(&desktop, &engine, "calc");

    // Blank the window first; the template only shows up shortly after
    desktop.set_capture(
        1,
        DynamicImage::ImageLuma8(GrayImage::from_pixel(200, 120, Luma([128]))),
    );
    let desktop2 = desktop.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        desktop2.set_capture(1, DynamicImage::ImageLuma8(textured(200, 120)));
    });

    let result = engine
        .assert_image_present("calc", "button.png")
        .await
        .unwrap();

    assert!(result.found);
    assert_eq!(result.rect, Rect::new(30, 20, 12, 10));
    assert!(result.confidence >= 0.8);

    let records = engine.evidence().records();
    assert_eq!(records.len(), 1);
    assert!(records[0].passed);
}

#[cfg(unix)]
#[tokio::test]
async fn calculator_scenario_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let desktop = FakeDesktop::new();
    let ocr = FakeOcr::saying(["", "", "579"]);
    let engine = engine_with(&desktop, Some(ocr), dir.path());

    // Prepare window content and the button template before launch
    let screen = textured(200, 120);
    desktop.set_capture(9, DynamicImage::ImageLuma8(screen.clone()));
    let patch = imageops::crop_imm(&screen, 30, 20, 12, 10).to_image();
    patch
        .save(engine.config().template_dir.join("equals.png"))
        .unwrap();
    desktop.reveal_window_after(
        1,
        FakeDesktop::window(9, 0, "Calculator", Rect::new(100, 50, 200, 120)),
    );

    let spec = uidriver_engine::LaunchSpec::new("/bin/sleep")
        .with_args(["30"])
        .with_title_hint("Calc");
    let app = engine.launch("calc", spec).await.unwrap();
    assert!(app.main_window.is_some());

    engine.type_text("calc", "234+345").await.unwrap();
    engine
        .click("calc", ClickTarget::Image("equals.png".into()))
        .await
        .unwrap();
    let result = engine
        .assert_visible_text("calc", Some(Rect::new(0, 0, 200, 30)), "579")
        .await
        .unwrap();
    assert_eq!(result.text, "579");

    engine.cleanup().await;

    // Everything terminated, evidence flushed
    assert!(engine.registry().list().is_empty());
    let results = engine.evidence().screenshot_dir().join("results.json");
    assert!(results.exists());
    let alive = std::process::Command::new("kill")
        .args(["-0", &app.pid.to_string()])
        .status()
        .unwrap()
        .success();
    assert!(!alive, "launched pid {} survived cleanup", app.pid);
}

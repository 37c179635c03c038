//! Scripted desktop and OCR fakes for engine tests

use async_trait::async_trait;
use image::{DynamicImage, RgbaImage};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use uidriver_common::{
    Error, KeyCombo, MouseButton, Point, Rect, Result, WindowHandle, WindowInfo,
};
use uidriver_engine::Desktop;
use uidriver_vision::{OcrBackend, RawRecognition};

/// Route engine logs through the test harness; safe to call repeatedly
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    Click(Point, MouseButton),
    Text(String),
    Combo(KeyCombo),
}

struct Reveal {
    /// windows_of_pid calls remaining before the window appears
    polls_left: u32,
    window: WindowInfo,
}

#[derive(Default)]
struct DesktopState {
    windows: Vec<WindowInfo>,
    reveals: Vec<Reveal>,
    /// focus_window calls that fail before one succeeds
    focus_refusals: u32,
    captures: HashMap<u64, DynamicImage>,
    events: Vec<InputEvent>,
    close_requests: Vec<u64>,
    /// When false, set_window_frame is accepted but never takes effect
    frames_apply: bool,
    hung: Vec<u64>,
}

/// An in-memory desktop driven entirely by the test
pub struct FakeDesktop {
    state: Mutex<DesktopState>,
}

#[allow(dead_code)]
impl FakeDesktop {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(DesktopState {
                frames_apply: true,
                ..Default::default()
            }),
        })
    }

    pub fn window(handle: u64, pid: u32, title: &str, rect: Rect) -> WindowInfo {
        WindowInfo {
            handle: WindowHandle(handle),
            pid,
            title: title.to_string(),
            app_name: title.to_string(),
            rect,
            visible: true,
            minimized: false,
            maximized: false,
            focused: false,
            z_index: 0,
        }
    }

    pub fn add_window(&self, info: WindowInfo) {
        self.state.lock().windows.push(info);
    }

    pub fn remove_window(&self, handle: u64) {
        self.state
            .lock()
            .windows
            .retain(|w| w.handle != WindowHandle(handle));
    }

    /// Make a window appear for whatever pid gets queried, after `polls`
    /// calls to `windows_of_pid`. Models slow application startup when the
    /// pid is not known until the test launches the process.
    pub fn reveal_window_after(&self, polls: u32, window: WindowInfo) {
        self.state.lock().reveals.push(Reveal {
            polls_left: polls,
            window,
        });
    }

    pub fn refuse_focus_times(&self, times: u32) {
        self.state.lock().focus_refusals = times;
    }

    pub fn set_capture(&self, handle: u64, image: DynamicImage) {
        self.state.lock().captures.insert(handle, image);
    }

    pub fn set_frames_apply(&self, apply: bool) {
        self.state.lock().frames_apply = apply;
    }

    pub fn set_hung(&self, handle: u64, hung: bool) {
        let mut state = self.state.lock();
        state.hung.retain(|h| *h != handle);
        if hung {
            state.hung.push(handle);
        }
    }

    pub fn events(&self) -> Vec<InputEvent> {
        self.state.lock().events.clone()
    }

    pub fn close_requests(&self) -> Vec<u64> {
        self.state.lock().close_requests.clone()
    }

    pub fn is_focused(&self, handle: u64) -> bool {
        self.state
            .lock()
            .windows
            .iter()
            .any(|w| w.handle == WindowHandle(handle) && w.focused)
    }
}

impl Desktop for FakeDesktop {
    fn list_windows(&self) -> Result<Vec<WindowInfo>> {
        Ok(self.state.lock().windows.clone())
    }

    fn windows_of_pid(&self, pid: u32) -> Result<Vec<WindowInfo>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        for mut reveal in std::mem::take(&mut state.reveals) {
            if reveal.polls_left == 0 {
                let mut window = reveal.window;
                window.pid = pid;
                state.windows.push(window);
            } else {
                reveal.polls_left -= 1;
                state.reveals.push(reveal);
            }
        }
        Ok(state
            .windows
            .iter()
            .filter(|w| w.pid == pid)
            .cloned()
            .collect())
    }

    fn window_info(&self, handle: WindowHandle) -> Result<WindowInfo> {
        self.state
            .lock()
            .windows
            .iter()
            .find(|w| w.handle == handle)
            .cloned()
            .ok_or(Error::WindowGone(handle.0))
    }

    fn capture_window(&self, handle: WindowHandle) -> Result<DynamicImage> {
        let state = self.state.lock();
        let window = state
            .windows
            .iter()
            .find(|w| w.handle == handle)
            .ok_or(Error::WindowGone(handle.0))?;
        Ok(state.captures.get(&handle.0).cloned().unwrap_or_else(|| {
            DynamicImage::ImageRgba8(RgbaImage::new(
                window.rect.width.max(1),
                window.rect.height.max(1),
            ))
        }))
    }

    fn capture_screen(&self) -> Result<DynamicImage> {
        Ok(DynamicImage::ImageRgba8(RgbaImage::new(800, 600)))
    }

    fn focus_window(&self, handle: WindowHandle) -> Result<()> {
        let mut state = self.state.lock();
        if state.focus_refusals > 0 {
            state.focus_refusals -= 1;
            return Err(Error::WindowOperation(
                "foreground lock refused the request".to_string(),
            ));
        }
        let mut found = false;
        for w in &mut state.windows {
            w.focused = w.handle == handle;
            found |= w.focused;
        }
        if found {
            Ok(())
        } else {
            Err(Error::WindowGone(handle.0))
        }
    }

    fn set_window_frame(&self, handle: WindowHandle, frame: Rect) -> Result<()> {
        let mut state = self.state.lock();
        if !state.frames_apply {
            return Ok(());
        }
        match state.windows.iter_mut().find(|w| w.handle == handle) {
            Some(w) => {
                w.rect = frame;
                Ok(())
            }
            None => Err(Error::WindowGone(handle.0)),
        }
    }

    fn set_minimized(&self, handle: WindowHandle, minimized: bool) -> Result<()> {
        let mut state = self.state.lock();
        match state.windows.iter_mut().find(|w| w.handle == handle) {
            Some(w) => {
                w.minimized = minimized;
                w.visible = !minimized;
                Ok(())
            }
            None => Err(Error::WindowGone(handle.0)),
        }
    }

    fn set_maximized(&self, handle: WindowHandle, maximized: bool) -> Result<()> {
        let mut state = self.state.lock();
        if !state.frames_apply {
            return Ok(());
        }
        match state.windows.iter_mut().find(|w| w.handle == handle) {
            Some(w) => {
                w.maximized = maximized;
                w.minimized = false;
                w.visible = true;
                if maximized {
                    w.rect = Rect::new(0, 0, 800, 600);
                }
                Ok(())
            }
            None => Err(Error::WindowGone(handle.0)),
        }
    }

    fn restore_window(&self, handle: WindowHandle) -> Result<()> {
        let mut state = self.state.lock();
        match state.windows.iter_mut().find(|w| w.handle == handle) {
            Some(w) => {
                w.maximized = false;
                w.minimized = false;
                w.visible = true;
                Ok(())
            }
            None => Err(Error::WindowGone(handle.0)),
        }
    }

    fn request_close(&self, handle: WindowHandle) -> Result<()> {
        self.state.lock().close_requests.push(handle.0);
        Ok(())
    }

    fn is_hung(&self, handle: WindowHandle) -> Result<bool> {
        Ok(self.state.lock().hung.contains(&handle.0))
    }

    fn click_at(&self, point: Point, button: MouseButton) -> Result<()> {
        self.state
            .lock()
            .events
            .push(InputEvent::Click(point, button));
        Ok(())
    }

    fn send_text(&self, text: &str) -> Result<()> {
        self.state
            .lock()
            .events
            .push(InputEvent::Text(text.to_string()));
        Ok(())
    }

    fn send_key_combo(&self, combo: &KeyCombo) -> Result<()> {
        self.state
            .lock()
            .events
            .push(InputEvent::Combo(combo.clone()));
        Ok(())
    }
}

/// OCR backend that replays a scripted sequence; the last entry repeats
pub struct FakeOcr {
    script: Mutex<Vec<RawRecognition>>,
}

#[allow(dead_code)]
impl FakeOcr {
    pub fn saying<I, S>(lines: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let script = lines
            .into_iter()
            .map(|text| RawRecognition {
                text: text.into(),
                words: Vec::new(),
                confidence: Some(0.92),
            })
            .collect();
        Arc::new(Self {
            script: Mutex::new(script),
        })
    }
}

#[async_trait]
impl OcrBackend for FakeOcr {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn recognize(&self, _image: &DynamicImage, _language: &str) -> Result<RawRecognition> {
        let mut script = self.script.lock();
        if script.len() > 1 {
            Ok(script.remove(0))
        } else {
            script.first().cloned().ok_or_else(|| {
                Error::Ocr("fake backend exhausted with empty script".to_string())
            })
        }
    }
}

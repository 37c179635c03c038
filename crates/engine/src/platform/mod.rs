//! Platform abstraction for window and input operations
//!
//! The engine drives windows it does not own through this seam. Window
//! handles are weak references: every accessor re-resolves them against the
//! OS and reports [`Error::WindowGone`] when the window has closed.

use image::DynamicImage;
use uidriver_common::{Error, KeyCombo, MouseButton, Point, Rect, Result, WindowHandle, WindowInfo};

#[cfg(target_os = "windows")]
mod windows;

/// Window enumeration, manipulation, capture, and input injection.
///
/// Enumeration and capture work everywhere; manipulation and input are
/// platform-backed and report [`Error::PlatformUnsupported`] where no
/// backend exists.
pub trait Desktop: Send + Sync {
    /// All top-level windows, topmost first
    fn list_windows(&self) -> Result<Vec<WindowInfo>>;

    /// Windows owned by one process, topmost first
    fn windows_of_pid(&self, pid: u32) -> Result<Vec<WindowInfo>> {
        Ok(self
            .list_windows()?
            .into_iter()
            .filter(|w| w.pid == pid)
            .collect())
    }

    /// Fresh metadata for one window; `WindowGone` if it no longer resolves
    fn window_info(&self, handle: WindowHandle) -> Result<WindowInfo>;

    /// Capture a window's current content
    fn capture_window(&self, handle: WindowHandle) -> Result<DynamicImage>;

    /// Capture the primary display
    fn capture_screen(&self) -> Result<DynamicImage>;

    /// Request foreground/focus. The OS may transiently refuse
    /// (focus-steal protection); callers retry through the wait primitive.
    fn focus_window(&self, handle: WindowHandle) -> Result<()>;

    fn set_window_frame(&self, handle: WindowHandle, frame: Rect) -> Result<()>;

    fn set_minimized(&self, handle: WindowHandle, minimized: bool) -> Result<()>;

    fn set_maximized(&self, handle: WindowHandle, maximized: bool) -> Result<()>;

    fn restore_window(&self, handle: WindowHandle) -> Result<()>;

    /// Ask the window to close (e.g. WM_CLOSE); graceful, may be ignored
    fn request_close(&self, handle: WindowHandle) -> Result<()>;

    /// Whether the OS reports the window's owner as not responding
    fn is_hung(&self, _handle: WindowHandle) -> Result<bool> {
        Ok(false)
    }

    fn click_at(&self, point: Point, button: MouseButton) -> Result<()>;

    /// Type literal text into the focused window
    fn send_text(&self, text: &str) -> Result<()>;

    fn send_key_combo(&self, combo: &KeyCombo) -> Result<()>;
}

/// The real desktop: enumeration and capture via `xcap`, manipulation and
/// input via the platform backend.
pub struct NativeDesktop;

impl NativeDesktop {
    pub fn new() -> Self {
        Self
    }

    fn find_window(&self, handle: WindowHandle) -> Result<xcap::Window> {
        let windows = xcap::Window::all()
            .map_err(|e| Error::Capture(format!("failed to enumerate windows: {e}")))?;
        windows
            .into_iter()
            .find(|w| w.id().map(|id| id as u64 == handle.0).unwrap_or(false))
            .ok_or(Error::WindowGone(handle.0))
    }
}

impl Default for NativeDesktop {
    fn default() -> Self {
        Self::new()
    }
}

fn window_info_from_xcap(w: &xcap::Window, z_index: usize) -> Option<WindowInfo> {
    let id = w.id().ok()?;
    let width = w.width().unwrap_or(0);
    let height = w.height().unwrap_or(0);
    let minimized = w.is_minimized().unwrap_or(false);
    let maximized = w.is_maximized().unwrap_or(false);
    Some(WindowInfo {
        handle: WindowHandle(id as u64),
        pid: w.pid().unwrap_or(0),
        title: w.title().unwrap_or_default(),
        app_name: w.app_name().unwrap_or_default(),
        rect: Rect::new(
            w.x().unwrap_or(0),
            w.y().unwrap_or(0),
            width,
            height,
        ),
        visible: !minimized && width > 0 && height > 0,
        minimized,
        maximized,
        focused: w.is_focused().unwrap_or(false),
        z_index,
    })
}

impl Desktop for NativeDesktop {
    fn list_windows(&self) -> Result<Vec<WindowInfo>> {
        let windows = xcap::Window::all()
            .map_err(|e| Error::Capture(format!("failed to enumerate windows: {e}")))?;
        Ok(windows
            .iter()
            .enumerate()
            .filter_map(|(z, w)| window_info_from_xcap(w, z))
            .collect())
    }

    fn window_info(&self, handle: WindowHandle) -> Result<WindowInfo> {
        self.list_windows()?
            .into_iter()
            .find(|w| w.handle == handle)
            .ok_or(Error::WindowGone(handle.0))
    }

    fn capture_window(&self, handle: WindowHandle) -> Result<DynamicImage> {
        let window = self.find_window(handle)?;
        let buffer = window
            .capture_image()
            .map_err(|e| Error::Capture(format!("failed to capture window {handle}: {e}")))?;
        Ok(DynamicImage::ImageRgba8(buffer))
    }

    fn capture_screen(&self) -> Result<DynamicImage> {
        let monitors = xcap::Monitor::all()
            .map_err(|e| Error::Capture(format!("failed to enumerate monitors: {e}")))?;
        let primary = monitors
            .into_iter()
            .find(|m| m.is_primary().unwrap_or(false))
            .or_else(|| xcap::Monitor::all().ok()?.into_iter().next())
            .ok_or_else(|| Error::Capture("no monitors found".to_string()))?;
        let buffer = primary
            .capture_image()
            .map_err(|e| Error::Capture(format!("failed to capture screen: {e}")))?;
        Ok(DynamicImage::ImageRgba8(buffer))
    }

    #[cfg(target_os = "windows")]
    fn focus_window(&self, handle: WindowHandle) -> Result<()> {
        windows::focus_window(handle)
    }

    #[cfg(not(target_os = "windows"))]
    fn focus_window(&self, _handle: WindowHandle) -> Result<()> {
        Err(unsupported("focus_window"))
    }

    #[cfg(target_os = "windows")]
    fn set_window_frame(&self, handle: WindowHandle, frame: Rect) -> Result<()> {
        windows::set_window_frame(handle, frame)
    }

    #[cfg(not(target_os = "windows"))]
    fn set_window_frame(&self, _handle: WindowHandle, _frame: Rect) -> Result<()> {
        Err(unsupported("set_window_frame"))
    }

    #[cfg(target_os = "windows")]
    fn set_minimized(&self, handle: WindowHandle, minimized: bool) -> Result<()> {
        windows::set_minimized(handle, minimized)
    }

    #[cfg(not(target_os = "windows"))]
    fn set_minimized(&self, _handle: WindowHandle, _minimized: bool) -> Result<()> {
        Err(unsupported("set_minimized"))
    }

    #[cfg(target_os = "windows")]
    fn set_maximized(&self, handle: WindowHandle, maximized: bool) -> Result<()> {
        windows::set_maximized(handle, maximized)
    }

    #[cfg(not(target_os = "windows"))]
    fn set_maximized(&self, _handle: WindowHandle, _maximized: bool) -> Result<()> {
        Err(unsupported("set_maximized"))
    }

    #[cfg(target_os = "windows")]
    fn restore_window(&self, handle: WindowHandle) -> Result<()> {
        windows::restore_window(handle)
    }

    #[cfg(not(target_os = "windows"))]
    fn restore_window(&self, _handle: WindowHandle) -> Result<()> {
        Err(unsupported("restore_window"))
    }

    #[cfg(target_os = "windows")]
    fn request_close(&self, handle: WindowHandle) -> Result<()> {
        windows::request_close(handle)
    }

    #[cfg(not(target_os = "windows"))]
    fn request_close(&self, _handle: WindowHandle) -> Result<()> {
        Err(unsupported("request_close"))
    }

    #[cfg(target_os = "windows")]
    fn is_hung(&self, handle: WindowHandle) -> Result<bool> {
        windows::is_hung(handle)
    }

    #[cfg(target_os = "windows")]
    fn click_at(&self, point: Point, button: MouseButton) -> Result<()> {
        windows::click_at(point, button)
    }

    #[cfg(not(target_os = "windows"))]
    fn click_at(&self, _point: Point, _button: MouseButton) -> Result<()> {
        Err(unsupported("click_at"))
    }

    #[cfg(target_os = "windows")]
    fn send_text(&self, text: &str) -> Result<()> {
        windows::send_text(text)
    }

    #[cfg(not(target_os = "windows"))]
    fn send_text(&self, _text: &str) -> Result<()> {
        Err(unsupported("send_text"))
    }

    #[cfg(target_os = "windows")]
    fn send_key_combo(&self, combo: &KeyCombo) -> Result<()> {
        windows::send_key_combo(combo)
    }

    #[cfg(not(target_os = "windows"))]
    fn send_key_combo(&self, _combo: &KeyCombo) -> Result<()> {
        Err(unsupported("send_key_combo"))
    }
}

#[cfg(not(target_os = "windows"))]
fn unsupported(operation: &str) -> Error {
    Error::PlatformUnsupported(format!(
        "{operation} has no native backend on this platform"
    ))
}

//! Core types for UiDriver

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Lifecycle state of a managed application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppState {
    Launching,
    Running,
    Suspended,
    Terminated,
}

impl Default for AppState {
    fn default() -> Self {
        Self::Launching
    }
}

impl std::fmt::Display for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppState::Launching => write!(f, "launching"),
            AppState::Running => write!(f, "running"),
            AppState::Suspended => write!(f, "suspended"),
            AppState::Terminated => write!(f, "terminated"),
        }
    }
}

impl AppState {
    /// Validate a lifecycle transition. Terminated is final; Suspended is an
    /// observed state the OS may enter and leave while the app stays managed.
    pub fn can_transition_to(self, next: AppState) -> bool {
        use AppState::*;
        match (self, next) {
            (Launching, Running) | (Launching, Terminated) => true,
            (Running, Suspended) | (Running, Terminated) => true,
            (Suspended, Running) | (Suspended, Terminated) => true,
            (Terminated, _) => false,
            (a, b) => a == b,
        }
    }
}

/// Opaque OS window identity. A weak reference: the OS owns window lifetime,
/// the handle may stop resolving at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowHandle(pub u64);

impl std::fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Cached window metadata, refreshed on every access
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowInfo {
    pub handle: WindowHandle,
    pub pid: u32,
    pub title: String,
    pub app_name: String,
    pub rect: Rect,
    pub visible: bool,
    pub minimized: bool,
    pub maximized: bool,
    /// Whether this window currently holds input focus
    pub focused: bool,
    /// Z-order position, topmost first
    pub z_index: usize,
}

/// Screen-coordinate rectangle; also used as a capture region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Center point in the same coordinate space
    pub fn center(&self) -> Point {
        Point {
            x: self.x + self.width as i32 / 2,
            y: self.y + self.height as i32 / 2,
        }
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x
            && p.y >= self.y
            && p.x < self.x + self.width as i32
            && p.y < self.y + self.height as i32
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.x + other.width as i32
            && other.x < self.x + self.width as i32
            && self.y < other.y + other.height as i32
            && other.y < self.y + self.height as i32
    }

    /// Translate by a screen-space origin (window-local -> screen coords)
    pub fn offset(&self, dx: i32, dy: i32) -> Rect {
        Rect {
            x: self.x + dx,
            y: self.y + dy,
            ..*self
        }
    }
}

/// A point in screen coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Mouse button for pointer input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// A named key for key-combo input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Key {
    Enter,
    Tab,
    Escape,
    Backspace,
    Delete,
    Home,
    End,
    PageUp,
    PageDown,
    Up,
    Down,
    Left,
    Right,
    F(u8),
    Char(char),
}

/// Modifier keys held during a key press
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modifier {
    Ctrl,
    Alt,
    Shift,
    Meta,
}

/// A key plus held modifiers, e.g. parsed from "ctrl+shift+s"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyCombo {
    pub modifiers: Vec<Modifier>,
    pub key: Key,
}

impl KeyCombo {
    pub fn plain(key: Key) -> Self {
        Self {
            modifiers: Vec::new(),
            key,
        }
    }

    /// Parse a combo string such as "ctrl+alt+delete" or "f5".
    pub fn parse(spec: &str) -> Option<Self> {
        let mut modifiers = Vec::new();
        let mut key = None;

        for part in spec.split('+').map(str::trim) {
            match part.to_ascii_lowercase().as_str() {
                "ctrl" | "control" => modifiers.push(Modifier::Ctrl),
                "alt" => modifiers.push(Modifier::Alt),
                "shift" => modifiers.push(Modifier::Shift),
                "meta" | "win" | "cmd" => modifiers.push(Modifier::Meta),
                "enter" | "return" => key = Some(Key::Enter),
                "tab" => key = Some(Key::Tab),
                "esc" | "escape" => key = Some(Key::Escape),
                "backspace" => key = Some(Key::Backspace),
                "delete" | "del" => key = Some(Key::Delete),
                "home" => key = Some(Key::Home),
                "end" => key = Some(Key::End),
                "pageup" => key = Some(Key::PageUp),
                "pagedown" => key = Some(Key::PageDown),
                "up" => key = Some(Key::Up),
                "down" => key = Some(Key::Down),
                "left" => key = Some(Key::Left),
                "right" => key = Some(Key::Right),
                f if f.starts_with('f') && f[1..].parse::<u8>().is_ok() => {
                    key = Some(Key::F(f[1..].parse().ok()?));
                }
                c if c.chars().count() == 1 => key = Some(Key::Char(c.chars().next()?)),
                _ => return None,
            }
        }

        key.map(|key| Self { modifiers, key })
    }
}

/// Result of a single template search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub found: bool,
    /// Location of the best match in the searched image's coordinates
    pub rect: Rect,
    /// Similarity confidence in [0, 1]
    pub confidence: f32,
    pub template_path: PathBuf,
    /// Scale factor at which the winning match was found
    pub scale: f32,
}

impl MatchResult {
    pub fn not_found(template_path: PathBuf, best_confidence: f32) -> Self {
        Self {
            found: false,
            rect: Rect::new(0, 0, 0, 0),
            confidence: best_confidence,
            template_path,
            scale: 1.0,
        }
    }
}

/// Per-word recognition detail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrWord {
    pub text: String,
    pub confidence: f32,
}

/// Result of a single OCR extraction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrResult {
    pub text: String,
    /// Aggregate confidence in [0, 1]
    pub confidence: f32,
    /// Set when confidence fell below the caller's threshold; the text is
    /// still returned so callers can decide to retry with other preprocessing
    pub low_confidence: bool,
    pub words: Vec<OcrWord>,
    /// The region the text was extracted from, in screen coordinates
    pub region: Rect,
}

impl OcrResult {
    /// Case-insensitive substring containment
    pub fn contains(&self, expected: &str) -> bool {
        self.text.to_lowercase().contains(&expected.to_lowercase())
    }
}

/// How to locate an already-running process for registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessMatcher {
    /// Exact process id
    Pid(u32),
    /// Match by executable name; `newest` resolves ambiguity by start time
    ExecutableName { name: String, newest: bool },
}

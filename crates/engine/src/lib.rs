//! UiDriver Engine
//!
//! Black-box GUI automation: a registry of managed application processes,
//! a platform abstraction for windows and input, and the `Engine` facade
//! that ties the registry to template matching and OCR from
//! `uidriver-vision`.

pub mod facade;
pub mod gate;
pub mod platform;
pub mod registry;

pub use facade::{ClickTarget, Engine};
pub use gate::CaptureGate;
pub use platform::{Desktop, NativeDesktop};
pub use registry::{AppRegistry, LaunchSpec, ManagedApp};

//! UiDriver Vision
//!
//! Image template matching and OCR: the fuzzy-signal half of the engine.
//! Both produce confidence-scored results that the synchronization primitive
//! in `uidriver-common` turns into deterministic pass/fail decisions.

pub mod matching;
pub mod ocr;
pub mod preprocess;
pub mod template;

pub use matching::Matcher;
pub use ocr::{OcrBackend, OcrEngine, RawRecognition};
pub use preprocess::prepare_for_ocr;
pub use template::{Template, TemplateStore};

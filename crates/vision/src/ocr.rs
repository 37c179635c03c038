//! OCR engine with pluggable recognition backend
//!
//! The engine owns preprocessing and confidence policy; the backend only
//! turns pixels into text. Low-confidence text is returned flagged rather
//! than discarded so callers can decide whether to retry with different
//! preprocessing.

use crate::preprocess::prepare_for_ocr;
use async_trait::async_trait;
use image::DynamicImage;
use std::sync::Arc;
use tracing::{debug, trace};
use uidriver_common::config::OcrConfig;
use uidriver_common::{OcrResult, OcrWord, Rect, Result};

/// Raw backend output before the engine applies its confidence policy
#[derive(Debug, Clone)]
pub struct RawRecognition {
    pub text: String,
    /// Per-word detail; may be empty when the backend does not report it
    pub words: Vec<OcrWord>,
    /// Aggregate confidence if the backend reports one
    pub confidence: Option<f32>,
}

/// A text recognition backend
#[async_trait]
pub trait OcrBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Recognize text in an already-preprocessed image. Backend failures are
    /// fatal ([`uidriver_common::Error::Ocr`]), distinct from "no text here".
    async fn recognize(&self, image: &DynamicImage, language: &str) -> Result<RawRecognition>;
}

/// OCR engine: preprocessing pipeline plus backend invocation
pub struct OcrEngine {
    backend: Arc<dyn OcrBackend>,
    config: OcrConfig,
}

impl OcrEngine {
    pub fn new(backend: Arc<dyn OcrBackend>, config: OcrConfig) -> Self {
        Self { backend, config }
    }

    /// The platform's native OCR backend. Only Windows ships one; other
    /// platforms must inject a backend via [`OcrEngine::new`].
    #[cfg(target_os = "windows")]
    pub fn platform_default(config: OcrConfig) -> Result<Self> {
        Ok(Self::new(Arc::new(windows_backend::WindowsOcr), config))
    }

    #[cfg(not(target_os = "windows"))]
    pub fn platform_default(_config: OcrConfig) -> Result<Self> {
        Err(uidriver_common::Error::PlatformUnsupported(
            "no native OCR backend on this platform; inject one via OcrEngine::new".to_string(),
        ))
    }

    /// Extract text from a captured region.
    ///
    /// `source` records where on screen the pixels came from. Text below the
    /// confidence threshold is returned with `low_confidence` set.
    pub async fn extract_text(
        &self,
        region: &DynamicImage,
        source: Rect,
        min_confidence: Option<f32>,
    ) -> Result<OcrResult> {
        let min_confidence = min_confidence.unwrap_or(self.config.min_confidence);

        if region.width() == 0 || region.height() == 0 {
            return Ok(OcrResult {
                text: String::new(),
                confidence: 0.0,
                low_confidence: true,
                words: Vec::new(),
                region: source,
            });
        }

        let prepared = prepare_for_ocr(region, self.config.upscale_factor);
        trace!(
            backend = self.backend.name(),
            language = %self.config.language,
            "invoking OCR backend"
        );
        let raw = self.backend.recognize(&prepared, &self.config.language).await?;

        let confidence = raw.confidence.unwrap_or_else(|| {
            if raw.words.is_empty() {
                1.0
            } else {
                raw.words.iter().map(|w| w.confidence).sum::<f32>() / raw.words.len() as f32
            }
        });

        let low_confidence = confidence < min_confidence;
        if low_confidence {
            debug!(
                "OCR text below confidence threshold ({:.2} < {:.2}): {:?}",
                confidence, min_confidence, raw.text
            );
        }

        Ok(OcrResult {
            text: raw.text,
            confidence,
            low_confidence,
            words: raw.words,
            region: source,
        })
    }

    /// Case-insensitive substring containment on top of [`extract_text`].
    /// Low-confidence extractions never count as containing the text.
    pub async fn contains_text(
        &self,
        region: &DynamicImage,
        source: Rect,
        expected: &str,
        min_confidence: Option<f32>,
    ) -> Result<bool> {
        let result = self.extract_text(region, source, min_confidence).await?;
        Ok(!result.low_confidence && result.contains(expected))
    }

    pub fn config(&self) -> &OcrConfig {
        &self.config
    }
}

#[cfg(target_os = "windows")]
mod windows_backend {
    //! Windows `Media.Ocr` backend

    use super::{OcrBackend, RawRecognition};
    use async_trait::async_trait;
    use image::DynamicImage;
    use std::io::Cursor;
    use uidriver_common::{Error, OcrWord, Result};
    use windows::core::HSTRING;
    use windows::Globalization::Language;
    use windows::Graphics::Imaging::BitmapDecoder;
    use windows::Media::Ocr::OcrEngine as NativeOcrEngine;
    use windows::Storage::Streams::{DataWriter, InMemoryRandomAccessStream};

    pub struct WindowsOcr;

    #[async_trait]
    impl OcrBackend for WindowsOcr {
        fn name(&self) -> &'static str {
            "windows-media-ocr"
        }

        async fn recognize(
            &self,
            image: &DynamicImage,
            language: &str,
        ) -> Result<RawRecognition> {
            let mut png = Vec::new();
            image
                .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
                .map_err(|e| Error::Ocr(format!("failed to encode region: {e}")))?;

            let stream = InMemoryRandomAccessStream::new()
                .map_err(|e| Error::Ocr(format!("failed to create stream: {e}")))?;
            let writer = DataWriter::CreateDataWriter(&stream)
                .map_err(|e| Error::Ocr(format!("failed to create writer: {e}")))?;
            writer
                .WriteBytes(&png)
                .map_err(|e| Error::Ocr(format!("failed to write bytes: {e}")))?;
            writer
                .StoreAsync()
                .map_err(|e| Error::Ocr(format!("StoreAsync failed: {e}")))?
                .await
                .map_err(|e| Error::Ocr(format!("StoreAsync.await failed: {e}")))?;
            writer
                .FlushAsync()
                .map_err(|e| Error::Ocr(format!("FlushAsync failed: {e}")))?
                .await
                .map_err(|e| Error::Ocr(format!("FlushAsync.await failed: {e}")))?;
            stream
                .Seek(0)
                .map_err(|e| Error::Ocr(format!("Seek failed: {e}")))?;

            let decoder_id = BitmapDecoder::PngDecoderId()
                .map_err(|e| Error::Ocr(format!("PNG decoder id: {e}")))?;
            let decoder = BitmapDecoder::CreateWithIdAsync(decoder_id, &stream)
                .map_err(|e| Error::Ocr(format!("decoder create failed: {e}")))?
                .await
                .map_err(|e| Error::Ocr(format!("decoder.await failed: {e}")))?;
            let bitmap = decoder
                .GetSoftwareBitmapAsync()
                .map_err(|e| Error::Ocr(format!("GetSoftwareBitmapAsync failed: {e}")))?
                .await
                .map_err(|e| Error::Ocr(format!("bitmap.await failed: {e}")))?;

            // Honor the language hint, falling back to the user profile
            let engine = Language::CreateLanguage(&HSTRING::from(language))
                .ok()
                .and_then(|lang| NativeOcrEngine::TryCreateFromLanguage(&lang).ok())
                .map(Ok)
                .unwrap_or_else(|| {
                    NativeOcrEngine::TryCreateFromUserProfileLanguages()
                        .map_err(|e| Error::Ocr(format!("failed to create OCR engine: {e}")))
                })?;

            let recognized = engine
                .RecognizeAsync(&bitmap)
                .map_err(|e| Error::Ocr(format!("RecognizeAsync failed: {e}")))?
                .await
                .map_err(|e| Error::Ocr(format!("recognition.await failed: {e}")))?;

            let text = recognized
                .Text()
                .map_err(|e| Error::Ocr(format!("failed to read text: {e}")))?
                .to_string();

            // Windows OCR does not report per-word confidence
            let words = text
                .split_whitespace()
                .map(|w| OcrWord {
                    text: w.to_string(),
                    confidence: 1.0,
                })
                .collect();

            Ok(RawRecognition {
                text,
                words,
                confidence: Some(1.0),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;
    use parking_lot::Mutex;
    use uidriver_common::Error;

    struct FakeBackend {
        responses: Mutex<Vec<Result<RawRecognition>>>,
        seen_language: Mutex<Option<String>>,
    }

    impl FakeBackend {
        fn with(responses: Vec<Result<RawRecognition>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                seen_language: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl OcrBackend for FakeBackend {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn recognize(
            &self,
            _image: &DynamicImage,
            language: &str,
        ) -> Result<RawRecognition> {
            *self.seen_language.lock() = Some(language.to_string());
            self.responses.lock().remove(0)
        }
    }

    fn region() -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::new(50, 20))
    }

    fn recognition(text: &str, confidence: f32) -> RawRecognition {
        RawRecognition {
            text: text.to_string(),
            words: vec![OcrWord {
                text: text.to_string(),
                confidence,
            }],
            confidence: Some(confidence),
        }
    }

    #[tokio::test]
    async fn extracts_text_above_threshold() {
        let backend = FakeBackend::with(vec![Ok(recognition("579", 0.93))]);
        let engine = OcrEngine::new(backend.clone(), OcrConfig::default());

        let result = engine
            .extract_text(&region(), Rect::new(10, 10, 50, 20), None)
            .await
            .unwrap();

        assert_eq!(result.text, "579");
        assert!(!result.low_confidence);
        assert_eq!(result.region, Rect::new(10, 10, 50, 20));
        assert_eq!(backend.seen_language.lock().as_deref(), Some("en-US"));
    }

    #[tokio::test]
    async fn low_confidence_text_is_flagged_not_discarded() {
        let backend = FakeBackend::with(vec![Ok(recognition("5?9", 0.40))]);
        let engine = OcrEngine::new(backend, OcrConfig::default());

        let result = engine
            .extract_text(&region(), Rect::new(0, 0, 50, 20), None)
            .await
            .unwrap();

        assert_eq!(result.text, "5?9");
        assert!(result.low_confidence);
        assert_eq!(result.confidence, 0.40);
    }

    #[tokio::test]
    async fn word_confidences_average_when_no_aggregate() {
        let backend = FakeBackend::with(vec![Ok(RawRecognition {
            text: "hello world".to_string(),
            words: vec![
                OcrWord {
                    text: "hello".into(),
                    confidence: 0.9,
                },
                OcrWord {
                    text: "world".into(),
                    confidence: 0.7,
                },
            ],
            confidence: None,
        })]);
        let engine = OcrEngine::new(backend, OcrConfig::default());

        let result = engine
            .extract_text(&region(), Rect::new(0, 0, 50, 20), None)
            .await
            .unwrap();
        assert!((result.confidence - 0.8).abs() < 1e-6);
    }

    #[tokio::test]
    async fn contains_text_is_case_insensitive_and_confidence_gated() {
        let backend = FakeBackend::with(vec![
            Ok(recognition("Result: 579", 0.95)),
            Ok(recognition("Result: 579", 0.30)),
        ]);
        let engine = OcrEngine::new(backend, OcrConfig::default());
        let src = Rect::new(0, 0, 50, 20);

        assert!(engine
            .contains_text(&region(), src, "RESULT", None)
            .await
            .unwrap());
        // Same text, but below the confidence threshold
        assert!(!engine
            .contains_text(&region(), src, "RESULT", None)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn backend_failure_propagates_as_ocr_error() {
        let backend = FakeBackend::with(vec![Err(Error::Ocr("backend crashed".into()))]);
        let engine = OcrEngine::new(backend, OcrConfig::default());

        let err = engine
            .extract_text(&region(), Rect::new(0, 0, 50, 20), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Ocr(_)));
    }

    #[tokio::test]
    async fn empty_region_yields_empty_low_confidence_result() {
        let backend = FakeBackend::with(vec![]);
        let engine = OcrEngine::new(backend, OcrConfig::default());

        let result = engine
            .extract_text(
                &DynamicImage::ImageRgba8(RgbaImage::new(0, 0)),
                Rect::new(0, 0, 0, 0),
                None,
            )
            .await
            .unwrap();
        assert!(result.text.is_empty());
        assert!(result.low_confidence);
    }
}

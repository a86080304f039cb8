//! OCR engine backends
//!
//! Two interchangeable engines behind one contract:
//! - Tesseract, invoked as an external process per frame
//! - PaddleOCR, run in-process via ONNX Runtime
//!
//! `recognize` is infallible by contract: every internal fault collapses to
//! the empty recognition so one bad frame can never abort the stream.

pub mod models;
pub mod paddle;
pub mod tesseract;

use anyhow::Result;
use image::RgbImage;

use crate::config::{EngineKind, StageConfig};

pub use models::{ModelManager, ModelType};
pub use paddle::PaddleEngine;
pub use tesseract::TesseractEngine;

/// Result of recognizing one frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recognition {
    /// Recognized strings, detection order
    pub texts: Vec<String>,
    /// Aggregated confidence, 0.0-100.0
    pub confidence: f64,
}

impl Recognition {
    /// The well-defined failure value: no texts, confidence exactly 0.0
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether nothing was recognized
    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    /// Aggregate per-region spans into one recognition
    ///
    /// Spans with empty text or non-positive confidence are dropped, so a
    /// non-empty result always carries positive confidence. The aggregate is
    /// the plain average across kept spans; zero spans yield exactly 0.0.
    pub fn from_spans(spans: Vec<TextSpan>) -> Self {
        let kept: Vec<TextSpan> = spans
            .into_iter()
            .filter(|span| !span.text.is_empty() && span.confidence > 0.0)
            .collect();

        if kept.is_empty() {
            return Self::empty();
        }

        let confidence =
            kept.iter().map(|span| span.confidence).sum::<f64>() / kept.len() as f64;
        let texts = kept.into_iter().map(|span| span.text).collect();

        Self {
            texts,
            confidence: confidence.clamp(0.0, 100.0),
        }
    }
}

/// One recognized text region before aggregation
#[derive(Debug, Clone, PartialEq)]
pub struct TextSpan {
    /// Recognized text
    pub text: String,
    /// Region confidence, 0.0-100.0
    pub confidence: f64,
}

/// Contract every recognition backend implements
///
/// Engines take `&mut self` because inference sessions require exclusive
/// access; the stage owns exactly one engine for its lifetime.
pub trait TextRecognizer {
    /// Recognize text in one frame
    ///
    /// Never fails: timeouts, crashes, missing binaries, and zero detections
    /// all degrade to [`Recognition::empty`].
    fn recognize(&mut self, image: &RgbImage) -> Recognition;
}

/// Build the engine selected by the configuration
///
/// Tesseract construction is infallible (a missing binary degrades per
/// frame); Paddle model loading is a setup-time failure by design.
pub fn build(config: &StageConfig) -> Result<Box<dyn TextRecognizer>> {
    match config.engine {
        EngineKind::Tesseract => Ok(Box::new(TesseractEngine::new(
            config.tesseract_cmd.clone(),
            &config.languages,
            config.tesseract_timeout,
        ))),
        EngineKind::Paddle => Ok(Box::new(PaddleEngine::new(
            &config.languages,
            config.det_model.as_deref(),
            config.rec_model.as_deref(),
            config.char_dict.as_deref(),
        )?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(text: &str, confidence: f64) -> TextSpan {
        TextSpan {
            text: text.to_string(),
            confidence,
        }
    }

    #[test]
    fn test_empty_recognition_invariant() {
        let empty = Recognition::empty();
        assert!(empty.is_empty());
        assert_eq!(empty.confidence, 0.0);
    }

    #[test]
    fn test_from_spans_averages() {
        let result = Recognition::from_spans(vec![span("Hello", 80.0), span("World", 90.0)]);
        assert_eq!(result.texts, vec!["Hello", "World"]);
        assert!((result.confidence - 85.0).abs() < 1e-9);
    }

    #[test]
    fn test_from_spans_drops_empty_and_zero_confidence() {
        let result = Recognition::from_spans(vec![
            span("", 90.0),
            span("noise", 0.0),
            span("kept", 70.0),
        ]);
        assert_eq!(result.texts, vec!["kept"]);
        assert!((result.confidence - 70.0).abs() < 1e-9);
    }

    #[test]
    fn test_from_spans_all_dropped_is_empty() {
        let result = Recognition::from_spans(vec![span("", 50.0), span("x", -1.0)]);
        assert_eq!(result, Recognition::empty());
    }

    #[test]
    fn test_from_spans_preserves_detection_order() {
        let result =
            Recognition::from_spans(vec![span("first", 10.0), span("second", 99.0)]);
        assert_eq!(result.texts, vec!["first", "second"]);
    }
}

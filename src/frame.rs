//! Frame data structures exchanged between pipeline stages
//!
//! A frame is one image plus an open-ended metadata mapping. The stage only
//! interprets the reserved `id` and `skip_ocr` keys; everything else rides
//! along untouched so downstream stages keep whatever upstream attached.

use image::RgbImage;
use serde_json::{Map, Value};

/// A single named frame travelling through the pipeline
#[derive(Debug, Clone)]
pub struct Frame {
    /// RGB pixel data
    pub image: RgbImage,
    /// Frame metadata
    pub meta: FrameMeta,
}

impl Frame {
    /// Create a frame with empty metadata
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            meta: FrameMeta::default(),
        }
    }

    /// Create a frame with the given metadata
    pub fn with_meta(image: RgbImage, meta: FrameMeta) -> Self {
        Self { image, meta }
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Metadata attached to a frame
///
/// `id` and `skip_ocr` are the keys this stage consumes; `extra` preserves
/// unrecognized keys for forward-compatible pass-through.
#[derive(Debug, Clone, Default)]
pub struct FrameMeta {
    /// Correlation identifier, number or string (required for output records)
    pub id: Option<Value>,
    /// When true, the frame is never routed to recognition
    pub skip_ocr: Option<bool>,
    /// Unrecognized metadata, passed through unchanged
    pub extra: Map<String, Value>,
}

impl FrameMeta {
    /// Metadata carrying only a correlation identifier
    pub fn with_id(id: impl Into<Value>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Set the skip flag
    pub fn skip_ocr(mut self, skip: bool) -> Self {
        self.skip_ocr = Some(skip);
        self
    }

    /// Whether the frame asked to be passed through
    pub fn skips_ocr(&self) -> bool {
        self.skip_ocr.unwrap_or(false)
    }
}

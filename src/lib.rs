//! framescribe - OCR recognition stage for streaming video pipelines
//!
//! One stage in a video-annotation pipeline: it receives topic-named frames
//! from upstream, recognizes text in the frames the router selects, appends
//! one JSON record per recognized frame to a durable line-oriented store,
//! and forwards the (optionally annotated) frames downstream.
//!
//! Two interchangeable recognition backends sit behind one contract: an
//! external Tesseract binary and in-process PaddleOCR models via ONNX
//! Runtime. Recognition failures degrade to well-defined empty results; a
//! live stream only halts on configuration-time faults.
//!
//! ```no_run
//! use framescribe::{Frame, FrameMeta, OcrStage, StageOptions};
//! use image::RgbImage;
//! use indexmap::IndexMap;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = StageOptions::default().normalize()?;
//! let mut stage = OcrStage::new(config)?;
//!
//! let mut tick = IndexMap::new();
//! tick.insert(
//!     "region_0".to_string(),
//!     Frame::with_meta(RgbImage::new(960, 540), FrameMeta::with_id(1)),
//! );
//! let annotated = stage.process(tick)?;
//! stage.shutdown()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod frame;
pub mod router;
pub mod sink;
pub mod stage;

pub use config::{ConfigError, EngineKind, StageConfig, StageOptions};
pub use engine::{Recognition, TextRecognizer, TextSpan};
pub use frame::{Frame, FrameMeta};
pub use router::{Route, TopicRouter};
pub use sink::{OcrRecord, RecordSink};
pub use stage::OcrStage;

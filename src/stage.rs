//! Recognition stage orchestration
//!
//! One `process` call per pipeline tick: the router partitions the incoming
//! topics, each selected frame is recognized sequentially, records are
//! appended to the sink, and the full (possibly annotated) mapping is
//! returned to the host. The stage holds no state across ticks beyond its
//! open resources.

use anyhow::Result;
use indexmap::IndexMap;
use serde_json::json;
use tracing::{debug, error, info};

use crate::config::{StageConfig, FORWARDED_TEXTS_KEY};
use crate::engine::{self, TextRecognizer};
use crate::frame::Frame;
use crate::router::{Route, TopicRouter};
use crate::sink::{OcrRecord, RecordSink};

/// The OCR recognition stage
pub struct OcrStage {
    config: StageConfig,
    engine: Box<dyn TextRecognizer>,
    router: TopicRouter,
    sink: Option<RecordSink>,
    ticks: u64,
    recognized: u64,
}

impl OcrStage {
    /// Build the stage with the engine selected by the configuration
    pub fn new(config: StageConfig) -> Result<Self> {
        let engine = engine::build(&config)?;
        Self::with_engine(config, engine)
    }

    /// Build the stage around a caller-provided engine
    ///
    /// The record sink opens here (and only here), so an unwritable
    /// destination fails before the first tick.
    pub fn with_engine(config: StageConfig, engine: Box<dyn TextRecognizer>) -> Result<Self> {
        let sink = if config.write_records {
            Some(RecordSink::open(&config.output_path)?)
        } else {
            debug!("record store disabled by configuration");
            None
        };

        info!(
            "OCR stage ready: engine={}, {} excluded topic(s), pattern={}",
            config.engine.as_str(),
            config.exclude_topics.len(),
            config
                .topic_pattern
                .as_ref()
                .map(|p| p.as_str())
                .unwrap_or("<none>")
        );

        Ok(Self {
            router: TopicRouter::from_config(&config),
            config,
            engine,
            sink,
            ticks: 0,
            recognized: 0,
        })
    }

    /// Normalized configuration the stage runs with
    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    /// Whether the record store has been released
    ///
    /// True when the stage was configured without one.
    pub fn sink_closed(&self) -> bool {
        self.sink.as_ref().map_or(true, RecordSink::is_closed)
    }

    /// Process one tick of topic-named frames
    ///
    /// Frames routed to recognition get an output record (when the store is
    /// engaged) and, with `forward_texts`, their recognized texts merged into
    /// outgoing metadata. Everything else passes through untouched. A frame
    /// that fails recognition degrades to an empty record; only store-level
    /// I/O faults propagate as errors.
    pub fn process(&mut self, frames: IndexMap<String, Frame>) -> Result<IndexMap<String, Frame>> {
        self.ticks += 1;
        let mut output = IndexMap::with_capacity(frames.len());

        for (topic, mut frame) in frames {
            match self.router.route(&topic, &frame.meta) {
                Route::PassThrough => {
                    debug!("topic '{topic}' passed through");
                }
                Route::Recognize => {
                    self.recognize_frame(&topic, &mut frame)?;
                }
            }
            output.insert(topic, frame);
        }

        Ok(output)
    }

    fn recognize_frame(&mut self, topic: &str, frame: &mut Frame) -> Result<()> {
        let recognition = self.engine.recognize(&frame.image);
        self.recognized += 1;

        if self.config.debug {
            info!(
                "topic '{topic}': {} text(s), confidence {:.1}",
                recognition.texts.len(),
                recognition.confidence
            );
        } else {
            debug!(
                "topic '{topic}': {} text(s), confidence {:.1}",
                recognition.texts.len(),
                recognition.confidence
            );
        }

        let Some(frame_id) = frame.meta.id.clone() else {
            // Without an id the record cannot be attributed; drop it loudly
            // rather than corrupt the store with an unanchored line.
            error!("frame on topic '{topic}' has no 'id' metadata; recognition result dropped");
            return Ok(());
        };

        let record = OcrRecord::new(frame_id, &recognition);
        if let Some(sink) = self.sink.as_mut() {
            sink.write(&record)?;
        }

        if self.config.forward_texts {
            frame
                .meta
                .extra
                .insert(FORWARDED_TEXTS_KEY.to_string(), json!(recognition.texts));
        }

        Ok(())
    }

    /// Release the record store
    ///
    /// Idempotent; the engine itself is released when the stage drops.
    pub fn shutdown(&mut self) -> Result<()> {
        if let Some(sink) = self.sink.as_mut() {
            sink.close()?;
        }
        info!(
            "OCR stage shut down after {} tick(s), {} frame(s) recognized",
            self.ticks, self.recognized
        );
        Ok(())
    }
}

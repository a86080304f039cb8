//! Append-only JSON-lines record store
//!
//! One record per recognized frame, one line per record, one flush per write.
//! The backing file opens exactly once when the sink is created and closes
//! exactly once; order is processing order and is never reshuffled.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::engine::Recognition;

/// One persisted recognition result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OcrRecord {
    /// Correlation identifier copied from the input frame's `id`
    pub frame_id: Value,
    /// Recognized strings, detection order
    pub texts: Vec<String>,
    /// Aggregated confidence, 0.0-100.0
    pub ocr_confidence: f64,
}

impl OcrRecord {
    /// Build a record from a frame id and an engine recognition
    ///
    /// Empty texts always carry confidence 0.0 and vice versa; the engines
    /// drop zero-confidence spans so both directions hold.
    pub fn new(frame_id: Value, recognition: &Recognition) -> Self {
        let ocr_confidence = if recognition.texts.is_empty() {
            0.0
        } else {
            recognition.confidence.clamp(0.0, 100.0)
        };
        Self {
            frame_id,
            texts: recognition.texts.clone(),
            ocr_confidence,
        }
    }
}

/// Durable append-only sink for [`OcrRecord`]s
pub struct RecordSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl RecordSink {
    /// Open the sink, creating the file if needed
    ///
    /// Fails fast when the destination is unwritable so a misconfigured
    /// stage dies at setup, not mid-stream.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open record store {path:?}"))?;

        info!("Record store open at {:?}", path);

        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(BufWriter::new(file)),
        })
    }

    /// Destination path of the store
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record and flush it
    ///
    /// Flushing per record keeps partial lines from ever being observable.
    /// Writing to a closed sink is a caller error and is rejected.
    pub fn write(&mut self, record: &OcrRecord) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            bail!("record store {:?} is closed", self.path);
        };

        let line = serde_json::to_string(record)?;
        writeln!(writer, "{line}")?;
        writer.flush()?;

        debug!(
            "Recorded frame {} ({} texts, confidence {:.1})",
            record.frame_id,
            record.texts.len(),
            record.ocr_confidence
        );

        Ok(())
    }

    /// Whether the sink has been closed
    pub fn is_closed(&self) -> bool {
        self.writer.is_none()
    }

    /// Flush and release the backing file
    ///
    /// Idempotent: closing an already-closed sink succeeds.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            info!("Record store {:?} closed", self.path);
        }
        Ok(())
    }
}

//! Tesseract subprocess engine
//!
//! Invokes an external Tesseract binary per frame and parses its TSV output.
//! The invocation is bounded by a timeout; timeouts, non-zero exits, and a
//! missing binary all degrade to the empty recognition instead of surfacing
//! into the stream.

use anyhow::{Context, Result};
use image::RgbImage;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{Recognition, TextRecognizer, TextSpan};

/// How often a running child is polled against the deadline
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Tesseract-based recognition backend
pub struct TesseractEngine {
    cmd: PathBuf,
    languages: String,
    timeout: Duration,
}

impl TesseractEngine {
    /// Create the engine
    ///
    /// Construction never touches the binary; an unusable command surfaces
    /// per frame as an empty recognition.
    pub fn new(cmd: PathBuf, languages: &[String], timeout: Duration) -> Self {
        Self {
            cmd,
            languages: languages.join("+"),
            timeout,
        }
    }

    fn run(&self, image: &RgbImage) -> Result<Recognition> {
        let staging = tempfile::tempdir().context("failed to create staging directory")?;
        let input_path = staging.path().join("frame.png");
        let output_base = staging.path().join("ocr");

        image
            .save(&input_path)
            .context("failed to stage frame for tesseract")?;

        let mut command = Command::new(&self.cmd);
        command
            .arg(&input_path)
            .arg(&output_base)
            .arg("-l")
            .arg(&self.languages)
            .args(["--psm", "6", "tsv"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        match run_with_timeout(&mut command, self.timeout) {
            ExecOutcome::Completed(status) if status.success() => {}
            ExecOutcome::Completed(status) => {
                warn!("tesseract exited with {status}; returning empty result");
                return Ok(Recognition::empty());
            }
            ExecOutcome::TimedOut => {
                warn!(
                    "tesseract exceeded {:?} and was killed; returning empty result",
                    self.timeout
                );
                return Ok(Recognition::empty());
            }
            ExecOutcome::Failed(err) => {
                warn!(
                    "failed to launch tesseract at {:?}: {err}; returning empty result",
                    self.cmd
                );
                return Ok(Recognition::empty());
            }
        }

        let tsv_path = output_base.with_extension("tsv");
        let tsv = std::fs::read_to_string(&tsv_path)
            .with_context(|| format!("failed to read tesseract output {tsv_path:?}"))?;

        let spans = parse_tsv(&tsv);
        debug!("tesseract recognized {} line(s)", spans.len());

        Ok(Recognition::from_spans(spans))
    }
}

impl TextRecognizer for TesseractEngine {
    fn recognize(&mut self, image: &RgbImage) -> Recognition {
        if image.width() == 0 || image.height() == 0 {
            return Recognition::empty();
        }
        match self.run(image) {
            Ok(recognition) => recognition,
            Err(err) => {
                warn!("tesseract recognition failed: {err:#}");
                Recognition::empty()
            }
        }
    }
}

/// Outcome of one bounded subprocess invocation
#[derive(Debug)]
enum ExecOutcome {
    /// The child exited on its own
    Completed(ExitStatus),
    /// The deadline passed and the child was killed
    TimedOut,
    /// The child could not be spawned or observed
    Failed(std::io::Error),
}

fn run_with_timeout(command: &mut Command, timeout: Duration) -> ExecOutcome {
    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => return ExecOutcome::Failed(err),
    };
    wait_with_deadline(&mut child, timeout)
}

fn wait_with_deadline(child: &mut Child, timeout: Duration) -> ExecOutcome {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return ExecOutcome::Completed(status),
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return ExecOutcome::TimedOut;
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(err) => return ExecOutcome::Failed(err),
        }
    }
}

/// Parse Tesseract TSV output into per-line spans
///
/// Word rows (level 5) with positive confidence are grouped by
/// (block, paragraph, line); each line's confidence is the mean of its word
/// confidences. Header rows and the -1 confidence placeholders Tesseract
/// emits for structural rows are skipped.
fn parse_tsv(tsv: &str) -> Vec<TextSpan> {
    fn flush(words: &mut Vec<String>, confidences: &mut Vec<f64>, spans: &mut Vec<TextSpan>) {
        if words.is_empty() {
            return;
        }
        let confidence = confidences.iter().sum::<f64>() / confidences.len() as f64;
        spans.push(TextSpan {
            text: words.join(" "),
            confidence,
        });
        words.clear();
        confidences.clear();
    }

    let mut spans = Vec::new();
    let mut current_key: Option<(String, String, String)> = None;
    let mut words: Vec<String> = Vec::new();
    let mut confidences: Vec<f64> = Vec::new();

    for row in tsv.lines().skip(1) {
        let columns: Vec<&str> = row.split('\t').collect();
        if columns.len() < 12 || columns[0] != "5" {
            continue;
        }

        let Ok(confidence) = columns[10].parse::<f64>() else {
            continue;
        };
        let text = columns[11].trim();
        if confidence <= 0.0 || text.is_empty() {
            continue;
        }

        let key = (
            columns[2].to_string(),
            columns[3].to_string(),
            columns[4].to_string(),
        );
        if current_key.as_ref() != Some(&key) {
            flush(&mut words, &mut confidences, &mut spans);
            current_key = Some(key);
        }
        words.push(text.to_string());
        confidences.push(confidence);
    }
    flush(&mut words, &mut confidences, &mut spans);

    spans
}

//! Stage configuration
//!
//! Raw options arrive as TOML (or are built in code), get validated and
//! defaulted exactly once, and the resulting `StageConfig` is immutable for
//! the lifetime of the stage.

use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default destination for the JSON-lines record store
pub const DEFAULT_OUTPUT_PATH: &str = "output/ocr_results.json";

/// Metadata key the stage writes recognized texts to when forwarding
pub const FORWARDED_TEXTS_KEY: &str = "ocr_texts";

/// Recognition backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// External Tesseract binary invoked per frame
    Tesseract,
    /// PaddleOCR models run in-process via ONNX Runtime
    Paddle,
}

impl EngineKind {
    /// Parse an engine name from raw configuration
    ///
    /// The set is closed; anything else is a configuration error.
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name {
            "tesseract" => Ok(EngineKind::Tesseract),
            "paddle" => Ok(EngineKind::Paddle),
            other => Err(ConfigError::UnknownEngine(other.to_string())),
        }
    }

    /// Language hints applied when the configuration leaves them unset
    ///
    /// Both defaults mean English; Tesseract expects ISO 639-3 codes while
    /// the Paddle models are keyed by short codes.
    pub fn default_languages(&self) -> Vec<String> {
        match self {
            EngineKind::Tesseract => vec!["eng".to_string()],
            EngineKind::Paddle => vec!["en".to_string()],
        }
    }

    /// Engine name as it appears in configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Tesseract => "tesseract",
            EngineKind::Paddle => "paddle",
        }
    }
}

/// Errors raised while normalizing configuration
///
/// All of these are fatal and surface before any frame is processed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown OCR engine '{0}' (expected 'tesseract' or 'paddle')")]
    UnknownEngine(String),
    #[error("invalid topic pattern '{pattern}': {source}")]
    InvalidTopicPattern {
        pattern: String,
        source: regex::Error,
    },
    #[error("cannot prepare output directory for {path:?}: {source}")]
    OutputDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Raw stage options as written by the operator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StageOptions {
    /// Recognition backend: "tesseract" or "paddle"
    pub engine: String,
    /// Language hints for the chosen engine; engine default when unset
    pub languages: Option<Vec<String>>,
    /// Destination for the JSON-lines record store
    pub output_path: PathBuf,
    /// Tesseract executable (name on PATH or absolute path)
    pub tesseract_cmd: PathBuf,
    /// Upper bound on one Tesseract invocation, in seconds
    pub tesseract_timeout_secs: u64,
    /// Topics never routed to recognition (exact match)
    pub exclude_topics: Vec<String>,
    /// Regex gating which non-excluded topics are recognized (full match)
    pub topic_pattern: Option<String>,
    /// Write recognized texts into the outgoing frame's metadata
    pub forward_texts: bool,
    /// Engage the record store at all
    pub write_records: bool,
    /// Promote per-frame diagnostics to info level; no effect on results
    pub debug: bool,
    /// Explicit detection model path (Paddle); managed cache when unset
    pub det_model: Option<PathBuf>,
    /// Explicit recognition model path (Paddle); managed cache when unset
    pub rec_model: Option<PathBuf>,
    /// Explicit character dictionary path (Paddle); managed cache when unset
    pub char_dict: Option<PathBuf>,
}

impl Default for StageOptions {
    fn default() -> Self {
        Self {
            engine: EngineKind::Paddle.as_str().to_string(),
            languages: None,
            output_path: PathBuf::from(DEFAULT_OUTPUT_PATH),
            tesseract_cmd: PathBuf::from("tesseract"),
            tesseract_timeout_secs: 30,
            // The composite "main" view is a mosaic of the region topics;
            // recognizing it would duplicate every region's text.
            exclude_topics: vec!["main".to_string()],
            topic_pattern: None,
            forward_texts: false,
            write_records: true,
            debug: false,
            det_model: None,
            rec_model: None,
            char_dict: None,
        }
    }
}

impl StageOptions {
    /// Load options from a TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let options: StageOptions = toml::from_str(&content)?;
        Ok(options)
    }

    /// Validate and default the options into an immutable configuration
    ///
    /// Fails before any stream resource is created: unknown engine names,
    /// uncompilable topic patterns, and an uncreatable output directory are
    /// all rejected here rather than mid-stream.
    pub fn normalize(self) -> Result<StageConfig, ConfigError> {
        let engine = EngineKind::parse(&self.engine)?;

        let languages = match self.languages {
            Some(langs) if !langs.is_empty() => langs,
            _ => engine.default_languages(),
        };

        let topic_pattern = match &self.topic_pattern {
            Some(pattern) => {
                // Anchored: the pattern must cover the whole topic name.
                let anchored = format!("^(?:{pattern})$");
                let regex =
                    Regex::new(&anchored).map_err(|source| ConfigError::InvalidTopicPattern {
                        pattern: pattern.clone(),
                        source,
                    })?;
                Some(regex)
            }
            None => None,
        };

        if self.write_records {
            if let Some(parent) = self.output_path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|source| ConfigError::OutputDir {
                        path: self.output_path.clone(),
                        source,
                    })?;
                }
            }
        }

        Ok(StageConfig {
            engine,
            languages,
            output_path: self.output_path,
            tesseract_cmd: self.tesseract_cmd,
            tesseract_timeout: Duration::from_secs(self.tesseract_timeout_secs),
            exclude_topics: self.exclude_topics.into_iter().collect(),
            topic_pattern,
            forward_texts: self.forward_texts,
            write_records: self.write_records,
            debug: self.debug,
            det_model: self.det_model,
            rec_model: self.rec_model,
            char_dict: self.char_dict,
        })
    }
}

/// Normalized, immutable stage configuration
#[derive(Debug, Clone)]
pub struct StageConfig {
    pub engine: EngineKind,
    pub languages: Vec<String>,
    pub output_path: PathBuf,
    pub tesseract_cmd: PathBuf,
    pub tesseract_timeout: Duration,
    pub exclude_topics: HashSet<String>,
    pub topic_pattern: Option<Regex>,
    pub forward_texts: bool,
    pub write_records: bool,
    pub debug: bool,
    pub det_model: Option<PathBuf>,
    pub rec_model: Option<PathBuf>,
    pub char_dict: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_normalize() {
        let temp_dir = tempfile::tempdir().unwrap();
        let options = StageOptions {
            output_path: temp_dir.path().join("ocr").join("results.json"),
            ..StageOptions::default()
        };
        let config = options.normalize().unwrap();

        assert_eq!(config.engine, EngineKind::Paddle);
        assert_eq!(config.languages, vec!["en".to_string()]);
        assert!(config.exclude_topics.contains("main"));
        assert!(config.topic_pattern.is_none());
        assert!(!config.forward_texts);
        assert!(config.write_records);
        assert!(!config.debug);
        // Parent directory is prepared up front
        assert!(temp_dir.path().join("ocr").is_dir());
    }

    #[test]
    fn test_unknown_engine_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let output = temp_dir.path().join("results.json");
        let options = StageOptions {
            engine: "INVALID_ENGINE".to_string(),
            output_path: output.clone(),
            ..StageOptions::default()
        };

        let err = options.normalize().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownEngine(_)));
        // Rejected before any output resource exists
        assert!(!output.exists());
    }

    #[test]
    fn test_language_defaults_per_engine() {
        let temp_dir = tempfile::tempdir().unwrap();
        for (engine, expected) in [("tesseract", "eng"), ("paddle", "en")] {
            let options = StageOptions {
                engine: engine.to_string(),
                output_path: temp_dir.path().join("results.json"),
                ..StageOptions::default()
            };
            let config = options.normalize().unwrap();
            assert_eq!(config.languages, vec![expected.to_string()]);
        }
    }

    #[test]
    fn test_explicit_languages_kept() {
        let temp_dir = tempfile::tempdir().unwrap();
        let options = StageOptions {
            engine: "tesseract".to_string(),
            languages: Some(vec!["deu".to_string(), "fra".to_string()]),
            output_path: temp_dir.path().join("results.json"),
            ..StageOptions::default()
        };
        let config = options.normalize().unwrap();
        assert_eq!(config.languages, vec!["deu", "fra"]);
    }

    #[test]
    fn test_invalid_topic_pattern_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let options = StageOptions {
            topic_pattern: Some("region_(".to_string()),
            output_path: temp_dir.path().join("results.json"),
            ..StageOptions::default()
        };
        let err = options.normalize().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTopicPattern { .. }));
    }

    #[test]
    fn test_unwritable_output_dir_rejected() {
        // Parent "directory" is a regular file, so create_dir_all must fail
        let blocker = NamedTempFile::new().unwrap();
        let options = StageOptions {
            output_path: blocker.path().join("results.json"),
            ..StageOptions::default()
        };
        let err = options.normalize().unwrap_err();
        assert!(matches!(err, ConfigError::OutputDir { .. }));
    }

    #[test]
    fn test_no_dir_created_when_records_disabled() {
        let temp_dir = tempfile::tempdir().unwrap();
        let options = StageOptions {
            write_records: false,
            output_path: temp_dir.path().join("never").join("results.json"),
            ..StageOptions::default()
        };
        let config = options.normalize().unwrap();
        assert!(!config.write_records);
        assert!(!temp_dir.path().join("never").exists());
    }

    #[test]
    fn test_toml_round_trip() {
        let options = StageOptions {
            engine: "tesseract".to_string(),
            topic_pattern: Some("region_.*".to_string()),
            forward_texts: true,
            ..StageOptions::default()
        };

        let toml_str = toml::to_string_pretty(&options).unwrap();
        let parsed: StageOptions = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed.engine, options.engine);
        assert_eq!(parsed.topic_pattern, options.topic_pattern);
        assert_eq!(parsed.forward_texts, options.forward_texts);
        assert_eq!(parsed.exclude_topics, options.exclude_topics);
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "engine = \"tesseract\"\ntopic_pattern = \"region_.*\"\ndebug = true"
        )
        .unwrap();

        let options = StageOptions::from_toml_file(file.path()).unwrap();
        assert_eq!(options.engine, "tesseract");
        assert_eq!(options.topic_pattern.as_deref(), Some("region_.*"));
        assert!(options.debug);
        // Unspecified fields fall back to defaults
        assert_eq!(options.exclude_topics, vec!["main".to_string()]);
    }
}

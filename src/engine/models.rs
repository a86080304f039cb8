//! Model management for the in-process engine
//!
//! Handles downloading, caching, and loading of the PaddleOCR ONNX models
//! and the character dictionary the recognizer decodes against.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use ort::session::{builder::GraphOptimizationLevel, Session};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::runtime::Runtime;
use tracing::{debug, info};

/// Set to skip all network access; downloads fail with a pointer to the URL
const OFFLINE_ENV: &str = "FRAMESCRIBE_OFFLINE";

/// Model identifier for PaddleOCR components
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    /// Text detection model (DBNet)
    Detection,
    /// Text recognition model (CRNN)
    Recognition,
    /// Character dictionary for recognition
    Dictionary,
}

impl ModelType {
    /// Get the filename for this model type
    pub fn filename(&self) -> &'static str {
        match self {
            ModelType::Detection => "det.onnx",
            ModelType::Recognition => "rec.onnx",
            ModelType::Dictionary => "dict.txt",
        }
    }

    /// Get the download URL for this model
    /// Using PaddleOCR models from Hugging Face (monkt/paddleocr-onnx)
    pub fn download_url(&self) -> &'static str {
        match self {
            ModelType::Detection => {
                "https://huggingface.co/monkt/paddleocr-onnx/resolve/main/detection/v3/det.onnx"
            }
            ModelType::Recognition => {
                "https://huggingface.co/monkt/paddleocr-onnx/resolve/main/languages/english/rec.onnx"
            }
            ModelType::Dictionary => {
                "https://huggingface.co/monkt/paddleocr-onnx/resolve/main/languages/english/dict.txt"
            }
        }
    }

    /// Expected file size for integrity check (approximate, in bytes)
    pub fn expected_size_range(&self) -> (u64, u64) {
        match self {
            ModelType::Detection => (2_000_000, 5_000_000),    // ~2.43 MB
            ModelType::Recognition => (7_000_000, 10_000_000), // ~7.83 MB
            ModelType::Dictionary => (100, 10_000),            // ~1.42 KB
        }
    }

    /// Expected SHA256 checksum; None skips verification
    pub fn expected_sha256(&self) -> Option<&'static str> {
        match self {
            ModelType::Detection => None,
            ModelType::Recognition => None,
            ModelType::Dictionary => None,
        }
    }
}

/// Model manifest tracking downloaded models
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ModelManifest {
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelInfo {
    pub filename: String,
    pub size_bytes: u64,
    pub sha256: String,
}

/// Model manager for downloading and caching ONNX models
pub struct ModelManager {
    models_dir: PathBuf,
}

impl ModelManager {
    /// Create a manager over the per-user cache directory
    pub fn new() -> Result<Self> {
        let proj_dirs = directories::ProjectDirs::from("io", "framescribe", "framescribe")
            .context("could not determine data directory")?;
        let models_dir = proj_dirs.data_dir().join("models");
        Self::with_dir(models_dir)
    }

    /// Create a manager over a custom directory
    pub fn with_dir(models_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&models_dir)
            .with_context(|| format!("failed to create model cache {models_dir:?}"))?;
        Ok(Self { models_dir })
    }

    /// Get the model cache directory
    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Get the path to a specific model file
    pub fn model_path(&self, model_type: ModelType) -> PathBuf {
        self.models_dir.join(model_type.filename())
    }

    /// Check if a model is cached and plausibly intact
    pub fn is_model_available(&self, model_type: ModelType) -> bool {
        let path = self.model_path(model_type);
        let Ok(metadata) = std::fs::metadata(&path) else {
            return false;
        };
        let (min, max) = model_type.expected_size_range();
        (min..=max).contains(&metadata.len())
    }

    /// Check if everything the in-process engine needs is cached
    pub fn are_models_ready(&self) -> bool {
        self.is_model_available(ModelType::Detection)
            && self.is_model_available(ModelType::Recognition)
            && self.is_model_available(ModelType::Dictionary)
    }

    /// Return the cached path, downloading the model first when missing
    pub fn ensure_model(&self, model_type: ModelType) -> Result<PathBuf> {
        let path = self.model_path(model_type);
        if self.is_model_available(model_type) {
            debug!("Model {} already cached at {:?}", model_type.filename(), path);
            return Ok(path);
        }

        self.download_model(model_type)?;
        Ok(path)
    }

    /// Download one model into the cache (blocking)
    fn download_model(&self, model_type: ModelType) -> Result<()> {
        let url = model_type.download_url();
        let path = self.model_path(model_type);

        if std::env::var(OFFLINE_ENV).is_ok() {
            anyhow::bail!(
                "offline mode: cannot download {}; fetch {url} manually into {path:?}",
                model_type.filename()
            );
        }

        info!("Downloading {} from {}", model_type.filename(), url);

        let rt = Runtime::new().context("failed to create download runtime")?;
        let sha256 = rt.block_on(download_file(url, &path))?;

        if let Some(expected) = model_type.expected_sha256() {
            if sha256 != expected {
                std::fs::remove_file(&path).ok();
                anyhow::bail!(
                    "checksum mismatch for {}: expected {expected}, got {sha256}",
                    model_type.filename()
                );
            }
        }

        if !self.is_model_available(model_type) {
            anyhow::bail!(
                "downloaded {} has an implausible size; refusing to use it",
                model_type.filename()
            );
        }

        self.record_in_manifest(model_type, &sha256)?;
        info!("Downloaded {} into {:?}", model_type.filename(), path);
        Ok(())
    }

    fn record_in_manifest(&self, model_type: ModelType, sha256: &str) -> Result<()> {
        let mut manifest = self.load_manifest()?;
        let metadata = std::fs::metadata(self.model_path(model_type))?;

        let info = ModelInfo {
            filename: model_type.filename().to_string(),
            size_bytes: metadata.len(),
            sha256: sha256.to_string(),
        };
        if let Some(existing) = manifest
            .models
            .iter_mut()
            .find(|m| m.filename == info.filename)
        {
            *existing = info;
        } else {
            manifest.models.push(info);
        }

        self.save_manifest(&manifest)
    }

    /// Load the model manifest (empty when absent)
    pub fn load_manifest(&self) -> Result<ModelManifest> {
        let manifest_path = self.models_dir.join("manifest.json");
        if !manifest_path.exists() {
            return Ok(ModelManifest::default());
        }
        let content = std::fs::read_to_string(&manifest_path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save the model manifest
    pub fn save_manifest(&self, manifest: &ModelManifest) -> Result<()> {
        let manifest_path = self.models_dir.join("manifest.json");
        let content = serde_json::to_string_pretty(manifest)?;
        std::fs::write(manifest_path, content)?;
        Ok(())
    }
}

/// Stream a URL to disk, returning the SHA-256 of the payload
///
/// Downloads land in a sibling temp file first and are renamed into place,
/// so an interrupted transfer never masquerades as a cached model.
async fn download_file(url: &str, path: &Path) -> Result<String> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()
        .context("failed to create HTTP client")?;

    let response = client
        .get(url)
        .send()
        .await
        .context("failed to send download request")?;

    if !response.status().is_success() {
        anyhow::bail!("download failed with status {}: {url}", response.status());
    }

    let temp_path = path.with_extension("tmp");
    let mut file =
        std::fs::File::create(&temp_path).context("failed to create download temp file")?;

    let mut hasher = Sha256::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("error reading download stream")?;
        file.write_all(&chunk)
            .context("failed to write download temp file")?;
        hasher.update(&chunk);
    }
    file.flush().context("failed to flush download temp file")?;
    drop(file);

    std::fs::rename(&temp_path, path).context("failed to move download into place")?;

    Ok(format!("{:x}", hasher.finalize()))
}

/// Load an ONNX session tuned the way both models expect
pub fn load_session(path: &Path) -> Result<Session> {
    info!("Loading ONNX model from {:?}", path);
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(4)?
        .commit_from_file(path)
        .with_context(|| format!("failed to load ONNX model {path:?}"))?;
    Ok(session)
}

/// Load the recognition character dictionary, one entry per line
pub fn load_dictionary(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read character dictionary {path:?}"))?;
    let dict: Vec<String> = content.lines().map(String::from).collect();
    if dict.is_empty() {
        anyhow::bail!("character dictionary {path:?} is empty");
    }
    Ok(dict)
}

//! Text encoders.
//!
//! `Encoder` is the capability the index builder and the recommender are
//! handed explicitly; `EmbeddingModel` is the fastembed-backed implementation:
//! - Model loading with configurable cache directory
//! - Batch embedding generation
//! - Serialised inference (fastembed's embed() requires &mut self)

use fastembed::{InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Mutex;
use std::time::Duration;

/// Default time allowed for downloading and loading the model (5 minutes)
const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),

    #[error("Encoder returned {got} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Model did not load within {}s", .0.as_secs())]
    Timeout(Duration),
}

/// Turns text into a fixed-length vector.
///
/// Implementations must be deterministic: the same text always yields the
/// same vector, and every vector has exactly `dimensions()` components.
/// Empty input is allowed and must not fail.
pub trait Encoder: Send + Sync {
    /// Name of the underlying model, used to tag persisted indexes.
    fn model_name(&self) -> &str;

    fn dimensions(&self) -> usize;

    fn encode(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Encode several texts, preserving input order.
    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|text| self.encode(text)).collect()
    }

    /// SHA256 of the model name. Stored in the index header so an index is
    /// never queried with vectors from a different model.
    fn model_id_hash(&self) -> [u8; 32] {
        model_id_hash(self.model_name())
    }
}

pub fn model_id_hash(model_name: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(model_name.as_bytes());
    hasher.finalize().into()
}

/// Wrapper around fastembed's TextEmbedding model.
/// Uses a Mutex because fastembed's embed() requires &mut self.
pub struct EmbeddingModel {
    model: Mutex<TextEmbedding>,
    model_name: String,
    dimensions: usize,
}

impl EmbeddingModel {
    /// Create a new embedding model with the given name.
    ///
    /// The model will be downloaded on first use if not cached.
    /// Models are cached in the `models/` subdirectory of `cache_dir`.
    ///
    /// # Arguments
    /// * `model_name` - Name of the model (e.g., "all-MiniLM-L6-v2")
    /// * `cache_dir` - Directory to cache downloaded models
    /// * `download_timeout` - Limit on downloading and loading the model
    pub fn new(
        model_name: &str,
        cache_dir: PathBuf,
        download_timeout: Option<Duration>,
    ) -> Result<Self, EmbeddingError> {
        let model_enum = Self::parse_model_name(model_name)?;
        let timeout = download_timeout.unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT);

        let models_dir = cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EmbeddingError::InitFailed(format!("Failed to create models directory: {}", e))
        })?;

        log::info!(
            "loading embedding model '{}' (download timeout {}s)",
            model_name,
            timeout.as_secs()
        );

        let options = InitOptions::new(model_enum)
            .with_cache_dir(models_dir)
            .with_show_download_progress(true);

        let (model, dimensions) = run_with_timeout(timeout, move || {
            let mut model = TextEmbedding::try_new(options)
                .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;
            let dimensions = Self::probe_dimensions(&mut model)?;
            Ok((model, dimensions))
        })?;
        log::debug!("model '{}' produces {} dimensions", model_name, dimensions);

        Ok(Self {
            model: Mutex::new(model),
            model_name: model_name.to_string(),
            dimensions,
        })
    }

    /// Parse model name string to fastembed enum.
    fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
        match name.to_lowercase().as_str() {
            "all-minilm-l6-v2" | "allminiml6v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "all-minilm-l6-v2-q" | "allminiml6v2q" => {
                Ok(fastembed::EmbeddingModel::AllMiniLML6V2Q)
            }
            "all-minilm-l12-v2" | "allminiml12v2" => {
                Ok(fastembed::EmbeddingModel::AllMiniLML12V2)
            }
            "paraphrase-multilingual-minilm-l12-v2" | "paraphrasemlminilml12v2" => {
                Ok(fastembed::EmbeddingModel::ParaphraseMLMiniLML12V2)
            }
            "bge-small-en-v1.5" | "bgesmallenv15" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" | "bgebaseenv15" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            _ => Err(EmbeddingError::InvalidModel(format!(
                "Unknown model: {}. Supported models: all-MiniLM-L6-v2, all-MiniLM-L12-v2, paraphrase-multilingual-MiniLM-L12-v2, bge-small-en-v1.5, bge-base-en-v1.5 (add -q to all-MiniLM-L6-v2 for quantized)",
                name
            ))),
        }
    }

    /// Probe the model to determine embedding dimensions.
    fn probe_dimensions(model: &mut TextEmbedding) -> Result<usize, EmbeddingError> {
        let test_embeddings = model
            .embed(vec!["test"], None)
            .map_err(|e| EmbeddingError::InitFailed(format!("Failed to probe dimensions: {}", e)))?;

        test_embeddings
            .first()
            .map(|v| v.len())
            .ok_or_else(|| EmbeddingError::InitFailed("Model returned no embedding".to_string()))
    }
}

impl Encoder for EmbeddingModel {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut model = self.model.lock().map_err(|e| {
            EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
        })?;

        let embeddings = model
            .embed(vec![text], None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))
    }

    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut model = self.model.lock().map_err(|e| {
            EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
        })?;

        let embeddings = model
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        if embeddings.len() != texts.len() {
            return Err(EmbeddingError::EmbeddingFailed(format!(
                "model returned {} embeddings for {} texts",
                embeddings.len(),
                texts.len()
            )));
        }

        Ok(embeddings)
    }
}

/// Run `load` on its own thread and wait at most `timeout` for it.
///
/// A loader that misses the deadline keeps running detached; its result is
/// dropped when it finishes.
fn run_with_timeout<T, F>(timeout: Duration, load: F) -> Result<T, EmbeddingError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, EmbeddingError> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("model-loader".to_string())
        .spawn(move || {
            let _ = tx.send(load());
        })
        .map_err(|e| EmbeddingError::InitFailed(format!("Failed to start model loader: {}", e)))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(EmbeddingError::Timeout(timeout)),
        Err(RecvTimeoutError::Disconnected) => Err(EmbeddingError::InitFailed(
            "model loader stopped without a result".to_string(),
        )),
    }
}

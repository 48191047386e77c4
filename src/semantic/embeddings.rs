//! Embedding provider seam and the fastembed-backed implementation.
//!
//! - `EmbeddingProvider`: the only contract the matching core depends on
//! - `EmbeddingModel`: fastembed wrapper with lazy model download
//! - `EmbeddingAdapter`: truncation policy and L2 renormalization on top of
//!   any provider

use fastembed::{InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::semantic::matcher::l2_normalize;
use crate::semantic::preprocess::truncate_chars;

/// Default download timeout for model files (5 minutes)
const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Context window of the bundled sentence-embedding models, in tokens.
pub const DEFAULT_CONTEXT_TOKENS: usize = 512;

/// Tokens held back for control tokens ([CLS], [SEP], ...).
pub const DEFAULT_RESERVED_TOKENS: usize = 10;

/// Conservative characters-per-token estimate used for truncation.
pub const DEFAULT_CHARS_PER_TOKEN: usize = 3;

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),

    #[error("Model download timed out after {0} seconds")]
    DownloadTimeout(u64),

    #[error("Provider returned a degenerate vector (zero or non-finite norm)")]
    DegenerateVector,
}

/// Something that turns text into a fixed-length vector.
///
/// Implementations must not carry encoder state from one call into the
/// next: every call is encoded in its own computation context. The
/// dimensionality is fixed for the provider's lifetime.
pub trait EmbeddingProvider: Send + Sync {
    /// Stable identifier of the loaded model. Used to namespace the cache.
    fn name(&self) -> &str;

    /// Output dimensionality.
    fn dimensions(&self) -> usize;

    /// Embed `text`. Input longer than `max_len` characters may be cut.
    fn embed(&self, text: &str, max_len: usize) -> Result<Vec<f32>, EmbeddingError>;
}

/// Wrapper around fastembed's TextEmbedding model.
/// Uses a Mutex because fastembed's embed() requires &mut self.
pub struct EmbeddingModel {
    model: Mutex<TextEmbedding>,
    model_name: &'static str,
    dimensions: usize,
}

impl EmbeddingModel {
    /// Create a new embedding model with the given name.
    ///
    /// The model will be downloaded on first use if not cached.
    /// Models are cached in the `models/` subdirectory of `cache_dir`.
    /// Loading that takes longer than `download_timeout` fails with
    /// [`EmbeddingError::DownloadTimeout`].
    ///
    /// # Arguments
    /// * `model_name` - Name of the model (e.g., "all-MiniLM-L6-v2")
    /// * `cache_dir` - Cache root; models land in `cache_dir/models`
    /// * `download_timeout` - Optional timeout for model download
    pub fn new(
        model_name: &str,
        cache_dir: PathBuf,
        download_timeout: Option<Duration>,
    ) -> Result<Self, EmbeddingError> {
        let (model_enum, canonical) = Self::parse_model_name(model_name)?;
        let timeout = download_timeout.unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT);

        let models_dir = cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EmbeddingError::InitFailed(format!("Failed to create models directory: {}", e))
        })?;

        log::info!("Loading embedding model '{}'", canonical);

        let mut model = with_timeout(timeout, move || {
            let options = InitOptions::new(model_enum)
                .with_cache_dir(models_dir)
                .with_max_length(DEFAULT_CONTEXT_TOKENS)
                .with_show_download_progress(true);
            TextEmbedding::try_new(options)
        })?
        .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

        let dimensions = Self::probe_dimensions(&mut model)?;

        Ok(Self {
            model: Mutex::new(model),
            model_name: canonical,
            dimensions,
        })
    }

    /// Resolve a user-supplied model name to its canonical spelling.
    pub fn canonical_name(name: &str) -> Result<&'static str, EmbeddingError> {
        Self::parse_model_name(name).map(|(_, canonical)| canonical)
    }

    /// Parse model name string to fastembed enum and canonical name.
    fn parse_model_name(
        name: &str,
    ) -> Result<(fastembed::EmbeddingModel, &'static str), EmbeddingError> {
        match name.to_lowercase().as_str() {
            "all-minilm-l6-v2" | "allminiml6v2" => {
                Ok((fastembed::EmbeddingModel::AllMiniLML6V2, "all-MiniLM-L6-v2"))
            }
            "all-minilm-l6-v2-q" | "allminiml6v2q" => {
                Ok((fastembed::EmbeddingModel::AllMiniLML6V2Q, "all-MiniLM-L6-v2-q"))
            }
            "bge-small-en-v1.5" | "bgesmallenv15" => {
                Ok((fastembed::EmbeddingModel::BGESmallENV15, "bge-small-en-v1.5"))
            }
            "bge-small-en-v1.5-q" | "bgesmallenv15q" => {
                Ok((fastembed::EmbeddingModel::BGESmallENV15Q, "bge-small-en-v1.5-q"))
            }
            "bge-base-en-v1.5" | "bgebaseenv15" => {
                Ok((fastembed::EmbeddingModel::BGEBaseENV15, "bge-base-en-v1.5"))
            }
            "bge-base-en-v1.5-q" | "bgebaseenv15q" => {
                Ok((fastembed::EmbeddingModel::BGEBaseENV15Q, "bge-base-en-v1.5-q"))
            }
            _ => Err(EmbeddingError::InvalidModel(format!(
                "Unknown model: {}. Supported models: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5 (add -q suffix for quantized)",
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

impl EmbeddingProvider for EmbeddingModel {
    fn name(&self) -> &str {
        self.model_name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Each call is a single-text batch, so the ONNX session starts from
    /// fresh inputs every time and nothing leaks between items.
    fn embed(&self, text: &str, max_len: usize) -> Result<Vec<f32>, EmbeddingError> {
        let text = truncate_chars(text, max_len);

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
}

/// Run `load` on its own thread and give up after `timeout`.
///
/// A timed-out loader thread is left to finish in the background; the
/// process is expected to exit on the returned error.
fn with_timeout<T, F>(timeout: Duration, load: F) -> Result<T, EmbeddingError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(load());
    });

    match rx.recv_timeout(timeout) {
        Ok(value) => Ok(value),
        Err(RecvTimeoutError::Timeout) => Err(EmbeddingError::DownloadTimeout(timeout.as_secs())),
        Err(RecvTimeoutError::Disconnected) => Err(EmbeddingError::InitFailed(
            "model loader thread exited without a result".to_string(),
        )),
    }
}

/// Applies the input budget and output normalization around a provider.
#[derive(Clone)]
pub struct EmbeddingAdapter {
    provider: Arc<dyn EmbeddingProvider>,
    max_chars: usize,
}

impl EmbeddingAdapter {
    /// `max_chars = (context_tokens - reserved_tokens) * chars_per_token`
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        context_tokens: usize,
        reserved_tokens: usize,
        chars_per_token: usize,
    ) -> Self {
        let max_chars = context_tokens.saturating_sub(reserved_tokens) * chars_per_token;
        Self {
            provider,
            max_chars,
        }
    }

    pub fn with_defaults(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self::new(
            provider,
            DEFAULT_CONTEXT_TOKENS,
            DEFAULT_RESERVED_TOKENS,
            DEFAULT_CHARS_PER_TOKEN,
        )
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// The slice of an item's normalized text that will actually be
    /// embedded. Cache keys must be computed from this, not from the
    /// untruncated text.
    pub fn fit<'a>(&self, normalized: &'a str) -> &'a str {
        truncate_chars(normalized, self.max_chars)
    }

    /// Embed already-fitted text and return a unit-length vector.
    ///
    /// Empty text is passed through; the model still sees its control
    /// tokens and returns a usable vector.
    pub fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let raw = self.provider.embed(text, self.max_chars)?;
        l2_normalize(raw).ok_or(EmbeddingError::DegenerateVector)
    }

    /// Embed a prompt. Prompts skip [`fit`](Self::fit) and the cache, but
    /// the provider still cuts them to the same `max_chars` budget.
    pub fn embed_prompt(&self, normalized_prompt: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed(normalized_prompt)
    }
}

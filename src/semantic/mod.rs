//! Semantic matching of a prompt against skill and agent documents.
//!
//! # Architecture
//!
//! - `preprocess`: Text normalization and content hashing
//! - `cache`: Content-addressed embedding cache on disk
//! - `embeddings`: Provider seam, fastembed provider, truncation/normalization adapter
//! - `matcher`: Cosine similarity and threshold filtering
//! - `service`: Runs a whole prompt-vs-items match

pub mod cache;
pub mod embeddings;
pub mod matcher;
pub mod preprocess;
mod service;

pub use cache::EmbeddingCache;
pub use embeddings::{EmbeddingAdapter, EmbeddingError, EmbeddingModel, EmbeddingProvider};
pub use matcher::Match;
pub use service::{MatchOutcome, MatchService};

/// Default embedding model name
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";

/// Default similarity threshold
pub const DEFAULT_THRESHOLD: f32 = 0.4;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::semantic::embeddings::{
    DEFAULT_CHARS_PER_TOKEN, DEFAULT_CONTEXT_TOKENS, DEFAULT_RESERVED_TOKENS,
};
use crate::semantic::{DEFAULT_MODEL, DEFAULT_THRESHOLD};

const CONFIG_FILE_NAME: &str = "config.yaml";

/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config is malformed: {0}")]
    Parse(#[from] serde_yml::Error),

    #[error("{field}: {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Values given on the command line for a single run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConfigOverrides {
    pub threshold: Option<f32>,
    pub model: Option<String>,
    pub parallelism: Option<usize>,
    pub cache_dir: Option<PathBuf>,
    pub log_level: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Similarity threshold [0.0, 1.0], inclusive
    #[serde(default = "default_threshold")]
    pub threshold: f32,

    /// Embedding model name (e.g., "all-MiniLM-L6-v2")
    #[serde(default = "default_model")]
    pub model: String,

    /// Model context window in tokens
    #[serde(default = "default_context_tokens")]
    pub context_tokens: usize,

    /// Tokens reserved for control tokens
    #[serde(default = "default_reserved_tokens")]
    pub reserved_tokens: usize,

    /// Characters-per-token estimate used for truncation
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,

    /// Worker count for item processing: "auto" or a positive integer
    #[serde(default = "default_parallelism")]
    pub parallelism: String,

    /// Timeout for model download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,

    /// Override for the cache root directory
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            model: DEFAULT_MODEL.to_string(),
            context_tokens: DEFAULT_CONTEXT_TOKENS,
            reserved_tokens: DEFAULT_RESERVED_TOKENS,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            parallelism: default_parallelism(),
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            cache_dir: None,
            log_level: default_log_level(),
            base_path: PathBuf::new(),
        }
    }
}

fn default_threshold() -> f32 {
    DEFAULT_THRESHOLD
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_context_tokens() -> usize {
    DEFAULT_CONTEXT_TOKENS
}

fn default_reserved_tokens() -> usize {
    DEFAULT_RESERVED_TOKENS
}

fn default_chars_per_token() -> usize {
    DEFAULT_CHARS_PER_TOKEN
}

fn default_parallelism() -> String {
    "auto".to_string()
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ConfigError::invalid(
                "threshold",
                format!("must be between 0.0 and 1.0, got {}", self.threshold),
            ));
        }

        if self.parallelism != "auto" {
            match self.parallelism.parse::<usize>() {
                Ok(0) | Err(_) => {
                    return Err(ConfigError::invalid(
                        "parallelism",
                        format!(
                            "must be 'auto' or a positive integer, got '{}'",
                            self.parallelism
                        ),
                    ))
                }
                Ok(_) => {}
            }
        }

        if self.chars_per_token == 0 {
            return Err(ConfigError::invalid("chars_per_token", "must be greater than 0"));
        }

        if self.reserved_tokens >= self.context_tokens {
            return Err(ConfigError::invalid(
                "reserved_tokens",
                format!(
                    "must be smaller than context_tokens ({})",
                    self.context_tokens
                ),
            ));
        }

        if self.download_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "download_timeout_secs",
                "must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Number of worker threads for item processing.
    pub fn worker_count(&self) -> usize {
        match self.parallelism.parse::<usize>() {
            Ok(n) if n > 0 => n,
            _ => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }

    /// Apply per-run overrides. Nothing is saved; call
    /// [`validate`](Self::validate) afterwards.
    pub fn apply(&mut self, overrides: ConfigOverrides) {
        if let Some(threshold) = overrides.threshold {
            self.threshold = threshold;
        }
        if let Some(model) = overrides.model {
            self.model = model;
        }
        if let Some(parallelism) = overrides.parallelism {
            self.parallelism = parallelism.to_string();
        }
        if let Some(cache_dir) = overrides.cache_dir {
            self.cache_dir = Some(cache_dir);
        }
        if let Some(log_level) = overrides.log_level {
            self.log_level = log_level;
        }
    }

    /// Load `config.yaml` from `base_path`, writing defaults if it does not
    /// exist yet.
    ///
    /// Values are not validated here so command-line overrides get a chance
    /// to replace them first.
    pub fn load_with(base_path: &Path) -> Result<Self, ConfigError> {
        let path = base_path.join(CONFIG_FILE_NAME);
        let io_err = |source| ConfigError::Io {
            path: path.clone(),
            source,
        };

        if !path.exists() {
            std::fs::create_dir_all(base_path).map_err(io_err)?;
            std::fs::write(&path, serde_yml::to_string(&Self::default())?).map_err(io_err)?;
        }

        let config_str = std::fs::read_to_string(&path).map_err(io_err)?;
        let mut config: Self = serde_yml::from_str(&config_str)?;
        config.base_path = base_path.to_path_buf();

        // resave in case new fields were added since the file was written
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = self.base_path.join(CONFIG_FILE_NAME);
        let config_str = serde_yml::to_string(&self)?;
        std::fs::write(&path, config_str).map_err(|source| ConfigError::Io { path, source })
    }
}

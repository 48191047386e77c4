use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::ConfigOverrides;
use crate::report::OutputType;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Log filter (e.g. "info", "intent_classifier=debug").
    /// RUST_LOG takes precedence when set.
    #[clap(long, global = true)]
    pub log_level: Option<String>,

    /// Cache root directory
    #[clap(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Args {
    /// Config values this invocation overrides.
    pub fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides {
            cache_dir: self.cache_dir.clone(),
            log_level: self.log_level.clone(),
            ..Default::default()
        };

        if let Command::Match {
            threshold,
            embedding_model,
            parallelism,
            ..
        } = &self.command
        {
            overrides.threshold = *threshold;
            overrides.model = embedding_model.clone();
            overrides.parallelism = *parallelism;
        }

        overrides
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Format {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CacheArgs {
    /// Show entry count and size per model
    Stats {},
    /// Delete cached embeddings
    Clear {
        /// Only clear this model's embeddings
        #[clap(long)]
        model: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Match a prompt against skill and agent files
    Match {
        /// User prompt to classify
        #[clap(short, long)]
        prompt: String,

        /// A skill/agent file or a directory of them
        #[clap(short, long)]
        embed: PathBuf,

        /// Similarity threshold (0.0 - 1.0), inclusive
        #[clap(short, long)]
        threshold: Option<f32>,

        /// Embedding model name
        #[clap(long)]
        embedding_model: Option<String>,

        /// Which categories to report
        #[clap(long, value_enum, default_value_t = OutputType::Auto)]
        output_type: OutputType,

        /// Output format
        #[clap(long, value_enum, default_value_t = Format::Text)]
        format: Format,

        /// Worker count for item processing (default: config)
        #[clap(long)]
        parallelism: Option<usize>,

        /// Ignore files that are not .md with valid frontmatter
        #[clap(long, default_value = "false")]
        strict: bool,

        /// Draw a progress bar on stderr
        #[clap(long, default_value = "false")]
        progress: bool,
    },

    /// Inspect or clear the embedding cache
    Cache {
        #[clap(subcommand)]
        action: CacheArgs,
    },
}

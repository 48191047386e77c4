use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cli;
mod config;
mod items;
mod paths;
mod render;
mod report;
mod semantic;

use cli::{CacheArgs, Format};
use config::Config;
use items::LoadOptions;
use report::OutputType;
use semantic::{EmbeddingAdapter, EmbeddingCache, EmbeddingModel, MatchService};

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

struct MatchRequest {
    prompt: String,
    embed: PathBuf,
    output_type: OutputType,
    format: Format,
    strict: bool,
    progress: bool,
}

fn run_match(config: &Config, cache_root: PathBuf, req: MatchRequest) -> anyhow::Result<()> {
    let items = items::load_items(&req.embed, LoadOptions { strict: req.strict })?;
    if items.is_empty() {
        log::warn!("no items found under {}", req.embed.display());
        return Ok(());
    }

    let timeout = Duration::from_secs(config.download_timeout_secs);
    let model = EmbeddingModel::new(&config.model, cache_root.clone(), Some(timeout))
        .context("Failed to load embedding model")?;
    let adapter = EmbeddingAdapter::new(
        Arc::new(model),
        config.context_tokens,
        config.reserved_tokens,
        config.chars_per_token,
    );

    log::debug!("item text budget: {} chars", adapter.max_chars());

    let cache = EmbeddingCache::open(&cache_root, adapter.provider_name())
        .context("Failed to open embedding cache")?;
    let service =
        MatchService::new(cache, adapter, config.worker_count()).with_progress(req.progress);
    log::debug!("embedding cache at {}", service.cache().dir().display());

    let outcome = service.run(&req.prompt, &items, config.threshold)?;
    for m in &outcome.matches {
        log::debug!(
            "{} {} [{}] {:.4} {}",
            m.category,
            m.name,
            m.priority,
            m.similarity,
            m.path.display()
        );
    }

    let report = report::aggregate_filtered(&outcome.matches, req.output_type);
    if report.is_empty() {
        return Ok(());
    }
    log::info!("reporting {} of {} matches", report.len(), outcome.matches.len());

    match req.format {
        Format::Text => print!("{}", render::render_text(&report)),
        Format::Json => println!("{}", render::render_json(&report)?),
    }

    Ok(())
}

fn run_cache(cache_root: PathBuf, action: CacheArgs) -> anyhow::Result<()> {
    match action {
        CacheArgs::Stats {} => {
            let stats = semantic::cache::stats_all(&cache_root)?;
            if stats.is_empty() {
                println!("cache is empty ({})", cache_root.display());
                return Ok(());
            }
            for (model, s) in stats {
                println!("{model}: {} entries, {} bytes", s.entries, s.bytes);
            }
        }
        CacheArgs::Clear { model: Some(model) } => {
            let canonical = EmbeddingModel::canonical_name(&model)?;
            let removed = EmbeddingCache::open(&cache_root, canonical)?.clear()?;
            println!("{removed} entries removed for {canonical}");
        }
        CacheArgs::Clear { model: None } => {
            semantic::cache::clear_all(&cache_root)?;
            println!("embedding cache cleared");
        }
    }

    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();

    let mut config = Config::load_with(&paths::config_dir()?)?;
    config.apply(args.overrides());
    config.validate()?;
    init_logging(&config.log_level);

    let cache_root = paths::cache_root(config.cache_dir.clone())?;

    match args.command {
        cli::Command::Match {
            prompt,
            embed,
            output_type,
            format,
            strict,
            progress,
            ..
        } => run_match(
            &config,
            cache_root,
            MatchRequest {
                prompt,
                embed,
                output_type,
                format,
                strict,
                progress,
            },
        ),

        cli::Command::Cache { action } => run_cache(cache_root, action),
    }
}

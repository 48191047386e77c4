//! Prompt-vs-items matching service.
//!
//! Owns the injected cache and embedding adapter and runs one match:
//! - Normalizes and embeds the prompt (never cached)
//! - Scores every item on a bounded rayon pool
//! - Returns matches in input order along with run counters

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::items::Item;
use crate::semantic::cache::EmbeddingCache;
use crate::semantic::embeddings::{EmbeddingAdapter, EmbeddingError};
use crate::semantic::matcher::{Match, MatchStats, Matcher};
use crate::semantic::preprocess::embedding_text;

/// Errors that abort a whole match run.
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error("Failed to embed prompt: {0}")]
    PromptEmbedding(#[source] EmbeddingError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result of one run.
#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub matches: Vec<Match>,
    pub stats: MatchStats,
}

/// Runs prompt matching against a set of items.
pub struct MatchService {
    cache: EmbeddingCache,
    adapter: EmbeddingAdapter,
    parallelism: usize,
    show_progress: bool,
}

impl MatchService {
    /// # Arguments
    /// * `cache` - Embedding cache for the adapter's model
    /// * `adapter` - Provider wrapped with truncation and normalization
    /// * `parallelism` - Upper bound on concurrently processed items
    pub fn new(cache: EmbeddingCache, adapter: EmbeddingAdapter, parallelism: usize) -> Self {
        Self {
            cache,
            adapter,
            parallelism: parallelism.max(1),
            show_progress: false,
        }
    }

    /// Draw a progress bar on stderr while items are processed.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    /// Embed the prompt. It is lowercased and normalized like items and
    /// never cached. It skips the adapter's `fit`, though the provider
    /// still cuts it to the same character budget.
    pub fn embed_prompt(&self, prompt: &str) -> Result<Vec<f32>, MatchError> {
        let normalized = embedding_text(prompt);
        log::debug!("normalized prompt: {normalized:?}");
        self.adapter
            .embed_prompt(&normalized)
            .map_err(MatchError::PromptEmbedding)
    }

    /// Match `prompt` against `items`, keeping those with
    /// `similarity >= threshold`.
    ///
    /// Fails only when the prompt itself cannot be embedded; per-item
    /// failures are counted in `stats.skipped`.
    pub fn run(
        &self,
        prompt: &str,
        items: &[Item],
        threshold: f32,
    ) -> Result<MatchOutcome, MatchError> {
        let _span = tracing::info_span!("match_run", items = items.len(), threshold).entered();

        let prompt_vector = self.embed_prompt(prompt)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.parallelism)
            .build()
            .map_err(|e| MatchError::Internal(format!("Failed to build worker pool: {}", e)))?;

        let progress = self.progress_bar(items.len());
        let tick = || progress.inc(1);
        let matcher = Matcher::new(&self.cache, &self.adapter).on_item(&tick);

        let (matches, stats) =
            pool.install(|| matcher.match_items(&prompt_vector, items, threshold));
        progress.finish_and_clear();

        log::info!(
            "matched {}/{} items ({} cached, {} embedded, {} skipped)",
            stats.matched,
            stats.items,
            stats.cache_hits,
            stats.embedded,
            stats.skipped
        );

        Ok(MatchOutcome { matches, stats })
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let bar = ProgressBar::with_draw_target(Some(len as u64), ProgressDrawTarget::stderr());
        let style = ProgressStyle::with_template("{spinner} embedding {pos}/{len} {wide_bar}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        bar
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::{Category, Priority};
    use crate::semantic::embeddings::EmbeddingProvider;
    use std::path::PathBuf;
    use std::sync::Arc;

    /// Embeds by counting whitespace tokens that start with each letter.
    struct LetterProvider;

    impl EmbeddingProvider for LetterProvider {
        fn name(&self) -> &str {
            "letters"
        }

        fn dimensions(&self) -> usize {
            26
        }

        fn embed(&self, text: &str, _max_len: usize) -> Result<Vec<f32>, EmbeddingError> {
            let mut v = vec![0.0; 26];
            for word in text.split_whitespace() {
                if let Some(c) = word.chars().next().filter(|c| c.is_ascii_lowercase()) {
                    v[(c as u8 - b'a') as usize] += 1.0;
                }
            }
            Ok(v)
        }
    }

    fn service() -> (MatchService, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let cache = EmbeddingCache::open(tmp.path(), "letters").unwrap();
        let adapter = EmbeddingAdapter::with_defaults(Arc::new(LetterProvider));
        (MatchService::new(cache, adapter, 2), tmp)
    }

    fn item(name: &str, content: &str) -> Item {
        Item {
            name: name.to_string(),
            path: PathBuf::from(name),
            content: content.to_string(),
            priority: Priority::Medium,
            category: Category::Skill,
        }
    }

    /// Fails for any text containing "broken".
    struct BrokenProvider;

    impl EmbeddingProvider for BrokenProvider {
        fn name(&self) -> &str {
            "broken"
        }

        fn dimensions(&self) -> usize {
            2
        }

        fn embed(&self, text: &str, _max_len: usize) -> Result<Vec<f32>, EmbeddingError> {
            if text.contains("broken") {
                return Err(EmbeddingError::EmbeddingFailed("provider unavailable".to_string()));
            }
            Ok(vec![1.0, 0.5])
        }
    }

    fn service_with(provider: Arc<dyn EmbeddingProvider>) -> (MatchService, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let adapter = EmbeddingAdapter::with_defaults(provider);
        let cache = EmbeddingCache::open(tmp.path(), adapter.provider_name()).unwrap();
        (MatchService::new(cache, adapter, 2), tmp)
    }

    #[test]
    fn test_prompt_failure_is_fatal() {
        let (service, _tmp) = service_with(Arc::new(BrokenProvider));
        let result = service.run("broken prompt", &[item("x", "xylophone")], 0.0);
        assert!(matches!(
            result,
            Err(MatchError::PromptEmbedding(EmbeddingError::EmbeddingFailed(_)))
        ));
    }

    #[test]
    fn test_stop_word_prompt_still_runs() {
        let (service, _tmp) = service_with(Arc::new(BrokenProvider));
        let items = vec![item("ok", "anything"), item("bad", "broken item")];

        let outcome = service.run("do it", &items, 0.0).unwrap();
        assert_eq!(outcome.matches.len(), 1);
        assert_eq!(outcome.matches[0].name, "ok");
        assert_eq!(outcome.stats.skipped, 1);
    }

    #[test]
    fn test_frontmatter_only_item_is_matched() {
        let (service, _tmp) = service_with(Arc::new(BrokenProvider));
        let items = vec![item("bare", "---\nname: bare\n---\n")];

        let outcome = service.run("anything", &items, 0.0).unwrap();
        assert_eq!(outcome.matches.len(), 1);
        assert_eq!(outcome.stats.skipped, 0);
    }

    #[test]
    fn test_prompt_is_not_cached() {
        let (service, _tmp) = service();
        service.run("zebra", &[], 0.0).unwrap();
        assert!(service.cache().get("zebra").is_none());
        assert_eq!(service.cache().stats().unwrap().entries, 0);
    }

    #[test]
    fn test_run_preserves_input_order() {
        let (service, _tmp) = service();
        let items: Vec<Item> = (0..20)
            .map(|i| item(&format!("item-{i:02}"), "apple apricot"))
            .collect();

        let outcome = service.run("apple", &items, 0.5).unwrap();
        let names: Vec<_> = outcome.matches.iter().map(|m| m.name.clone()).collect();
        let expected: Vec<_> = (0..20).map(|i| format!("item-{i:02}")).collect();
        assert_eq!(names, expected);
        assert_eq!(outcome.stats.matched, 20);
        // identical content shares one cache record
        assert_eq!(service.cache().stats().unwrap().entries, 1);
    }

    #[test]
    fn test_run_filters_by_threshold() {
        let (service, _tmp) = service();
        let items = vec![item("a", "apple"), item("b", "banana"), item("ab", "apple banana")];

        let outcome = service.run("apple", &items, 0.6).unwrap();
        let names: Vec<_> = outcome.matches.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["a", "ab"]);
    }
}

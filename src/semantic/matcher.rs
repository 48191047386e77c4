//! Vector math and threshold matching of items against a prompt vector.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use serde::Serialize;

use crate::items::{Category, Item, Priority};
use crate::semantic::cache::EmbeddingCache;
use crate::semantic::embeddings::{EmbeddingAdapter, EmbeddingError};
use crate::semantic::preprocess::embedding_text;

/// An item whose similarity to the prompt met the threshold.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Match {
    pub name: String,
    pub path: PathBuf,
    pub similarity: f32,
    pub priority: Priority,
    pub category: Category,
}

/// Per-run counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MatchStats {
    pub items: usize,
    pub cache_hits: usize,
    pub embedded: usize,
    pub skipped: usize,
    pub matched: usize,
}

/// Compute L2 norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale `v` to unit length.
///
/// `None` for an empty vector or when the norm is zero or not finite.
pub fn l2_normalize(mut v: Vec<f32>) -> Option<Vec<f32>> {
    let norm = l2_norm(&v);
    if v.is_empty() || !norm.is_finite() || norm < f32::EPSILON {
        return None;
    }
    for value in v.iter_mut() {
        *value /= norm;
    }
    Some(v)
}

/// Cosine similarity of two unit vectors, i.e. their dot product.
///
/// Both inputs must already be L2-normalized. Vectors of different length
/// score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

enum Outcome {
    Matched(Match),
    Rejected,
    Skipped,
}

/// Scores items against a prompt using cached or freshly computed vectors.
pub struct Matcher<'a> {
    cache: &'a EmbeddingCache,
    adapter: &'a EmbeddingAdapter,
    on_item: Option<&'a (dyn Fn() + Sync)>,
}

impl<'a> Matcher<'a> {
    pub fn new(cache: &'a EmbeddingCache, adapter: &'a EmbeddingAdapter) -> Self {
        Self {
            cache,
            adapter,
            on_item: None,
        }
    }

    /// Callback invoked once per processed item (progress reporting).
    pub fn on_item(mut self, callback: &'a (dyn Fn() + Sync)) -> Self {
        self.on_item = Some(callback);
        self
    }

    /// Return every item with `similarity >= threshold`.
    ///
    /// Items are scored on the current rayon pool; the output keeps input
    /// order. Items whose vector cannot be obtained are logged and skipped.
    pub fn match_items(
        &self,
        prompt: &[f32],
        items: &[Item],
        threshold: f32,
    ) -> (Vec<Match>, MatchStats) {
        let cache_hits = AtomicUsize::new(0);
        let embedded = AtomicUsize::new(0);

        let outcomes: Vec<Outcome> = items
            .par_iter()
            .map(|item| {
                let outcome = match self.item_vector(item, &cache_hits, &embedded) {
                    Ok(vector) => {
                        let similarity = cosine_similarity(prompt, &vector);
                        log::debug!("{}: similarity {:.4}", item.name, similarity);
                        if similarity >= threshold {
                            Outcome::Matched(Match {
                                name: item.name.clone(),
                                path: item.path.clone(),
                                similarity,
                                priority: item.priority,
                                category: item.category,
                            })
                        } else {
                            Outcome::Rejected
                        }
                    }
                    Err(err) => {
                        log::warn!("failed to embed {}: {err}", item.name);
                        Outcome::Skipped
                    }
                };
                if let Some(callback) = self.on_item {
                    callback();
                }
                outcome
            })
            .collect();

        let mut stats = MatchStats {
            items: items.len(),
            cache_hits: cache_hits.into_inner(),
            embedded: embedded.into_inner(),
            ..Default::default()
        };

        let mut matches = Vec::new();
        for outcome in outcomes {
            match outcome {
                Outcome::Matched(m) => matches.push(m),
                Outcome::Rejected => {}
                Outcome::Skipped => stats.skipped += 1,
            }
        }
        stats.matched = matches.len();

        (matches, stats)
    }

    /// Cache-or-compute the unit vector for one item.
    fn item_vector(
        &self,
        item: &Item,
        cache_hits: &AtomicUsize,
        embedded: &AtomicUsize,
    ) -> Result<Vec<f32>, EmbeddingError> {
        let normalized = embedding_text(&item.content);
        let text = self.adapter.fit(&normalized);

        match self.cache.get(text) {
            Some(vector) if vector.len() == self.adapter.dimensions() => {
                log::debug!("cache hit for {}", item.name);
                cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(vector);
            }
            Some(vector) => log::warn!(
                "cached embedding for {} has {} dimensions, expected {}; recomputing",
                item.name,
                vector.len(),
                self.adapter.dimensions()
            ),
            None => log::debug!("cache miss for {}", item.name),
        }

        let vector = self.adapter.embed(text)?;
        embedded.fetch_add(1, Ordering::Relaxed);

        if let Err(err) = self.cache.put(text, &vector) {
            log::warn!("failed to cache embedding for {}: {err}", item.name);
        }

        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::embeddings::{EmbeddingError, EmbeddingProvider};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_cosine_identical() {
        let a = l2_normalize(vec![1.0, 2.0, 3.0]).unwrap();
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_cosine_orthogonal() {
        assert!(cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]).abs() < 1e-3);
    }

    #[test]
    fn test_cosine_mismatched_length_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_l2_normalize() {
        let v = l2_normalize(vec![3.0, 4.0]).unwrap();
        assert!((l2_norm(&v) - 1.0).abs() < 1e-6);
        assert!(l2_normalize(vec![0.0, 0.0]).is_none());
        assert!(l2_normalize(vec![]).is_none());
        assert!(l2_normalize(vec![f32::NAN, 1.0]).is_none());
    }

    /// Maps each text to a fixed vector by lookup; unknown text fails.
    struct TableProvider {
        table: Vec<(&'static str, Vec<f32>)>,
        calls: Mutex<usize>,
    }

    impl EmbeddingProvider for TableProvider {
        fn name(&self) -> &str {
            "table"
        }

        fn dimensions(&self) -> usize {
            2
        }

        fn embed(&self, text: &str, _max_len: usize) -> Result<Vec<f32>, EmbeddingError> {
            *self.calls.lock().unwrap() += 1;
            self.table
                .iter()
                .find(|(key, _)| *key == text)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| EmbeddingError::EmbeddingFailed(format!("no vector for {text}")))
        }
    }

    fn item(name: &str, content: &str, priority: Priority) -> Item {
        Item {
            name: name.to_string(),
            path: PathBuf::from(format!("/items/{name}.md")),
            content: content.to_string(),
            priority,
            category: Category::Skill,
        }
    }

    fn setup() -> (Arc<TableProvider>, EmbeddingAdapter, EmbeddingCache, tempfile::TempDir) {
        let provider = Arc::new(TableProvider {
            table: vec![
                ("alpha", vec![1.0, 0.0]),
                ("beta", vec![0.0, 1.0]),
                ("gamma", vec![1.0, 1.0]),
            ],
            calls: Mutex::new(0),
        });
        let adapter = EmbeddingAdapter::with_defaults(provider.clone());
        let tmp = tempfile::tempdir().unwrap();
        let cache = EmbeddingCache::open(tmp.path(), "table").unwrap();
        (provider, adapter, cache, tmp)
    }

    #[test]
    fn test_threshold_filters_and_keeps_order() {
        let (_provider, adapter, cache, _tmp) = setup();
        let items = vec![
            item("a", "Alpha", Priority::High),
            item("b", "Beta", Priority::Low),
            item("g", "Gamma", Priority::Medium),
        ];

        let matcher = Matcher::new(&cache, &adapter);
        let (matches, stats) = matcher.match_items(&[1.0, 0.0], &items, 0.5);

        let names: Vec<_> = matches.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["a", "g"]);
        assert_eq!(stats.items, 3);
        assert_eq!(stats.matched, 2);
        assert_eq!(stats.embedded, 3);
        assert_eq!(stats.skipped, 0);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let (_provider, adapter, cache, _tmp) = setup();
        let items = vec![item("a", "alpha", Priority::High)];
        let matcher = Matcher::new(&cache, &adapter);

        let (matches, _) = matcher.match_items(&[1.0, 0.0], &items, 1.0);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].similarity, 1.0);
    }

    #[test]
    fn test_failed_item_is_skipped_not_fatal() {
        let (_provider, adapter, cache, _tmp) = setup();
        let items = vec![
            item("unknown", "delta", Priority::High),
            item("a", "alpha", Priority::High),
            item("empty", "the a of", Priority::High),
        ];
        let matcher = Matcher::new(&cache, &adapter);

        let (matches, stats) = matcher.match_items(&[1.0, 0.0], &items, 0.0);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].name, "a");
        assert_eq!(stats.skipped, 2);
    }

    #[test]
    fn test_second_run_hits_cache() {
        let (provider, adapter, cache, _tmp) = setup();
        let items = vec![item("a", "alpha", Priority::High), item("b", "beta", Priority::Low)];
        let matcher = Matcher::new(&cache, &adapter);

        let (_, first) = matcher.match_items(&[1.0, 0.0], &items, 0.0);
        assert_eq!(first.embedded, 2);
        assert_eq!(*provider.calls.lock().unwrap(), 2);

        let (matches, second) = matcher.match_items(&[1.0, 0.0], &items, 0.0);
        assert_eq!(second.cache_hits, 2);
        assert_eq!(second.embedded, 0);
        assert_eq!(*provider.calls.lock().unwrap(), 2);
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn test_cache_is_keyed_by_normalized_text() {
        let (provider, adapter, cache, _tmp) = setup();
        let items = vec![
            item("a", "---\nname: a\n---\nThe   ALPHA", Priority::High),
            item("a2", "alpha", Priority::High),
        ];
        let matcher = Matcher::new(&cache, &adapter);

        let (matches, _) = matcher.match_items(&[1.0, 0.0], &items, 0.0);
        assert_eq!(matches.len(), 2);
        assert!(cache.get("alpha").is_some());
        assert!(*provider.calls.lock().unwrap() >= 1);
    }

    #[test]
    fn test_wrong_dimension_record_is_recomputed_and_overwritten() {
        let (provider, adapter, cache, _tmp) = setup();
        cache.put("alpha", &[1.0, 0.0, 0.0]).unwrap();
        let items = vec![item("a", "alpha", Priority::High)];
        let matcher = Matcher::new(&cache, &adapter);

        let (matches, stats) = matcher.match_items(&[1.0, 0.0], &items, 0.5);
        assert_eq!(matches.len(), 1);
        assert!((matches[0].similarity - 1.0).abs() < 1e-6);
        assert_eq!(stats.cache_hits, 0);
        assert_eq!(stats.embedded, 1);
        assert_eq!(*provider.calls.lock().unwrap(), 1);

        // record now has the provider's dimensionality and is a real hit
        assert_eq!(cache.get("alpha").unwrap(), vec![1.0, 0.0]);
        let (_, second) = matcher.match_items(&[1.0, 0.0], &items, 0.5);
        assert_eq!(second.cache_hits, 1);
        assert_eq!(*provider.calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_on_item_callback() {
        let (_provider, adapter, cache, _tmp) = setup();
        let items = vec![item("a", "alpha", Priority::High), item("b", "beta", Priority::Low)];
        let count = AtomicUsize::new(0);
        let callback = || {
            count.fetch_add(1, Ordering::Relaxed);
        };
        let matcher = Matcher::new(&cache, &adapter).on_item(&callback);

        matcher.match_items(&[1.0, 0.0], &items, 0.0);
        assert_eq!(count.load(Ordering::Relaxed), 2);
    }
}

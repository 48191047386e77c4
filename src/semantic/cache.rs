//! Content-addressed on-disk cache for item embeddings.
//!
//! Layout: `<root>/embeddings/<model>/<sha256-hex>.cache`
//!
//! Each record is the raw vector as little-endian f32 values, no header.
//! The key is the SHA256 of the normalized (and fitted) text. Records are
//! never invalidated or evicted; reads that fail to decode are misses.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::semantic::preprocess::content_hash;

/// Directory under the cache root holding embedding records.
pub const EMBEDDINGS_NAMESPACE: &str = "embeddings";

/// Extension for record files.
const RECORD_EXTENSION: &str = "cache";

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to persist cache record: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// Embedding cache scoped to one model.
#[derive(Clone, Debug)]
pub struct EmbeddingCache {
    dir: PathBuf,
}

/// Size summary of a cache namespace.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: u64,
}

impl EmbeddingCache {
    /// Open (creating if needed) the cache for `model` under `cache_root`.
    pub fn open(cache_root: &Path, model: &str) -> Result<Self, CacheError> {
        let dir = Self::namespace_dir(cache_root, model);
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Directory that holds records for `model`.
    pub fn namespace_dir(cache_root: &Path, model: &str) -> PathBuf {
        cache_root
            .join(EMBEDDINGS_NAMESPACE)
            .join(model_namespace(model))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache key for already-normalized text.
    pub fn key(normalized: &str) -> String {
        content_hash(normalized)
    }

    fn record_path(&self, normalized: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", Self::key(normalized), RECORD_EXTENSION))
    }

    /// Look up the vector for `normalized`.
    ///
    /// Missing, unreadable, truncated or non-finite records are all `None`.
    pub fn get(&self, normalized: &str) -> Option<Vec<f32>> {
        let path = self.record_path(normalized);
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                log::warn!("failed to read cache record {}: {err}", path.display());
                return None;
            }
        };

        let decoded = decode_vector(&data);
        if decoded.is_none() {
            log::warn!(
                "ignoring corrupt cache record {} ({} bytes)",
                path.display(),
                data.len()
            );
        }
        decoded
    }

    /// Store the vector for `normalized`.
    ///
    /// Written to a temp file in the same directory and renamed into place,
    /// so readers see either the old record or the complete new one.
    /// Concurrent writers of the same key race harmlessly.
    pub fn put(&self, normalized: &str, embedding: &[f32]) -> Result<(), CacheError> {
        let path = self.record_path(normalized);

        let temp = NamedTempFile::new_in(&self.dir)?;
        {
            let mut writer = BufWriter::new(temp.as_file());
            writer.write_all(&encode_vector(embedding))?;
            writer.flush()?;
        }
        temp.as_file().sync_all()?;
        temp.persist(&path)?;

        Ok(())
    }

    /// Count records and bytes.
    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let mut stats = CacheStats::default();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            stats.entries += 1;
            stats.bytes += entry.metadata()?.len();
        }
        Ok(stats)
    }

    /// Delete every record for this model.
    pub fn clear(&self) -> Result<usize, CacheError> {
        let removed = self.stats()?.entries;
        std::fs::remove_dir_all(&self.dir)?;
        std::fs::create_dir_all(&self.dir)?;
        Ok(removed)
    }
}

/// Lowercased model name with anything outside `[a-z0-9.-]` mapped to `-`.
pub fn model_namespace(model: &str) -> String {
    model
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Fixed-width little-endian f32 sequence.
pub fn encode_vector(embedding: &[f32]) -> Vec<u8> {
    let mut data = Vec::with_capacity(embedding.len() * 4);
    for &value in embedding {
        data.extend_from_slice(&value.to_le_bytes());
    }
    data
}

/// Inverse of [`encode_vector`]. `None` when the byte length is not a
/// positive multiple of 4 or a value is not finite.
pub fn decode_vector(data: &[u8]) -> Option<Vec<f32>> {
    if data.is_empty() || data.len() % 4 != 0 {
        return None;
    }

    let embedding: Vec<f32> = data
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    if embedding.iter().any(|v| !v.is_finite()) {
        return None;
    }

    Some(embedding)
}

/// Remove the whole embeddings namespace, all models included.
pub fn clear_all(cache_root: &Path) -> Result<(), CacheError> {
    let dir = cache_root.join(EMBEDDINGS_NAMESPACE);
    if dir.exists() {
        std::fs::remove_dir_all(&dir)?;
    }
    Ok(())
}

/// Stats for every model namespace under `cache_root`, sorted by name.
pub fn stats_all(cache_root: &Path) -> Result<Vec<(String, CacheStats)>, CacheError> {
    let dir = cache_root.join(EMBEDDINGS_NAMESPACE);
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut out = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let cache = EmbeddingCache { dir: entry.path() };
        out.push((name, cache.stats()?));
    }
    out.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cache() -> (EmbeddingCache, tempfile::TempDir) {
        let tmp = tempfile::tempdir().expect("failed to create temp dir");
        let cache = EmbeddingCache::open(tmp.path(), "all-MiniLM-L6-v2").unwrap();
        (cache, tmp)
    }

    #[test]
    fn test_round_trip() {
        let (cache, _tmp) = test_cache();
        let embedding: Vec<f32> = vec![0.1, 0.2, 0.3, 0.4];

        cache.put("test content for caching", &embedding).unwrap();
        let loaded = cache.get("test content for caching").unwrap();
        assert_eq!(loaded, embedding);
    }

    #[test]
    fn test_round_trip_is_bit_exact() {
        let (cache, _tmp) = test_cache();
        let embedding: Vec<f32> = vec![
            -0.0,
            -1.5,
            f32::MIN_POSITIVE,
            -f32::MIN_POSITIVE,
            1e-38,
            f32::MAX,
            f32::MIN,
            0.333_333_34,
        ];

        cache.put("edge values", &embedding).unwrap();
        let loaded = cache.get("edge values").unwrap();

        let expected: Vec<u32> = embedding.iter().map(|v| v.to_bits()).collect();
        let actual: Vec<u32> = loaded.iter().map(|v| v.to_bits()).collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_miss() {
        let (cache, _tmp) = test_cache();
        assert!(cache.get("never stored").is_none());
    }

    #[test]
    fn test_corrupt_record_is_miss() {
        let (cache, _tmp) = test_cache();
        cache.put("text", &[1.0, 2.0]).unwrap();

        std::fs::write(cache.record_path("text"), [0u8, 1, 2]).unwrap();
        assert!(cache.get("text").is_none());

        std::fs::write(cache.record_path("text"), b"").unwrap();
        assert!(cache.get("text").is_none());

        std::fs::write(cache.record_path("text"), f32::NAN.to_le_bytes()).unwrap();
        assert!(cache.get("text").is_none());
    }

    #[test]
    fn test_overwrite_heals_corruption() {
        let (cache, _tmp) = test_cache();
        std::fs::write(cache.record_path("text"), [9u8; 7]).unwrap();
        assert!(cache.get("text").is_none());

        cache.put("text", &[0.5, 0.5]).unwrap();
        assert_eq!(cache.get("text").unwrap(), vec![0.5, 0.5]);
    }

    #[test]
    fn test_record_layout() {
        let (cache, tmp) = test_cache();
        cache.put("abc", &[1.0]).unwrap();

        let expected = tmp
            .path()
            .join("embeddings")
            .join("all-minilm-l6-v2")
            .join(format!("{}.cache", content_hash("abc")));
        assert!(expected.exists());
        assert_eq!(std::fs::read(expected).unwrap(), 1.0f32.to_le_bytes().to_vec());
    }

    #[test]
    fn test_models_do_not_share_records() {
        let tmp = tempfile::tempdir().unwrap();
        let a = EmbeddingCache::open(tmp.path(), "model-a").unwrap();
        let b = EmbeddingCache::open(tmp.path(), "model-b").unwrap();

        a.put("same text", &[1.0, 0.0]).unwrap();
        assert!(b.get("same text").is_none());
    }

    #[test]
    fn test_key_is_stable_and_fixed_length() {
        assert_eq!(EmbeddingCache::key("hello"), EmbeddingCache::key("hello"));
        assert_ne!(EmbeddingCache::key("hello"), EmbeddingCache::key("hello "));
        assert_eq!(EmbeddingCache::key("hello").len(), 64);
    }

    #[test]
    fn test_concurrent_writers() {
        let (cache, _tmp) = test_cache();
        std::thread::scope(|s| {
            for i in 0..8 {
                let cache = &cache;
                s.spawn(move || {
                    let text = format!("text {}", i % 4);
                    cache.put(&text, &[i as f32 % 4.0, 1.0]).unwrap();
                });
            }
        });

        for i in 0..4 {
            let loaded = cache.get(&format!("text {i}")).unwrap();
            assert_eq!(loaded, vec![i as f32, 1.0]);
        }
        assert_eq!(cache.stats().unwrap().entries, 4);
    }

    #[test]
    fn test_stats_and_clear() {
        let (cache, tmp) = test_cache();
        cache.put("one", &[1.0, 2.0]).unwrap();
        cache.put("two", &[3.0, 4.0]).unwrap();

        let stats = cache.stats().unwrap();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.bytes, 16);

        let all = stats_all(tmp.path()).unwrap();
        assert_eq!(all, vec![("all-minilm-l6-v2".to_string(), stats)]);

        assert_eq!(cache.clear().unwrap(), 2);
        assert_eq!(cache.stats().unwrap().entries, 0);
        assert!(cache.get("one").is_none());
    }

    #[test]
    fn test_clear_all() {
        let (cache, tmp) = test_cache();
        cache.put("one", &[1.0]).unwrap();
        clear_all(tmp.path()).unwrap();
        assert!(stats_all(tmp.path()).unwrap().is_empty());
    }

    #[test]
    fn test_model_namespace() {
        assert_eq!(model_namespace("all-MiniLM-L6-v2"), "all-minilm-l6-v2");
        assert_eq!(model_namespace("bge-base-en-v1.5"), "bge-base-en-v1.5");
        assert_eq!(model_namespace("weird/name here"), "weird-name-here");
    }
}

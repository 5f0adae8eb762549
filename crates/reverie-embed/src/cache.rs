use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use lru::LruCache;

use crate::provider::{EmbeddingError, EmbeddingProvider};

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub bytes: usize,
}

struct CacheState {
    entries: LruCache<String, Vec<f32>>,
    bytes_used: usize,
}

/// Wraps an `EmbeddingProvider` with a bounded, byte-budgeted LRU cache
/// keyed on the raw input text. `embed_batch` partitions into cached/
/// uncached, delegates only the misses to the inner provider, and stitches
/// results back in the caller's original order.
pub struct CachedEmbedder<P: EmbeddingProvider> {
    inner: P,
    state: Mutex<CacheState>,
    max_bytes: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<P: EmbeddingProvider> CachedEmbedder<P> {
    pub fn new(inner: P, max_entries: usize, max_bytes: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries.max(1)).unwrap();
        Self {
            inner,
            state: Mutex::new(CacheState {
                entries: LruCache::new(capacity),
                bytes_used: 0,
            }),
            max_bytes,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock().unwrap();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: state.entries.len(),
            bytes: state.bytes_used,
        }
    }

    fn get_cached(&self, key: &str) -> Option<Vec<f32>> {
        let mut state = self.state.lock().unwrap();
        state.entries.get(key).cloned()
    }

    fn insert_cached(&self, key: String, value: Vec<f32>) {
        let mut state = self.state.lock().unwrap();
        let entry_bytes = value.len() * std::mem::size_of::<f32>();

        while state.bytes_used + entry_bytes > self.max_bytes && !state.entries.is_empty() {
            if let Some((_, evicted)) = state.entries.pop_lru() {
                state.bytes_used = state
                    .bytes_used
                    .saturating_sub(evicted.len() * std::mem::size_of::<f32>());
            } else {
                break;
            }
        }

        state.bytes_used += entry_bytes;
        state.entries.put(key, value);
    }
}

#[async_trait]
impl<P: EmbeddingProvider> EmbeddingProvider for CachedEmbedder<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if let Some(cached) = self.get_cached(text) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(cached);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let embedding = self.inner.embed(text).await?;
        self.insert_cached(text.to_string(), embedding.clone());
        Ok(embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut miss_indices = Vec::new();
        let mut miss_texts = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            if let Some(cached) = self.get_cached(text) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                results[i] = Some(cached);
            } else {
                self.misses.fetch_add(1, Ordering::Relaxed);
                miss_indices.push(i);
                miss_texts.push(text.clone());
            }
        }

        if !miss_texts.is_empty() {
            let embedded = self.inner.embed_batch(&miss_texts).await?;
            for ((idx, text), embedding) in miss_indices
                .into_iter()
                .zip(miss_texts.into_iter())
                .zip(embedded.into_iter())
            {
                self.insert_cached(text, embedding.clone());
                results[idx] = Some(embedding);
            }
        }

        Ok(results.into_iter().map(|r| r.unwrap()).collect())
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tfidf::TfIdfEmbedder;

    #[tokio::test]
    async fn repeated_embed_hits_cache() {
        let cached = CachedEmbedder::new(TfIdfEmbedder::new(32), 10, 1024 * 1024);
        cached.embed("hello world").await.unwrap();
        cached.embed("hello world").await.unwrap();

        let stats = cached.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn batch_preserves_order_with_mixed_hits() {
        let cached = CachedEmbedder::new(TfIdfEmbedder::new(32), 10, 1024 * 1024);
        let warm = cached.embed("alpha").await.unwrap();

        let batch = cached
            .embed_batch(&["alpha".to_string(), "beta".to_string()])
            .await
            .unwrap();

        assert_eq!(batch[0], warm);
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn entry_count_eviction_respects_capacity() {
        let cached = CachedEmbedder::new(TfIdfEmbedder::new(16), 2, 1024 * 1024);
        cached.embed("one").await.unwrap();
        cached.embed("two").await.unwrap();
        cached.embed("three").await.unwrap();

        assert_eq!(cached.stats().entries, 2);
    }
}

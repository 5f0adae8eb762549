use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::provider::{EmbeddingError, EmbeddingProvider};
use crate::tfidf::TfIdfEmbedder;

/// Wraps a primary embedder with the local TF-IDF embedder as a safety net.
/// After `failure_threshold` consecutive primary failures, switches to the
/// fallback for `cooldown` before probing the primary again. Reports
/// whichever embedder is currently active as its own dimension, since
/// callers compare dimensions across stored embeddings.
pub struct FallbackEmbedder<P: EmbeddingProvider> {
    primary: P,
    fallback: TfIdfEmbedder,
    failure_threshold: u32,
    cooldown: Duration,
    consecutive_failures: AtomicU32,
    tripped_at_millis: AtomicU64,
    started_at: Instant,
    using_fallback: Mutex<bool>,
}

impl<P: EmbeddingProvider> FallbackEmbedder<P> {
    pub fn new(primary: P, failure_threshold: u32, cooldown: Duration) -> Self {
        let dimension = primary.dimension();
        Self {
            primary,
            fallback: TfIdfEmbedder::new(dimension),
            failure_threshold,
            cooldown,
            consecutive_failures: AtomicU32::new(0),
            tripped_at_millis: AtomicU64::new(0),
            started_at: Instant::now(),
            using_fallback: Mutex::new(false),
        }
    }

    fn elapsed_millis(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    async fn should_try_primary(&self) -> bool {
        let using_fallback = *self.using_fallback.lock().await;
        if !using_fallback {
            return true;
        }
        let tripped_at = self.tripped_at_millis.load(Ordering::Relaxed);
        self.elapsed_millis().saturating_sub(tripped_at) >= self.cooldown.as_millis() as u64
    }

    async fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        let mut using_fallback = self.using_fallback.lock().await;
        *using_fallback = false;
    }

    async fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= self.failure_threshold {
            let mut using_fallback = self.using_fallback.lock().await;
            if !*using_fallback {
                *using_fallback = true;
                self.tripped_at_millis
                    .store(self.elapsed_millis(), Ordering::Relaxed);
            }
        }
    }

    pub async fn active_provider_name(&self) -> &'static str {
        if *self.using_fallback.lock().await {
            "local-tfidf"
        } else {
            "primary"
        }
    }
}

#[async_trait]
impl<P: EmbeddingProvider> EmbeddingProvider for FallbackEmbedder<P> {
    fn name(&self) -> &str {
        self.primary.name()
    }

    fn dimension(&self) -> usize {
        self.primary.dimension()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if self.should_try_primary().await {
            match self.primary.embed(text).await {
                Ok(v) => {
                    self.record_success().await;
                    return Ok(v);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "primary embedder failed, falling back");
                    self.record_failure().await;
                }
            }
        }
        self.fallback.embed(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if self.should_try_primary().await {
            match self.primary.embed_batch(texts).await {
                Ok(v) => {
                    self.record_success().await;
                    return Ok(v);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "primary embedder batch failed, falling back");
                    self.record_failure().await;
                }
            }
        }
        self.fallback.embed_batch(texts).await
    }

    fn is_available(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysFails {
        dimension: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for AlwaysFails {
        fn name(&self) -> &str {
            "always-fails"
        }
        fn dimension(&self) -> usize {
            self.dimension
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Err(EmbeddingError::Unavailable("simulated outage".to_string()))
        }
    }

    #[tokio::test]
    async fn switches_to_fallback_after_threshold_failures() {
        let wrapper = FallbackEmbedder::new(AlwaysFails { dimension: 32 }, 3, Duration::from_secs(300));

        for _ in 0..2 {
            assert!(wrapper.embed("hello").await.is_ok());
            assert_eq!(wrapper.active_provider_name().await, "primary");
        }

        wrapper.embed("hello").await.unwrap();
        assert_eq!(wrapper.active_provider_name().await, "local-tfidf");
    }

    #[tokio::test]
    async fn stays_on_fallback_within_cooldown() {
        let wrapper = FallbackEmbedder::new(AlwaysFails { dimension: 16 }, 1, Duration::from_secs(300));
        wrapper.embed("trip it").await.unwrap();
        assert_eq!(wrapper.active_provider_name().await, "local-tfidf");

        wrapper.embed("still down").await.unwrap();
        assert_eq!(wrapper.active_provider_name().await, "local-tfidf");
    }
}

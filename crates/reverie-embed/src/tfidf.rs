use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::provider::{EmbeddingError, EmbeddingProvider};

/// Local, dependency-free fallback embedder. Hashes character bigrams into
/// a fixed-width vector and weights each slot by an incrementally tracked
/// document frequency, then L2-normalizes. No model download, no network —
/// this is what keeps the system usable when the configured remote
/// embedder is down.
pub struct TfIdfEmbedder {
    dimension: usize,
    document_frequency: Mutex<HashMap<u64, u32>>,
    documents_seen: Mutex<u32>,
}

impl TfIdfEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            document_frequency: Mutex::new(HashMap::new()),
            documents_seen: Mutex::new(0),
        }
    }

    fn bigram_hash(a: char, b: char) -> u64 {
        let mut h = 1469598103934665603u64; // FNV-1a offset basis
        for c in [a, b] {
            let mut buf = [0u8; 4];
            let s = c.encode_utf8(&mut buf);
            for byte in s.as_bytes() {
                h ^= *byte as u64;
                h = h.wrapping_mul(1099511628211);
            }
        }
        h
    }

    fn bigrams(text: &str) -> Vec<u64> {
        let chars: Vec<char> = text.to_lowercase().chars().collect();
        if chars.len() < 2 {
            return chars.iter().map(|c| Self::bigram_hash(*c, '\0')).collect();
        }
        chars
            .windows(2)
            .map(|w| Self::bigram_hash(w[0], w[1]))
            .collect()
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let bigrams = Self::bigrams(text);
        let mut term_freq: HashMap<u64, u32> = HashMap::new();
        for h in &bigrams {
            *term_freq.entry(*h).or_insert(0) += 1;
        }

        {
            let mut doc_freq = self.document_frequency.lock().unwrap();
            let mut seen = self.documents_seen.lock().unwrap();
            *seen += 1;
            for h in term_freq.keys() {
                *doc_freq.entry(*h).or_insert(0) += 1;
            }
        }

        let doc_freq = self.document_frequency.lock().unwrap();
        let seen = *self.documents_seen.lock().unwrap() as f32;

        let mut vec = vec![0.0f32; self.dimension];
        for (h, tf) in &term_freq {
            let slot = (*h as usize) % self.dimension;
            let df = *doc_freq.get(h).unwrap_or(&1) as f32;
            let idf = (seen / df).ln().max(0.0) + 1.0;
            vec[slot] += (*tf as f32) * idf;
        }

        let magnitude = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for x in &mut vec {
                *x /= magnitude;
            }
        }
        vec
    }
}

#[async_trait]
impl EmbeddingProvider for TfIdfEmbedder {
    fn name(&self) -> &str {
        "local-tfidf"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("empty text".to_string()));
        }
        Ok(self.vectorize(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embeddings_are_l2_normalized() {
        let embedder = TfIdfEmbedder::new(64);
        let v = embedder.embed("the quick brown fox").await.unwrap();
        let magnitude = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-4 || magnitude == 0.0);
    }

    #[tokio::test]
    async fn similar_text_yields_similar_vectors() {
        let embedder = TfIdfEmbedder::new(128);
        let a = embedder.embed("likes dark roast coffee").await.unwrap();
        let b = embedder.embed("likes dark roast espresso").await.unwrap();
        let c = embedder.embed("enjoys hiking in the mountains").await.unwrap();

        let sim_ab = crate::provider::cosine_similarity(&a, &b);
        let sim_ac = crate::provider::cosine_similarity(&a, &c);
        assert!(sim_ab > sim_ac);
    }

    #[tokio::test]
    async fn empty_text_is_rejected() {
        let embedder = TfIdfEmbedder::new(32);
        assert!(embedder.embed("   ").await.is_err());
    }
}

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::provider::{EmbeddingError, EmbeddingProvider};

/// Calls an OpenAI-compatible `/embeddings` endpoint. This is the "primary"
/// embedder most deployments wrap in a `FallbackEmbedder` so a network
/// hiccup degrades to the local TF-IDF embedder instead of failing writes.
pub struct RemoteEmbedder {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    dimension: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

impl RemoteEmbedder {
    pub fn new(endpoint: String, api_key: Option<String>, model: String, dimension: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
            model,
            dimension,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbedder {
    fn name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let vectors = self.embed_batch(std::slice::from_ref(&text.to_string())).await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Request("empty response from remote embedder".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self.client.post(&self.endpoint).json(&EmbeddingRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EmbeddingError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EmbeddingError::Unavailable(format!(
                "remote embedder returned status {}",
                response.status()
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Request(e.to_string()))?;

        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

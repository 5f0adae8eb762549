use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use reverie_core::llm::{ChatRequest, LlmProvider, Message, Role};
use reverie_core::types::{SessionMessage, SessionSummary};
use reverie_embed::EmbeddingProvider;
use reverie_storage::StorageEngine;
use serde::Deserialize;
use tracing::instrument;

use crate::error::Result;

const MIN_MESSAGES: u64 = 4;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    summary: String,
    #[serde(default)]
    topics: Vec<String>,
}

/// Produces an at-most-once session summary once a session has accumulated
/// enough messages to be worth summarizing.
pub struct SessionSummarizer {
    llm: Arc<dyn LlmProvider>,
    model: String,
    embedder: Arc<dyn EmbeddingProvider>,
    storage: Arc<StorageEngine>,
}

impl SessionSummarizer {
    pub fn new(llm: Arc<dyn LlmProvider>, model: String, embedder: Arc<dyn EmbeddingProvider>, storage: Arc<StorageEngine>) -> Self {
        Self {
            llm,
            model,
            embedder,
            storage,
        }
    }

    /// Returns `true` if a summary was produced, `false` if the session was
    /// skipped (too few messages, or already summarized) without any LLM
    /// call being made.
    #[instrument(skip(self))]
    pub async fn summarize_if_eligible(&self, user_id: &str, session_id: &str) -> Result<bool> {
        if self.storage.has_session_summary(session_id)? {
            return Ok(false);
        }

        let messages = self.storage.list_session_messages(session_id)?;
        if (messages.len() as u64) < MIN_MESSAGES {
            return Ok(false);
        }

        let Some(parsed) = self.request_summary(&messages).await else {
            return Ok(false);
        };

        let embedding = self.embedder.embed(&parsed.summary).await.ok();
        let duration_ms = messages.last().map(|m| m.created_at).unwrap_or(0) - messages.first().map(|m| m.created_at).unwrap_or(0);

        self.storage.insert_session_summary(&SessionSummary {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            summary: parsed.summary,
            topics: parsed.topics,
            message_count: messages.len() as u32,
            duration_ms,
            embedding,
            created_at: now_ms(),
        })?;

        Ok(true)
    }

    async fn request_summary(&self, messages: &[SessionMessage]) -> Option<SummaryResponse> {
        let transcript: String = messages.iter().map(|m| format!("{}: {}", m.role, m.content)).collect::<Vec<_>>().join("\n");

        let request = ChatRequest {
            model: self.model.clone(),
            system: "Summarize this conversation in 1-3 sentences and list the main topics. \
                     Respond with JSON: {\"summary\": string, \"topics\": [string]}."
                .to_string(),
            messages: vec![Message {
                role: Role::User,
                content: transcript,
            }],
            max_tokens: 512,
            expect_json: true,
        };

        let response = self.llm.send(&request).await.ok()?;
        serde_json::from_str(&response.content).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reverie_core::ids::Id;
    use reverie_core::llm::ProviderError;
    use reverie_core::types::{MessageRole, Session};
    use reverie_embed::TfIdfEmbedder;
    use std::sync::Mutex as StdMutex;

    struct StubLlm {
        response: StdMutex<String>,
        calls: StdMutex<u32>,
    }

    #[async_trait::async_trait]
    impl LlmProvider for StubLlm {
        fn name(&self) -> &str {
            "stub"
        }

        async fn send(&self, _req: &ChatRequest) -> std::result::Result<reverie_core::llm::ChatResponse, ProviderError> {
            *self.calls.lock().unwrap() += 1;
            Ok(reverie_core::llm::ChatResponse {
                content: self.response.lock().unwrap().clone(),
                tokens_in: 0,
                tokens_out: 0,
            })
        }
    }

    fn seeded_session(storage: &StorageEngine, message_count: usize) -> String {
        let now = 1_700_000_000_000;
        let session_id = Id::new().to_string();
        storage
            .insert_session(&Session {
                id: session_id.clone(),
                user_id: "u1".to_string(),
                source: "telegram".to_string(),
                created_at: now,
            })
            .unwrap();
        for i in 0..message_count {
            storage
                .append_session_message(&SessionMessage {
                    id: Id::new().to_string(),
                    session_id: session_id.clone(),
                    role: if i % 2 == 0 { MessageRole::User } else { MessageRole::Assistant },
                    content: format!("message {i}"),
                    created_at: now + i as i64 * 1000,
                })
                .unwrap();
        }
        session_id
    }

    #[tokio::test]
    async fn below_min_messages_skips_without_llm_call() {
        let storage = Arc::new(StorageEngine::open_in_memory().unwrap());
        let session_id = seeded_session(&storage, 2);
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(TfIdfEmbedder::new(64));
        let llm = Arc::new(StubLlm {
            response: StdMutex::new(String::new()),
            calls: StdMutex::new(0),
        });
        let summarizer = SessionSummarizer::new(llm.clone(), "test-model".to_string(), embedder, storage);

        let produced = summarizer.summarize_if_eligible("u1", &session_id).await.unwrap();
        assert!(!produced);
        assert_eq!(*llm.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn eligible_session_is_summarized_exactly_once() {
        let storage = Arc::new(StorageEngine::open_in_memory().unwrap());
        let session_id = seeded_session(&storage, 6);
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(TfIdfEmbedder::new(64));
        let llm = Arc::new(StubLlm {
            response: StdMutex::new(r#"{"summary":"discussed weekend plans","topics":["plans"]}"#.to_string()),
            calls: StdMutex::new(0),
        });
        let summarizer = SessionSummarizer::new(llm.clone(), "test-model".to_string(), embedder, storage.clone());

        let produced = summarizer.summarize_if_eligible("u1", &session_id).await.unwrap();
        assert!(produced);
        assert_eq!(*llm.calls.lock().unwrap(), 1);

        let produced_again = summarizer.summarize_if_eligible("u1", &session_id).await.unwrap();
        assert!(!produced_again);
        assert_eq!(*llm.calls.lock().unwrap(), 1, "second call must not hit the LLM again");
    }
}

use reverie_core::llm::{ChatRequest, LlmProvider, Message, Role};
use serde::Deserialize;

const MAX_CANDIDATE_CHARS: usize = 400;

#[derive(Debug, Deserialize)]
struct RerankEntry {
    index: usize,
    score: f64,
}

/// Calls the reranker LLM with the query and truncated candidate texts,
/// returning `{index, score}` pairs in response order. Candidate text is
/// truncated to keep the prompt bounded regardless of memory content length.
pub async fn rerank(
    llm: &dyn LlmProvider,
    model: &str,
    query: &str,
    candidates: &[String],
) -> Option<Vec<(usize, f64)>> {
    let listed: String = candidates
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let truncated: String = text.chars().take(MAX_CANDIDATE_CHARS).collect();
            format!("{i}. {truncated}")
        })
        .collect::<Vec<_>>()
        .join("\n");

    let prompt = format!(
        "Query: {query}\n\nCandidates:\n{listed}\n\n\
         Score each candidate's relevance to the query from 0.0 to 1.0. \
         Respond with a JSON array of {{\"index\": <int>, \"score\": <float>}}."
    );

    let request = ChatRequest {
        model: model.to_string(),
        system: "You are a relevance reranker. Respond with JSON only.".to_string(),
        messages: vec![Message {
            role: Role::User,
            content: prompt,
        }],
        max_tokens: 1024,
        expect_json: true,
    };

    let response = llm.send(&request).await.ok()?;
    let entries: Vec<RerankEntry> = serde_json::from_str(&response.content).ok()?;
    Some(entries.into_iter().map(|e| (e.index, e.score)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reverie_core::llm::{ChatResponse, ProviderError};

    struct StubLlm {
        reply: String,
    }

    #[async_trait]
    impl LlmProvider for StubLlm {
        fn name(&self) -> &str {
            "stub"
        }
        async fn send(&self, _req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            Ok(ChatResponse {
                content: self.reply.clone(),
                tokens_in: 0,
                tokens_out: 0,
            })
        }
    }

    #[tokio::test]
    async fn parses_index_score_pairs() {
        let llm = StubLlm {
            reply: r#"[{"index":1,"score":0.9},{"index":0,"score":0.1}]"#.to_string(),
        };
        let candidates = vec!["a".to_string(), "b".to_string()];
        let result = rerank(&llm, "test-model", "q", &candidates).await.unwrap();
        assert_eq!(result, vec![(1, 0.9), (0, 0.1)]);
    }

    #[tokio::test]
    async fn malformed_json_returns_none() {
        let llm = StubLlm {
            reply: "not json".to_string(),
        };
        let candidates = vec!["a".to_string()];
        assert!(rerank(&llm, "test-model", "q", &candidates).await.is_none());
    }
}

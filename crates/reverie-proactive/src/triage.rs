//! Single LLM call that turns a batch of `GapSignal`s into nudges worth
//! enqueueing, or discards the batch entirely when the call fails or the
//! response doesn't parse — the evaluator leans toward under-nudging.

use reverie_core::llm::{ChatRequest, LlmProvider, Message, Role};
use serde::Deserialize;
use tracing::instrument;

use crate::heuristics::GapSignal;

const TRIAGE_SYSTEM_PROMPT: &str = "You are triaging behavioral gap signals for a personal assistant. \
Given a numbered list of signals, decide which deserve a proactive nudge to the user and which should \
be ignored as noise. For each signal worth acting on, write a short, warm, specific message. Respond \
with JSON: {\"items\": [{\"index\": number, \"action\": \"nudge\" | \"ignore\", \"message\": string, \
\"urgency\": \"low\" | \"medium\" | \"high\"}]}. Omit signals you decide to ignore, or include them \
with action \"ignore\".";

#[derive(Debug, Clone, Deserialize)]
pub struct TriageItem {
    pub index: usize,
    pub action: String,
    pub message: String,
    pub urgency: String,
}

#[derive(Debug, Deserialize)]
struct TriageResponse {
    items: Vec<TriageItem>,
}

/// A triaged nudge, still carrying the signal it came from so the caller
/// can attach `gapType`/`source` context when enqueueing.
pub struct TriagedNudge {
    pub signal: GapSignal,
    pub message: String,
    pub urgency: String,
}

fn render_signals(signals: &[GapSignal]) -> String {
    signals
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. [{}/{}] {}", i, s.gap_type, s.severity, s.description))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Runs the triage call and maps the LLM's decisions back onto the signals
/// that produced them. Returns an empty vec (not an error) on any failure
/// to parse or reach the provider.
#[instrument(skip(llm, signals))]
pub async fn triage_signals(llm: &dyn LlmProvider, model: &str, signals: &[GapSignal]) -> Vec<TriagedNudge> {
    if signals.is_empty() {
        return Vec::new();
    }

    let request = ChatRequest {
        model: model.to_string(),
        system: TRIAGE_SYSTEM_PROMPT.to_string(),
        messages: vec![Message {
            role: Role::User,
            content: render_signals(signals),
        }],
        max_tokens: 1024,
        expect_json: true,
    };

    let Ok(response) = llm.send(&request).await else {
        return Vec::new();
    };
    let Ok(parsed) = serde_json::from_str::<TriageResponse>(&response.content) else {
        return Vec::new();
    };

    parsed
        .items
        .into_iter()
        .filter(|item| item.action == "nudge")
        .filter_map(|item| {
            let signal = signals.get(item.index)?.clone();
            Some(TriagedNudge {
                signal,
                message: item.message,
                urgency: item.urgency,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reverie_core::llm::{ChatResponse, ProviderError};
    use std::collections::HashMap;

    struct StubLlm {
        response: String,
    }

    #[async_trait]
    impl LlmProvider for StubLlm {
        fn name(&self) -> &str {
            "stub"
        }
        async fn send(&self, _req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            Ok(ChatResponse {
                content: self.response.clone(),
                tokens_in: 10,
                tokens_out: 10,
            })
        }
    }

    fn signal() -> GapSignal {
        GapSignal {
            gap_type: crate::heuristics::GapType::StaleGoal,
            severity: crate::heuristics::Severity::Medium,
            description: "no activity on \"launch\" in 10 days".to_string(),
            context: HashMap::new(),
            source_id: "u1:launch".to_string(),
        }
    }

    #[tokio::test]
    async fn nudge_decision_is_mapped_back_to_its_signal() {
        let llm = StubLlm {
            response: r#"{"items": [{"index": 0, "action": "nudge", "message": "still working on launch?", "urgency": "medium"}]}"#.to_string(),
        };
        let signals = vec![signal()];
        let nudges = triage_signals(&llm, "test-model", &signals).await;
        assert_eq!(nudges.len(), 1);
        assert_eq!(nudges[0].message, "still working on launch?");
        assert_eq!(nudges[0].signal.source_id, "u1:launch");
    }

    #[tokio::test]
    async fn ignored_decision_produces_no_nudge() {
        let llm = StubLlm {
            response: r#"{"items": [{"index": 0, "action": "ignore", "message": "", "urgency": "low"}]}"#.to_string(),
        };
        let nudges = triage_signals(&llm, "test-model", &[signal()]).await;
        assert!(nudges.is_empty());
    }

    #[tokio::test]
    async fn unparseable_response_discards_the_batch() {
        let llm = StubLlm { response: "not json".to_string() };
        let nudges = triage_signals(&llm, "test-model", &[signal()]).await;
        assert!(nudges.is_empty());
    }

    #[tokio::test]
    async fn empty_signals_skips_the_call() {
        let llm = StubLlm { response: "irrelevant".to_string() };
        let nudges = triage_signals(&llm, "test-model", &[]).await;
        assert!(nudges.is_empty());
    }
}

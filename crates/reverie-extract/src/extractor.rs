use std::sync::Arc;

use reverie_core::llm::{ChatRequest, LlmProvider, Message, Role};
use reverie_core::types::{MemoryCategory, RelationType};
use reverie_embed::{cosine_similarity, EmbeddingProvider};
use reverie_memory::{now_ms, AddMemoryInput, MemoryManager};
use reverie_relations::RelationGraph;
use serde::Deserialize;
use tracing::{instrument, warn};

use crate::error::Result;

const REINFORCE_THRESHOLD: f64 = 0.95;
const UPDATE_THRESHOLD: f64 = 0.85;

#[derive(Debug, Deserialize)]
struct ExtractedFact {
    content: String,
    #[allow(dead_code)]
    subject: String,
    category: MemoryCategory,
    confidence: f64,
    #[allow(dead_code)]
    action: String,
}

#[derive(Debug, Deserialize)]
struct ExtractionResponse {
    facts: Vec<ExtractedFact>,
    #[serde(default)]
    #[allow(dead_code)]
    proactive_triggers: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactOutcome {
    Reinforced,
    UpdatedWithContradiction,
    Inserted,
}

/// Turns a user turn into candidate facts and writes each one into the
/// memory store, deduplicating and tracking contradictions along the way.
pub struct FactExtractor {
    llm: Arc<dyn LlmProvider>,
    model: String,
    embedder: Arc<dyn EmbeddingProvider>,
    memory: Arc<MemoryManager>,
    graph: RelationGraph,
}

impl FactExtractor {
    pub fn new(llm: Arc<dyn LlmProvider>, model: String, embedder: Arc<dyn EmbeddingProvider>, memory: Arc<MemoryManager>) -> Self {
        let graph = RelationGraph::new(memory.storage().clone());
        Self {
            llm,
            model,
            embedder,
            memory,
            graph,
        }
    }

    #[instrument(skip(self, turn_text))]
    pub async fn extract_and_store(&self, user_id: &str, turn_text: &str) -> Result<Vec<FactOutcome>> {
        let facts = match self.extract(turn_text).await {
            Some(facts) => facts,
            None => return Ok(Vec::new()),
        };

        let mut outcomes = Vec::new();
        for fact in facts {
            match self.store_fact(user_id, fact).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!(user_id, error = %e, "failed to store extracted fact"),
            }
        }
        Ok(outcomes)
    }

    async fn extract(&self, turn_text: &str) -> Option<Vec<ExtractedFact>> {
        let request = ChatRequest {
            model: self.model.clone(),
            system: "You extract discrete, verifiable facts about the user from their message. \
                     Respond with JSON: {\"facts\": [{\"content\": string, \"subject\": string, \
                     \"category\": \"preference\"|\"fact\"|\"event\"|\"relationship\"|\"insight\", \
                     \"confidence\": float, \"action\": \"fact\"}], \"proactive_triggers\": []}. \
                     If there is nothing worth remembering, return an empty facts array."
                .to_string(),
            messages: vec![Message {
                role: Role::User,
                content: turn_text.to_string(),
            }],
            max_tokens: 1024,
            expect_json: true,
        };

        let response = self.llm.send(&request).await.ok()?;
        let parsed: ExtractionResponse = serde_json::from_str(&response.content).ok()?;
        Some(parsed.facts)
    }

    async fn store_fact(&self, user_id: &str, fact: ExtractedFact) -> Result<FactOutcome> {
        let embedding = self.embedder.embed(&fact.content).await?;

        // The top hybrid-search hit, re-scored by raw embedding cosine
        // similarity: the 0.95/0.85 thresholds below are about semantic
        // closeness, not the weighted keyword+semantic+prominence score
        // `MemoryManager::search` otherwise returns.
        let top = self
            .memory
            .search(user_id, &fact.content, Some(embedding.clone()), Some(1))
            .await?
            .into_iter()
            .next()
            .and_then(|(entry, _)| {
                let similarity = entry.embedding.as_ref().map(|e| cosine_similarity(&embedding, e)).unwrap_or(0.0);
                Some((entry, similarity as f64))
            });

        if let Some((existing, similarity)) = top {
            if similarity >= REINFORCE_THRESHOLD {
                self.memory.reinforce(&existing.id)?;
                return Ok(FactOutcome::Reinforced);
            }

            if similarity >= UPDATE_THRESHOLD && normalized_value(&existing.content) != normalized_value(&fact.content) {
                let inserted = self
                    .memory
                    .add(
                        user_id,
                        AddMemoryInput {
                            content: fact.content,
                            category: fact.category,
                            confidence: Some(fact.confidence),
                            embedding: Some(embedding),
                            detect_relations: Some(false),
                            ..Default::default()
                        },
                    )
                    .await?;

                let now = now_ms();
                // UPDATES points from the newer memory to the older one it
                // supersedes; both rows stay is_latest so search and the
                // contradiction record each still surface the predecessor.
                if let Err(e) = self.graph.add_relation(&inserted.id, &existing.id, RelationType::Updates, similarity, now) {
                    warn!(memory_id = %inserted.id, error = %e, "failed to record UPDATES relation");
                }
                if let Err(e) = self.memory.storage().record_contradiction(&inserted.id, &existing.id, now) {
                    warn!(memory_id = %inserted.id, error = %e, "failed to record contradiction on new memory");
                }
                if let Err(e) = self.memory.storage().record_contradiction(&existing.id, &inserted.id, now) {
                    warn!(memory_id = %existing.id, error = %e, "failed to record contradiction on superseded memory");
                }

                return Ok(FactOutcome::UpdatedWithContradiction);
            }
        }

        self.memory
            .add(
                user_id,
                AddMemoryInput {
                    content: fact.content,
                    category: fact.category,
                    confidence: Some(fact.confidence),
                    embedding: Some(embedding),
                    detect_relations: Some(false),
                    ..Default::default()
                },
            )
            .await?;

        Ok(FactOutcome::Inserted)
    }
}

/// Coarse normalization for the "conflicting value" check: lowercased,
/// trimmed. Good enough to tell "Microsoft" from "Google" without
/// mistaking punctuation or casing differences for a contradiction.
fn normalized_value(content: &str) -> String {
    content.trim().to_lowercase()
}

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reverie_core::config::RelationsConfig;
use reverie_core::llm::LlmProvider;
use reverie_core::types::MemoryEntry;
use reverie_embed::EmbeddingProvider;
use reverie_memory::RelationDetector;
use reverie_storage::StorageEngine;
use tracing::{instrument, warn};

use crate::classify::{classify_candidates, prefilter_candidates, Candidate, Classification};
use crate::error::Result;
use crate::graph::RelationGraph;

const CANDIDATE_LIMIT: usize = 30;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Runs the full relation-detection pipeline for a new memory: candidate
/// fetch, embedding prefilter, LLM/regex classification, and graph writes.
pub struct RelationsManager {
    storage: Arc<StorageEngine>,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Option<Arc<dyn LlmProvider>>,
    llm_model: String,
    graph: RelationGraph,
    config: RelationsConfig,
}

impl RelationsManager {
    pub fn new(
        storage: Arc<StorageEngine>,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Option<Arc<dyn LlmProvider>>,
        llm_model: String,
        config: RelationsConfig,
    ) -> Self {
        let graph = RelationGraph::new(storage.clone());
        Self {
            storage,
            embedder,
            llm,
            llm_model,
            graph,
            config,
        }
    }

    pub fn graph(&self) -> &RelationGraph {
        &self.graph
    }

    #[instrument(skip(self, new_memory))]
    pub async fn detect_relations(&self, new_memory: &MemoryEntry) -> Result<usize> {
        let Some(new_embedding) = new_memory.embedding.clone() else {
            return Ok(0);
        };

        let mut candidates: Vec<MemoryEntry> = self
            .storage
            .list_latest_memories(&new_memory.user_id, Some(new_memory.category))?
            .into_iter()
            .filter(|m| m.id != new_memory.id)
            .take(CANDIDATE_LIMIT)
            .collect();

        let missing: Vec<(usize, String)> = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.embedding.is_none())
            .map(|(i, c)| (i, c.content.clone()))
            .collect();

        if !missing.is_empty() {
            let texts: Vec<String> = missing.iter().map(|(_, t)| t.clone()).collect();
            if let Ok(embeddings) = self.embedder.embed_batch(&texts).await {
                for ((idx, _), embedding) in missing.into_iter().zip(embeddings.into_iter()) {
                    if let Err(e) = self.storage.set_memory_embedding(&candidates[idx].id, &embedding, self.embedder.name()) {
                        warn!(memory_id = %candidates[idx].id, error = %e, "failed to persist backfilled embedding");
                    }
                    candidates[idx].embedding = Some(embedding);
                }
            }
        }

        let prefiltered: Vec<Candidate> = prefilter_candidates(&new_embedding, candidates);
        let classified = classify_candidates(
            self.llm.as_deref(),
            &self.llm_model,
            &new_memory.content,
            &prefiltered,
            self.config.max_relations_per_memory,
        )
        .await;

        let now = now_ms();
        let mut written = 0;
        for relation in &classified {
            let result = match relation.classification {
                Classification::Updates => {
                    // UPDATES points from the newer memory to the older one
                    // it supersedes; both rows stay is_latest, so search and
                    // get_update_history cooperate rather than the edge
                    // hiding the predecessor by itself.
                    let added = self.graph.add_relation(
                        &new_memory.id,
                        &relation.target_id,
                        reverie_core::types::RelationType::Updates,
                        relation.confidence,
                        now,
                    );
                    if added.is_ok() {
                        if let Err(e) = self.storage.record_contradiction(&new_memory.id, &relation.target_id, now) {
                            warn!(memory_id = %new_memory.id, error = %e, "failed to record contradiction on new memory");
                        }
                        if let Err(e) = self.storage.record_contradiction(&relation.target_id, &new_memory.id, now) {
                            warn!(memory_id = %relation.target_id, error = %e, "failed to record contradiction on updated memory");
                        }
                    }
                    added
                }
                Classification::Extends => self.graph.add_relation(
                    &new_memory.id,
                    &relation.target_id,
                    reverie_core::types::RelationType::Extends,
                    relation.confidence,
                    now,
                ),
                Classification::Derives => self.graph.add_relation(
                    &new_memory.id,
                    &relation.target_id,
                    reverie_core::types::RelationType::Derives,
                    relation.confidence,
                    now,
                ),
                Classification::New => continue,
            };
            match result {
                Ok(_) => written += 1,
                Err(e) => warn!(target_id = %relation.target_id, error = %e, "failed to write relation"),
            }
        }

        Ok(written)
    }
}

#[async_trait]
impl RelationDetector for RelationsManager {
    async fn detect_and_link(&self, memory: &MemoryEntry) -> std::result::Result<(), String> {
        self.detect_relations(memory).await.map(|_| ()).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reverie_core::ids::Id;
    use reverie_core::types::{MemoryCategory, MemoryType};
    use reverie_embed::TfIdfEmbedder;
    use std::collections::HashMap;

    fn memory(id: &str, user: &str, content: &str, embedding: Vec<f32>, now: i64) -> MemoryEntry {
        MemoryEntry {
            id: id.to_string(),
            user_id: user.to_string(),
            content: content.to_string(),
            category: MemoryCategory::Fact,
            memory_type: MemoryType::Regular,
            importance: 5,
            confidence: 0.8,
            prominence: 1.0,
            access_count: 0,
            times_confirmed: 1,
            is_latest: true,
            source: "chat".to_string(),
            source_chunk: None,
            learned_from: None,
            document_date: now,
            event_date: None,
            last_accessed: None,
            created_at: now,
            updated_at: now,
            embedding: Some(embedding),
            embedding_model: Some("local-tfidf".to_string()),
            contradiction_ids: vec![],
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn update_classification_keeps_both_rows_latest() {
        let storage = Arc::new(StorageEngine::open_in_memory().unwrap());
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(TfIdfEmbedder::new(64));
        let now = 1_700_000_000_000;

        let old_embedding = embedder.embed("works at Microsoft").await.unwrap();
        let old_id = Id::new().to_string();
        storage
            .insert_memory(&memory(&old_id, "u1", "works at Microsoft", old_embedding.clone(), now))
            .unwrap();

        // Reuse the old embedding so the prefilter/regex stages see a
        // high-similarity pair regardless of the embedder's exact math.
        let new_embedding = old_embedding.clone();
        let new_id = Id::new().to_string();
        let new_memory = memory(&new_id, "u1", "works at Google", new_embedding, now);
        storage.insert_memory(&new_memory).unwrap();

        let manager = RelationsManager::new(
            storage.clone(),
            embedder,
            None,
            "test-model".to_string(),
            RelationsConfig::default(),
        );

        manager.detect_relations(&new_memory).await.unwrap();

        let old_after = storage.get_memory(&old_id).unwrap();
        let new_after = storage.get_memory(&new_id).unwrap();
        assert!(old_after.is_latest);
        assert!(new_after.is_latest);
        assert!(old_after.contradiction_ids.contains(&new_id));
        assert!(new_after.contradiction_ids.contains(&old_id));
    }

    #[tokio::test]
    async fn no_embedding_on_new_memory_skips_detection() {
        let storage = Arc::new(StorageEngine::open_in_memory().unwrap());
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(TfIdfEmbedder::new(64));
        let now = 1_700_000_000_000;
        let mut new_memory = memory("a", "u1", "no embedding here", vec![0.1; 64], now);
        new_memory.embedding = None;

        let manager = RelationsManager::new(storage, embedder, None, "test-model".to_string(), RelationsConfig::default());
        let count = manager.detect_relations(&new_memory).await.unwrap();
        assert_eq!(count, 0);
    }
}

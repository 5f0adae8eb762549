use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use reverie_core::config::MemoryConfig;
use reverie_core::ids::Id;
use reverie_core::llm::LlmProvider;
use reverie_core::types::{MemoryCategory, MemoryEntry, MemoryType};
use reverie_embed::{cosine_similarity, EmbeddingProvider};
use reverie_storage::StorageEngine;
use serde_json::Value;
use tracing::{instrument, warn};

use crate::decay::decay_prominence;
use crate::error::Result;
use crate::hooks::RelationDetector;
use crate::rerank;
use crate::scoring::normalize_bm25_ranks;

const TOP_K: usize = 50;
const LIGHT_DECAY_WINDOW_MS: i64 = 6 * 60 * 60 * 1000;
const LIGHT_DECAY_BATCH: usize = 200;
const REINFORCE_PROMINENCE_BUMP: f64 = 0.2;
const REINFORCE_CONFIDENCE_STEP: f64 = 0.05;
const REINFORCE_CONFIDENCE_CAP: f64 = 0.99;

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[derive(Debug, Clone)]
pub struct AddMemoryInput {
    pub content: String,
    pub category: MemoryCategory,
    pub importance: Option<u8>,
    pub confidence: Option<f64>,
    pub source: Option<String>,
    pub learned_from: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub metadata: Option<HashMap<String, Value>>,
    pub detect_relations: Option<bool>,
    pub document_date: Option<i64>,
    pub event_date: Option<i64>,
}

impl Default for AddMemoryInput {
    fn default() -> Self {
        Self {
            content: String::new(),
            category: MemoryCategory::Fact,
            importance: None,
            confidence: None,
            source: None,
            learned_from: None,
            embedding: None,
            metadata: None,
            detect_relations: None,
            document_date: None,
            event_date: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStats {
    pub total: u64,
    pub by_category: HashMap<String, u64>,
    pub avg_prominence: f64,
    pub avg_confidence: f64,
}

/// High-level memory API: add, search, reinforce, decay, stats. Owns
/// prominence dynamics, access-count tracking, and duplicate detection on
/// top of the raw CRUD exposed by `reverie-storage`.
pub struct MemoryManager {
    storage: Arc<StorageEngine>,
    embedder: Arc<dyn EmbeddingProvider>,
    reranker: Option<Arc<dyn LlmProvider>>,
    reranker_model: String,
    relation_detector: Mutex<Option<Arc<dyn RelationDetector>>>,
    config: MemoryConfig,
}

impl MemoryManager {
    pub fn new(
        storage: Arc<StorageEngine>,
        embedder: Arc<dyn EmbeddingProvider>,
        reranker: Option<Arc<dyn LlmProvider>>,
        reranker_model: String,
        config: MemoryConfig,
    ) -> Self {
        Self {
            storage,
            embedder,
            reranker,
            reranker_model,
            relation_detector: Mutex::new(None),
            config,
        }
    }

    /// Wired in after `reverie-relations` is constructed, since that crate
    /// depends on this one and not the other way around.
    pub fn set_relation_detector(&self, detector: Arc<dyn RelationDetector>) {
        *self.relation_detector.lock().unwrap() = Some(detector);
    }

    /// Escape hatch for collaborators (the extractor, the gardener) that
    /// need storage operations this manager doesn't wrap directly, such as
    /// contradiction bookkeeping.
    pub fn storage(&self) -> &Arc<StorageEngine> {
        &self.storage
    }

    #[instrument(skip(self, input))]
    pub async fn add(&self, user_id: &str, input: AddMemoryInput) -> Result<MemoryEntry> {
        let now = now_ms();
        let embedding = match input.embedding {
            Some(e) => e,
            None => self.embedder.embed(&input.content).await?,
        };

        if let Some(existing_id) = self.find_duplicate(user_id, input.category, &embedding)? {
            self.storage
                .reinforce_memory(&existing_id, now, REINFORCE_PROMINENCE_BUMP)?;
            self.storage.bump_confidence(
                &existing_id,
                REINFORCE_CONFIDENCE_STEP,
                REINFORCE_CONFIDENCE_CAP,
                now,
            )?;
            return Ok(self.storage.get_memory(&existing_id)?);
        }

        let entry = MemoryEntry {
            id: Id::new().to_string(),
            user_id: user_id.to_string(),
            content: input.content,
            category: input.category,
            memory_type: MemoryType::Regular,
            importance: input.importance.unwrap_or(5),
            confidence: input.confidence.unwrap_or(0.7),
            prominence: 1.0,
            access_count: 0,
            times_confirmed: 1,
            is_latest: true,
            source: input.source.unwrap_or_else(|| "user".to_string()),
            source_chunk: None,
            learned_from: input.learned_from,
            document_date: input.document_date.unwrap_or(now),
            event_date: input.event_date,
            last_accessed: None,
            created_at: now,
            updated_at: now,
            embedding: Some(embedding),
            embedding_model: Some(self.embedder.name().to_string()),
            contradiction_ids: Vec::new(),
            metadata: input.metadata.unwrap_or_default(),
        };

        self.storage.insert_memory(&entry)?;

        let should_detect = input.detect_relations.unwrap_or(true);
        if should_detect {
            let detector = self.relation_detector.lock().unwrap().clone();
            if let Some(detector) = detector {
                if let Err(e) = detector.detect_and_link(&entry).await {
                    warn!(memory_id = %entry.id, error = %e, "relation detection failed");
                }
            }
        }

        Ok(entry)
    }

    fn find_duplicate(
        &self,
        user_id: &str,
        category: MemoryCategory,
        embedding: &[f32],
    ) -> Result<Option<String>> {
        let candidates = self.storage.list_latest_memories(user_id, Some(category))?;
        let mut best: Option<(String, f32)> = None;
        for candidate in candidates {
            let Some(candidate_embedding) = candidate.embedding else {
                continue;
            };
            let sim = cosine_similarity(embedding, &candidate_embedding);
            if best.as_ref().map(|(_, s)| sim > *s).unwrap_or(true) {
                best = Some((candidate.id, sim));
            }
        }
        match best {
            Some((id, sim)) if sim as f64 >= self.config.duplicate_similarity_threshold => Ok(Some(id)),
            _ => Ok(None),
        }
    }

    #[instrument(skip(self, query_embedding))]
    pub async fn search(
        &self,
        user_id: &str,
        query: &str,
        query_embedding: Option<Vec<f32>>,
        limit: Option<usize>,
    ) -> Result<Vec<(MemoryEntry, f64)>> {
        let embedding = match query_embedding {
            Some(e) => e,
            None => self.embedder.embed(query).await?,
        };

        let mut entries: HashMap<String, MemoryEntry> = HashMap::new();
        let mut bm25_scores: HashMap<String, f64> = HashMap::new();

        let fts_query = sanitize_fts_query(query);
        if !fts_query.is_empty() {
            if let Ok(hits) = self.storage.search_memories_keyword(user_id, &fts_query, TOP_K) {
                let ranks: Vec<f64> = hits.iter().map(|(_, r)| *r).collect();
                let normalized = normalize_bm25_ranks(&ranks);
                for ((entry, _), norm) in hits.into_iter().zip(normalized) {
                    bm25_scores.insert(entry.id.clone(), norm);
                    entries.insert(entry.id.clone(), entry);
                }
            }
        }

        let mut sims: Vec<(String, f32)> = self
            .storage
            .list_memory_embeddings(user_id)?
            .into_iter()
            .map(|(id, vec)| (id, cosine_similarity(&embedding, &vec)))
            .collect();
        sims.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        sims.truncate(TOP_K);

        let mut semantic_scores: HashMap<String, f64> = HashMap::new();
        for (id, sim) in sims {
            semantic_scores.insert(id.clone(), sim as f64);
            if !entries.contains_key(&id) {
                if let Ok(entry) = self.storage.get_memory(&id) {
                    entries.insert(id, entry);
                }
            }
        }

        let mut scored: Vec<(MemoryEntry, f64)> = entries
            .into_values()
            .map(|entry| {
                let bm25 = bm25_scores.get(&entry.id).copied().unwrap_or(0.0);
                let sim = semantic_scores.get(&entry.id).copied().unwrap_or(0.0);
                let score = self.config.keyword_weight * bm25
                    + self.config.semantic_weight * sim
                    + self.config.prominence_weight * entry.prominence;
                (entry, score)
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(TOP_K);

        if let Some(llm) = &self.reranker {
            let texts: Vec<String> = scored.iter().map(|(e, _)| e.content.clone()).collect();
            if let Some(reranked) = rerank::rerank(llm.as_ref(), &self.reranker_model, query, &texts).await {
                for (index, score) in reranked {
                    if let Some(entry) = scored.get_mut(index) {
                        entry.1 = score;
                    }
                }
                scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            }
        }

        let final_limit = limit.unwrap_or(self.config.default_search_limit).min(TOP_K);
        scored.truncate(final_limit);

        let now = now_ms();
        for (entry, _) in &scored {
            if let Err(e) = self.storage.touch_memory_access(&entry.id, now) {
                warn!(memory_id = %entry.id, error = %e, "failed to bump access count");
            }
        }

        Ok(scored)
    }

    #[instrument(skip(self))]
    pub fn reinforce(&self, id: &str) -> Result<MemoryEntry> {
        let now = now_ms();
        self.storage
            .reinforce_memory(id, now, REINFORCE_PROMINENCE_BUMP)?;
        self.storage
            .bump_confidence(id, REINFORCE_CONFIDENCE_STEP, REINFORCE_CONFIDENCE_CAP, now)?;
        Ok(self.storage.get_memory(id)?)
    }

    /// Light tick: incremental decay over a bounded batch of recently-stale
    /// rows, rather than a full-table scan.
    #[instrument(skip(self))]
    pub fn process_decay(&self) -> Result<usize> {
        let now = now_ms();
        let cutoff = now - LIGHT_DECAY_WINDOW_MS;
        let stale = self.storage.list_stale_latest_memories(cutoff, LIGHT_DECAY_BATCH)?;
        for memory in &stale {
            let last = memory.last_accessed.unwrap_or(memory.created_at);
            let decayed = decay_prominence(memory.prominence, memory.category, now - last);
            self.storage.apply_decayed_prominence(&memory.id, decayed)?;
        }
        Ok(stale.len())
    }

    /// Deep tick: full-table decay scan. Never touches `updated_at`.
    #[instrument(skip(self))]
    pub fn process_full_decay(&self) -> Result<usize> {
        let now = now_ms();
        let all = self.storage.list_all_latest_memories()?;
        for memory in &all {
            let last = memory.last_accessed.unwrap_or(memory.created_at);
            let decayed = decay_prominence(memory.prominence, memory.category, now - last);
            self.storage.apply_decayed_prominence(&memory.id, decayed)?;
        }
        Ok(all.len())
    }

    #[instrument(skip(self))]
    pub fn get_stats(&self, user_id: &str) -> Result<MemoryStats> {
        let all = self.storage.list_latest_memories(user_id, None)?;
        let total = all.len() as u64;
        let mut by_category: HashMap<String, u64> = HashMap::new();
        let mut prominence_sum = 0.0;
        let mut confidence_sum = 0.0;
        for memory in &all {
            *by_category.entry(memory.category.to_string()).or_insert(0) += 1;
            prominence_sum += memory.prominence;
            confidence_sum += memory.confidence;
        }
        let avg_prominence = if total > 0 { prominence_sum / total as f64 } else { 0.0 };
        let avg_confidence = if total > 0 { confidence_sum / total as f64 } else { 0.0 };
        Ok(MemoryStats {
            total,
            by_category,
            avg_prominence,
            avg_confidence,
        })
    }
}

/// FTS5's query syntax treats punctuation (`'`, `-`, `"`) as operators.
/// Quoting each alphanumeric token and joining with `OR` sidesteps syntax
/// errors from arbitrary user text while keeping a loose keyword match.
fn sanitize_fts_query(query: &str) -> String {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|tok| !tok.is_empty())
        .map(|tok| format!("\"{tok}\""))
        .collect::<Vec<_>>()
        .join(" OR ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use reverie_embed::TfIdfEmbedder;

    fn manager() -> MemoryManager {
        let storage = Arc::new(StorageEngine::open_in_memory().unwrap());
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(TfIdfEmbedder::new(64));
        MemoryManager::new(storage, embedder, None, "test-model".to_string(), MemoryConfig::default())
    }

    #[tokio::test]
    async fn add_then_search_finds_the_memory() {
        let manager = manager();
        manager
            .add(
                "u1",
                AddMemoryInput {
                    content: "likes dark roast coffee".to_string(),
                    category: MemoryCategory::Preference,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let results = manager.search("u1", "coffee", None, None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.content, "likes dark roast coffee");
    }

    #[tokio::test]
    async fn duplicate_content_reinforces_instead_of_inserting() {
        let manager = manager();
        manager
            .add(
                "u1",
                AddMemoryInput {
                    content: "works at microsoft".to_string(),
                    category: MemoryCategory::Fact,
                    confidence: Some(0.8),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        manager
            .add(
                "u1",
                AddMemoryInput {
                    content: "works at microsoft".to_string(),
                    category: MemoryCategory::Fact,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let stats = manager.get_stats("u1").unwrap();
        assert_eq!(stats.total, 1);
    }

    #[tokio::test]
    async fn reinforce_never_decreases_confidence_or_prominence() {
        let manager = manager();
        let entry = manager
            .add(
                "u1",
                AddMemoryInput {
                    content: "drives a toyota".to_string(),
                    category: MemoryCategory::Fact,
                    confidence: Some(0.5),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let reinforced = manager.reinforce(&entry.id).unwrap();
        assert!(reinforced.confidence >= entry.confidence);
        assert!(reinforced.prominence >= entry.prominence);
        assert_eq!(reinforced.times_confirmed, 2);
    }

    #[test]
    fn full_decay_never_increases_prominence_and_preserves_updated_at() {
        let manager = manager();
        let rt = tokio::runtime::Runtime::new().unwrap();
        let entry = rt
            .block_on(manager.add(
                "u1",
                AddMemoryInput {
                    content: "allergic to shellfish".to_string(),
                    category: MemoryCategory::Fact,
                    ..Default::default()
                },
            ))
            .unwrap();

        manager.process_full_decay().unwrap();
        let after = manager.storage.get_memory(&entry.id).unwrap();
        assert!(after.prominence <= entry.prominence);
        assert_eq!(after.updated_at, entry.updated_at);
    }
}

use std::sync::Arc;

use reverie_core::ids::Id;
use reverie_core::types::{MemoryRelation, RelationType};
use reverie_storage::StorageEngine;

use crate::error::Result;

/// Thin, idempotent wrapper over the raw relation CRUD in `reverie-storage`.
pub struct RelationGraph {
    storage: Arc<StorageEngine>,
}

impl RelationGraph {
    pub fn new(storage: Arc<StorageEngine>) -> Self {
        Self { storage }
    }

    /// Idempotent on `(source, target, type)` — returns the existing
    /// relation if one already matches the natural key.
    pub fn add_relation(
        &self,
        source_id: &str,
        target_id: &str,
        relation_type: RelationType,
        confidence: f64,
        now_ms: i64,
    ) -> Result<MemoryRelation> {
        if let Some(existing) = self.storage.find_relation(source_id, target_id, relation_type)? {
            return Ok(existing);
        }
        let relation = MemoryRelation {
            id: Id::new().to_string(),
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            relation_type,
            confidence,
            created_at: now_ms,
        };
        self.storage.insert_relation(&relation)?;
        Ok(relation)
    }

    fn relations_from_of_type(&self, id: &str, relation_type: RelationType) -> Result<Vec<MemoryRelation>> {
        Ok(self
            .storage
            .relations_from(id)?
            .into_iter()
            .filter(|r| r.relation_type == relation_type)
            .collect())
    }

    fn relations_to_of_type(&self, id: &str, relation_type: RelationType) -> Result<Vec<MemoryRelation>> {
        Ok(self
            .storage
            .relations_to(id)?
            .into_iter()
            .filter(|r| r.relation_type == relation_type)
            .collect())
    }

    /// Memories this one has updated (outgoing UPDATES edges).
    pub fn get_updated(&self, id: &str) -> Result<Vec<MemoryRelation>> {
        self.relations_from_of_type(id, RelationType::Updates)
    }

    /// Memories this one extends (outgoing EXTENDS edges).
    pub fn get_extended(&self, id: &str) -> Result<Vec<MemoryRelation>> {
        self.relations_from_of_type(id, RelationType::Extends)
    }

    /// Memories that updated this one (incoming UPDATES edges) — its sources.
    pub fn get_source(&self, id: &str) -> Result<Vec<MemoryRelation>> {
        self.relations_to_of_type(id, RelationType::Updates)
    }

    /// Memories derived from this one (incoming DERIVES edges).
    pub fn get_derived(&self, id: &str) -> Result<Vec<MemoryRelation>> {
        self.relations_to_of_type(id, RelationType::Derives)
    }

    pub fn get_latest_version(&self, id: &str) -> Result<String> {
        Ok(self.storage.get_latest_version(id)?)
    }

    /// Ancestors along the UPDATES chain, sorted by `document_date`
    /// descending. The storage-layer walk returns chain order; this
    /// re-sorts explicitly against each memory's `document_date` to honor
    /// the ordering guarantee even if a chain was built out of date order.
    pub fn get_update_history(&self, id: &str) -> Result<Vec<MemoryRelation>> {
        let chain_ids = self.storage.get_update_history(id)?;
        let mut dated: Vec<(String, i64)> = Vec::with_capacity(chain_ids.len());
        for memory_id in &chain_ids {
            let memory = self.storage.get_memory(memory_id)?;
            dated.push((memory_id.clone(), memory.document_date));
        }
        dated.sort_by(|a, b| b.1.cmp(&a.1));

        let mut history = Vec::with_capacity(dated.len());
        for (memory_id, _) in dated {
            if let Some(relation) = self
                .storage
                .relations_from(&memory_id)?
                .into_iter()
                .find(|r| r.relation_type == RelationType::Updates)
            {
                history.push(relation);
            }
        }
        Ok(history)
    }

    pub fn relations_touching(&self, id: &str) -> Result<Vec<MemoryRelation>> {
        Ok(self.storage.relations_touching(id)?)
    }

    pub fn delete_relations_for_memory(&self, id: &str) -> Result<()> {
        Ok(self.storage.delete_relations_for_memory(id)?)
    }

    /// Deletes edges whose endpoints no longer exist — run after archival.
    pub fn prune_orphaned_relations(&self) -> Result<usize> {
        let all = self.storage.list_all_latest_memories()?;
        let live: std::collections::HashSet<String> = all.into_iter().map(|m| m.id).collect();
        let mut pruned = 0;
        for memory_id in live.iter() {
            for relation in self.storage.relations_touching(memory_id)? {
                let source_alive = live.contains(&relation.source_id);
                let target_alive = live.contains(&relation.target_id);
                if !source_alive || !target_alive {
                    self.storage.delete_relation(&relation.id)?;
                    pruned += 1;
                }
            }
        }
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reverie_core::types::{MemoryCategory, MemoryEntry, MemoryType};
    use std::collections::HashMap;

    fn memory(id: &str, now: i64, document_date: i64) -> MemoryEntry {
        MemoryEntry {
            id: id.to_string(),
            user_id: "u1".to_string(),
            content: "x".to_string(),
            category: MemoryCategory::Fact,
            memory_type: MemoryType::Regular,
            importance: 5,
            confidence: 0.8,
            prominence: 0.5,
            access_count: 0,
            times_confirmed: 0,
            is_latest: true,
            source: "chat".to_string(),
            source_chunk: None,
            learned_from: None,
            document_date,
            event_date: None,
            last_accessed: None,
            created_at: now,
            updated_at: now,
            embedding: None,
            embedding_model: None,
            contradiction_ids: vec![],
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn add_relation_is_idempotent() {
        let storage = Arc::new(StorageEngine::open_in_memory().unwrap());
        let graph = RelationGraph::new(storage.clone());
        let now = 1_700_000_000_000;
        storage.insert_memory(&memory("a", now, now)).unwrap();
        storage.insert_memory(&memory("b", now, now)).unwrap();

        let first = graph.add_relation("a", "b", RelationType::Updates, 0.9, now).unwrap();
        let second = graph.add_relation("a", "b", RelationType::Updates, 0.9, now).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(storage.count_relations_for_memory("a").unwrap(), 1);
    }

    #[test]
    fn update_history_sorts_by_document_date_descending() {
        let storage = Arc::new(StorageEngine::open_in_memory().unwrap());
        let graph = RelationGraph::new(storage.clone());
        let now = 1_700_000_000_000;
        storage.insert_memory(&memory("a", now, now)).unwrap();
        storage.insert_memory(&memory("b", now, now + 1000)).unwrap();
        storage.insert_memory(&memory("c", now, now + 2000)).unwrap();

        // UPDATES points from the newer memory to the older one: b updates
        // a, c updates b.
        graph.add_relation("b", "a", RelationType::Updates, 0.9, now).unwrap();
        graph.add_relation("c", "b", RelationType::Updates, 0.9, now).unwrap();

        let history = graph.get_update_history("c").unwrap();
        let dates: Vec<String> = history.iter().map(|r| r.source_id.clone()).collect();
        assert_eq!(dates, vec!["c".to_string(), "b".to_string()]);
    }
}

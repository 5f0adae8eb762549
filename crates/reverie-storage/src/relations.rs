use std::str::FromStr;

use reverie_core::types::{MemoryRelation, RelationType};
use rusqlite::{params, Row};

use crate::engine::StorageEngine;
use crate::error::Result;

impl StorageEngine {
    pub fn insert_relation(&self, r: &MemoryRelation) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO memory_relations (id, source_id, target_id, relation_type, confidence, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                r.id,
                r.source_id,
                r.target_id,
                r.relation_type.to_string(),
                r.confidence,
                r.created_at,
            ],
        )?;
        Ok(())
    }

    /// Look up an existing relation by its natural key — the check
    /// `add_relation` uses to stay idempotent on `(source, target, type)`.
    pub fn find_relation(
        &self,
        source_id: &str,
        target_id: &str,
        relation_type: RelationType,
    ) -> Result<Option<MemoryRelation>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, source_id, target_id, relation_type, confidence, created_at
             FROM memory_relations
             WHERE source_id = ?1 AND target_id = ?2 AND relation_type = ?3",
        )?;
        let mut rows = stmt.query_map(
            params![source_id, target_id, relation_type.to_string()],
            row_to_relation,
        )?;
        Ok(rows.next().transpose()?)
    }

    pub fn relations_from(&self, source_id: &str) -> Result<Vec<MemoryRelation>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, source_id, target_id, relation_type, confidence, created_at
             FROM memory_relations WHERE source_id = ?1",
        )?;
        let rows = stmt.query_map(params![source_id], row_to_relation)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn relations_to(&self, target_id: &str) -> Result<Vec<MemoryRelation>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, source_id, target_id, relation_type, confidence, created_at
             FROM memory_relations WHERE target_id = ?1",
        )?;
        let rows = stmt.query_map(params![target_id], row_to_relation)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// All relations touching a memory, either direction — the edge set
    /// spreading activation walks.
    pub fn relations_touching(&self, memory_id: &str) -> Result<Vec<MemoryRelation>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, source_id, target_id, relation_type, confidence, created_at
             FROM memory_relations WHERE source_id = ?1 OR target_id = ?1",
        )?;
        let rows = stmt.query_map(params![memory_id], row_to_relation)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Walk the UPDATES chain forward from `memory_id` (the newest version)
    /// to find every older memory it supersedes, recursively. UPDATES edges
    /// point from the newer memory to the older one.
    pub fn get_update_history(&self, memory_id: &str) -> Result<Vec<String>> {
        let mut history = vec![memory_id.to_string()];
        let mut current = memory_id.to_string();
        loop {
            let outgoing = self.relations_from(&current)?;
            let next = outgoing
                .iter()
                .find(|r| r.relation_type == RelationType::Updates)
                .map(|r| r.target_id.clone());
            match next {
                Some(id) if !history.contains(&id) => {
                    history.push(id.clone());
                    current = id;
                }
                _ => break,
            }
        }
        Ok(history)
    }

    /// The current latest-version memory id at the head of `memory_id`'s
    /// UPDATES chain, found by walking incoming edges (each points from
    /// the memory that superseded the current one).
    pub fn get_latest_version(&self, memory_id: &str) -> Result<String> {
        let mut current = memory_id.to_string();
        loop {
            let incoming = self.relations_to(&current)?;
            let next = incoming
                .iter()
                .find(|r| r.relation_type == RelationType::Updates)
                .map(|r| r.source_id.clone());
            match next {
                Some(id) if id != current => current = id,
                _ => break,
            }
        }
        Ok(current)
    }

    pub fn delete_relations_for_memory(&self, memory_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM memory_relations WHERE source_id = ?1 OR target_id = ?1",
            params![memory_id],
        )?;
        Ok(())
    }

    pub fn delete_relation(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM memory_relations WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn count_relations_for_memory(&self, memory_id: &str) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM memory_relations WHERE source_id = ?1 OR target_id = ?1",
            params![memory_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

fn row_to_relation(row: &Row<'_>) -> rusqlite::Result<MemoryRelation> {
    let type_str: String = row.get(3)?;
    Ok(MemoryRelation {
        id: row.get(0)?,
        source_id: row.get(1)?,
        target_id: row.get(2)?,
        relation_type: RelationType::from_str(&type_str).unwrap_or(RelationType::Extends),
        confidence: row.get(4)?,
        created_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reverie_core::Id;
    use reverie_core::types::{MemoryCategory, MemoryEntry, MemoryType};
    use std::collections::HashMap;

    fn memory(id: &str, now: i64) -> MemoryEntry {
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
            document_date: now,
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
    fn update_chain_resolves_latest_version() {
        let engine = StorageEngine::open_in_memory().unwrap();
        let now = 1_700_000_000_000;
        let a = Id::new().to_string();
        let b = Id::new().to_string();
        let c = Id::new().to_string();
        engine.insert_memory(&memory(&a, now)).unwrap();
        engine.insert_memory(&memory(&b, now)).unwrap();
        engine.insert_memory(&memory(&c, now)).unwrap();

        // UPDATES points from the newer memory to the older one: b updates
        // a, c updates b.
        engine
            .insert_relation(&MemoryRelation {
                id: Id::new().to_string(),
                source_id: b.clone(),
                target_id: a.clone(),
                relation_type: RelationType::Updates,
                confidence: 0.9,
                created_at: now,
            })
            .unwrap();
        engine
            .insert_relation(&MemoryRelation {
                id: Id::new().to_string(),
                source_id: c.clone(),
                target_id: b.clone(),
                relation_type: RelationType::Updates,
                confidence: 0.9,
                created_at: now,
            })
            .unwrap();

        assert_eq!(engine.get_latest_version(&a).unwrap(), c);
        let history = engine.get_update_history(&c).unwrap();
        assert_eq!(history, vec![c.clone(), b.clone(), a.clone()]);
    }
}

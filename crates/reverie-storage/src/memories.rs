use std::collections::HashMap;
use std::str::FromStr;

use reverie_core::types::{MemoryCategory, MemoryEntry, MemoryType};
use rusqlite::{params, OptionalExtension, Row};

use crate::codec::{decode_embedding, encode_embedding};
use crate::engine::StorageEngine;
use crate::error::{Result, StorageError};

impl StorageEngine {
    /// Insert a brand new memory row.
    pub fn insert_memory(&self, m: &MemoryEntry) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO memories
                (id, user_id, content, category, memory_type, importance, confidence,
                 prominence, access_count, times_confirmed, is_latest, source, source_chunk,
                 learned_from, document_date, event_date, last_accessed, created_at,
                 updated_at, embedding, embedding_model, contradiction_ids, metadata)
             VALUES
                (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                 ?17, ?18, ?19, ?20, ?21, ?22, ?23)",
            params![
                m.id,
                m.user_id,
                m.content,
                m.category.to_string(),
                m.memory_type.to_string(),
                m.importance,
                m.confidence,
                m.prominence,
                m.access_count,
                m.times_confirmed,
                m.is_latest as i64,
                m.source,
                m.source_chunk,
                m.learned_from,
                m.document_date,
                m.event_date,
                m.last_accessed,
                m.created_at,
                m.updated_at,
                m.embedding.as_ref().map(|e| encode_embedding(e)),
                m.embedding_model,
                serde_json::to_string(&m.contradiction_ids)?,
                serde_json::to_string(&m.metadata)?,
            ],
        )?;
        Ok(())
    }

    pub fn get_memory(&self, id: &str) -> Result<MemoryEntry> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM memories WHERE id = ?1",
            params![id],
            row_to_memory,
        )
        .optional()?
        .ok_or_else(|| StorageError::MemoryNotFound { id: id.to_string() })
    }

    /// Reinforce an existing memory: bump `access_count`, `times_confirmed`,
    /// `last_accessed`, and optionally prominence. Used on duplicate-content
    /// detection instead of inserting a new row.
    pub fn reinforce_memory(&self, id: &str, now_ms: i64, prominence_delta: f64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE memories SET
                access_count = access_count + 1,
                times_confirmed = times_confirmed + 1,
                last_accessed = ?2,
                prominence = MIN(1.0, prominence + ?3),
                updated_at = ?2
             WHERE id = ?1",
            params![id, now_ms, prominence_delta],
        )?;
        if updated == 0 {
            return Err(StorageError::MemoryNotFound { id: id.to_string() });
        }
        Ok(())
    }

    /// Raise `confidence` by `step`, capped at `cap`. Used by the memory
    /// store's `reinforce` on top of the generic prominence/access bump.
    pub fn bump_confidence(&self, id: &str, step: f64, cap: f64, now_ms: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE memories SET confidence = MIN(?2, confidence + ?3), updated_at = ?4 WHERE id = ?1",
            params![id, cap, step, now_ms],
        )?;
        if updated == 0 {
            return Err(StorageError::MemoryNotFound { id: id.to_string() });
        }
        Ok(())
    }

    pub fn touch_memory_access(&self, id: &str, now_ms: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE memories SET access_count = access_count + 1, last_accessed = ?2 WHERE id = ?1",
            params![id, now_ms],
        )?;
        Ok(())
    }

    pub fn set_prominence(&self, id: &str, prominence: f64, now_ms: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE memories SET prominence = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, prominence, now_ms],
        )?;
        Ok(())
    }

    /// Mark a memory superseded (no longer latest) without deleting it —
    /// both rows remain queryable by `get_update_history`.
    pub fn supersede_memory(&self, id: &str, now_ms: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE memories SET is_latest = 0, memory_type = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, MemoryType::Superseded.to_string(), now_ms],
        )?;
        Ok(())
    }

    pub fn record_contradiction(&self, id: &str, contradicts_id: &str, now_ms: i64) -> Result<()> {
        let existing = self.get_memory(id)?;
        let mut ids = existing.contradiction_ids;
        if !ids.iter().any(|x| x == contradicts_id) {
            ids.push(contradicts_id.to_string());
        }
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE memories SET contradiction_ids = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, serde_json::to_string(&ids)?, now_ms],
        )?;
        Ok(())
    }

    pub fn delete_memory(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// All latest-version memories for a user, optionally filtered by category.
    pub fn list_latest_memories(
        &self,
        user_id: &str,
        category: Option<MemoryCategory>,
    ) -> Result<Vec<MemoryEntry>> {
        let conn = self.conn.lock().unwrap();
        match category {
            Some(cat) => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM memories WHERE user_id = ?1 AND is_latest = 1 AND category = ?2
                     ORDER BY document_date DESC",
                )?;
                let rows = stmt.query_map(params![user_id, cat.to_string()], row_to_memory)?;
                Ok(rows.filter_map(|r| r.ok()).collect())
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM memories WHERE user_id = ?1 AND is_latest = 1
                     ORDER BY document_date DESC",
                )?;
                let rows = stmt.query_map(params![user_id], row_to_memory)?;
                Ok(rows.filter_map(|r| r.ok()).collect())
            }
        }
    }

    /// Keyword search via the FTS5 index, BM25-ranked. `rank` is SQLite's
    /// built-in BM25 column — more negative is a better match.
    pub fn search_memories_keyword(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<(MemoryEntry, f64)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT m.*, memories_fts.rank AS bm25_rank
             FROM memories m
             JOIN memories_fts ON m.rowid = memories_fts.rowid
             WHERE m.user_id = ?1 AND m.is_latest = 1 AND memories_fts MATCH ?2
             ORDER BY memories_fts.rank
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![user_id, query, limit as i64], |row| {
            let m = row_to_memory(row)?;
            let rank: f64 = row.get("bm25_rank")?;
            Ok((m, rank))
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Flat scan of every latest-version embedding for a user — the join
    /// point for cosine-similarity semantic search (no ANN index; see
    /// reverie-embed).
    pub fn list_memory_embeddings(&self, user_id: &str) -> Result<Vec<(String, Vec<f32>)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, embedding FROM memories
             WHERE user_id = ?1 AND is_latest = 1 AND embedding IS NOT NULL",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            let id: String = row.get(0)?;
            let bytes: Vec<u8> = row.get(1)?;
            Ok((id, decode_embedding(&bytes)))
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn set_memory_embedding(&self, id: &str, embedding: &[f32], model: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE memories SET embedding = ?2, embedding_model = ?3 WHERE id = ?1",
            params![id, encode_embedding(embedding), model],
        )?;
        Ok(())
    }

    /// All latest-version memories across every user — the gardener's deep
    /// tick operates system-wide, not per-request like search.
    pub fn list_all_latest_memories(&self) -> Result<Vec<MemoryEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM memories WHERE is_latest = 1")?;
        let rows = stmt.query_map([], row_to_memory)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Latest memories whose last access (or creation, if never accessed) is
    /// older than `cutoff_ms` — the rolling window `process_decay` (light
    /// tick) sweeps, instead of the full table `process_full_decay` scans.
    pub fn list_stale_latest_memories(&self, cutoff_ms: i64, limit: usize) -> Result<Vec<MemoryEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM memories
             WHERE is_latest = 1 AND COALESCE(last_accessed, created_at) < ?1
             ORDER BY COALESCE(last_accessed, created_at) ASC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![cutoff_ms, limit as i64], row_to_memory)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Overwrite `prominence` without touching `updated_at` — decay is
    /// maintenance, not semantic change, per the field's meaning.
    pub fn apply_decayed_prominence(&self, id: &str, prominence: f64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE memories SET prominence = ?2 WHERE id = ?1",
            params![id, prominence],
        )?;
        Ok(())
    }

    /// Latest memories created at or before `max_created_at_ms`, excluding
    /// `static_profile` rows — the deep tick's utility-score archival
    /// candidates. Utility itself is computed in the caller since it needs
    /// `ln`, not expressible as a plain SQL predicate here.
    pub fn list_archive_candidates(&self, max_created_at_ms: i64) -> Result<Vec<MemoryEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM memories
             WHERE is_latest = 1 AND memory_type != 'static_profile' AND created_at <= ?1",
        )?;
        let rows = stmt.query_map(params![max_created_at_ms], row_to_memory)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Rows already marked superseded (via update, contradiction, or prior
    /// archival) — the sleep tick's hard-deletion sweep checks these against
    /// the 0.01 prominence floor.
    pub fn list_superseded_memories(&self) -> Result<Vec<MemoryEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT * FROM memories WHERE is_latest = 0 AND memory_type = 'superseded'")?;
        let rows = stmt.query_map([], row_to_memory)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Count latest memories per user, for stats reporting.
    pub fn count_latest_memories(&self, user_id: &str) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM memories WHERE user_id = ?1 AND is_latest = 1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

fn row_to_memory(row: &Row<'_>) -> rusqlite::Result<MemoryEntry> {
    let category_str: String = row.get("category")?;
    let type_str: String = row.get("memory_type")?;
    let contradiction_ids_str: String = row.get("contradiction_ids")?;
    let metadata_str: String = row.get("metadata")?;
    let embedding_bytes: Option<Vec<u8>> = row.get("embedding")?;

    Ok(MemoryEntry {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        content: row.get("content")?,
        category: MemoryCategory::from_str(&category_str)
            .unwrap_or(MemoryCategory::Fact),
        memory_type: MemoryType::from_str(&type_str).unwrap_or(MemoryType::Regular),
        importance: row.get("importance")?,
        confidence: row.get("confidence")?,
        prominence: row.get("prominence")?,
        access_count: row.get("access_count")?,
        times_confirmed: row.get("times_confirmed")?,
        is_latest: row.get::<_, i64>("is_latest")? != 0,
        source: row.get("source")?,
        source_chunk: row.get("source_chunk")?,
        learned_from: row.get("learned_from")?,
        document_date: row.get("document_date")?,
        event_date: row.get("event_date")?,
        last_accessed: row.get("last_accessed")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        embedding: embedding_bytes.map(|b| decode_embedding(&b)),
        embedding_model: row.get("embedding_model")?,
        contradiction_ids: serde_json::from_str(&contradiction_ids_str).unwrap_or_default(),
        metadata: serde_json::from_str::<HashMap<String, serde_json::Value>>(&metadata_str)
            .unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reverie_core::Id;

    fn sample(id: &str, user: &str, now: i64) -> MemoryEntry {
        MemoryEntry {
            id: id.to_string(),
            user_id: user.to_string(),
            content: "likes dark roast coffee".to_string(),
            category: MemoryCategory::Preference,
            memory_type: MemoryType::Regular,
            importance: 6,
            confidence: 0.9,
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
            embedding: Some(vec![0.1, 0.2, 0.3]),
            embedding_model: Some("local-tfidf".to_string()),
            contradiction_ids: vec![],
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn insert_and_get_round_trips() {
        let engine = StorageEngine::open_in_memory().unwrap();
        let id = Id::new().to_string();
        let now = 1_700_000_000_000;
        engine.insert_memory(&sample(&id, "u1", now)).unwrap();

        let got = engine.get_memory(&id).unwrap();
        assert_eq!(got.content, "likes dark roast coffee");
        assert_eq!(got.embedding, Some(vec![0.1, 0.2, 0.3]));
    }

    #[test]
    fn reinforce_bumps_counters() {
        let engine = StorageEngine::open_in_memory().unwrap();
        let id = Id::new().to_string();
        let now = 1_700_000_000_000;
        engine.insert_memory(&sample(&id, "u1", now)).unwrap();

        engine.reinforce_memory(&id, now + 1000, 0.1).unwrap();
        let got = engine.get_memory(&id).unwrap();
        assert_eq!(got.access_count, 1);
        assert_eq!(got.times_confirmed, 1);
        assert!((got.prominence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn supersede_keeps_row_but_clears_latest_flag() {
        let engine = StorageEngine::open_in_memory().unwrap();
        let id = Id::new().to_string();
        let now = 1_700_000_000_000;
        engine.insert_memory(&sample(&id, "u1", now)).unwrap();

        engine.supersede_memory(&id, now + 1).unwrap();
        let got = engine.get_memory(&id).unwrap();
        assert!(!got.is_latest);
        assert_eq!(got.memory_type, MemoryType::Superseded);
    }

    #[test]
    fn keyword_search_finds_inserted_content() {
        let engine = StorageEngine::open_in_memory().unwrap();
        let id = Id::new().to_string();
        let now = 1_700_000_000_000;
        engine.insert_memory(&sample(&id, "u1", now)).unwrap();

        let hits = engine.search_memories_keyword("u1", "coffee", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.id, id);
    }

    #[test]
    fn archive_candidates_excludes_static_profile_and_future_rows() {
        let engine = StorageEngine::open_in_memory().unwrap();
        let now = 1_700_000_000_000;

        let old_id = Id::new().to_string();
        engine.insert_memory(&sample(&old_id, "u1", now - 1000)).unwrap();

        let mut profile = sample(&Id::new().to_string(), "u1", now - 1000);
        profile.memory_type = MemoryType::StaticProfile;
        engine.insert_memory(&profile).unwrap();

        let recent_id = Id::new().to_string();
        engine.insert_memory(&sample(&recent_id, "u1", now + 1000)).unwrap();

        let candidates = engine.list_archive_candidates(now).unwrap();
        let ids: Vec<String> = candidates.into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![old_id]);
    }

    #[test]
    fn superseded_memories_lists_only_non_latest_superseded_rows() {
        let engine = StorageEngine::open_in_memory().unwrap();
        let now = 1_700_000_000_000;
        let id = Id::new().to_string();
        engine.insert_memory(&sample(&id, "u1", now)).unwrap();
        engine.supersede_memory(&id, now + 1).unwrap();

        let still_latest_id = Id::new().to_string();
        engine.insert_memory(&sample(&still_latest_id, "u1", now)).unwrap();

        let superseded = engine.list_superseded_memories().unwrap();
        assert_eq!(superseded.len(), 1);
        assert_eq!(superseded[0].id, id);
    }
}

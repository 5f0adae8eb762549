use std::str::FromStr;

use reverie_core::types::{MessageRole, Session, SessionMessage, SessionSummary};
use rusqlite::{params, OptionalExtension, Row};

use crate::codec::{decode_embedding, encode_embedding};
use crate::engine::StorageEngine;
use crate::error::{Result, StorageError};

impl StorageEngine {
    pub fn insert_session(&self, s: &Session) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO sessions (id, user_id, source, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![s.id, s.user_id, s.source, s.created_at],
        )?;
        Ok(())
    }

    pub fn get_session(&self, id: &str) -> Result<Session> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, user_id, source, created_at FROM sessions WHERE id = ?1",
            params![id],
            |row| {
                Ok(Session {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    source: row.get(2)?,
                    created_at: row.get(3)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| StorageError::SessionNotFound { id: id.to_string() })
    }

    /// Sessions with no recorded summary, created before `cutoff_ms`, with
    /// at least `min_messages` — the deep tick's summarization candidates.
    pub fn list_sessions_needing_summary(&self, cutoff_ms: i64, min_messages: u64) -> Result<Vec<Session>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT s.id, s.user_id, s.source, s.created_at FROM sessions s
             WHERE s.created_at < ?1
               AND NOT EXISTS (SELECT 1 FROM session_summaries ss WHERE ss.session_id = s.id)
               AND (SELECT COUNT(*) FROM session_messages sm WHERE sm.session_id = s.id) >= ?2
             ORDER BY s.created_at ASC",
        )?;
        let rows = stmt.query_map(params![cutoff_ms, min_messages as i64], |row| {
            Ok(Session {
                id: row.get(0)?,
                user_id: row.get(1)?,
                source: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Distinct user ids that have at least one session, for the deep
    /// tick's behavioral-pattern inference sweep.
    pub fn list_active_user_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT DISTINCT user_id FROM sessions WHERE user_id != ''")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// All of a user's session messages across every session, oldest
    /// first — the raw stream the incremental behavioral-pattern inference
    /// folds into its running aggregates past `last_analyzed_count`.
    pub fn list_session_messages_for_user(&self, user_id: &str) -> Result<Vec<SessionMessage>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT sm.id, sm.session_id, sm.role, sm.content, sm.created_at
             FROM session_messages sm
             JOIN sessions s ON s.id = sm.session_id
             WHERE s.user_id = ?1
             ORDER BY sm.created_at ASC",
        )?;
        let rows = stmt.query_map(params![user_id], row_to_message)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn append_session_message(&self, m: &SessionMessage) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO session_messages (id, session_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![m.id, m.session_id, m.role.to_string(), m.content, m.created_at],
        )?;
        Ok(())
    }

    /// Messages for a session, oldest first.
    pub fn list_session_messages(&self, session_id: &str) -> Result<Vec<SessionMessage>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, role, content, created_at FROM session_messages
             WHERE session_id = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![session_id], row_to_message)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn count_session_messages(&self, session_id: &str) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM session_messages WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// `true` if a summary has already been recorded for this session —
    /// the at-most-once guard for session summarization.
    pub fn has_session_summary(&self, session_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM session_summaries WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn insert_session_summary(&self, s: &SessionSummary) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO session_summaries
                (session_id, user_id, summary, topics, message_count, duration_ms, embedding, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                s.session_id,
                s.user_id,
                s.summary,
                serde_json::to_string(&s.topics)?,
                s.message_count,
                s.duration_ms,
                s.embedding.as_ref().map(|e| encode_embedding(e)),
                s.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn list_session_summaries(&self, user_id: &str, limit: usize) -> Result<Vec<SessionSummary>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT session_id, user_id, summary, topics, message_count, duration_ms, embedding, created_at
             FROM session_summaries WHERE user_id = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![user_id, limit as i64], row_to_summary)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<SessionMessage> {
    let role_str: String = row.get(2)?;
    Ok(SessionMessage {
        id: row.get(0)?,
        session_id: row.get(1)?,
        role: MessageRole::from_str(&role_str).unwrap_or(MessageRole::User),
        content: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn row_to_summary(row: &Row<'_>) -> rusqlite::Result<SessionSummary> {
    let topics_str: String = row.get(3)?;
    let embedding_bytes: Option<Vec<u8>> = row.get(6)?;
    Ok(SessionSummary {
        session_id: row.get(0)?,
        user_id: row.get(1)?,
        summary: row.get(2)?,
        topics: serde_json::from_str(&topics_str).unwrap_or_default(),
        message_count: row.get(4)?,
        duration_ms: row.get(5)?,
        embedding: embedding_bytes.map(|b| decode_embedding(&b)),
        created_at: row.get(7)?,
    })
}

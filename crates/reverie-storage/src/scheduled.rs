use std::collections::HashMap;
use std::str::FromStr;

use reverie_core::types::{
    BoardStatus, RecurringSpec, ScheduledItem, ScheduledItemKind, ScheduledItemResult,
    ScheduledItemSource, ScheduledItemStatus,
};
use rusqlite::{params, OptionalExtension, Row};

use crate::engine::StorageEngine;
use crate::error::{Result, StorageError};

impl StorageEngine {
    pub fn insert_scheduled_item(&self, item: &ScheduledItem) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        insert_item(&conn, item)?;
        Ok(())
    }

    pub fn get_scheduled_item(&self, id: &str) -> Result<ScheduledItem> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM scheduled_items WHERE id = ?1",
            params![id],
            row_to_item,
        )
        .optional()?
        .ok_or_else(|| StorageError::ScheduledItemNotFound { id: id.to_string() })
    }

    pub fn delete_scheduled_item(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM scheduled_items WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Atomic pending→processing transition. Returns the post-write rows —
    /// concurrent callers racing this method observe disjoint sets because
    /// the select and update happen inside one transaction.
    pub fn claim_due_scheduled_items(&self, now_ms: i64) -> Result<Vec<ScheduledItem>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let ids: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM scheduled_items WHERE status = 'pending' AND trigger_at <= ?1",
            )?;
            let rows = stmt.query_map(params![now_ms], |row| row.get::<_, String>(0))?;
            rows.filter_map(|r| r.ok()).collect()
        };

        for id in &ids {
            tx.execute(
                "UPDATE scheduled_items SET status = 'processing', updated_at = ?2, attempts = attempts + 1 WHERE id = ?1",
                params![id, now_ms],
            )?;
        }

        let claimed: Vec<ScheduledItem> = {
            let mut stmt = tx.prepare("SELECT * FROM scheduled_items WHERE id = ?1")?;
            ids.iter()
                .filter_map(|id| stmt.query_row(params![id], row_to_item).ok())
                .collect()
        };

        tx.commit()?;
        Ok(claimed)
    }

    /// Sweep stale `pending`/`processing` rows to `expired`. Also recovers
    /// rows orphaned by a crash mid-`processing` — recovery here means
    /// expiration, never replay.
    pub fn expire_old_scheduled_items(&self, now_ms: i64, max_age_ms: i64) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let cutoff = now_ms - max_age_ms;
        let affected = conn.execute(
            "UPDATE scheduled_items SET status = 'expired', updated_at = ?1
             WHERE status IN ('pending', 'processing') AND trigger_at < ?2",
            params![now_ms, cutoff],
        )?;
        Ok(affected as u64)
    }

    /// Collapse pending rows sharing `(user_id, normalized message, recurring
    /// key)` into the one with the earliest `trigger_at`. Running this twice
    /// in a row is a no-op the second time — there's nothing left to merge.
    pub fn consolidate_duplicate_scheduled_items(&self, now_ms: i64) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, message, recurring, trigger_at FROM scheduled_items WHERE status = 'pending'",
        )?;
        let rows: Vec<(String, String, String, Option<String>, i64)> = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            })?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);

        let mut groups: HashMap<(String, String, Option<String>), Vec<(String, i64)>> = HashMap::new();
        for (id, user_id, message, recurring, trigger_at) in rows {
            let key = (user_id, normalize_message(&message), recurring);
            groups.entry(key).or_default().push((id, trigger_at));
        }

        let mut removed = 0u64;
        for (_, mut items) in groups {
            if items.len() < 2 {
                continue;
            }
            items.sort_by_key(|(_, trigger_at)| *trigger_at);
            let (_keep_id, _) = items.remove(0);
            for (dup_id, _) in items {
                conn.execute("DELETE FROM scheduled_items WHERE id = ?1", params![dup_id])?;
                removed += 1;
            }
        }

        let _ = now_ms;
        Ok(removed)
    }

    pub fn has_similar_pending_scheduled_item(&self, user_id: &str, message: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let normalized = normalize_message(message);
        let mut stmt = conn.prepare(
            "SELECT message FROM scheduled_items WHERE user_id = ?1 AND status = 'pending'",
        )?;
        let rows = stmt.query_map(params![user_id], |row| row.get::<_, String>(0))?;
        for row in rows.filter_map(|r| r.ok()) {
            if normalize_message(&row) == normalized {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn mark_scheduled_item_fired(&self, id: &str, now_ms: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE scheduled_items SET status = 'fired', fired_at = ?2, updated_at = ?2 WHERE id = ?1",
            params![id, now_ms],
        )?;
        Ok(())
    }

    pub fn mark_scheduled_item_acted(&self, id: &str, now_ms: i64, result: &ScheduledItemResult) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE scheduled_items SET status = 'acted', acted_at = ?2, result = ?3, updated_at = ?2 WHERE id = ?1",
            params![id, now_ms, serde_json::to_string(result)?],
        )?;
        Ok(())
    }

    /// Reset a claimed item back to `pending` after a delivery failure so
    /// the next tick retries it.
    pub fn reset_scheduled_item_to_pending(&self, id: &str, now_ms: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE scheduled_items SET status = 'pending', updated_at = ?2 WHERE id = ?1",
            params![id, now_ms],
        )?;
        Ok(())
    }

    pub fn update_scheduled_item_board(&self, id: &str, board_status: BoardStatus, now_ms: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE scheduled_items SET board_status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, board_status.to_string(), now_ms],
        )?;
        Ok(())
    }

    /// Reset a claimed item back to `pending` at a new `trigger_at` — used
    /// for quiet-hours deferral and dependency waits, which both need to
    /// push the item into the future rather than just retry immediately.
    pub fn reschedule_scheduled_item(
        &self,
        id: &str,
        trigger_at: i64,
        board_status: Option<BoardStatus>,
        now_ms: i64,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        match board_status {
            Some(bs) => conn.execute(
                "UPDATE scheduled_items SET status = 'pending', trigger_at = ?2, board_status = ?3, updated_at = ?4 WHERE id = ?1",
                params![id, trigger_at, bs.to_string(), now_ms],
            )?,
            None => conn.execute(
                "UPDATE scheduled_items SET status = 'pending', trigger_at = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, trigger_at, now_ms],
            )?,
        };
        Ok(())
    }

    /// Overwrite `result` in place without touching `status`/`acted_at` —
    /// used by the morning digest to stamp `notifiedAt` on results whose
    /// item may already be `acted` from an earlier engagement check.
    pub fn update_scheduled_item_result(&self, id: &str, result: &ScheduledItemResult, now_ms: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE scheduled_items SET result = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, serde_json::to_string(result)?, now_ms],
        )?;
        Ok(())
    }

    pub fn list_scheduled_items_for_user(&self, user_id: &str) -> Result<Vec<ScheduledItem>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM scheduled_items WHERE user_id = ?1 ORDER BY trigger_at ASC",
        )?;
        let rows = stmt.query_map(params![user_id], row_to_item)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

fn insert_item(conn: &rusqlite::Connection, item: &ScheduledItem) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO scheduled_items
            (id, user_id, session_id, source, kind, item_type, message, context, trigger_at,
             status, board_status, recurring, source_memory_id, task_config, depends_on,
             priority, labels, goal_id, result, fired_at, acted_at, created_at, updated_at, attempts)
         VALUES
            (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
             ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24)",
        params![
            item.id,
            item.user_id,
            item.session_id,
            item.source.to_string(),
            item.kind.to_string(),
            item.item_type,
            item.message,
            item.context.as_ref().map(|c| serde_json::to_string(c).unwrap_or_default()),
            item.trigger_at,
            item.status.to_string(),
            item.board_status.to_string(),
            item.recurring.as_ref().map(|r| serde_json::to_string(r).unwrap_or_default()),
            item.source_memory_id,
            item.task_config.as_ref().map(|v| v.to_string()),
            serde_json::to_string(&item.depends_on).unwrap_or_default(),
            item.priority,
            serde_json::to_string(&item.labels).unwrap_or_default(),
            item.goal_id,
            item.result.as_ref().map(|r| serde_json::to_string(r).unwrap_or_default()),
            item.fired_at,
            item.acted_at,
            item.created_at,
            item.updated_at,
            item.attempts,
        ],
    )?;
    Ok(())
}

fn row_to_item(row: &Row<'_>) -> rusqlite::Result<ScheduledItem> {
    let source_str: String = row.get("source")?;
    let kind_str: String = row.get("kind")?;
    let status_str: String = row.get("status")?;
    let board_status_str: String = row.get("board_status")?;
    let context_str: Option<String> = row.get("context")?;
    let recurring_str: Option<String> = row.get("recurring")?;
    let task_config_str: Option<String> = row.get("task_config")?;
    let depends_on_str: String = row.get("depends_on")?;
    let labels_str: String = row.get("labels")?;
    let result_str: Option<String> = row.get("result")?;

    Ok(ScheduledItem {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        session_id: row.get("session_id")?,
        source: ScheduledItemSource::from_str(&source_str).unwrap_or(ScheduledItemSource::User),
        kind: ScheduledItemKind::from_str(&kind_str).unwrap_or(ScheduledItemKind::Nudge),
        item_type: row.get("item_type")?,
        message: row.get("message")?,
        context: context_str.and_then(|s| serde_json::from_str(&s).ok()),
        trigger_at: row.get("trigger_at")?,
        status: ScheduledItemStatus::from_str(&status_str).unwrap_or(ScheduledItemStatus::Pending),
        board_status: BoardStatus::from_str(&board_status_str).unwrap_or(BoardStatus::Scheduled),
        recurring: recurring_str.and_then(|s| serde_json::from_str::<RecurringSpec>(&s).ok()),
        source_memory_id: row.get("source_memory_id")?,
        task_config: task_config_str.and_then(|s| serde_json::from_str(&s).ok()),
        depends_on: serde_json::from_str(&depends_on_str).unwrap_or_default(),
        priority: row.get("priority")?,
        labels: serde_json::from_str(&labels_str).unwrap_or_default(),
        goal_id: row.get("goal_id")?,
        result: result_str.and_then(|s| serde_json::from_str::<ScheduledItemResult>(&s).ok()),
        fired_at: row.get("fired_at")?,
        acted_at: row.get("acted_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        attempts: row.get("attempts")?,
    })
}

/// Whitespace-collapse and lowercase a message for dedup comparison.
fn normalize_message(message: &str) -> String {
    message.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reverie_core::Id;

    fn item(id: &str, user: &str, message: &str, trigger_at: i64) -> ScheduledItem {
        ScheduledItem {
            id: id.to_string(),
            user_id: user.to_string(),
            session_id: None,
            source: ScheduledItemSource::User,
            kind: ScheduledItemKind::Nudge,
            item_type: "reminder".to_string(),
            message: message.to_string(),
            context: None,
            trigger_at,
            status: ScheduledItemStatus::Pending,
            board_status: BoardStatus::Scheduled,
            recurring: None,
            source_memory_id: None,
            task_config: None,
            depends_on: vec![],
            priority: 0,
            labels: vec![],
            goal_id: None,
            result: None,
            fired_at: None,
            acted_at: None,
            created_at: trigger_at,
            updated_at: trigger_at,
            attempts: 0,
        }
    }

    #[test]
    fn claim_is_atomic_and_flips_status() {
        let engine = StorageEngine::open_in_memory().unwrap();
        let now = 1_700_000_000_000;
        let id = Id::new().to_string();
        engine.insert_scheduled_item(&item(&id, "u1", "take meds", now - 1000)).unwrap();

        let claimed = engine.claim_due_scheduled_items(now).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].status, ScheduledItemStatus::Processing);

        let again = engine.claim_due_scheduled_items(now).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn expire_sweeps_stale_pending_and_processing() {
        let engine = StorageEngine::open_in_memory().unwrap();
        let now = 1_700_000_000_000;
        let day_ms = 24 * 60 * 60 * 1000;
        let id = Id::new().to_string();
        engine.insert_scheduled_item(&item(&id, "u1", "old reminder", now - 2 * day_ms)).unwrap();

        let affected = engine.expire_old_scheduled_items(now, day_ms).unwrap();
        assert_eq!(affected, 1);
        assert_eq!(engine.get_scheduled_item(&id).unwrap().status, ScheduledItemStatus::Expired);
    }

    #[test]
    fn consolidate_keeps_earliest_and_is_idempotent() {
        let engine = StorageEngine::open_in_memory().unwrap();
        let now = 1_700_000_000_000;
        let a = Id::new().to_string();
        let b = Id::new().to_string();
        engine.insert_scheduled_item(&item(&a, "u1", "Drink Water", now + 1000)).unwrap();
        engine.insert_scheduled_item(&item(&b, "u1", "drink   water", now)).unwrap();

        let removed = engine.consolidate_duplicate_scheduled_items(now).unwrap();
        assert_eq!(removed, 1);
        assert!(engine.get_scheduled_item(&b).is_ok());
        assert!(engine.get_scheduled_item(&a).is_err());

        let removed_again = engine.consolidate_duplicate_scheduled_items(now).unwrap();
        assert_eq!(removed_again, 0);
    }
}

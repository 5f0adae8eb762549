use rusqlite::{params, OptionalExtension};

use crate::engine::StorageEngine;
use crate::error::Result;

/// Small key-value vault for runtime secrets (channel bot tokens, refreshed
/// OAuth credentials) that must survive a restart but don't belong in the
/// static TOML config.
impl StorageEngine {
    pub fn get_runtime_key(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT value FROM runtime_keys WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn set_runtime_key(&self, key: &str, value: &str, now_ms: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO runtime_keys (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now_ms],
        )?;
        Ok(())
    }

    pub fn delete_runtime_key(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM runtime_keys WHERE key = ?1", params![key])?;
        Ok(())
    }
}

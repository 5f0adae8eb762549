use std::sync::Mutex;

use rusqlite::Connection;

use crate::error::Result;
use crate::migrations;

/// Single-writer storage engine. Every subsystem crate (memory, relations,
/// extract, gardener, scheduler, proactive) talks to SQLite exclusively
/// through a `StorageEngine`, never by opening their own connection — this
/// keeps the WAL-mode single writer invariant in one place.
pub struct StorageEngine {
    pub(crate) conn: Mutex<Connection>,
}

impl StorageEngine {
    /// Open (or create) the database at `path` and bring it up to the
    /// latest schema version.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::configure(&conn)?;
        migrations::apply_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory engine for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn)?;
        migrations::apply_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn configure(conn: &Connection) -> Result<()> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_applies_migrations() {
        let engine = StorageEngine::open_in_memory().unwrap();
        let conn = engine.conn.lock().unwrap();
        let version = migrations::get_current_version(&conn).unwrap();
        assert_eq!(version, 3);
    }
}

//! Schema migrations for the storage layer.

use rusqlite::Connection;

use crate::error::Result;

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema: memories, relations, sessions, scheduled items, profile",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "FTS5 keyword index over memory content",
        up: MIGRATION_V2_UP,
    },
    Migration {
        version: 3,
        description: "user_id on sessions, for gardener session discovery and behavioral inference",
        up: MIGRATION_V3_UP,
    },
];

#[derive(Debug, Clone)]
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub up: &'static str,
}

const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS memories (
    id               TEXT PRIMARY KEY,
    user_id          TEXT NOT NULL,
    content          TEXT NOT NULL,
    category         TEXT NOT NULL,
    memory_type      TEXT NOT NULL,
    importance       INTEGER NOT NULL DEFAULT 5,
    confidence       REAL NOT NULL DEFAULT 0.8,
    prominence       REAL NOT NULL DEFAULT 0.5,
    access_count     INTEGER NOT NULL DEFAULT 0,
    times_confirmed  INTEGER NOT NULL DEFAULT 0,
    is_latest        INTEGER NOT NULL DEFAULT 1,
    source           TEXT NOT NULL,
    source_chunk     TEXT,
    learned_from     TEXT,
    document_date    INTEGER NOT NULL,
    event_date       INTEGER,
    last_accessed    INTEGER,
    created_at       INTEGER NOT NULL,
    updated_at       INTEGER NOT NULL,
    embedding        BLOB,
    embedding_model  TEXT,
    contradiction_ids TEXT NOT NULL DEFAULT '[]',
    metadata         TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_memories_user ON memories(user_id, is_latest);
CREATE INDEX IF NOT EXISTS idx_memories_category ON memories(user_id, category);
CREATE INDEX IF NOT EXISTS idx_memories_document_date ON memories(document_date);

CREATE TABLE IF NOT EXISTS memory_relations (
    id              TEXT PRIMARY KEY,
    source_id       TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    target_id       TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    relation_type   TEXT NOT NULL,
    confidence      REAL NOT NULL,
    created_at      INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_relations_source ON memory_relations(source_id);
CREATE INDEX IF NOT EXISTS idx_relations_target ON memory_relations(target_id);
CREATE INDEX IF NOT EXISTS idx_relations_type ON memory_relations(relation_type);

CREATE TABLE IF NOT EXISTS sessions (
    id          TEXT PRIMARY KEY,
    source      TEXT NOT NULL,
    created_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS session_messages (
    id          TEXT PRIMARY KEY,
    session_id  TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
    role        TEXT NOT NULL,
    content     TEXT NOT NULL,
    created_at  INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_session_messages_session ON session_messages(session_id, created_at);

CREATE TABLE IF NOT EXISTS session_summaries (
    session_id      TEXT PRIMARY KEY REFERENCES sessions(id) ON DELETE CASCADE,
    user_id         TEXT NOT NULL,
    summary         TEXT NOT NULL,
    topics          TEXT NOT NULL DEFAULT '[]',
    message_count   INTEGER NOT NULL,
    duration_ms     INTEGER NOT NULL,
    embedding       BLOB,
    created_at      INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_session_summaries_user ON session_summaries(user_id);

CREATE TABLE IF NOT EXISTS scheduled_items (
    id                TEXT PRIMARY KEY,
    user_id           TEXT NOT NULL,
    session_id        TEXT,
    source            TEXT NOT NULL,
    kind              TEXT NOT NULL,
    item_type         TEXT NOT NULL,
    message           TEXT NOT NULL,
    context           TEXT,
    trigger_at        INTEGER NOT NULL,
    status            TEXT NOT NULL DEFAULT 'pending',
    board_status      TEXT NOT NULL DEFAULT 'scheduled',
    recurring         TEXT,
    source_memory_id  TEXT,
    task_config       TEXT,
    depends_on        TEXT NOT NULL DEFAULT '[]',
    priority          INTEGER NOT NULL DEFAULT 0,
    labels            TEXT NOT NULL DEFAULT '[]',
    goal_id           TEXT,
    result            TEXT,
    fired_at          INTEGER,
    acted_at          INTEGER,
    created_at        INTEGER NOT NULL,
    updated_at        INTEGER NOT NULL,
    attempts          INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_scheduled_due ON scheduled_items(status, trigger_at);
CREATE INDEX IF NOT EXISTS idx_scheduled_user ON scheduled_items(user_id, board_status);

CREATE TABLE IF NOT EXISTS dynamic_profile (
    user_id               TEXT PRIMARY KEY,
    recent_topics         TEXT NOT NULL DEFAULT '[]',
    active_projects       TEXT NOT NULL DEFAULT '[]',
    current_mood          TEXT,
    last_interaction_at   INTEGER
);

CREATE TABLE IF NOT EXISTS behavioral_patterns (
    user_id                   TEXT PRIMARY KEY,
    communication_style       TEXT,
    expertise_areas           TEXT NOT NULL DEFAULT '[]',
    active_hours              TEXT NOT NULL DEFAULT '[]',
    response_preferences      TEXT NOT NULL DEFAULT '{}',
    message_frequency         REAL NOT NULL DEFAULT 0,
    session_engagement        REAL NOT NULL DEFAULT 0,
    topic_switch              REAL NOT NULL DEFAULT 0,
    response_length           REAL NOT NULL DEFAULT 0,
    affect_valence            REAL NOT NULL DEFAULT 0,
    affect_arousal            REAL NOT NULL DEFAULT 0,
    smoothed_affect_valence   REAL NOT NULL DEFAULT 0,
    smoothed_affect_arousal   REAL NOT NULL DEFAULT 0,
    last_analyzed_count       INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS runtime_keys (
    key         TEXT PRIMARY KEY,
    value       TEXT NOT NULL,
    updated_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_version (
    version      INTEGER PRIMARY KEY,
    applied_at   TEXT NOT NULL
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, datetime('now'));
"#;

const MIGRATION_V2_UP: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
    id UNINDEXED,
    content,
    content='memories',
    content_rowid='rowid',
    tokenize='porter ascii'
);

INSERT INTO memories_fts(rowid, id, content)
    SELECT rowid, id, content FROM memories WHERE is_latest = 1;

CREATE TRIGGER IF NOT EXISTS memories_ai AFTER INSERT ON memories BEGIN
    INSERT INTO memories_fts(rowid, id, content) VALUES (NEW.rowid, NEW.id, NEW.content);
END;

CREATE TRIGGER IF NOT EXISTS memories_ad AFTER DELETE ON memories BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, id, content) VALUES ('delete', OLD.rowid, OLD.id, OLD.content);
END;

CREATE TRIGGER IF NOT EXISTS memories_au AFTER UPDATE ON memories BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, id, content) VALUES ('delete', OLD.rowid, OLD.id, OLD.content);
    INSERT INTO memories_fts(rowid, id, content) VALUES (NEW.rowid, NEW.id, NEW.content);
END;

UPDATE schema_version SET version = 2, applied_at = datetime('now');
"#;

const MIGRATION_V3_UP: &str = r#"
ALTER TABLE sessions ADD COLUMN user_id TEXT NOT NULL DEFAULT '';

CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id, created_at);

UPDATE schema_version SET version = 3, applied_at = datetime('now');
"#;

pub fn get_current_version(conn: &Connection) -> Result<u32> {
    Ok(conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .or(Ok::<u32, rusqlite::Error>(0))?)
}

/// Apply pending migrations in order. Safe to call on every startup.
pub fn apply_migrations(conn: &Connection) -> Result<u32> {
    let current_version = get_current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                description = migration.description,
                "applying migration"
            );
            conn.execute_batch(migration.up)?;
            applied += 1;
        }
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_db_lands_on_latest_version() {
        let conn = Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();
        assert_eq!(get_current_version(&conn).unwrap(), 3);
    }

    #[test]
    fn applying_twice_is_a_no_op() {
        let conn = Connection::open_in_memory().unwrap();
        let first = apply_migrations(&conn).unwrap();
        let second = apply_migrations(&conn).unwrap();
        assert_eq!(first, 2);
        assert_eq!(second, 0);
    }
}

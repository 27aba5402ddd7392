//! v001 -- Initial schema creation.
//!
//! One `documents` table holds every JSON document, keyed by its
//! `collection/id` path, plus a `meta` table carrying the global commit
//! sequence used for optimistic-concurrency validation and ordering
//! tie-breaks.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Documents
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS documents (
    path       TEXT PRIMARY KEY NOT NULL,   -- "collection/id"
    collection TEXT NOT NULL,
    body       TEXT NOT NULL,               -- JSON object
    version    INTEGER NOT NULL,            -- bumped on every write
    seq        INTEGER NOT NULL,            -- commit sequence of last write
    updated_at TEXT NOT NULL                -- ISO-8601 / RFC-3339
);

CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);
CREATE INDEX IF NOT EXISTS idx_documents_collection_seq
    ON documents(collection, seq);

-- ----------------------------------------------------------------
-- Meta
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY NOT NULL,
    value INTEGER NOT NULL
);

INSERT OR IGNORE INTO meta (key, value) VALUES ('commit_seq', 0);
"#;

/// Apply the migration.
pub fn up(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(UP_SQL)
}

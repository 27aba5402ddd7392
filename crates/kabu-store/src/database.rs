//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] behind a mutex so
//! it can be shared across tasks, and guarantees that migrations are run
//! before any other operation.  Every committed write is announced on a
//! broadcast channel that feeds the live snapshot subscriptions.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use directories::ProjectDirs;
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::documents::{self, DocPath};
use crate::error::{Result, StoreError};
use crate::migrations;
use crate::query::Query;

/// Announcement of a committed write, carrying the global commit sequence and
/// the collections it touched.  Subscriptions use it to decide when to
/// re-deliver a snapshot.
#[derive(Debug, Clone)]
pub struct CommitEvent {
    pub seq: i64,
    pub collections: Vec<String>,
}

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Mutex<Connection>,
    commits: broadcast::Sender<CommitEvent>,
}

impl Database {
    /// Open (or create) the default application database.
    ///
    /// The database file is placed in the platform-appropriate data
    /// directory, e.g. `~/.local/share/kabu/kabu.db` on Linux.
    pub fn open_default() -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("com", "kabu", "kabu").ok_or(StoreError::NoDataDir)?;

        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        let db_path = data_dir.join("kabu.db");

        tracing::info!(path = %db_path.display(), "opening database");

        Self::open_at(&db_path)
    }

    /// Open (or create) a database at an explicit path.
    ///
    /// This is useful for tests and for embedding the store inside custom
    /// directory layouts.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Recommended SQLite settings.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        Self::from_connection(conn)
    }

    /// Open an in-memory database.  Used by tests and local tooling.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        migrations::run_migrations(&conn)?;

        let (commits, _) = broadcast::channel(256);

        Ok(Self {
            conn: Mutex::new(conn),
            commits,
        })
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Result<Option<PathBuf>> {
        Ok(self.conn()?.path().map(PathBuf::from))
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    pub(crate) fn commit_sender(&self) -> &broadcast::Sender<CommitEvent> {
        &self.commits
    }

    // ------------------------------------------------------------------
    // Single-document operations
    // ------------------------------------------------------------------

    /// Fetch a document, `None` if absent.
    pub fn get<T: DeserializeOwned>(&self, path: &DocPath) -> Result<Option<T>> {
        let conn = self.conn()?;
        match documents::read_doc(&conn, &path.key())? {
            Some(row) => Ok(Some(serde_json::from_value(row.body)?)),
            None => Ok(None),
        }
    }

    /// Create or fully replace a document.
    pub fn set<T: Serialize>(&self, path: &DocPath, value: &T) -> Result<()> {
        let body = serde_json::to_value(value)?;
        self.run_transaction(|tx| {
            tx.set_raw(path, body.clone());
            Ok::<_, StoreError>(())
        })
    }

    /// Merge fields into an existing document.  Fails with
    /// [`StoreError::NotFound`] if the document is absent.
    pub fn update(
        &self,
        path: &DocPath,
        fields: serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        self.run_transaction(|tx| {
            tx.update(path, fields.clone());
            Ok::<_, StoreError>(())
        })
    }

    /// Delete a document.  Returns `true` if it existed.
    pub fn delete(&self, path: &DocPath) -> Result<bool> {
        self.run_transaction(|tx| {
            let existing: Option<serde_json::Value> = tx.get(path)?;
            tx.delete(path);
            Ok::<_, StoreError>(existing.is_some())
        })
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Run a filtered, ordered query against a collection.
    pub fn query<T: DeserializeOwned>(&self, query: &Query) -> Result<Vec<T>> {
        let (_, docs) = self.query_with_seq(query)?;
        Ok(docs)
    }

    /// Run a query and also report the commit sequence it observed.
    pub(crate) fn query_with_seq<T: DeserializeOwned>(
        &self,
        query: &Query,
    ) -> Result<(i64, Vec<T>)> {
        let conn = self.conn()?;
        let seq = documents::current_seq(&conn)?;
        let mut rows = documents::collection_rows(&conn, query.collection_name())?;
        drop(conn);

        rows.retain(|(body, _)| query.matches(body));
        query.sort(&mut rows);

        let docs = rows
            .into_iter()
            .map(|(body, _)| serde_json::from_value(body).map_err(StoreError::from))
            .collect::<Result<Vec<T>>>()?;

        Ok((seq, docs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let db = Database::open_at(&path).expect("should open");
        assert!(db.path().unwrap().is_some());
    }

    #[test]
    fn set_get_update_delete() {
        let db = Database::open_in_memory().unwrap();
        let path = DocPath::new("rides", "r1");

        assert_eq!(db.get::<serde_json::Value>(&path).unwrap(), None);

        db.set(&path, &json!({ "status": "active", "price": 1500 }))
            .unwrap();

        let doc: serde_json::Value = db.get(&path).unwrap().unwrap();
        assert_eq!(doc["price"], 1500);

        let mut fields = serde_json::Map::new();
        fields.insert("status".to_string(), json!("completed"));
        db.update(&path, fields).unwrap();

        let doc: serde_json::Value = db.get(&path).unwrap().unwrap();
        assert_eq!(doc["status"], "completed");
        assert_eq!(doc["price"], 1500, "merge must keep untouched fields");

        assert!(db.delete(&path).unwrap());
        assert!(!db.delete(&path).unwrap());
    }

    #[test]
    fn update_missing_document_fails() {
        let db = Database::open_in_memory().unwrap();
        let path = DocPath::new("rides", "missing");

        let mut fields = serde_json::Map::new();
        fields.insert("status".to_string(), json!("cancelled"));

        let err = db.update(&path, fields).unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }
}

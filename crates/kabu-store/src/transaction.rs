//! Multi-document transactions with optimistic concurrency.
//!
//! A transaction closure reads through [`Transaction::get`] / [`Transaction::query`]
//! and buffers writes; nothing touches the database until the closure returns.
//! Each read records what it observed (a document version, or a collection
//! membership fingerprint).  Commit re-checks every record under a single
//! SQLite immediate transaction and applies the buffered writes atomically;
//! if anything changed underneath, the closure is re-run.  After the retry
//! budget the operation fails with [`StoreError::Conflict`].
//!
//! Reads are rejected once a write has been buffered, so a closure always
//! sees a plain read-then-write shape.

use rusqlite::{params, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::database::{CommitEvent, Database};
use crate::documents::{self, DocPath};
use crate::error::{Result, StoreError};
use crate::query::Query;

/// How many times a conflicting transaction closure is re-run before the
/// operation fails.
const RETRY_BUDGET: usize = 5;

enum ReadRecord {
    Doc {
        key: String,
        version: Option<i64>,
    },
    Collection {
        name: String,
        count: i64,
        max_seq: i64,
    },
}

enum WriteOp {
    Set(Value),
    Update(serde_json::Map<String, Value>),
    Delete,
}

enum CommitOutcome {
    Applied(CommitEvent),
    ReadOnly,
    Conflict,
}

/// In-flight transaction state: the read set and the buffered writes.
pub struct Transaction<'a> {
    db: &'a Database,
    reads: Vec<ReadRecord>,
    writes: Vec<(DocPath, WriteOp)>,
}

impl<'a> Transaction<'a> {
    fn new(db: &'a Database) -> Self {
        Self {
            db,
            reads: Vec::new(),
            writes: Vec::new(),
        }
    }

    /// Read a document, recording its version for commit-time validation.
    pub fn get<T: DeserializeOwned>(&mut self, path: &DocPath) -> Result<Option<T>> {
        self.ensure_no_writes()?;

        let conn = self.db.conn()?;
        let row = documents::read_doc(&conn, &path.key())?;
        drop(conn);

        self.reads.push(ReadRecord::Doc {
            key: path.key(),
            version: row.as_ref().map(|r| r.version),
        });

        match row {
            Some(row) => Ok(Some(serde_json::from_value(row.body)?)),
            None => Ok(None),
        }
    }

    /// Query a collection, recording its membership fingerprint so any
    /// insert, delete, or update in the collection invalidates the
    /// transaction.
    pub fn query<T: DeserializeOwned>(&mut self, query: &Query) -> Result<Vec<T>> {
        self.ensure_no_writes()?;

        let conn = self.db.conn()?;
        let (count, max_seq) = documents::collection_fingerprint(&conn, query.collection_name())?;
        let mut rows = documents::collection_rows(&conn, query.collection_name())?;
        drop(conn);

        self.reads.push(ReadRecord::Collection {
            name: query.collection_name().to_string(),
            count,
            max_seq,
        });

        rows.retain(|(body, _)| query.matches(body));
        query.sort(&mut rows);

        rows.into_iter()
            .map(|(body, _)| serde_json::from_value(body).map_err(StoreError::from))
            .collect()
    }

    /// Buffer a create-or-replace write.
    pub fn set<T: Serialize>(&mut self, path: &DocPath, value: &T) -> Result<()> {
        self.set_raw(path, serde_json::to_value(value)?);
        Ok(())
    }

    pub(crate) fn set_raw(&mut self, path: &DocPath, body: Value) {
        self.writes.push((path.clone(), WriteOp::Set(body)));
    }

    /// Buffer a field merge.  The document must exist at commit time.
    pub fn update(&mut self, path: &DocPath, fields: serde_json::Map<String, Value>) {
        self.writes.push((path.clone(), WriteOp::Update(fields)));
    }

    /// Buffer a delete.
    pub fn delete(&mut self, path: &DocPath) {
        self.writes.push((path.clone(), WriteOp::Delete));
    }

    fn ensure_no_writes(&self) -> Result<()> {
        if self.writes.is_empty() {
            Ok(())
        } else {
            Err(StoreError::ReadAfterWrite)
        }
    }

    fn into_parts(self) -> (Vec<ReadRecord>, Vec<(DocPath, WriteOp)>) {
        (self.reads, self.writes)
    }
}

impl Database {
    /// Run a closure as one atomic read-validate-write transaction.
    ///
    /// The closure may be re-run when a concurrent commit invalidates its
    /// reads, so it must be side-effect free apart from the transaction
    /// itself.  Domain errors returned by the closure abort immediately
    /// without retrying.
    pub fn run_transaction<T, E, F>(&self, mut f: F) -> std::result::Result<T, E>
    where
        E: From<StoreError>,
        F: FnMut(&mut Transaction<'_>) -> std::result::Result<T, E>,
    {
        for attempt in 0..RETRY_BUDGET {
            let mut tx = Transaction::new(self);
            let value = f(&mut tx)?;

            match self.try_commit(tx.into_parts())? {
                CommitOutcome::Applied(event) => {
                    // No receivers is fine; subscriptions come and go.
                    let _ = self.commit_sender().send(event);
                    return Ok(value);
                }
                CommitOutcome::ReadOnly => return Ok(value),
                CommitOutcome::Conflict => {
                    tracing::debug!(attempt, "transaction conflict, retrying");
                }
            }
        }

        Err(StoreError::Conflict.into())
    }

    fn try_commit(
        &self,
        (reads, writes): (Vec<ReadRecord>, Vec<(DocPath, WriteOp)>),
    ) -> Result<CommitOutcome> {
        let mut conn = self.conn()?;
        let sql_tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        // Validate the read set.  Dropping `sql_tx` without committing rolls
        // everything back.
        for read in &reads {
            match read {
                ReadRecord::Doc { key, version } => {
                    if documents::read_version(&sql_tx, key)? != *version {
                        return Ok(CommitOutcome::Conflict);
                    }
                }
                ReadRecord::Collection {
                    name,
                    count,
                    max_seq,
                } => {
                    if documents::collection_fingerprint(&sql_tx, name)? != (*count, *max_seq) {
                        return Ok(CommitOutcome::Conflict);
                    }
                }
            }
        }

        if writes.is_empty() {
            return Ok(CommitOutcome::ReadOnly);
        }

        let seq = documents::current_seq(&sql_tx)? + 1;
        let now = chrono::Utc::now().to_rfc3339();
        let mut collections: Vec<String> = Vec::new();

        for (path, op) in &writes {
            let key = path.key();
            match op {
                WriteOp::Set(body) => {
                    let next_version = documents::read_version(&sql_tx, &key)?.unwrap_or(0) + 1;
                    sql_tx.execute(
                        "INSERT INTO documents (path, collection, body, version, seq, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                         ON CONFLICT(path) DO UPDATE SET
                             body = excluded.body,
                             version = excluded.version,
                             seq = excluded.seq,
                             updated_at = excluded.updated_at",
                        params![
                            key,
                            path.collection(),
                            body.to_string(),
                            next_version,
                            seq,
                            now
                        ],
                    )?;
                }
                WriteOp::Update(fields) => {
                    let Some(mut row) = documents::read_doc(&sql_tx, &key)? else {
                        return Err(StoreError::NotFound);
                    };
                    documents::merge_fields(&mut row.body, fields)?;
                    sql_tx.execute(
                        "UPDATE documents
                         SET body = ?1, version = ?2, seq = ?3, updated_at = ?4
                         WHERE path = ?5",
                        params![row.body.to_string(), row.version + 1, seq, now, key],
                    )?;
                }
                WriteOp::Delete => {
                    sql_tx.execute("DELETE FROM documents WHERE path = ?1", params![key])?;
                }
            }

            if !collections.iter().any(|c| c == path.collection()) {
                collections.push(path.collection().to_string());
            }
        }

        sql_tx.execute(
            "UPDATE meta SET value = ?1 WHERE key = 'commit_seq'",
            params![seq],
        )?;
        sql_tx.commit()?;

        Ok(CommitOutcome::Applied(CommitEvent { seq, collections }))
    }
}

//! Document addressing and row mapping helpers.

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::error::{Result, StoreError};

/// Address of a document: a collection name plus a document id.
///
/// Collections may be nested (`chats/ride_x/messages`); the id is always the
/// final segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocPath {
    collection: String,
    id: String,
}

impl DocPath {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Primary key used in the `documents` table.
    pub(crate) fn key(&self) -> String {
        format!("{}/{}", self.collection, self.id)
    }
}

impl std::fmt::Display for DocPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// A document row as stored.
pub(crate) struct DocRow {
    pub body: Value,
    pub version: i64,
}

/// Read a single document row by path key.
pub(crate) fn read_doc(conn: &Connection, key: &str) -> Result<Option<DocRow>> {
    let row = conn
        .query_row(
            "SELECT body, version FROM documents WHERE path = ?1",
            params![key],
            |row| {
                let body: String = row.get(0)?;
                let version: i64 = row.get(1)?;
                Ok((body, version))
            },
        )
        .optional()?;

    match row {
        Some((body, version)) => Ok(Some(DocRow {
            body: serde_json::from_str(&body)?,
            version,
        })),
        None => Ok(None),
    }
}

/// Read the stored version of a document, `None` if absent.
pub(crate) fn read_version(conn: &Connection, key: &str) -> Result<Option<i64>> {
    let version = conn
        .query_row(
            "SELECT version FROM documents WHERE path = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(version)
}

/// All rows of a collection, as `(body, seq)` pairs.
pub(crate) fn collection_rows(conn: &Connection, collection: &str) -> Result<Vec<(Value, i64)>> {
    let mut stmt =
        conn.prepare("SELECT body, seq FROM documents WHERE collection = ?1")?;

    let rows = stmt.query_map(params![collection], |row| {
        let body: String = row.get(0)?;
        let seq: i64 = row.get(1)?;
        Ok((body, seq))
    })?;

    let mut docs = Vec::new();
    for row in rows {
        let (body, seq) = row?;
        docs.push((serde_json::from_str(&body)?, seq));
    }
    Ok(docs)
}

/// Membership fingerprint of a collection: `(row count, max seq)`.
///
/// Any insert, delete, or update within the collection changes the pair, so
/// recording it at query time and re-checking it at commit time detects both
/// membership and content changes.
pub(crate) fn collection_fingerprint(conn: &Connection, collection: &str) -> Result<(i64, i64)> {
    let pair = conn.query_row(
        "SELECT COUNT(*), COALESCE(MAX(seq), 0) FROM documents WHERE collection = ?1",
        params![collection],
        |row| {
            let count: i64 = row.get(0)?;
            let max_seq: i64 = row.get(1)?;
            Ok((count, max_seq))
        },
    )?;
    Ok(pair)
}

/// The global commit sequence.
pub(crate) fn current_seq(conn: &Connection) -> Result<i64> {
    let seq = conn.query_row(
        "SELECT value FROM meta WHERE key = 'commit_seq'",
        [],
        |row| row.get(0),
    )?;
    Ok(seq)
}

/// Shallow-merge `fields` into an object body.
pub(crate) fn merge_fields(
    body: &mut Value,
    fields: &serde_json::Map<String, Value>,
) -> Result<()> {
    let Some(object) = body.as_object_mut() else {
        return Err(StoreError::NotAnObject);
    };
    for (key, value) in fields {
        object.insert(key.clone(), value.clone());
    }
    Ok(())
}

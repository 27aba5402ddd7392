//! Live snapshot subscriptions.
//!
//! A subscription watches one query and delivers the full matching set as an
//! immutable snapshot: once immediately, then again after every commit that
//! touches the query's collection.  Delivery is at-least-once; a consumer
//! diffs snapshots by document id rather than assuming anything about what
//! changed.  Dropping the subscription releases the watcher task.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::database::Database;
use crate::query::Query;

/// One delivered result set, tagged with the commit sequence it observed.
#[derive(Debug, Clone)]
pub struct Snapshot<T> {
    pub seq: i64,
    pub docs: Vec<T>,
}

/// Handle to a live query.  Receive snapshots with [`Subscription::recv`];
/// drop the handle to unsubscribe.
pub struct Subscription<T> {
    rx: mpsc::Receiver<Snapshot<T>>,
    task: JoinHandle<()>,
}

impl<T> Subscription<T> {
    /// Wait for the next snapshot.  `None` means the watcher stopped (the
    /// database was dropped or an internal error was logged).
    pub async fn recv(&mut self) -> Option<Snapshot<T>> {
        self.rx.recv().await
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl Database {
    /// Subscribe to a query.  Must be called within a tokio runtime.
    pub fn subscribe<T>(self: &Arc<Self>, query: Query) -> Subscription<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(16);
        let mut commits = self.commit_sender().subscribe();
        let db = Arc::clone(self);

        let task = tokio::spawn(async move {
            match db.query_with_seq::<T>(&query) {
                Ok((seq, docs)) => {
                    if tx.send(Snapshot { seq, docs }).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!(collection = query.collection_name(), error = %e, "initial snapshot failed");
                    return;
                }
            }

            loop {
                match commits.recv().await {
                    Ok(event) => {
                        if !event
                            .collections
                            .iter()
                            .any(|c| c == query.collection_name())
                        {
                            continue;
                        }
                    }
                    // Fell behind the commit stream: resync with a fresh
                    // snapshot rather than replaying.
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "subscription lagged, resyncing");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }

                match db.query_with_seq::<T>(&query) {
                    Ok((seq, docs)) => {
                        if tx.send(Snapshot { seq, docs }).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(collection = query.collection_name(), error = %e, "snapshot query failed");
                        break;
                    }
                }
            }
        });

        Subscription { rx, task }
    }
}

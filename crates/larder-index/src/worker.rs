//! Background indexing worker.
//!
//! Consumes record events from a channel and feeds them through a
//! [`RecordIndexer`] on a dedicated thread, decoupling ingestion from the
//! read path. Processing errors are logged and counted, never fatal: one
//! malformed event must not stall the stream behind it.

use crate::indexer::{IndexOutcome, RecordIndexer};
use crate::event::RepoEvent;
use crate::processor::NotificationSink;
use crossbeam_channel::Receiver;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Shared counters for a running worker.
#[derive(Debug, Default)]
struct Counters {
    indexed: AtomicUsize,
    duplicates: AtomicUsize,
    deleted: AtomicUsize,
    errors: AtomicUsize,
}

/// Snapshot of worker statistics.
#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    /// Records newly indexed.
    pub indexed: usize,
    /// Duplicate events absorbed.
    pub duplicates: usize,
    /// Records deleted.
    pub deleted: usize,
    /// Events that failed processing.
    pub errors: usize,
}

/// Channel-driven indexing worker.
pub struct IndexerWorker {
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl IndexerWorker {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Start the worker, consuming from the event channel.
    ///
    /// Runs until the channel disconnects or [`IndexerWorker::stop`] is
    /// called. The indexer is moved onto the worker thread.
    pub fn start<N>(
        &self,
        indexer: RecordIndexer<N>,
        receiver: Receiver<RepoEvent>,
    ) -> thread::JoinHandle<()>
    where
        N: NotificationSink + 'static,
    {
        let running = Arc::clone(&self.running);
        let counters = Arc::clone(&self.counters);
        self.running.store(true, Ordering::SeqCst);

        thread::spawn(move || {
            tracing::info!("indexer worker started");

            while running.load(Ordering::SeqCst) {
                match receiver.recv_timeout(Duration::from_secs(1)) {
                    Ok(event) => match indexer.index_event(&event) {
                        Ok(IndexOutcome::Indexed) => {
                            counters.indexed.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(IndexOutcome::Duplicate) => {
                            counters.duplicates.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(IndexOutcome::Deleted) | Ok(IndexOutcome::Missing) => {
                            counters.deleted.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            counters.errors.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(uri = %event.uri, error = %e, "failed to index event");
                        }
                    },
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                        // Continue waiting
                    }
                    Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                        tracing::info!("event channel disconnected, stopping worker");
                        break;
                    }
                }
            }

            tracing::info!("indexer worker stopped");
        })
    }

    /// Stop the worker after it finishes the current event.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Get a snapshot of worker statistics.
    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            indexed: self.counters.indexed.load(Ordering::Relaxed),
            duplicates: self.counters.duplicates.load(Ordering::Relaxed),
            deleted: self.counters.deleted.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }
}

impl Default for IndexerWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use larder_core::Db;
    use serde_json::json;

    #[test]
    fn test_worker_drains_channel() {
        let db = Db::open_in_memory().unwrap();
        let indexer = RecordIndexer::new(db.clone());
        let worker = IndexerWorker::new();
        let (sender, receiver) = crossbeam_channel::unbounded();

        let handle = worker.start(indexer, receiver);

        for i in 0..3 {
            sender
                .send(RepoEvent {
                    kind: EventKind::Create,
                    uri: format!("at://did:plc:a/app.larder.feed.post/p{}", i),
                    cid: Some(format!("bafy{}", i)),
                    record: Some(json!({"text": "hi", "createdAt": "2024-03-01T10:00:00.000Z"})),
                    timestamp: Some("2024-03-01T12:00:00.000Z".to_string()),
                })
                .unwrap();
        }
        // Unparseable event: counted as an error, doesn't kill the worker.
        sender
            .send(RepoEvent {
                kind: EventKind::Create,
                uri: "at://did:plc:a/app.larder.feed.post/bad".to_string(),
                cid: None,
                record: None,
                timestamp: None,
            })
            .unwrap();

        drop(sender);
        handle.join().unwrap();

        let stats = worker.stats();
        assert_eq!(stats.indexed, 3);
        assert_eq!(stats.errors, 1);

        let count: i64 = db
            .with(|conn| -> crate::error::Result<i64> {
                conn.query_row("SELECT COUNT(*) FROM post", [], |row| row.get(0))
                    .map_err(Into::into)
            })
            .unwrap();
        assert_eq!(count, 3);
    }
}

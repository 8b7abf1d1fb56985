//! Larder indexing layer.
//!
//! This crate consumes record events from the repository network and
//! maintains the derived relational tables the serving path reads from.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  Event Sources  │  (JSONL backfill files, firehose subscription)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │  IndexerWorker  │  channel consumer on a dedicated thread
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │  RecordIndexer  │  one transaction per event
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ Record Plugins  │  post / repost / recipe post / revision / review
//! └─────────────────┘
//! ```
//!
//! Every plugin is idempotent: re-delivering an event produces the same
//! derived state with no duplicate rows. The record log is the source of
//! truth; all tables here can be rebuilt from it.

pub mod error;
pub mod event;
pub mod indexer;
pub mod plugins;
pub mod processor;
pub mod source;
pub mod worker;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use event::{EventKind, RepoEvent};
pub use indexer::{IndexOutcome, RecordIndexer};
pub use processor::{NoopNotifier, Notification, NotificationRemoval, NotificationSink, RecordPlugin};
pub use source::{EventSource, JsonlConfig, JsonlSource, SourceStats};
pub use worker::{IndexerWorker, WorkerStats};

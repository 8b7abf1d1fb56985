//! The record processor contract.
//!
//! One plugin per content collection. Each plugin knows how to project its
//! record type into derived tables; the generic drivers in this module wrap
//! that projection in the common flow: content-addressed duplicate check,
//! insert with `ON CONFLICT DO NOTHING`, feed_item maintenance, notification
//! emission, and per-subject aggregate recompute. The caller (the
//! [`RecordIndexer`](crate::indexer::RecordIndexer)) runs the whole flow
//! inside one transaction, so a crash can never leave a feed_item without
//! its content row or vice versa.
//!
//! # State machine
//!
//! Per content URI: `absent → indexed → (deleted)`. Immutable record types
//! are never updated in place; recipe edits arrive as new revision records
//! plus a head-pointer repoint.

use crate::error::Result;
use crate::IndexOutcome;
use larder_core::time::now;
use larder_core::uri::{Collection, RecordUri};
use rusqlite::{params, Connection};

/// One notification to emit as a side effect of indexing.
///
/// Delivery is out of scope here; processors only hand these to a
/// [`NotificationSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Recipient DID.
    pub did: String,
    /// Acting DID (who triggered the notification).
    pub author: String,
    /// URI of the record that caused the notification.
    pub record_uri: String,
    /// CID of the record that caused the notification.
    pub record_cid: String,
    /// Notification reason ("reply", "repost", "review").
    pub reason: &'static str,
    /// Subject the reason refers to, when applicable.
    pub reason_subject: Option<String>,
    /// Sort key of the triggering record.
    pub sort_at: String,
}

/// Notifications to retract when a record is deleted.
#[derive(Debug, Clone, Default)]
pub struct NotificationRemoval {
    /// Record URIs whose notifications should be withdrawn.
    pub to_delete: Vec<String>,
}

/// Side channel for notification emission.
///
/// Indexing calls into this; what happens next (fan-out, push, storage) is
/// somebody else's problem.
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, notifs: &[Notification]);
    fn remove(&self, record_uris: &[String]);
}

/// Sink that drops notifications on the floor (with a trace for debugging).
pub struct NoopNotifier;

impl NotificationSink for NoopNotifier {
    fn deliver(&self, notifs: &[Notification]) {
        if !notifs.is_empty() {
            tracing::trace!(count = notifs.len(), "dropping notifications (noop sink)");
        }
    }

    fn remove(&self, record_uris: &[String]) {
        if !record_uris.is_empty() {
            tracing::trace!(count = record_uris.len(), "dropping notification removals (noop sink)");
        }
    }
}

/// Per-collection indexing behavior.
///
/// All methods run inside the indexer's transaction and must be
/// idempotent-safe: a duplicate insert returns `Ok(None)`, never an error.
pub trait RecordPlugin {
    /// The collection this plugin indexes.
    const COLLECTION: Collection;

    /// Parsed record type consumed by this plugin.
    type Record;

    /// Row data returned from a successful insert or delete, fed to
    /// notification and aggregate hooks.
    type Indexed;

    /// Insert the record into derived tables.
    ///
    /// Returns `Ok(None)` when the row already exists (duplicate event).
    fn insert(
        conn: &Connection,
        uri: &RecordUri,
        cid: &str,
        record: &Self::Record,
        timestamp: &str,
    ) -> Result<Option<Self::Indexed>>;

    /// Content-addressed duplicate lookup: is there an existing record by
    /// the same author that this one duplicates (e.g. a second review of
    /// the same subject)? Returns the existing record's URI.
    fn find_duplicate(
        _conn: &Connection,
        _uri: &RecordUri,
        _record: &Self::Record,
    ) -> Result<Option<String>> {
        Ok(None)
    }

    /// Delete the record and its dependents from derived tables.
    ///
    /// Returns `Ok(None)` when no row existed.
    fn delete(conn: &Connection, uri: &RecordUri) -> Result<Option<Self::Indexed>>;

    /// Notifications to emit for a fresh insert.
    fn notifs_for_insert(_indexed: &Self::Indexed) -> Vec<Notification> {
        Vec::new()
    }

    /// Notifications to retract for a delete.
    fn notifs_for_delete(deleted: &Self::Indexed) -> NotificationRemoval;

    /// Recompute derived counts scoped to the affected subject.
    fn update_aggregates(_conn: &Connection, _indexed: &Self::Indexed) -> Result<()> {
        Ok(())
    }
}

/// Run the common insert flow for one plugin.
pub(crate) fn process_insert<P: RecordPlugin>(
    conn: &Connection,
    uri: &RecordUri,
    cid: &str,
    record: &P::Record,
    timestamp: &str,
    notifier: &dyn NotificationSink,
) -> Result<IndexOutcome> {
    // Content-addressed dedup: the schema can't express "one review per
    // (author, subject)", so it is enforced here before the row insert.
    if let Some(duplicate_of) = P::find_duplicate(conn, uri, record)? {
        if duplicate_of != uri.to_string() {
            conn.execute(
                "INSERT INTO duplicate_record (uri, cid, duplicate_of, indexed_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(uri) DO NOTHING",
                params![uri.to_string(), cid, duplicate_of, now()],
            )?;
            tracing::debug!(uri = %uri, duplicate_of = %duplicate_of, "record duplicates existing content");
            return Ok(IndexOutcome::Duplicate);
        }
    }

    match P::insert(conn, uri, cid, record, timestamp)? {
        Some(indexed) => {
            notifier.deliver(&P::notifs_for_insert(&indexed));
            P::update_aggregates(conn, &indexed)?;
            Ok(IndexOutcome::Indexed)
        }
        None => {
            tracing::debug!(uri = %uri, "record already indexed");
            Ok(IndexOutcome::Duplicate)
        }
    }
}

/// Run the common delete flow for one plugin.
pub(crate) fn process_delete<P: RecordPlugin>(
    conn: &Connection,
    uri: &RecordUri,
    notifier: &dyn NotificationSink,
) -> Result<IndexOutcome> {
    match P::delete(conn, uri)? {
        Some(deleted) => {
            let removal = P::notifs_for_delete(&deleted);
            notifier.remove(&removal.to_delete);
            P::update_aggregates(conn, &deleted)?;
            Ok(IndexOutcome::Deleted)
        }
        None => Ok(IndexOutcome::Missing),
    }
}

/// Insert the unified feed_item row for a feed-eligible record.
///
/// `uri` is the item's own identity (repost URI for reposts), `post_uri`
/// the subject it surfaces.
pub(crate) fn insert_feed_item(
    conn: &Connection,
    uri: &str,
    cid: &str,
    item_type: &str,
    post_uri: &str,
    originator_did: &str,
    sort_at: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO feed_item (uri, cid, type, post_uri, originator_did, sort_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(uri) DO NOTHING",
        params![uri, cid, item_type, post_uri, originator_did, sort_at],
    )?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Sink that records everything it is handed, for assertions.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub delivered: Mutex<Vec<Notification>>,
        pub removed: Mutex<Vec<String>>,
    }

    impl NotificationSink for RecordingNotifier {
        fn deliver(&self, notifs: &[Notification]) {
            self.delivered.lock().unwrap().extend_from_slice(notifs);
        }

        fn remove(&self, record_uris: &[String]) {
            self.removed.lock().unwrap().extend_from_slice(record_uris);
        }
    }
}

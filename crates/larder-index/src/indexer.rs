//! The record indexer: one transaction per record event.
//!
//! The indexer is the only writer to the derived tables. For every event it
//! opens a transaction covering the generic `record` row, the collection's
//! derived rows, the `feed_item` row, and (for reviews) the aggregate
//! recompute — a crash between any two of these cannot leave the index
//! torn. Duplicate events are absorbed as no-ops; the upstream log delivers
//! at-least-once.

use crate::error::{Error, Result};
use crate::event::{EventKind, RepoEvent};
use crate::plugins::{
    PostPlugin, RecipePostPlugin, RecipeRevisionPlugin, RepostPlugin, ReviewRatingPlugin,
};
use crate::processor::{process_delete, process_insert, NoopNotifier, NotificationSink};
use larder_core::record::RecordPayload;
use larder_core::time::{normalize_datetime, now};
use larder_core::uri::{Collection, RecordUri};
use larder_core::Db;
use rusqlite::{params, Connection};

/// What happened to a record event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    /// Fresh content, now indexed.
    Indexed,
    /// Already indexed (or duplicates existing content); absorbed as a no-op.
    Duplicate,
    /// Content removed from the index.
    Deleted,
    /// Delete for a record that was never indexed.
    Missing,
}

impl IndexOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Indexed => "indexed",
            Self::Duplicate => "duplicate",
            Self::Deleted => "deleted",
            Self::Missing => "missing",
        }
    }
}

/// Indexes record events into the derived tables.
pub struct RecordIndexer<N: NotificationSink = NoopNotifier> {
    db: Db,
    notifier: N,
}

impl RecordIndexer<NoopNotifier> {
    /// Create an indexer that discards notifications.
    pub fn new(db: Db) -> Self {
        Self {
            db,
            notifier: NoopNotifier,
        }
    }
}

impl<N: NotificationSink> RecordIndexer<N> {
    /// Create an indexer with a custom notification sink.
    pub fn with_notifier(db: Db, notifier: N) -> Self {
        Self { db, notifier }
    }

    /// Process one record event.
    ///
    /// # Errors
    ///
    /// Returns an error for unparseable URIs, incomplete events, and
    /// records that fail schema validation. Duplicates are NOT errors.
    pub fn index_event(&self, event: &RepoEvent) -> Result<IndexOutcome> {
        let uri = RecordUri::parse(&event.uri)?;
        metrics::counter!("index_records_total").increment(1);

        let outcome = match event.kind {
            EventKind::Create | EventKind::Update => {
                let incomplete = |reason: &str| Error::IncompleteEvent {
                    kind: event.kind.as_str(),
                    uri: event.uri.clone(),
                    reason: reason.to_string(),
                };
                let cid = event.cid.as_deref().ok_or_else(|| incomplete("missing cid"))?;
                let record = event
                    .record
                    .as_ref()
                    .ok_or_else(|| incomplete("missing record body"))?;
                let json = serde_json::to_string(record)?;
                let timestamp = event
                    .timestamp
                    .as_deref()
                    .and_then(normalize_datetime)
                    .unwrap_or_else(now);
                self.index_record(&uri, cid, &json, &timestamp)?
            }
            EventKind::Delete => self.delete_record(&uri)?,
        };

        match outcome {
            IndexOutcome::Indexed => metrics::counter!("index_records_indexed_total").increment(1),
            IndexOutcome::Duplicate => {
                metrics::counter!("index_records_duplicate_total").increment(1)
            }
            IndexOutcome::Deleted => metrics::counter!("index_records_deleted_total").increment(1),
            IndexOutcome::Missing => {}
        }
        tracing::debug!(uri = %uri, kind = event.kind.as_str(), outcome = outcome.as_str(), "processed record event");

        Ok(outcome)
    }

    /// Index a create/update for an already-parsed URI and raw record JSON.
    pub fn index_record(
        &self,
        uri: &RecordUri,
        cid: &str,
        json: &str,
        timestamp: &str,
    ) -> Result<IndexOutcome> {
        let payload = match RecordPayload::parse_valid(uri.collection(), json) {
            Ok(payload) => payload,
            Err(err) => {
                metrics::counter!("index_records_invalid_total").increment(1);
                return Err(err.into());
            }
        };

        self.db.with(|conn| -> Result<IndexOutcome> {
            let tx = conn.transaction()?;
            upsert_record_row(&tx, uri, cid, json, timestamp)?;
            let outcome = match &payload {
                RecordPayload::Post(record) => {
                    process_insert::<PostPlugin>(&tx, uri, cid, record, timestamp, &self.notifier)?
                }
                RecordPayload::Repost(record) => process_insert::<RepostPlugin>(
                    &tx,
                    uri,
                    cid,
                    record,
                    timestamp,
                    &self.notifier,
                )?,
                RecordPayload::RecipePost(record) => process_insert::<RecipePostPlugin>(
                    &tx,
                    uri,
                    cid,
                    record,
                    timestamp,
                    &self.notifier,
                )?,
                RecordPayload::RecipeRevision(record) => process_insert::<RecipeRevisionPlugin>(
                    &tx,
                    uri,
                    cid,
                    record,
                    timestamp,
                    &self.notifier,
                )?,
                RecordPayload::ReviewRating(record) => process_insert::<ReviewRatingPlugin>(
                    &tx,
                    uri,
                    cid,
                    record,
                    timestamp,
                    &self.notifier,
                )?,
            };
            tx.commit()?;
            Ok(outcome)
        })
    }

    /// Remove a record and everything derived from it.
    pub fn delete_record(&self, uri: &RecordUri) -> Result<IndexOutcome> {
        self.db.with(|conn| -> Result<IndexOutcome> {
            let tx = conn.transaction()?;
            let uri_str = uri.to_string();
            tx.execute("DELETE FROM record WHERE uri = ?1", [&uri_str])?;
            tx.execute("DELETE FROM duplicate_record WHERE uri = ?1", [&uri_str])?;
            let outcome = match uri.collection() {
                Collection::Post => process_delete::<PostPlugin>(&tx, uri, &self.notifier)?,
                Collection::Repost => process_delete::<RepostPlugin>(&tx, uri, &self.notifier)?,
                Collection::RecipePost => {
                    process_delete::<RecipePostPlugin>(&tx, uri, &self.notifier)?
                }
                Collection::RecipeRevision => {
                    process_delete::<RecipeRevisionPlugin>(&tx, uri, &self.notifier)?
                }
                Collection::ReviewRating => {
                    process_delete::<ReviewRatingPlugin>(&tx, uri, &self.notifier)?
                }
            };
            tx.commit()?;
            Ok(outcome)
        })
    }
}

/// Upsert the generic record-log mirror row.
fn upsert_record_row(
    conn: &Connection,
    uri: &RecordUri,
    cid: &str,
    json: &str,
    timestamp: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO record (uri, cid, did, collection, json, indexed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(uri) DO UPDATE SET
             cid = excluded.cid,
             json = excluded.json,
             indexed_at = excluded.indexed_at",
        params![uri.to_string(), cid, uri.did(), uri.collection().nsid(), json, timestamp],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::test_support::RecordingNotifier;
    use serde_json::json;

    const ALICE: &str = "did:plc:alice";
    const BOB: &str = "did:plc:bob";

    fn indexer() -> RecordIndexer {
        RecordIndexer::new(Db::open_in_memory().unwrap())
    }

    fn post_event(did: &str, rkey: &str, cid: &str, text: &str, created_at: &str) -> RepoEvent {
        RepoEvent {
            kind: EventKind::Create,
            uri: format!("at://{}/app.larder.feed.post/{}", did, rkey),
            cid: Some(cid.to_string()),
            record: Some(json!({"text": text, "createdAt": created_at})),
            timestamp: Some("2024-03-01T12:00:00.000Z".to_string()),
        }
    }

    fn recipe_event(did: &str, rkey: &str, cid: &str, title: &str) -> RepoEvent {
        RepoEvent {
            kind: EventKind::Create,
            uri: format!("at://{}/app.larder.feed.recipePost/{}", did, rkey),
            cid: Some(cid.to_string()),
            record: Some(json!({"title": title, "createdAt": "2024-03-01T10:00:00.000Z"})),
            timestamp: Some("2024-03-01T12:00:00.000Z".to_string()),
        }
    }

    fn revision_event(did: &str, rkey: &str, cid: &str, recipe_uri: &str, created_at: &str) -> RepoEvent {
        RepoEvent {
            kind: EventKind::Create,
            uri: format!("at://{}/app.larder.feed.recipeRevision/{}", did, rkey),
            cid: Some(cid.to_string()),
            record: Some(json!({
                "recipePostRef": {"uri": recipe_uri, "cid": "bafyrecipe"},
                "title": "snapshot",
                "createdAt": created_at,
            })),
            timestamp: Some("2024-03-01T12:00:00.000Z".to_string()),
        }
    }

    fn review_event(
        did: &str,
        rkey: &str,
        cid: &str,
        subject: &str,
        rating: Option<f64>,
        body: Option<&str>,
    ) -> RepoEvent {
        let mut record = json!({
            "subject": {"uri": subject, "cid": "bafysubject"},
            "createdAt": "2024-03-01T11:00:00.000Z",
        });
        if let Some(rating) = rating {
            record["reviewRating"] = json!(rating);
        }
        if let Some(body) = body {
            record["reviewBody"] = json!(body);
        }
        RepoEvent {
            kind: EventKind::Create,
            uri: format!("at://{}/app.larder.feed.reviewRating/{}", did, rkey),
            cid: Some(cid.to_string()),
            record: Some(record),
            timestamp: Some("2024-03-01T12:00:00.000Z".to_string()),
        }
    }

    fn delete_event(uri: &str) -> RepoEvent {
        RepoEvent {
            kind: EventKind::Delete,
            uri: uri.to_string(),
            cid: None,
            record: None,
            timestamp: None,
        }
    }

    fn count(indexer: &RecordIndexer, sql: &str) -> i64 {
        indexer
            .db
            .with(|conn| -> Result<i64> {
                conn.query_row(sql, [], |row| row.get(0)).map_err(Into::into)
            })
            .unwrap()
    }

    fn head_of(indexer: &RecordIndexer, recipe_uri: &str) -> Option<String> {
        use rusqlite::OptionalExtension;
        indexer
            .db
            .with(|conn| -> Result<Option<String>> {
                conn.query_row(
                    "SELECT recipe_revision_uri FROM recipe_head_revision WHERE recipe_post_uri = ?1",
                    [recipe_uri],
                    |row| row.get(0),
                )
                .optional()
                .map_err(Into::into)
            })
            .unwrap()
    }

    #[test]
    fn test_reindexing_same_record_is_idempotent() {
        let idx = indexer();
        let event = post_event(ALICE, "p1", "bafy1", "hello", "2024-03-01T10:00:00.000Z");

        assert_eq!(idx.index_event(&event).unwrap(), IndexOutcome::Indexed);
        assert_eq!(idx.index_event(&event).unwrap(), IndexOutcome::Duplicate);

        assert_eq!(count(&idx, "SELECT COUNT(*) FROM post"), 1);
        assert_eq!(count(&idx, "SELECT COUNT(*) FROM feed_item"), 1);
        assert_eq!(count(&idx, "SELECT COUNT(*) FROM record"), 1);
    }

    #[test]
    fn test_post_delete_removes_feed_item_atomically() {
        let idx = indexer();
        let event = post_event(ALICE, "p1", "bafy1", "hello", "2024-03-01T10:00:00.000Z");
        idx.index_event(&event).unwrap();

        let outcome = idx.index_event(&delete_event(&event.uri)).unwrap();
        assert_eq!(outcome, IndexOutcome::Deleted);
        assert_eq!(count(&idx, "SELECT COUNT(*) FROM post"), 0);
        assert_eq!(count(&idx, "SELECT COUNT(*) FROM feed_item"), 0);
        assert_eq!(count(&idx, "SELECT COUNT(*) FROM record"), 0);

        // Deleting again is a quiet miss.
        assert_eq!(
            idx.index_event(&delete_event(&event.uri)).unwrap(),
            IndexOutcome::Missing
        );
    }

    #[test]
    fn test_sort_at_is_earlier_of_created_and_indexed() {
        let idx = indexer();
        // createdAt far in the future relative to the indexing timestamp.
        let event = post_event(ALICE, "p1", "bafy1", "from the future", "2030-01-01T00:00:00.000Z");
        idx.index_event(&event).unwrap();

        let sort: String = idx
            .db
            .with(|conn| -> Result<String> {
                conn.query_row("SELECT sort_at FROM feed_item", [], |row| row.get(0))
                    .map_err(Into::into)
            })
            .unwrap();
        assert_eq!(sort, "2024-03-01T12:00:00.000Z");
    }

    #[test]
    fn test_revision_repoints_head_last_observed_wins() {
        let idx = indexer();
        let recipe = recipe_event(ALICE, "r1", "bafyr", "stew");
        idx.index_event(&recipe).unwrap();

        let r1 = revision_event(ALICE, "v1", "bafyv1", &recipe.uri, "2024-03-01T10:00:00.000Z");
        let r2 = revision_event(ALICE, "v2", "bafyv2", &recipe.uri, "2024-03-01T11:00:00.000Z");
        idx.index_event(&r1).unwrap();
        idx.index_event(&r2).unwrap();

        assert_eq!(head_of(&idx, &recipe.uri).as_deref(), Some(r2.uri.as_str()));

        // Out-of-order redelivery of the older revision still wins the
        // head: last observed, not latest createdAt.
        assert_eq!(idx.index_event(&r1).unwrap(), IndexOutcome::Duplicate);
        assert_eq!(head_of(&idx, &recipe.uri).as_deref(), Some(r1.uri.as_str()));
    }

    #[test]
    fn test_deleting_head_revision_does_not_revert() {
        let idx = indexer();
        let recipe = recipe_event(ALICE, "r1", "bafyr", "stew");
        idx.index_event(&recipe).unwrap();

        let r1 = revision_event(ALICE, "v1", "bafyv1", &recipe.uri, "2024-03-01T10:00:00.000Z");
        let r2 = revision_event(ALICE, "v2", "bafyv2", &recipe.uri, "2024-03-01T11:00:00.000Z");
        idx.index_event(&r1).unwrap();
        idx.index_event(&r2).unwrap();

        idx.index_event(&delete_event(&r2.uri)).unwrap();
        // Head is unset, not reverted to r1. Documented behavior: the next
        // indexed revision repoints it.
        assert_eq!(head_of(&idx, &recipe.uri), None);
        assert_eq!(count(&idx, "SELECT COUNT(*) FROM recipe_revision"), 1);
    }

    #[test]
    fn test_revision_before_recipe_post_is_accepted() {
        let idx = indexer();
        let recipe_uri = format!("at://{}/app.larder.feed.recipePost/r1", ALICE);
        let rev = revision_event(ALICE, "v1", "bafyv1", &recipe_uri, "2024-03-01T10:00:00.000Z");

        // Parent recipe post not indexed yet: accepted with a dangling
        // reference, joined at read time.
        assert_eq!(idx.index_event(&rev).unwrap(), IndexOutcome::Indexed);
        assert_eq!(head_of(&idx, &recipe_uri).as_deref(), Some(rev.uri.as_str()));
    }

    #[test]
    fn test_recipe_delete_cascades_to_revisions_and_head() {
        let idx = indexer();
        let recipe = recipe_event(ALICE, "r1", "bafyr", "stew");
        idx.index_event(&recipe).unwrap();
        idx.index_event(&revision_event(ALICE, "v1", "bafyv1", &recipe.uri, "2024-03-01T10:00:00.000Z"))
            .unwrap();
        idx.index_event(&revision_event(ALICE, "v2", "bafyv2", &recipe.uri, "2024-03-01T11:00:00.000Z"))
            .unwrap();

        idx.index_event(&delete_event(&recipe.uri)).unwrap();
        assert_eq!(count(&idx, "SELECT COUNT(*) FROM recipe_post"), 0);
        assert_eq!(count(&idx, "SELECT COUNT(*) FROM recipe_revision"), 0);
        assert_eq!(count(&idx, "SELECT COUNT(*) FROM recipe_head_revision"), 0);
        assert_eq!(count(&idx, "SELECT COUNT(*) FROM feed_item"), 0);
    }

    #[test]
    fn test_rating_aggregates_recomputed() {
        let idx = indexer();
        let recipe = recipe_event(ALICE, "r1", "bafyr", "stew");
        idx.index_event(&recipe).unwrap();

        idx.index_event(&review_event(BOB, "rv1", "bafyrv1", &recipe.uri, Some(4.0), Some("good")))
            .unwrap();
        idx.index_event(&review_event("did:plc:carol", "rv2", "bafyrv2", &recipe.uri, Some(2.0), None))
            .unwrap();
        // Rating-less review: counts for review_count only if it has a body.
        idx.index_event(&review_event("did:plc:dan", "rv3", "bafyrv3", &recipe.uri, None, Some("words")))
            .unwrap();

        let (rating_count, rating_average, review_count): (i64, Option<f64>, i64) = idx
            .db
            .with(|conn| -> Result<(i64, Option<f64>, i64)> {
                conn.query_row(
                    "SELECT rating_count, rating_average, review_count FROM rating_agg WHERE uri = ?1",
                    [&recipe.uri],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .map_err(Into::into)
            })
            .unwrap();
        assert_eq!(rating_count, 2);
        assert_eq!(rating_average, Some(3.0));
        assert_eq!(review_count, 2);

        // Deleting a review recomputes.
        idx.index_event(&delete_event(&format!(
            "at://{}/app.larder.feed.reviewRating/rv1",
            BOB
        )))
        .unwrap();
        let (rating_count, rating_average): (i64, Option<f64>) = idx
            .db
            .with(|conn| -> Result<(i64, Option<f64>)> {
                conn.query_row(
                    "SELECT rating_count, rating_average FROM rating_agg WHERE uri = ?1",
                    [&recipe.uri],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map_err(Into::into)
            })
            .unwrap();
        assert_eq!(rating_count, 1);
        assert_eq!(rating_average, Some(2.0));
    }

    #[test]
    fn test_second_review_of_same_subject_is_duplicate() {
        let idx = indexer();
        let recipe = recipe_event(ALICE, "r1", "bafyr", "stew");
        idx.index_event(&recipe).unwrap();

        idx.index_event(&review_event(BOB, "rv1", "bafyrv1", &recipe.uri, Some(4.0), None))
            .unwrap();
        let outcome = idx
            .index_event(&review_event(BOB, "rv2", "bafyrv2", &recipe.uri, Some(1.0), None))
            .unwrap();
        assert_eq!(outcome, IndexOutcome::Duplicate);
        assert_eq!(count(&idx, "SELECT COUNT(*) FROM review_rating"), 1);
        assert_eq!(count(&idx, "SELECT COUNT(*) FROM duplicate_record"), 1);
    }

    #[test]
    fn test_review_arriving_before_subject_is_accepted() {
        let idx = indexer();
        let subject = format!("at://{}/app.larder.feed.recipePost/r9", ALICE);
        let outcome = idx
            .index_event(&review_event(BOB, "rv1", "bafyrv1", &subject, Some(5.0), None))
            .unwrap();
        assert_eq!(outcome, IndexOutcome::Indexed);
        assert_eq!(count(&idx, "SELECT COUNT(*) FROM rating_agg"), 1);
    }

    #[test]
    fn test_review_insert_emits_notification() {
        let db = Db::open_in_memory().unwrap();
        let idx = RecordIndexer::with_notifier(db, RecordingNotifier::default());
        let recipe_uri = format!("at://{}/app.larder.feed.recipePost/r1", ALICE);

        idx.index_event(&review_event(BOB, "rv1", "bafyrv1", &recipe_uri, Some(4.0), None))
            .unwrap();

        let delivered = idx.notifier.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].did, ALICE);
        assert_eq!(delivered[0].author, BOB);
        assert_eq!(delivered[0].reason, "review");
    }

    #[test]
    fn test_self_review_emits_no_notification() {
        let db = Db::open_in_memory().unwrap();
        let idx = RecordIndexer::with_notifier(db, RecordingNotifier::default());
        let recipe_uri = format!("at://{}/app.larder.feed.recipePost/r1", ALICE);

        idx.index_event(&review_event(ALICE, "rv1", "bafyrv1", &recipe_uri, Some(4.0), None))
            .unwrap();
        assert!(idx.notifier.delivered.lock().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_record_is_rejected() {
        let idx = indexer();
        let event = RepoEvent {
            kind: EventKind::Create,
            uri: format!("at://{}/app.larder.feed.post/p1", ALICE),
            cid: Some("bafy1".to_string()),
            record: Some(json!({"text": "hi", "createdAt": "not a date"})),
            timestamp: None,
        };
        assert!(idx.index_event(&event).is_err());
        assert_eq!(count(&idx, "SELECT COUNT(*) FROM post"), 0);
        assert_eq!(count(&idx, "SELECT COUNT(*) FROM record"), 0);
    }

    #[test]
    fn test_create_without_record_body_is_incomplete() {
        let idx = indexer();
        let event = RepoEvent {
            kind: EventKind::Create,
            uri: format!("at://{}/app.larder.feed.post/p1", ALICE),
            cid: Some("bafy1".to_string()),
            record: None,
            timestamp: None,
        };
        let err = idx.index_event(&event).unwrap_err();
        assert!(matches!(err, Error::IncompleteEvent { .. }));
    }

    #[test]
    fn test_repost_feed_item_identity() {
        let idx = indexer();
        let post = post_event(ALICE, "p1", "bafyp1", "original", "2024-03-01T10:00:00.000Z");
        idx.index_event(&post).unwrap();

        let repost = RepoEvent {
            kind: EventKind::Create,
            uri: format!("at://{}/app.larder.feed.repost/rp1", BOB),
            cid: Some("bafyrp1".to_string()),
            record: Some(json!({
                "subject": {"uri": post.uri, "cid": "bafyp1"},
                "createdAt": "2024-03-01T11:00:00.000Z",
            })),
            timestamp: Some("2024-03-01T12:00:00.000Z".to_string()),
        };
        idx.index_event(&repost).unwrap();

        let (uri, post_uri, originator): (String, String, String) = idx
            .db
            .with(|conn| -> Result<(String, String, String)> {
                conn.query_row(
                    "SELECT uri, post_uri, originator_did FROM feed_item WHERE type = 'repost'",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .map_err(Into::into)
            })
            .unwrap();
        assert_eq!(uri, repost.uri);
        assert_eq!(post_uri, post.uri);
        assert_eq!(originator, BOB);

        // Deleting the subject post removes the repost's feed entry too.
        idx.index_event(&delete_event(&post.uri)).unwrap();
        assert_eq!(count(&idx, "SELECT COUNT(*) FROM feed_item"), 0);
    }
}

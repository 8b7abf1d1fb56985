//! Plugin for `app.larder.feed.reviewRating` records.
//!
//! Reviews are the one collection with a materialized aggregate: any insert
//! or delete triggers a full recompute of `rating_agg` scoped to the
//! subject. Recomputing instead of adjusting counts trades write
//! amplification for not having to reason about missed or double-applied
//! deltas.

use crate::error::Result;
use crate::processor::{insert_feed_item, Notification, NotificationRemoval, RecordPlugin};
use larder_core::record::ReviewRatingRecord;
use larder_core::time::{normalize_datetime, sort_at};
use larder_core::uri::{did_from_uri, Collection, RecordUri};
use larder_core::Error as CoreError;
use rusqlite::{params, Connection, OptionalExtension};

/// Indexed review row, as stored in the `review_rating` table.
#[derive(Debug, Clone)]
pub struct IndexedReviewRating {
    pub uri: String,
    pub cid: String,
    pub creator: String,
    pub subject: String,
    pub sort_at: String,
}

pub struct ReviewRatingPlugin;

impl RecordPlugin for ReviewRatingPlugin {
    const COLLECTION: Collection = Collection::ReviewRating;
    type Record = ReviewRatingRecord;
    type Indexed = IndexedReviewRating;

    fn insert(
        conn: &Connection,
        uri: &RecordUri,
        cid: &str,
        record: &Self::Record,
        timestamp: &str,
    ) -> Result<Option<Self::Indexed>> {
        let created_at = normalize_datetime(&record.created_at)
            .ok_or_else(|| CoreError::InvalidDatetime(record.created_at.clone()))?;
        let sort = sort_at(&created_at, timestamp);
        let uri_str = uri.to_string();

        let inserted = conn.execute(
            "INSERT INTO review_rating (uri, cid, creator, subject, subject_cid, rating, review_body, created_at, indexed_at, sort_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(uri) DO NOTHING",
            params![
                uri_str,
                cid,
                uri.did(),
                record.subject.uri,
                record.subject.cid,
                record.rating,
                record.review_body,
                created_at,
                timestamp,
                sort
            ],
        )?;
        if inserted == 0 {
            return Ok(None);
        }

        insert_feed_item(conn, &uri_str, cid, "review", &uri_str, uri.did(), &sort)?;

        Ok(Some(IndexedReviewRating {
            uri: uri_str,
            cid: cid.to_string(),
            creator: uri.did().to_string(),
            subject: record.subject.uri.clone(),
            sort_at: sort,
        }))
    }

    fn find_duplicate(
        conn: &Connection,
        uri: &RecordUri,
        record: &Self::Record,
    ) -> Result<Option<String>> {
        // One review per (author, subject); not expressible as a table
        // constraint since the review's own uri is the primary key.
        let found: Option<String> = conn
            .query_row(
                "SELECT uri FROM review_rating WHERE creator = ?1 AND subject = ?2",
                params![uri.did(), record.subject.uri],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found)
    }

    fn delete(conn: &Connection, uri: &RecordUri) -> Result<Option<Self::Indexed>> {
        let uri_str = uri.to_string();
        let existing = conn
            .query_row(
                "SELECT uri, cid, creator, subject, sort_at FROM review_rating WHERE uri = ?1",
                [&uri_str],
                |row| {
                    Ok(IndexedReviewRating {
                        uri: row.get(0)?,
                        cid: row.get(1)?,
                        creator: row.get(2)?,
                        subject: row.get(3)?,
                        sort_at: row.get(4)?,
                    })
                },
            )
            .optional()?;

        let Some(deleted) = existing else {
            return Ok(None);
        };

        conn.execute("DELETE FROM review_rating WHERE uri = ?1", [&uri_str])?;
        conn.execute("DELETE FROM feed_item WHERE uri = ?1", [&uri_str])?;

        Ok(Some(deleted))
    }

    fn notifs_for_insert(indexed: &Self::Indexed) -> Vec<Notification> {
        let Some(subject_author) = did_from_uri(&indexed.subject) else {
            return Vec::new();
        };
        // prevent self-notifications
        if subject_author == indexed.creator {
            return Vec::new();
        }

        vec![Notification {
            did: subject_author.to_string(),
            author: indexed.creator.clone(),
            record_uri: indexed.uri.clone(),
            record_cid: indexed.cid.clone(),
            reason: "review",
            reason_subject: Some(indexed.subject.clone()),
            sort_at: indexed.sort_at.clone(),
        }]
    }

    fn notifs_for_delete(deleted: &Self::Indexed) -> NotificationRemoval {
        NotificationRemoval {
            to_delete: vec![deleted.uri.clone()],
        }
    }

    fn update_aggregates(conn: &Connection, indexed: &Self::Indexed) -> Result<()> {
        conn.execute(
            "INSERT INTO rating_agg (uri, aspect, rating_count, rating_average, review_count)
             SELECT ?1, '',
                    COUNT(rating),
                    AVG(rating),
                    COUNT(CASE WHEN review_body IS NOT NULL AND review_body <> '' THEN 1 END)
             FROM review_rating
             WHERE subject = ?1
             ON CONFLICT(uri, aspect) DO UPDATE SET
                 rating_count = excluded.rating_count,
                 rating_average = excluded.rating_average,
                 review_count = excluded.review_count",
            [&indexed.subject],
        )?;
        metrics::counter!("index_aggregates_recomputed_total").increment(1);
        Ok(())
    }
}

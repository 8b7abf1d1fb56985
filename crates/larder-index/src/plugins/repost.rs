//! Plugin for `app.larder.feed.repost` records.
//!
//! A repost's feed_item carries the repost's own URI as its identity and the
//! reposted subject as `post_uri`, so the same subject can appear in a feed
//! once per reposter.

use crate::error::Result;
use crate::processor::{insert_feed_item, Notification, NotificationRemoval, RecordPlugin};
use larder_core::record::RepostRecord;
use larder_core::time::{normalize_datetime, sort_at};
use larder_core::uri::{did_from_uri, Collection, RecordUri};
use larder_core::Error as CoreError;
use rusqlite::{params, Connection, OptionalExtension};

/// Indexed repost row, as stored in the `repost` table.
#[derive(Debug, Clone)]
pub struct IndexedRepost {
    pub uri: String,
    pub cid: String,
    pub creator: String,
    pub subject: String,
    pub sort_at: String,
}

pub struct RepostPlugin;

impl RecordPlugin for RepostPlugin {
    const COLLECTION: Collection = Collection::Repost;
    type Record = RepostRecord;
    type Indexed = IndexedRepost;

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
            "INSERT INTO repost (uri, cid, creator, subject, subject_cid, created_at, indexed_at, sort_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(uri) DO NOTHING",
            params![
                uri_str,
                cid,
                uri.did(),
                record.subject.uri,
                record.subject.cid,
                created_at,
                timestamp,
                sort
            ],
        )?;
        if inserted == 0 {
            return Ok(None);
        }

        insert_feed_item(conn, &uri_str, cid, "repost", &record.subject.uri, uri.did(), &sort)?;

        Ok(Some(IndexedRepost {
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
        let found: Option<String> = conn
            .query_row(
                "SELECT uri FROM repost WHERE creator = ?1 AND subject = ?2",
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
                "SELECT uri, cid, creator, subject, sort_at FROM repost WHERE uri = ?1",
                [&uri_str],
                |row| {
                    Ok(IndexedRepost {
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

        conn.execute("DELETE FROM repost WHERE uri = ?1", [&uri_str])?;
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
            reason: "repost",
            reason_subject: Some(indexed.subject.clone()),
            sort_at: indexed.sort_at.clone(),
        }]
    }

    fn notifs_for_delete(deleted: &Self::Indexed) -> NotificationRemoval {
        NotificationRemoval {
            to_delete: vec![deleted.uri.clone()],
        }
    }
}

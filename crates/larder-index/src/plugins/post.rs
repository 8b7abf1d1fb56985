//! Plugin for `app.larder.feed.post` records.

use crate::error::Result;
use crate::processor::{insert_feed_item, Notification, NotificationRemoval, RecordPlugin};
use larder_core::record::PostRecord;
use larder_core::time::{normalize_datetime, sort_at};
use larder_core::uri::{did_from_uri, Collection, RecordUri};
use larder_core::Error as CoreError;
use rusqlite::{params, Connection, OptionalExtension};

/// Indexed post row, as stored in the `post` table.
#[derive(Debug, Clone)]
pub struct IndexedPost {
    pub uri: String,
    pub cid: String,
    pub creator: String,
    pub reply_parent: Option<String>,
    pub sort_at: String,
}

pub struct PostPlugin;

impl RecordPlugin for PostPlugin {
    const COLLECTION: Collection = Collection::Post;
    type Record = PostRecord;
    type Indexed = IndexedPost;

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
        let reply_root = record.reply.as_ref().map(|r| r.root.uri.clone());
        let reply_parent = record.reply.as_ref().map(|r| r.parent.uri.clone());

        let inserted = conn.execute(
            "INSERT INTO post (uri, cid, creator, text, reply_root, reply_parent, created_at, indexed_at, sort_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(uri) DO NOTHING",
            params![
                uri_str,
                cid,
                uri.did(),
                record.text,
                reply_root,
                reply_parent,
                created_at,
                timestamp,
                sort
            ],
        )?;
        if inserted == 0 {
            return Ok(None);
        }

        insert_feed_item(conn, &uri_str, cid, "post", &uri_str, uri.did(), &sort)?;

        Ok(Some(IndexedPost {
            uri: uri_str,
            cid: cid.to_string(),
            creator: uri.did().to_string(),
            reply_parent,
            sort_at: sort,
        }))
    }

    fn delete(conn: &Connection, uri: &RecordUri) -> Result<Option<Self::Indexed>> {
        let uri_str = uri.to_string();
        let existing = conn
            .query_row(
                "SELECT uri, cid, creator, reply_parent, sort_at FROM post WHERE uri = ?1",
                [&uri_str],
                |row| {
                    Ok(IndexedPost {
                        uri: row.get(0)?,
                        cid: row.get(1)?,
                        creator: row.get(2)?,
                        reply_parent: row.get(3)?,
                        sort_at: row.get(4)?,
                    })
                },
            )
            .optional()?;

        let Some(deleted) = existing else {
            return Ok(None);
        };

        conn.execute("DELETE FROM post WHERE uri = ?1", [&uri_str])?;
        // Also removes repost entries surfacing this post.
        conn.execute("DELETE FROM feed_item WHERE post_uri = ?1", [&uri_str])?;

        Ok(Some(deleted))
    }

    fn notifs_for_insert(indexed: &Self::Indexed) -> Vec<Notification> {
        let Some(parent) = &indexed.reply_parent else {
            return Vec::new();
        };
        let Some(parent_author) = did_from_uri(parent) else {
            return Vec::new();
        };
        // prevent self-notifications
        if parent_author == indexed.creator {
            return Vec::new();
        }

        vec![Notification {
            did: parent_author.to_string(),
            author: indexed.creator.clone(),
            record_uri: indexed.uri.clone(),
            record_cid: indexed.cid.clone(),
            reason: "reply",
            reason_subject: Some(parent.clone()),
            sort_at: indexed.sort_at.clone(),
        }]
    }

    fn notifs_for_delete(deleted: &Self::Indexed) -> NotificationRemoval {
        NotificationRemoval {
            to_delete: vec![deleted.uri.clone()],
        }
    }
}

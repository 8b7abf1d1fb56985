//! Plugin for `app.larder.feed.recipePost` records.
//!
//! A recipe post is the stable anchor for a chain of revision records.
//! Deleting it tears down the whole chain: revisions and the head pointer
//! go in the same transaction so no dangling child rows survive.

use crate::error::Result;
use crate::processor::{insert_feed_item, NotificationRemoval, RecordPlugin};
use larder_core::record::RecipePostRecord;
use larder_core::time::{normalize_datetime, sort_at};
use larder_core::uri::{Collection, RecordUri};
use larder_core::Error as CoreError;
use rusqlite::{params, Connection, OptionalExtension};

/// Indexed recipe post row, as stored in the `recipe_post` table.
#[derive(Debug, Clone)]
pub struct IndexedRecipePost {
    pub uri: String,
    pub cid: String,
    pub creator: String,
    pub title: String,
    pub sort_at: String,
}

pub struct RecipePostPlugin;

impl RecordPlugin for RecipePostPlugin {
    const COLLECTION: Collection = Collection::RecipePost;
    type Record = RecipePostRecord;
    type Indexed = IndexedRecipePost;

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
            "INSERT INTO recipe_post (uri, cid, creator, title, created_at, indexed_at, sort_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(uri) DO NOTHING",
            params![uri_str, cid, uri.did(), record.title, created_at, timestamp, sort],
        )?;
        if inserted == 0 {
            return Ok(None);
        }

        insert_feed_item(conn, &uri_str, cid, "recipe", &uri_str, uri.did(), &sort)?;

        Ok(Some(IndexedRecipePost {
            uri: uri_str,
            cid: cid.to_string(),
            creator: uri.did().to_string(),
            title: record.title.clone(),
            sort_at: sort,
        }))
    }

    fn delete(conn: &Connection, uri: &RecordUri) -> Result<Option<Self::Indexed>> {
        let uri_str = uri.to_string();
        let existing = conn
            .query_row(
                "SELECT uri, cid, creator, title, sort_at FROM recipe_post WHERE uri = ?1",
                [&uri_str],
                |row| {
                    Ok(IndexedRecipePost {
                        uri: row.get(0)?,
                        cid: row.get(1)?,
                        creator: row.get(2)?,
                        title: row.get(3)?,
                        sort_at: row.get(4)?,
                    })
                },
            )
            .optional()?;

        let Some(deleted) = existing else {
            return Ok(None);
        };

        conn.execute("DELETE FROM recipe_post WHERE uri = ?1", [&uri_str])?;
        conn.execute("DELETE FROM feed_item WHERE post_uri = ?1", [&uri_str])?;
        conn.execute(
            "DELETE FROM recipe_revision WHERE recipe_post_uri = ?1",
            [&uri_str],
        )?;
        conn.execute(
            "DELETE FROM recipe_head_revision WHERE recipe_post_uri = ?1",
            [&uri_str],
        )?;

        Ok(Some(deleted))
    }

    fn notifs_for_delete(deleted: &Self::Indexed) -> NotificationRemoval {
        NotificationRemoval {
            to_delete: vec![deleted.uri.clone()],
        }
    }
}

//! Plugin for `app.larder.feed.recipeRevision` records.
//!
//! Revisions are full content snapshots referencing their recipe post.
//! Indexing a revision repoints the head pointer with an upsert: the last
//! observed revision wins, which keeps the operation race-free under
//! at-least-once, out-of-order delivery without application-level locks.
//!
//! A revision may arrive before its parent recipe post. The row and head
//! pointer are written anyway; the read path joins them when (if) the
//! recipe post shows up.

use crate::error::Result;
use crate::processor::{NotificationRemoval, RecordPlugin};
use larder_core::record::RecipeRevisionRecord;
use larder_core::time::{normalize_datetime, sort_at};
use larder_core::uri::{Collection, RecordUri};
use larder_core::Error as CoreError;
use rusqlite::{params, Connection, OptionalExtension};

/// Indexed recipe revision row, as stored in the `recipe_revision` table.
#[derive(Debug, Clone)]
pub struct IndexedRecipeRevision {
    pub uri: String,
    pub cid: String,
    pub creator: String,
    pub recipe_post_uri: String,
    pub sort_at: String,
}

pub struct RecipeRevisionPlugin;

impl RecordPlugin for RecipeRevisionPlugin {
    const COLLECTION: Collection = Collection::RecipeRevision;
    type Record = RecipeRevisionRecord;
    type Indexed = IndexedRecipeRevision;

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
            "INSERT INTO recipe_revision (uri, cid, creator, recipe_post_uri, created_at, indexed_at, sort_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(uri) DO NOTHING",
            params![
                uri_str,
                cid,
                uri.did(),
                record.recipe_post_ref.uri,
                created_at,
                timestamp,
                sort
            ],
        )?;

        // Repoint the head. Last observed revision wins; no ordering is
        // enforced between concurrently delivered revisions.
        conn.execute(
            "INSERT INTO recipe_head_revision (recipe_post_uri, recipe_revision_uri)
             VALUES (?1, ?2)
             ON CONFLICT(recipe_post_uri) DO UPDATE SET recipe_revision_uri = excluded.recipe_revision_uri",
            params![record.recipe_post_ref.uri, uri_str],
        )?;

        if inserted == 0 {
            return Ok(None);
        }

        Ok(Some(IndexedRecipeRevision {
            uri: uri_str,
            cid: cid.to_string(),
            creator: uri.did().to_string(),
            recipe_post_uri: record.recipe_post_ref.uri.clone(),
            sort_at: sort,
        }))
    }

    fn delete(conn: &Connection, uri: &RecordUri) -> Result<Option<Self::Indexed>> {
        let uri_str = uri.to_string();
        let existing = conn
            .query_row(
                "SELECT uri, cid, creator, recipe_post_uri, sort_at FROM recipe_revision WHERE uri = ?1",
                [&uri_str],
                |row| {
                    Ok(IndexedRecipeRevision {
                        uri: row.get(0)?,
                        cid: row.get(1)?,
                        creator: row.get(2)?,
                        recipe_post_uri: row.get(3)?,
                        sort_at: row.get(4)?,
                    })
                },
            )
            .optional()?;

        let Some(deleted) = existing else {
            return Ok(None);
        };

        conn.execute("DELETE FROM recipe_revision WHERE uri = ?1", [&uri_str])?;
        // Unset the head if it pointed at this revision. There is no revert
        // to an earlier revision; the next indexed revision repoints it.
        conn.execute(
            "DELETE FROM recipe_head_revision WHERE recipe_post_uri = ?1 AND recipe_revision_uri = ?2",
            params![deleted.recipe_post_uri, uri_str],
        )?;

        Ok(Some(deleted))
    }

    fn notifs_for_delete(deleted: &Self::Indexed) -> NotificationRemoval {
        NotificationRemoval {
            to_delete: vec![deleted.uri.clone()],
        }
    }
}

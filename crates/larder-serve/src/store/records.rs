//! Batched record fetches from the record-log mirror.

use super::RecordStore;
use crate::error::Result;
use larder_core::time::{normalize_datetime, sort_at};
use larder_core::uri::Collection;
use larder_core::sql_placeholders;
use rusqlite::{params_from_iter, Connection};
use std::collections::HashMap;

/// A record row as fetched from the store, before schema validation.
///
/// `created_at` is extracted from the record JSON and may be absent for
/// malformed historical data; `sort_at` falls back to `indexed_at` then.
#[derive(Debug, Clone)]
pub struct FetchedRecord {
    pub uri: String,
    pub cid: String,
    pub collection: String,
    pub json: String,
    pub created_at: Option<String>,
    pub indexed_at: String,
    pub sort_at: String,
    pub takedown_ref: Option<String>,
    pub tags: Vec<String>,
}

/// A recipe post together with all of its revisions and head pointer,
/// fetched in one round trip.
#[derive(Debug, Clone, Default)]
pub struct RecipeBundle {
    pub base: Option<FetchedRecord>,
    /// All revisions, sorted ascending by `sort_at`.
    pub revisions: Vec<FetchedRecord>,
    /// The head pointer, when one exists. May reference a revision that is
    /// absent from `revisions` (deleted out from under the pointer).
    pub head_uri: Option<String>,
}

impl RecordStore {
    /// Fetch records by URI, filtered to one collection.
    ///
    /// The result is aligned to the input: position `i` holds the record
    /// for `uris[i]` or `None` when it is missing, takendown-marked rows
    /// included (callers apply takedown policy).
    pub async fn get_records(
        &self,
        collection: Collection,
        uris: Vec<String>,
    ) -> Result<Vec<Option<FetchedRecord>>> {
        if uris.is_empty() {
            return Ok(Vec::new());
        }
        metrics::counter!("hydration_fetches_total", "family" => collection.nsid()).increment(1);

        self.db()
            .read(move |conn| {
                let mut by_uri = fetch_record_rows(conn, &uris)?;
                Ok(uris
                    .iter()
                    .map(|uri| {
                        by_uri
                            .remove(uri)
                            .filter(|row| row.collection == collection.nsid())
                    })
                    .collect())
            })
            .await
    }

    /// Fetch recipe posts with all their revisions and head pointers.
    ///
    /// Result positions align with the input URIs. Revisions are sorted
    /// ascending by their canonical sort timestamp; head selection is the
    /// caller's job, via the returned pointer.
    pub async fn get_recipe_bundles(&self, uris: Vec<String>) -> Result<Vec<RecipeBundle>> {
        if uris.is_empty() {
            return Ok(Vec::new());
        }
        metrics::counter!("hydration_fetches_total", "family" => "recipe").increment(1);

        self.db()
            .read(move |conn| {
                let placeholders = sql_placeholders(uris.len());

                // Which revisions belong to which recipe post.
                let mut stmt = conn.prepare(&format!(
                    "SELECT uri, recipe_post_uri FROM recipe_revision WHERE recipe_post_uri IN ({})",
                    placeholders
                ))?;
                let revision_parents: Vec<(String, String)> = stmt
                    .query_map(params_from_iter(uris.iter()), |row| {
                        Ok((row.get(0)?, row.get(1)?))
                    })?
                    .collect::<std::result::Result<_, _>>()?;

                // Head pointers.
                let mut stmt = conn.prepare(&format!(
                    "SELECT recipe_post_uri, recipe_revision_uri FROM recipe_head_revision
                     WHERE recipe_post_uri IN ({})",
                    placeholders
                ))?;
                let heads: HashMap<String, String> = stmt
                    .query_map(params_from_iter(uris.iter()), |row| {
                        Ok((row.get(0)?, row.get(1)?))
                    })?
                    .collect::<std::result::Result<_, _>>()?;

                // One record fetch for bases and revisions together.
                let all_uris: Vec<String> = uris
                    .iter()
                    .cloned()
                    .chain(revision_parents.iter().map(|(uri, _)| uri.clone()))
                    .collect();
                let mut by_uri = fetch_record_rows(conn, &all_uris)?;

                let mut revisions_by_parent: HashMap<String, Vec<FetchedRecord>> = HashMap::new();
                for (revision_uri, parent_uri) in revision_parents {
                    if let Some(row) = by_uri.remove(&revision_uri) {
                        revisions_by_parent.entry(parent_uri).or_default().push(row);
                    }
                }

                Ok(uris
                    .iter()
                    .map(|uri| {
                        let mut revisions =
                            revisions_by_parent.remove(uri).unwrap_or_default();
                        revisions.sort_by(|a, b| {
                            a.sort_at.cmp(&b.sort_at).then_with(|| a.cid.cmp(&b.cid))
                        });
                        RecipeBundle {
                            base: by_uri.remove(uri),
                            revisions,
                            head_uri: heads.get(uri).cloned(),
                        }
                    })
                    .collect())
            })
            .await
    }
}

/// Fetch raw record rows keyed by URI.
fn fetch_record_rows(
    conn: &Connection,
    uris: &[String],
) -> Result<HashMap<String, FetchedRecord>> {
    if uris.is_empty() {
        return Ok(HashMap::new());
    }

    let mut stmt = conn.prepare(&format!(
        "SELECT uri, cid, collection, json, indexed_at, takedown_ref, tags
         FROM record WHERE uri IN ({})",
        sql_placeholders(uris.len())
    ))?;

    let rows = stmt.query_map(params_from_iter(uris.iter()), |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, Option<String>>(5)?,
            row.get::<_, String>(6)?,
        ))
    })?;

    let mut out = HashMap::new();
    for row in rows {
        let (uri, cid, collection, json, indexed_at, takedown_ref, tags_json) = row?;
        let created_at = serde_json::from_str::<serde_json::Value>(&json)
            .ok()
            .and_then(|value| value.get("createdAt").and_then(|v| v.as_str().map(String::from)))
            .and_then(|raw| normalize_datetime(&raw));
        let sort = match &created_at {
            Some(created) => sort_at(created, &indexed_at),
            None => indexed_at.clone(),
        };
        let tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();

        out.insert(
            uri.clone(),
            FetchedRecord {
                uri,
                cid,
                collection,
                json,
                created_at,
                indexed_at,
                sort_at: sort,
                takedown_ref,
                tags,
            },
        );
    }

    Ok(out)
}

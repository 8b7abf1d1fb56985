//! Social-graph and aggregate lookups: viewer state, blocks, mutes, counts.

use super::RecordStore;
use crate::error::Result;
use larder_core::sql_placeholders;
use rusqlite::{params_from_iter, Connection};
use std::collections::{HashMap, HashSet};

/// Interaction counts for one subject URI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InteractionCounts {
    pub likes: i64,
    pub reposts: i64,
    pub replies: i64,
}

/// Materialized rating aggregate row for one subject URI.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RatingAgg {
    pub rating_count: i64,
    pub rating_average: Option<f64>,
    pub review_count: i64,
}

/// Block/mute relationship between the viewer and one DID.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Relationship {
    /// Viewer blocks this DID.
    pub blocking: bool,
    /// This DID blocks the viewer.
    pub blocked_by: bool,
    /// Viewer mutes this DID.
    pub muted: bool,
}

impl Relationship {
    /// Either direction of block exists.
    pub fn block_exists(&self) -> bool {
        self.blocking || self.blocked_by
    }
}

/// A like row, for like-record hydration.
#[derive(Debug, Clone)]
pub struct LikeRow {
    pub uri: String,
    pub cid: String,
    pub creator: String,
    pub subject: String,
    pub created_at: String,
    pub indexed_at: String,
    pub sort_at: String,
}

impl RecordStore {
    /// The viewer's like URIs on the given subjects, aligned to input order.
    pub async fn likes_by_actor_and_subjects(
        &self,
        actor: String,
        subject_uris: Vec<String>,
    ) -> Result<Vec<Option<String>>> {
        self.actor_subject_lookup("likes", actor, subject_uris).await
    }

    /// The viewer's repost URIs on the given subjects, aligned to input order.
    pub async fn reposts_by_actor_and_subjects(
        &self,
        actor: String,
        subject_uris: Vec<String>,
    ) -> Result<Vec<Option<String>>> {
        self.actor_subject_lookup("repost", actor, subject_uris).await
    }

    async fn actor_subject_lookup(
        &self,
        table: &'static str,
        actor: String,
        subject_uris: Vec<String>,
    ) -> Result<Vec<Option<String>>> {
        if subject_uris.is_empty() {
            return Ok(Vec::new());
        }

        self.db()
            .read(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT subject, uri FROM {} WHERE creator = ? AND subject IN ({})",
                    table,
                    sql_placeholders(subject_uris.len())
                ))?;
                let by_subject: HashMap<String, String> = stmt
                    .query_map(
                        params_from_iter(std::iter::once(&actor).chain(subject_uris.iter())),
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )?
                    .collect::<std::result::Result<_, _>>()?;
                Ok(subject_uris
                    .iter()
                    .map(|subject| by_subject.get(subject).cloned())
                    .collect())
            })
            .await
    }

    /// Which of the given URIs the viewer has bookmarked, aligned to input.
    pub async fn bookmarks_by_actor(
        &self,
        actor: String,
        uris: Vec<String>,
    ) -> Result<Vec<bool>> {
        if uris.is_empty() {
            return Ok(Vec::new());
        }

        self.db()
            .read(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT subject_uri FROM bookmark WHERE creator = ? AND subject_uri IN ({})",
                    sql_placeholders(uris.len())
                ))?;
                let found: HashSet<String> = stmt
                    .query_map(
                        params_from_iter(std::iter::once(&actor).chain(uris.iter())),
                        |row| row.get(0),
                    )?
                    .collect::<std::result::Result<_, _>>()?;
                Ok(uris.iter().map(|uri| found.contains(uri)).collect())
            })
            .await
    }

    /// Which thread roots the viewer has muted. Input should be deduped;
    /// output is keyed by root URI.
    pub async fn thread_mutes(
        &self,
        actor: String,
        roots: Vec<String>,
    ) -> Result<HashMap<String, bool>> {
        if roots.is_empty() {
            return Ok(HashMap::new());
        }

        self.db()
            .read(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT root_uri FROM thread_mute WHERE creator = ? AND root_uri IN ({})",
                    sql_placeholders(roots.len())
                ))?;
                let muted: HashSet<String> = stmt
                    .query_map(
                        params_from_iter(std::iter::once(&actor).chain(roots.iter())),
                        |row| row.get(0),
                    )?
                    .collect::<std::result::Result<_, _>>()?;
                Ok(roots
                    .iter()
                    .map(|root| (root.clone(), muted.contains(root)))
                    .collect())
            })
            .await
    }

    /// Block/mute relationships between the viewer and the given DIDs.
    pub async fn relationships(
        &self,
        viewer: String,
        dids: Vec<String>,
    ) -> Result<HashMap<String, Relationship>> {
        if dids.is_empty() {
            return Ok(HashMap::new());
        }

        self.db()
            .read(move |conn| {
                let placeholders = sql_placeholders(dids.len());

                let blocking = collect_set(
                    conn,
                    &format!(
                        "SELECT subject_did FROM actor_block WHERE creator = ? AND subject_did IN ({})",
                        placeholders
                    ),
                    &viewer,
                    &dids,
                )?;
                let blocked_by = collect_set(
                    conn,
                    &format!(
                        "SELECT creator FROM actor_block WHERE subject_did = ? AND creator IN ({})",
                        placeholders
                    ),
                    &viewer,
                    &dids,
                )?;
                let muted = collect_set(
                    conn,
                    &format!(
                        "SELECT subject_did FROM actor_mute WHERE creator = ? AND subject_did IN ({})",
                        placeholders
                    ),
                    &viewer,
                    &dids,
                )?;

                Ok(dids
                    .iter()
                    .map(|did| {
                        (
                            did.clone(),
                            Relationship {
                                blocking: blocking.contains(did),
                                blocked_by: blocked_by.contains(did),
                                muted: muted.contains(did),
                            },
                        )
                    })
                    .collect())
            })
            .await
    }

    /// Live interaction counts for the given subjects, aligned to input.
    pub async fn interaction_counts(&self, uris: Vec<String>) -> Result<Vec<InteractionCounts>> {
        if uris.is_empty() {
            return Ok(Vec::new());
        }
        metrics::counter!("hydration_fetches_total", "family" => "aggregates").increment(1);

        self.db()
            .read(move |conn| {
                let placeholders = sql_placeholders(uris.len());
                let likes = count_by_key(
                    conn,
                    &format!(
                        "SELECT subject, COUNT(*) FROM likes WHERE subject IN ({}) GROUP BY subject",
                        placeholders
                    ),
                    &uris,
                )?;
                let reposts = count_by_key(
                    conn,
                    &format!(
                        "SELECT subject, COUNT(*) FROM repost WHERE subject IN ({}) GROUP BY subject",
                        placeholders
                    ),
                    &uris,
                )?;
                let replies = count_by_key(
                    conn,
                    &format!(
                        "SELECT reply_parent, COUNT(*) FROM post WHERE reply_parent IN ({}) GROUP BY reply_parent",
                        placeholders
                    ),
                    &uris,
                )?;

                Ok(uris
                    .iter()
                    .map(|uri| InteractionCounts {
                        likes: likes.get(uri).copied().unwrap_or(0),
                        reposts: reposts.get(uri).copied().unwrap_or(0),
                        replies: replies.get(uri).copied().unwrap_or(0),
                    })
                    .collect())
            })
            .await
    }

    /// Materialized rating aggregates for the given subjects, aligned to
    /// input. `None` means no review has ever touched the subject.
    pub async fn rating_aggregates(&self, uris: Vec<String>) -> Result<Vec<Option<RatingAgg>>> {
        if uris.is_empty() {
            return Ok(Vec::new());
        }

        self.db()
            .read(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT uri, rating_count, rating_average, review_count
                     FROM rating_agg WHERE aspect = '' AND uri IN ({})",
                    sql_placeholders(uris.len())
                ))?;
                let by_uri: HashMap<String, RatingAgg> = stmt
                    .query_map(params_from_iter(uris.iter()), |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            RatingAgg {
                                rating_count: row.get(1)?,
                                rating_average: row.get(2)?,
                                review_count: row.get(3)?,
                            },
                        ))
                    })?
                    .collect::<std::result::Result<_, _>>()?;
                Ok(uris.iter().map(|uri| by_uri.get(uri).copied()).collect())
            })
            .await
    }

    /// Fetch like rows by their own URIs, aligned to input.
    pub async fn get_likes(&self, uris: Vec<String>) -> Result<Vec<Option<LikeRow>>> {
        if uris.is_empty() {
            return Ok(Vec::new());
        }

        self.db()
            .read(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT uri, cid, creator, subject, created_at, indexed_at, sort_at
                     FROM likes WHERE uri IN ({})",
                    sql_placeholders(uris.len())
                ))?;
                let mut by_uri: HashMap<String, LikeRow> = stmt
                    .query_map(params_from_iter(uris.iter()), |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            LikeRow {
                                uri: row.get(0)?,
                                cid: row.get(1)?,
                                creator: row.get(2)?,
                                subject: row.get(3)?,
                                created_at: row.get(4)?,
                                indexed_at: row.get(5)?,
                                sort_at: row.get(6)?,
                            },
                        ))
                    })?
                    .collect::<std::result::Result<_, _>>()?;
                Ok(uris.iter().map(|uri| by_uri.remove(uri)).collect())
            })
            .await
    }
}

fn collect_set(
    conn: &Connection,
    sql: &str,
    first: &String,
    rest: &[String],
) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare(sql)?;
    let set = stmt
        .query_map(
            params_from_iter(std::iter::once(first).chain(rest.iter())),
            |row| row.get(0),
        )?
        .collect::<std::result::Result<_, _>>()?;
    Ok(set)
}

fn count_by_key(
    conn: &Connection,
    sql: &str,
    keys: &[String],
) -> Result<HashMap<String, i64>> {
    let mut stmt = conn.prepare(sql)?;
    let map = stmt
        .query_map(params_from_iter(keys.iter()), |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?
        .collect::<std::result::Result<_, _>>()?;
    Ok(map)
}

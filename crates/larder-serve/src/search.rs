//! Search skeleton sources.
//!
//! Two interchangeable sources produce the skeleton for post search: an
//! external search backend reached over HTTP, and a relational LIKE-scan
//! over the derived tables. The external backend is used when configured;
//! otherwise feeds degrade gracefully to the store scan. Cursors from the
//! two sources are not interchangeable — the [`clearly_bad_cursor`]
//! pre-check in the skeleton stage turns a stale foreign cursor into an
//! empty page instead of an error.
//!
//! [`clearly_bad_cursor`]: crate::queries::clearly_bad_cursor

use crate::error::Result;
use crate::queries::cursor::TimeCidCursor;
use larder_core::Db;
use rusqlite::params_from_iter;
use serde::Deserialize;
use std::time::Duration;

/// Skeleton page from either search source: content URIs plus an opaque
/// continuation cursor in the source's own format.
#[derive(Debug, Clone, Default)]
pub struct SearchSkeleton {
    pub uris: Vec<String>,
    pub cursor: Option<String>,
}

/// Client for the external search backend.
#[derive(Clone)]
pub struct SearchClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SkeletonResponse {
    posts: Vec<SkeletonPost>,
    #[serde(default)]
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SkeletonPost {
    uri: String,
}

impl SearchClient {
    pub fn new(base_url: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("default reqwest client");
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Query the backend for a page of matching post URIs.
    ///
    /// The returned cursor is the backend's own token, passed back verbatim
    /// on the next page.
    pub async fn search_posts_skeleton(
        &self,
        query: &str,
        author: Option<&str>,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<SearchSkeleton> {
        let url = format!(
            "{}/xrpc/app.larder.unspecced.searchPostsSkeleton",
            self.base_url
        );
        let mut request = self
            .http
            .get(&url)
            .query(&[("q", query), ("limit", &limit.to_string())]);
        if let Some(author) = author {
            request = request.query(&[("author", author)]);
        }
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }

        let response: SkeletonResponse =
            request.send().await?.error_for_status()?.json().await?;
        Ok(SearchSkeleton {
            uris: response.posts.into_iter().map(|p| p.uri).collect(),
            cursor: response.cursor,
        })
    }
}

/// Escape LIKE wildcards in a user-supplied search term.
fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

/// Store-backed search skeleton: a LIKE-scan over post text, recipe titles,
/// and review bodies, paginated on the same `(sort_at DESC, cid DESC)`
/// keyset as the feed queries.
pub async fn store_search_skeleton(
    db: &Db,
    term: String,
    author: Option<String>,
    limit: u32,
    cursor: Option<TimeCidCursor>,
) -> Result<SearchSkeleton> {
    db.read(move |conn| {
        let pattern = format!("%{}%", escape_like(&term));

        let mut sql = String::from(
            "SELECT uri, cid, sort_at FROM (
                 SELECT uri, cid, creator, sort_at FROM post
                     WHERE text LIKE ?1 ESCAPE '\\'
               UNION ALL
                 SELECT uri, cid, creator, sort_at FROM recipe_post
                     WHERE title LIKE ?1 ESCAPE '\\'
               UNION ALL
                 SELECT uri, cid, creator, sort_at FROM review_rating
                     WHERE review_body LIKE ?1 ESCAPE '\\'
             )",
        );
        let mut binds: Vec<String> = vec![pattern];
        let mut wheres: Vec<&str> = Vec::new();
        if let Some(author) = author {
            binds.push(author);
            wheres.push("creator = ?2");
        }
        if let Some(cursor) = &cursor {
            let base = binds.len();
            binds.push(cursor.sort_at.clone());
            binds.push(cursor.cid.clone());
            // Keyset clause positions depend on whether the author bind is
            // present.
            wheres.push(match base {
                1 => "(sort_at < ?2 OR (sort_at = ?2 AND cid < ?3))",
                _ => "(sort_at < ?3 OR (sort_at = ?3 AND cid < ?4))",
            });
        }
        if !wheres.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&wheres.join(" AND "));
        }
        sql.push_str(&format!(
            " ORDER BY sort_at DESC, cid DESC LIMIT {}",
            limit
        ));

        let mut stmt = conn.prepare(&sql)?;
        let rows: Vec<(String, String, String)> = stmt
            .query_map(params_from_iter(binds.iter()), |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<std::result::Result<_, _>>()?;

        let cursor = rows.last().map(|(_, cid, sort_at)| {
            TimeCidCursor {
                sort_at: sort_at.clone(),
                cid: cid.clone(),
            }
            .pack()
        });
        Ok(SearchSkeleton {
            uris: rows.into_iter().map(|(uri, _, _)| uri).collect(),
            cursor,
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;

    const ALICE: &str = "did:plc:alice";
    const BOB: &str = "did:plc:bob";

    fn seed_post(db: &Db, did: &str, rkey: &str, text: &str, sort_at: &str) -> String {
        let uri = format!("at://{}/app.larder.feed.post/{}", did, rkey);
        db.with(|conn| -> Result<()> {
            conn.execute(
                "INSERT INTO post (uri, cid, creator, text, created_at, indexed_at, sort_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?5)",
                rusqlite::params![uri, format!("cid-{}", rkey), did, text, sort_at],
            )?;
            Ok(())
        })
        .unwrap();
        uri
    }

    fn seed_recipe(db: &Db, did: &str, rkey: &str, title: &str, sort_at: &str) -> String {
        let uri = format!("at://{}/app.larder.feed.recipePost/{}", did, rkey);
        db.with(|conn| -> Result<()> {
            conn.execute(
                "INSERT INTO recipe_post (uri, cid, creator, title, created_at, indexed_at, sort_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?5)",
                rusqlite::params![uri, format!("cid-{}", rkey), did, title, sort_at],
            )?;
            Ok(())
        })
        .unwrap();
        uri
    }

    #[tokio::test]
    async fn test_store_search_matches_across_content_types() {
        let db = Db::open_in_memory().unwrap();
        let post = seed_post(&db, ALICE, "p1", "soup weather today", "2024-03-01T10:00:00.000Z");
        let recipe = seed_recipe(&db, BOB, "r1", "onion soup", "2024-03-01T11:00:00.000Z");
        seed_post(&db, ALICE, "p2", "nothing relevant", "2024-03-01T12:00:00.000Z");

        let page = store_search_skeleton(&db, "soup".into(), None, 10, None)
            .await
            .unwrap();
        assert_eq!(page.uris, vec![recipe, post]);
    }

    #[tokio::test]
    async fn test_store_search_author_scoped() {
        let db = Db::open_in_memory().unwrap();
        let alice_post = seed_post(&db, ALICE, "p1", "soup", "2024-03-01T10:00:00.000Z");
        seed_post(&db, BOB, "p2", "soup", "2024-03-01T11:00:00.000Z");

        let page = store_search_skeleton(&db, "soup".into(), Some(ALICE.into()), 10, None)
            .await
            .unwrap();
        assert_eq!(page.uris, vec![alice_post]);
    }

    #[tokio::test]
    async fn test_store_search_paginates_with_keyset() {
        let db = Db::open_in_memory().unwrap();
        for i in 0..5 {
            seed_post(
                &db,
                ALICE,
                &format!("p{}", i),
                "soup",
                &format!("2024-03-01T10:00:0{}.000Z", i),
            );
        }

        let first = store_search_skeleton(&db, "soup".into(), None, 3, None)
            .await
            .unwrap();
        assert_eq!(first.uris.len(), 3);
        let cursor = TimeCidCursor::unpack(&first.cursor.unwrap()).unwrap();
        let second = store_search_skeleton(&db, "soup".into(), None, 3, Some(cursor))
            .await
            .unwrap();
        assert_eq!(second.uris.len(), 2);

        let mut all = first.uris;
        all.extend(second.uris);
        let unique: std::collections::HashSet<_> = all.iter().collect();
        assert_eq!(unique.len(), 5);
    }

    #[tokio::test]
    async fn test_like_wildcards_are_literal() {
        let db = Db::open_in_memory().unwrap();
        seed_post(&db, ALICE, "p1", "100% effort", "2024-03-01T10:00:00.000Z");
        seed_post(&db, ALICE, "p2", "1000 words", "2024-03-01T11:00:00.000Z");

        let page = store_search_skeleton(&db, "100%".into(), None, 10, None)
            .await
            .unwrap();
        assert_eq!(page.uris.len(), 1);
    }
}

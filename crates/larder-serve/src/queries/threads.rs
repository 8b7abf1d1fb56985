//! Thread expansion queries.
//!
//! Posts expand in both directions: ancestors via the reply-parent chain,
//! descendants via a recursive walk. Recipes have no ancestors; their
//! thread is the recipe itself plus the replies (and reply descendants)
//! hanging off it.

use crate::error::Result;
use larder_core::uri::{Collection, RecordUri};
use larder_core::Db;
use rusqlite::{params, Connection};

/// Default expansion heights.
pub const DEFAULT_ABOVE: u32 = 80;
pub const DEFAULT_BELOW: u32 = 6;

/// Collect the URIs making up the thread around `uri`.
///
/// Returns the anchor first, then ancestors (nearest first), then
/// descendants in reverse chronological order. URIs referencing records
/// that were never indexed simply don't appear; consistency is enforced at
/// read time, not here.
pub async fn thread_uris(db: &Db, uri: String, above: u32, below: u32) -> Result<Vec<String>> {
    let parsed = RecordUri::parse(&uri)?;

    db.read(move |conn| {
        if parsed.collection() == Collection::RecipePost {
            // Recipes are thread roots by construction. Collect replies to
            // the recipe and walk down from each.
            let mut uris = vec![uri.clone()];
            let mut stmt =
                conn.prepare("SELECT uri FROM post WHERE reply_parent = ?1 ORDER BY sort_at DESC")?;
            let replies: Vec<String> = stmt
                .query_map([&uri], |row| row.get(0))?
                .collect::<std::result::Result<_, _>>()?;

            for reply in &replies {
                uris.push(reply.clone());
                uris.extend(descendants(conn, reply, below.saturating_sub(1))?);
            }
            return Ok(uris);
        }

        let mut uris = ancestors_and_self(conn, &uri, above)?;
        uris.extend(descendants(conn, &uri, below)?);
        Ok(uris)
    })
    .await
}

/// The post itself plus up to `height` ancestors, nearest first.
fn ancestors_and_self(conn: &Connection, uri: &str, height: u32) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "WITH RECURSIVE ancestor(uri, height) AS (
             SELECT p.uri, 0 FROM post p WHERE p.uri = ?1
           UNION ALL
             SELECT parent.uri, a.height + 1
             FROM ancestor a
             JOIN post child ON child.uri = a.uri
             JOIN post parent ON parent.uri = child.reply_parent
             WHERE a.height < ?2
         )
         SELECT uri FROM ancestor ORDER BY height ASC",
    )?;
    let uris = stmt
        .query_map(params![uri, height], |row| row.get(0))?
        .collect::<std::result::Result<_, _>>()?;
    Ok(uris)
}

/// Descendants of `uri` down to `depth` levels, reverse chronological.
fn descendants(conn: &Connection, uri: &str, depth: u32) -> Result<Vec<String>> {
    if depth == 0 {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(
        "WITH RECURSIVE descendent(uri, depth) AS (
             SELECT p.uri, 1 FROM post p WHERE p.reply_parent = ?1
           UNION ALL
             SELECT p.uri, d.depth + 1
             FROM descendent d
             JOIN post p ON p.reply_parent = d.uri
             WHERE d.depth < ?2
         )
         SELECT descendent.uri FROM descendent
         JOIN post ON post.uri = descendent.uri
         ORDER BY post.sort_at DESC",
    )?;
    let uris = stmt
        .query_map(params![uri, depth], |row| row.get(0))?
        .collect::<std::result::Result<_, _>>()?;
    Ok(uris)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;

    const ALICE: &str = "did:plc:alice";

    fn seed_post(db: &Db, uri: &str, parent: Option<&str>, root: Option<&str>, sort_at: &str) {
        db.with(|conn| -> Result<()> {
            conn.execute(
                "INSERT INTO post (uri, cid, creator, text, reply_root, reply_parent, created_at, indexed_at, sort_at)
                 VALUES (?1, ?2, ?3, 'text', ?4, ?5, ?6, ?6, ?6)",
                params![uri, format!("cid-{}", uri), ALICE, root, parent, sort_at],
            )?;
            Ok(())
        })
        .unwrap();
    }

    fn uri(rkey: &str) -> String {
        format!("at://{}/app.larder.feed.post/{}", ALICE, rkey)
    }

    #[tokio::test]
    async fn test_post_thread_ancestors_and_descendants() {
        let db = Db::open_in_memory().unwrap();
        let root = uri("root");
        let mid = uri("mid");
        let leaf = uri("leaf");
        let sibling = uri("sibling");
        seed_post(&db, &root, None, None, "2024-03-01T10:00:00.000Z");
        seed_post(&db, &mid, Some(&root), Some(&root), "2024-03-01T10:01:00.000Z");
        seed_post(&db, &leaf, Some(&mid), Some(&root), "2024-03-01T10:02:00.000Z");
        seed_post(&db, &sibling, Some(&mid), Some(&root), "2024-03-01T10:03:00.000Z");

        let uris = thread_uris(&db, mid.clone(), DEFAULT_ABOVE, DEFAULT_BELOW)
            .await
            .unwrap();
        // Anchor first, then its ancestor, then children newest first.
        assert_eq!(uris, vec![mid, root, sibling, leaf]);
    }

    #[tokio::test]
    async fn test_depth_limits_respected() {
        let db = Db::open_in_memory().unwrap();
        let a = uri("a");
        let b = uri("b");
        let c = uri("c");
        seed_post(&db, &a, None, None, "2024-03-01T10:00:00.000Z");
        seed_post(&db, &b, Some(&a), Some(&a), "2024-03-01T10:01:00.000Z");
        seed_post(&db, &c, Some(&b), Some(&a), "2024-03-01T10:02:00.000Z");

        let uris = thread_uris(&db, a.clone(), DEFAULT_ABOVE, 1).await.unwrap();
        assert_eq!(uris, vec![a, b]);
    }

    #[tokio::test]
    async fn test_recipe_thread_collects_replies() {
        let db = Db::open_in_memory().unwrap();
        let recipe = format!("at://{}/app.larder.feed.recipePost/r1", ALICE);
        let reply = uri("reply");
        let nested = uri("nested");
        seed_post(&db, &reply, Some(&recipe), Some(&recipe), "2024-03-01T10:01:00.000Z");
        seed_post(&db, &nested, Some(&reply), Some(&recipe), "2024-03-01T10:02:00.000Z");

        let uris = thread_uris(&db, recipe.clone(), DEFAULT_ABOVE, 2).await.unwrap();
        assert_eq!(uris, vec![recipe, reply, nested]);
    }

    #[tokio::test]
    async fn test_missing_anchor_yields_empty() {
        let db = Db::open_in_memory().unwrap();
        let uris = thread_uris(&db, uri("ghost"), DEFAULT_ABOVE, DEFAULT_BELOW)
            .await
            .unwrap();
        assert!(uris.is_empty());
    }
}

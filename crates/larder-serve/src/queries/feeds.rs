//! Feed skeleton queries over the `feed_item` table.
//!
//! All queries share the same shape: a filtered scan of `feed_item` in
//! `(sort_at DESC, cid DESC)` order with a keyset clause appended for
//! pagination. The following timeline is the one fan-in: two independently
//! paginated sub-queries (followed authors, the viewer's own items capped
//! lower) merged client-side with the same comparator, because the two
//! branches carry different per-branch limits.

use super::cursor::TimeCidCursor;
use crate::error::{Error, Result};
use larder_core::Db;
use rusqlite::{params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;

/// Cap on the viewer's own items per timeline page, so self-authored
/// content cannot dominate the merge.
pub const SELF_FEED_CAP: u32 = 10;

/// Feed item content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedItemType {
    Post,
    Repost,
    Recipe,
    Review,
}

impl FeedItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Repost => "repost",
            Self::Recipe => "recipe",
            Self::Review => "review",
        }
    }

    fn from_db(value: &str) -> Option<Self> {
        match value {
            "post" => Some(Self::Post),
            "repost" => Some(Self::Repost),
            "recipe" => Some(Self::Recipe),
            "review" => Some(Self::Review),
            _ => None,
        }
    }
}

/// One row from the feed index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItemRow {
    /// Item identity: the repost URI for reposts, otherwise the content URI.
    pub uri: String,
    /// CID of the item record itself.
    pub cid: String,
    pub item_type: FeedItemType,
    /// The subject surfaced in the feed.
    pub post_uri: String,
    /// Whose feed this entry appears in.
    pub originator_did: String,
    pub sort_at: String,
}

/// A paginated skeleton page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedPage {
    pub items: Vec<FeedItemRow>,
    pub cursor: Option<String>,
}

impl FeedPage {
    fn from_rows(items: Vec<FeedItemRow>) -> Self {
        let cursor = items.last().map(|row| {
            TimeCidCursor {
                sort_at: row.sort_at.clone(),
                cid: row.cid.clone(),
            }
            .pack()
        });
        Self { items, cursor }
    }
}

/// Content-type filter applied to timeline and everything feeds.
///
/// Reposts follow their subject's type: filtering for recipes keeps
/// reposts of recipes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TypeFilter {
    #[default]
    All,
    Post,
    Recipe,
    Review,
}

impl FromStr for TypeFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "all" => Ok(Self::All),
            "post" => Ok(Self::Post),
            "recipe" => Ok(Self::Recipe),
            "review" => Ok(Self::Review),
            other => Err(Error::BadRequest(format!(
                "invalid filter value: '{}'. Valid options: all, post, recipe, review",
                other
            ))),
        }
    }
}

impl TypeFilter {
    /// The filter's wire/cache-key form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Post => "post",
            Self::Recipe => "recipe",
            Self::Review => "review",
        }
    }

    fn as_item_type(&self) -> Option<&'static str> {
        match self {
            Self::All => None,
            Self::Post => Some("post"),
            Self::Recipe => Some("recipe"),
            Self::Review => Some("review"),
        }
    }
}

/// Author feed variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthorFeedFilter {
    /// Posts, reposts, recipes, reviews, and replies.
    #[default]
    PostsWithReplies,
    /// Top-level content only; replies and reviews excluded.
    PostsNoReplies,
    /// Top-level content plus replies within the author's own threads and
    /// reviews of the author's own content.
    PostsAndAuthorThreads,
}

impl FromStr for AuthorFeedFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "posts_with_replies" => Ok(Self::PostsWithReplies),
            "posts_no_replies" => Ok(Self::PostsNoReplies),
            "posts_and_author_threads" => Ok(Self::PostsAndAuthorThreads),
            other => Err(Error::BadRequest(format!(
                "invalid author feed filter: '{}'",
                other
            ))),
        }
    }
}

/// Incrementally built feed query: joins, WHERE clauses, and their binds in
/// lockstep order.
#[derive(Default)]
struct FeedQuery {
    joins: Vec<&'static str>,
    wheres: Vec<String>,
    binds: Vec<String>,
}

impl FeedQuery {
    fn join(&mut self, clause: &'static str) -> &mut Self {
        self.joins.push(clause);
        self
    }

    fn filter(&mut self, clause: impl Into<String>, binds: impl IntoIterator<Item = String>) -> &mut Self {
        self.wheres.push(clause.into());
        self.binds.extend(binds);
        self
    }

    fn type_filter(&mut self, filter: TypeFilter) -> &mut Self {
        let Some(item_type) = filter.as_item_type() else {
            return self;
        };
        self.join("INNER JOIN feed_item AS subject ON subject.uri = feed_item.post_uri")
            .filter(
                "(feed_item.type = ? OR (feed_item.type = 'repost' AND subject.type = ?))",
                [item_type.to_string(), item_type.to_string()],
            )
    }

    fn keyset(&mut self, cursor: &Option<TimeCidCursor>) -> &mut Self {
        let Some(cursor) = cursor else {
            return self;
        };
        self.filter(
            "(feed_item.sort_at < ? OR (feed_item.sort_at = ? AND feed_item.cid < ?))",
            [
                cursor.sort_at.clone(),
                cursor.sort_at.clone(),
                cursor.cid.clone(),
            ],
        )
    }

    fn run(&self, conn: &Connection, limit: u32) -> Result<Vec<FeedItemRow>> {
        let where_sql = if self.wheres.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.wheres.join(" AND "))
        };
        let sql = format!(
            "SELECT feed_item.uri, feed_item.cid, feed_item.type, feed_item.post_uri,
                    feed_item.originator_did, feed_item.sort_at
             FROM feed_item
             {}
             {}
             ORDER BY feed_item.sort_at DESC, feed_item.cid DESC
             LIMIT {}",
            self.joins.join("\n"),
            where_sql,
            limit
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(self.binds.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .filter_map(|(uri, cid, item_type, post_uri, originator_did, sort_at)| {
                Some(FeedItemRow {
                    uri,
                    cid,
                    item_type: FeedItemType::from_db(&item_type)?,
                    post_uri,
                    originator_did,
                    sort_at,
                })
            })
            .collect())
    }
}

/// One author's feed in reverse chronological order.
pub async fn author_feed(
    db: &Db,
    actor: String,
    limit: u32,
    cursor: Option<TimeCidCursor>,
    filter: AuthorFeedFilter,
) -> Result<FeedPage> {
    db.read(move |conn| {
        let mut query = FeedQuery::default();
        query.filter("feed_item.originator_did = ?", [actor.clone()]);

        match filter {
            AuthorFeedFilter::PostsWithReplies => {}
            AuthorFeedFilter::PostsNoReplies => {
                query
                    .join("LEFT JOIN post ON post.uri = feed_item.post_uri")
                    .filter("feed_item.type != 'review'", [])
                    .filter("(post.reply_parent IS NULL OR feed_item.type = 'repost')", []);
            }
            AuthorFeedFilter::PostsAndAuthorThreads => {
                let own_prefix = format!("at://{}/%", actor);
                query
                    .join("LEFT JOIN post ON post.uri = feed_item.post_uri")
                    .join("LEFT JOIN review_rating ON review_rating.uri = feed_item.post_uri")
                    .filter(
                        "(feed_item.type != 'review' OR review_rating.subject LIKE ?)",
                        [own_prefix.clone()],
                    )
                    .filter(
                        "(feed_item.type = 'repost' OR post.reply_parent IS NULL OR post.reply_root LIKE ?)",
                        [own_prefix],
                    );
            }
        }

        query.keyset(&cursor);
        Ok(FeedPage::from_rows(query.run(conn, limit)?))
    })
    .await
}

/// The viewer's following timeline: followed authors' items merged with the
/// viewer's own, deduplicated, truncated to the page limit.
pub async fn following_timeline(
    db: &Db,
    actor: String,
    limit: u32,
    cursor: Option<TimeCidCursor>,
    filter: TypeFilter,
) -> Result<FeedPage> {
    db.read(move |conn| {
        let mut follow_query = FeedQuery::default();
        follow_query
            .join("INNER JOIN follow ON follow.subject_did = feed_item.originator_did")
            .filter("follow.creator = ?", [actor.clone()])
            .type_filter(filter)
            .keyset(&cursor);
        let follow_rows = follow_query.run(conn, limit)?;

        let mut self_query = FeedQuery::default();
        self_query
            .filter("feed_item.originator_did = ?", [actor.clone()])
            .type_filter(filter)
            .keyset(&cursor);
        let self_rows = self_query.run(conn, limit.min(SELF_FEED_CAP))?;

        // Client-side merge: the two branches have different limits, so a
        // SQL UNION would not preserve per-branch pagination.
        let mut merged: Vec<FeedItemRow> = follow_rows.into_iter().chain(self_rows).collect();
        merged.sort_by(|a, b| {
            b.sort_at
                .cmp(&a.sort_at)
                .then_with(|| b.cid.cmp(&a.cid))
        });
        let mut seen = HashSet::new();
        merged.retain(|row| seen.insert(row.uri.clone()));
        merged.truncate(limit as usize);

        Ok(FeedPage::from_rows(merged))
    })
    .await
}

/// The unfiltered firehose feed of all indexed content.
pub async fn everything_feed(
    db: &Db,
    limit: u32,
    cursor: Option<TimeCidCursor>,
    filter: TypeFilter,
) -> Result<FeedPage> {
    db.read(move |conn| {
        let mut query = FeedQuery::default();
        query.type_filter(filter).keyset(&cursor);
        Ok(FeedPage::from_rows(query.run(conn, limit)?))
    })
    .await
}

/// Recipes only.
pub async fn recipes_feed(db: &Db, limit: u32, cursor: Option<TimeCidCursor>) -> Result<FeedPage> {
    db.read(move |conn| {
        let mut query = FeedQuery::default();
        query
            .filter("feed_item.type = 'recipe'", [])
            .keyset(&cursor);
        Ok(FeedPage::from_rows(query.run(conn, limit)?))
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: &str = "did:plc:alice";
    const BOB: &str = "did:plc:bob";

    fn seed_item(db: &Db, uri: &str, cid: &str, item_type: &str, post_uri: &str, did: &str, sort_at: &str) {
        db.with(|conn| -> Result<()> {
            conn.execute(
                "INSERT INTO feed_item (uri, cid, type, post_uri, originator_did, sort_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![uri, cid, item_type, post_uri, did, sort_at],
            )?;
            Ok(())
        })
        .unwrap();
    }

    fn seed_follow(db: &Db, creator: &str, subject: &str) {
        db.with(|conn| -> Result<()> {
            conn.execute(
                "INSERT INTO follow (creator, subject_did) VALUES (?1, ?2)",
                [creator, subject],
            )?;
            Ok(())
        })
        .unwrap();
    }

    fn post_uri(did: &str, rkey: &str) -> String {
        format!("at://{}/app.larder.feed.post/{}", did, rkey)
    }

    #[tokio::test]
    async fn test_pagination_round_trip_no_gaps_or_overlaps() {
        let db = Db::open_in_memory().unwrap();
        for i in 0..7 {
            let uri = post_uri(ALICE, &format!("p{}", i));
            seed_item(
                &db,
                &uri,
                &format!("bafy{}", i),
                "post",
                &uri,
                ALICE,
                &format!("2024-03-01T10:00:0{}.000Z", i),
            );
        }

        let mut collected = Vec::new();
        let mut cursor: Option<TimeCidCursor> = None;
        loop {
            let page = everything_feed(&db, 3, cursor.clone(), TypeFilter::All)
                .await
                .unwrap();
            if page.items.is_empty() {
                break;
            }
            for window in page.items.windows(2) {
                assert!(
                    (window[0].sort_at.clone(), window[0].cid.clone())
                        > (window[1].sort_at.clone(), window[1].cid.clone()),
                    "page not strictly descending"
                );
            }
            collected.extend(page.items);
            cursor = match page.cursor {
                Some(packed) => Some(TimeCidCursor::unpack(&packed).unwrap()),
                None => break,
            };
        }

        // Full set exactly once each, strictly descending.
        assert_eq!(collected.len(), 7);
        let unique: HashSet<_> = collected.iter().map(|row| row.uri.clone()).collect();
        assert_eq!(unique.len(), 7);
        assert!(collected.first().unwrap().uri.ends_with("p6"));
        assert!(collected.last().unwrap().uri.ends_with("p0"));
    }

    #[tokio::test]
    async fn test_concrete_two_post_scenario() {
        let db = Db::open_in_memory().unwrap();
        let a = post_uri(ALICE, "a");
        let b = post_uri(ALICE, "b");
        seed_item(&db, &a, "bafyA", "post", &a, ALICE, "2024-03-01T10:00:00.000Z");
        seed_item(&db, &b, "bafyB", "post", &b, ALICE, "2024-03-01T11:00:00.000Z");

        // limit=1 returns [B] with a cursor at (T2, cidB).
        let page1 = author_feed(&db, ALICE.into(), 1, None, AuthorFeedFilter::default())
            .await
            .unwrap();
        assert_eq!(page1.items.len(), 1);
        assert_eq!(page1.items[0].uri, b);
        let cursor1 = TimeCidCursor::unpack(&page1.cursor.unwrap()).unwrap();
        assert_eq!(cursor1.sort_at, "2024-03-01T11:00:00.000Z");
        assert_eq!(cursor1.cid, "bafyB");

        // Second call resumes after B → [A].
        let page2 = author_feed(&db, ALICE.into(), 1, Some(cursor1), AuthorFeedFilter::default())
            .await
            .unwrap();
        assert_eq!(page2.items.len(), 1);
        assert_eq!(page2.items[0].uri, a);
        let cursor2 = TimeCidCursor::unpack(&page2.cursor.unwrap()).unwrap();
        assert_eq!(cursor2.sort_at, "2024-03-01T10:00:00.000Z");

        // Third call → empty, no cursor.
        let page3 = author_feed(&db, ALICE.into(), 1, Some(cursor2), AuthorFeedFilter::default())
            .await
            .unwrap();
        assert!(page3.items.is_empty());
        assert!(page3.cursor.is_none());
    }

    #[tokio::test]
    async fn test_cid_tie_break_on_equal_sort_at() {
        let db = Db::open_in_memory().unwrap();
        let ts = "2024-03-01T10:00:00.000Z";
        for cid in ["bafyA", "bafyB", "bafyC"] {
            let uri = post_uri(ALICE, cid);
            seed_item(&db, &uri, cid, "post", &uri, ALICE, ts);
        }

        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let page = everything_feed(&db, 1, cursor, TypeFilter::All).await.unwrap();
            if page.items.is_empty() {
                break;
            }
            seen.push(page.items[0].cid.clone());
            cursor = page
                .cursor
                .map(|c| TimeCidCursor::unpack(&c).unwrap());
        }
        assert_eq!(seen, ["bafyC", "bafyB", "bafyA"]);
    }

    #[tokio::test]
    async fn test_following_timeline_merges_follows_and_self() {
        let db = Db::open_in_memory().unwrap();
        seed_follow(&db, ALICE, BOB);

        let bob_post = post_uri(BOB, "b1");
        seed_item(&db, &bob_post, "bafyb1", "post", &bob_post, BOB, "2024-03-01T11:00:00.000Z");
        let own_post = post_uri(ALICE, "a1");
        seed_item(&db, &own_post, "bafya1", "post", &own_post, ALICE, "2024-03-01T10:00:00.000Z");
        // An unfollowed stranger never shows up.
        let stranger = post_uri("did:plc:stranger", "s1");
        seed_item(&db, &stranger, "bafys1", "post", &stranger, "did:plc:stranger", "2024-03-01T12:00:00.000Z");

        let page = following_timeline(&db, ALICE.into(), 50, None, TypeFilter::All)
            .await
            .unwrap();
        let uris: Vec<_> = page.items.iter().map(|row| row.uri.as_str()).collect();
        assert_eq!(uris, [bob_post.as_str(), own_post.as_str()]);
    }

    #[tokio::test]
    async fn test_following_timeline_caps_self_items() {
        let db = Db::open_in_memory().unwrap();
        for i in 0..20 {
            let uri = post_uri(ALICE, &format!("a{:02}", i));
            seed_item(
                &db,
                &uri,
                &format!("bafy{:02}", i),
                "post",
                &uri,
                ALICE,
                &format!("2024-03-01T10:00:{:02}.000Z", i),
            );
        }

        let page = following_timeline(&db, ALICE.into(), 50, None, TypeFilter::All)
            .await
            .unwrap();
        assert_eq!(page.items.len(), SELF_FEED_CAP as usize);
    }

    #[tokio::test]
    async fn test_type_filter_keeps_reposts_of_matching_subjects() {
        let db = Db::open_in_memory().unwrap();
        let recipe = format!("at://{}/app.larder.feed.recipePost/r1", ALICE);
        seed_item(&db, &recipe, "bafyr1", "recipe", &recipe, ALICE, "2024-03-01T10:00:00.000Z");
        let plain = post_uri(ALICE, "p1");
        seed_item(&db, &plain, "bafyp1", "post", &plain, ALICE, "2024-03-01T10:30:00.000Z");
        // Bob reposts the recipe.
        let repost = format!("at://{}/app.larder.feed.repost/rp1", BOB);
        seed_item(&db, &repost, "bafyrp1", "repost", &recipe, BOB, "2024-03-01T11:00:00.000Z");

        let page = everything_feed(&db, 50, None, TypeFilter::Recipe).await.unwrap();
        let uris: Vec<_> = page.items.iter().map(|row| row.uri.as_str()).collect();
        assert_eq!(uris, [repost.as_str(), recipe.as_str()]);
    }

    #[tokio::test]
    async fn test_author_feed_no_replies_filter() {
        let db = Db::open_in_memory().unwrap();
        let top = post_uri(ALICE, "top");
        let reply = post_uri(ALICE, "reply");
        db.with(|conn| -> Result<()> {
            conn.execute(
                "INSERT INTO post (uri, cid, creator, text, reply_root, reply_parent, created_at, indexed_at, sort_at)
                 VALUES (?1, 'bafytop', ?2, 'top', NULL, NULL, '2024-03-01T10:00:00.000Z', '2024-03-01T10:00:00.000Z', '2024-03-01T10:00:00.000Z')",
                rusqlite::params![top, ALICE],
            )?;
            conn.execute(
                "INSERT INTO post (uri, cid, creator, text, reply_root, reply_parent, created_at, indexed_at, sort_at)
                 VALUES (?1, 'bafyreply', ?2, 'reply', ?3, ?3, '2024-03-01T11:00:00.000Z', '2024-03-01T11:00:00.000Z', '2024-03-01T11:00:00.000Z')",
                rusqlite::params![reply, ALICE, top],
            )?;
            Ok(())
        })
        .unwrap();
        seed_item(&db, &top, "bafytop", "post", &top, ALICE, "2024-03-01T10:00:00.000Z");
        seed_item(&db, &reply, "bafyreply", "post", &reply, ALICE, "2024-03-01T11:00:00.000Z");

        let page = author_feed(&db, ALICE.into(), 50, None, AuthorFeedFilter::PostsNoReplies)
            .await
            .unwrap();
        let uris: Vec<_> = page.items.iter().map(|row| row.uri.as_str()).collect();
        assert_eq!(uris, [top.as_str()]);

        let page = author_feed(&db, ALICE.into(), 50, None, AuthorFeedFilter::PostsWithReplies)
            .await
            .unwrap();
        assert_eq!(page.items.len(), 2);
    }

    #[tokio::test]
    async fn test_recipes_feed_only_recipes() {
        let db = Db::open_in_memory().unwrap();
        let recipe = format!("at://{}/app.larder.feed.recipePost/r1", ALICE);
        seed_item(&db, &recipe, "bafyr1", "recipe", &recipe, ALICE, "2024-03-01T10:00:00.000Z");
        let plain = post_uri(ALICE, "p1");
        seed_item(&db, &plain, "bafyp1", "post", &plain, ALICE, "2024-03-01T11:00:00.000Z");

        let page = recipes_feed(&db, 50, None).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].uri, recipe);
    }

    #[test]
    fn test_type_filter_from_str() {
        assert_eq!(TypeFilter::from_str("all").unwrap(), TypeFilter::All);
        assert_eq!(TypeFilter::from_str("recipe").unwrap(), TypeFilter::Recipe);
        assert!(TypeFilter::from_str("casserole").is_err());
    }
}

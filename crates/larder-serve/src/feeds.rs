//! Feed-serving entry points.
//!
//! Each endpoint is one instantiation of the four-stage pipeline: a
//! skeleton source of its own, the shared hydration fan-out, a stable
//! visibility filter, and view projection. The entry functions are what the
//! transport layer calls; client-input failures (invalid cursor, missing
//! viewer) come back as [`Error`] variants the transport maps to 4xx.

use crate::cache::get_or_compute;
use crate::error::{Error, Result};
use crate::hydration::HydrationState;
use crate::pipeline::{run, FeedPipeline};
use crate::queries::cursor::{clearly_bad_cursor, TimeCidCursor};
use crate::queries::feeds::{self as feed_queries, AuthorFeedFilter, FeedPage, TypeFilter};
use crate::queries::threads;
use crate::search::{store_search_skeleton, SearchSkeleton};
use crate::state::AppState;
use crate::views::{self, FeedContentView, FeedItemView};
use larder_core::uri::{did_from_uri, Collection, RecordUri};
use serde::Serialize;

/// Page size when the client does not ask for one.
pub const DEFAULT_LIMIT: u32 = 50;

/// Hard cap on page size.
pub const MAX_LIMIT: u32 = 100;

/// Tag that hides an item everywhere while it awaits moderation review.
pub const TAG_MODERATION_REVIEW: &str = "!moderation-review";

/// Tag that hides an item from curated search. Author-scoped searches
/// still surface it.
pub const TAG_CURATION_EXCLUDE: &str = "!curation-exclude";

fn effective_limit(limit: u32) -> u32 {
    if limit == 0 {
        DEFAULT_LIMIT
    } else {
        limit.min(MAX_LIMIT)
    }
}

/// Common parameters for the timeline-shaped feeds.
#[derive(Debug, Clone, Default)]
pub struct FeedParams {
    pub viewer: Option<String>,
    /// Requested page size; 0 means the default.
    pub limit: u32,
    pub cursor: Option<String>,
    pub filter: TypeFilter,
}

/// Parameters for one author's feed.
#[derive(Debug, Clone)]
pub struct AuthorFeedParams {
    pub actor: String,
    pub viewer: Option<String>,
    pub limit: u32,
    pub cursor: Option<String>,
    pub filter: AuthorFeedFilter,
}

/// Parameters for post search.
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub q: String,
    /// Restrict results to one author. Also lifts the curation-exclude
    /// suppression.
    pub author: Option<String>,
    pub viewer: Option<String>,
    pub limit: u32,
    pub cursor: Option<String>,
}

/// Parameters for thread expansion.
#[derive(Debug, Clone)]
pub struct ThreadParams {
    pub uri: String,
    /// Ancestor levels to include; 0 means the default.
    pub above: u32,
    /// Descendant levels to include; 0 means the default.
    pub below: u32,
    pub viewer: Option<String>,
}

/// A page of assembled feed views.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedOutput {
    pub feed: Vec<FeedItemView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// A page of search results.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOutput {
    pub results: Vec<FeedContentView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// An expanded thread: the anchor first, then ancestors nearest-first, then
/// descendants.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadOutput {
    pub thread: Vec<FeedContentView>,
}

/// Whether this content is suppressed everywhere by a moderation tag.
fn moderation_suppressed(uri: &str, hydration: &HydrationState) -> bool {
    views::content_tags(uri, hydration).is_some_and(|tags| tags.contains(TAG_MODERATION_REVIEW))
}

/// The shared rules stage for feed pages: drop blocked, muted, and
/// moderation-suppressed items. A stable filter — survivors keep their
/// skeleton order.
fn visible_feed_rules(skeleton: FeedPage, hydration: &HydrationState) -> FeedPage {
    let items = skeleton
        .items
        .into_iter()
        .filter(|item| {
            !views::feed_item_blocks_and_mutes(item, hydration).any()
                && !moderation_suppressed(&item.post_uri, hydration)
        })
        .collect();
    FeedPage {
        items,
        cursor: skeleton.cursor,
    }
}

/// The shared presentation stage for feed pages. Items whose views fail to
/// assemble are dropped; the cursor still covers the full skeleton page so
/// pagination never stalls on a gap.
fn present_feed(skeleton: FeedPage, hydration: &HydrationState) -> FeedOutput {
    let feed: Vec<FeedItemView> = skeleton
        .items
        .iter()
        .filter_map(|item| views::feed_item_view(item, hydration))
        .collect();
    metrics::counter!("feed_items_returned_total").increment(feed.len() as u64);
    FeedOutput {
        feed,
        cursor: skeleton.cursor,
    }
}

/// The viewer's following timeline.
struct FollowingTimeline;

impl FeedPipeline for FollowingTimeline {
    type Params = FeedParams;
    type Skeleton = FeedPage;
    type Output = FeedOutput;

    async fn skeleton(&self, state: &AppState, params: &FeedParams) -> Result<FeedPage> {
        let viewer = params.viewer.as_deref().ok_or(Error::AuthRequired)?;
        metrics::counter!("feed_requests_total", "feed" => "following").increment(1);
        if clearly_bad_cursor(params.cursor.as_deref()) {
            return Ok(FeedPage::default());
        }
        let cursor = TimeCidCursor::unpack_opt(params.cursor.as_deref())?;
        feed_queries::following_timeline(
            state.db(),
            viewer.to_string(),
            effective_limit(params.limit),
            cursor,
            params.filter,
        )
        .await
    }

    async fn hydration(
        &self,
        state: &AppState,
        params: &FeedParams,
        skeleton: &FeedPage,
    ) -> Result<HydrationState> {
        state
            .hydrator
            .hydrate_feed_items(&skeleton.items, params.viewer.as_deref())
            .await
    }

    fn rules(
        &self,
        _state: &AppState,
        _params: &FeedParams,
        skeleton: FeedPage,
        hydration: &HydrationState,
    ) -> FeedPage {
        visible_feed_rules(skeleton, hydration)
    }

    fn presentation(
        &self,
        _state: &AppState,
        _params: &FeedParams,
        skeleton: FeedPage,
        hydration: &HydrationState,
    ) -> FeedOutput {
        present_feed(skeleton, hydration)
    }
}

/// The firehose of everything indexed.
struct EverythingFeed;

impl FeedPipeline for EverythingFeed {
    type Params = FeedParams;
    type Skeleton = FeedPage;
    type Output = FeedOutput;

    async fn skeleton(&self, state: &AppState, params: &FeedParams) -> Result<FeedPage> {
        metrics::counter!("feed_requests_total", "feed" => "everything").increment(1);
        if clearly_bad_cursor(params.cursor.as_deref()) {
            return Ok(FeedPage::default());
        }
        let cursor = TimeCidCursor::unpack_opt(params.cursor.as_deref())?;
        let limit = effective_limit(params.limit);

        // The skeleton is viewer-independent, so it is safe to share.
        let key = format!(
            "everything:{}:{}:{}",
            params.filter.as_str(),
            limit,
            params.cursor.as_deref().unwrap_or("")
        );
        get_or_compute(&state.cache, &key, || {
            feed_queries::everything_feed(state.db(), limit, cursor, params.filter)
        })
        .await
    }

    async fn hydration(
        &self,
        state: &AppState,
        params: &FeedParams,
        skeleton: &FeedPage,
    ) -> Result<HydrationState> {
        state
            .hydrator
            .hydrate_feed_items(&skeleton.items, params.viewer.as_deref())
            .await
    }

    fn rules(
        &self,
        _state: &AppState,
        _params: &FeedParams,
        skeleton: FeedPage,
        hydration: &HydrationState,
    ) -> FeedPage {
        visible_feed_rules(skeleton, hydration)
    }

    fn presentation(
        &self,
        _state: &AppState,
        _params: &FeedParams,
        skeleton: FeedPage,
        hydration: &HydrationState,
    ) -> FeedOutput {
        present_feed(skeleton, hydration)
    }
}

/// Recipes only, newest first.
struct RecipesFeed;

impl FeedPipeline for RecipesFeed {
    type Params = FeedParams;
    type Skeleton = FeedPage;
    type Output = FeedOutput;

    async fn skeleton(&self, state: &AppState, params: &FeedParams) -> Result<FeedPage> {
        metrics::counter!("feed_requests_total", "feed" => "recipes").increment(1);
        if clearly_bad_cursor(params.cursor.as_deref()) {
            return Ok(FeedPage::default());
        }
        let cursor = TimeCidCursor::unpack_opt(params.cursor.as_deref())?;
        let limit = effective_limit(params.limit);

        let key = format!("recipes:{}:{}", limit, params.cursor.as_deref().unwrap_or(""));
        get_or_compute(&state.cache, &key, || {
            feed_queries::recipes_feed(state.db(), limit, cursor)
        })
        .await
    }

    async fn hydration(
        &self,
        state: &AppState,
        params: &FeedParams,
        skeleton: &FeedPage,
    ) -> Result<HydrationState> {
        state
            .hydrator
            .hydrate_feed_items(&skeleton.items, params.viewer.as_deref())
            .await
    }

    fn rules(
        &self,
        _state: &AppState,
        _params: &FeedParams,
        skeleton: FeedPage,
        hydration: &HydrationState,
    ) -> FeedPage {
        visible_feed_rules(skeleton, hydration)
    }

    fn presentation(
        &self,
        _state: &AppState,
        _params: &FeedParams,
        skeleton: FeedPage,
        hydration: &HydrationState,
    ) -> FeedOutput {
        present_feed(skeleton, hydration)
    }
}

/// One author's feed.
struct AuthorFeed;

impl FeedPipeline for AuthorFeed {
    type Params = AuthorFeedParams;
    type Skeleton = FeedPage;
    type Output = FeedOutput;

    async fn skeleton(&self, state: &AppState, params: &AuthorFeedParams) -> Result<FeedPage> {
        if !params.actor.starts_with("did:") {
            return Err(Error::BadRequest(format!(
                "actor is not a did: {:?}",
                params.actor
            )));
        }
        metrics::counter!("feed_requests_total", "feed" => "author").increment(1);
        if clearly_bad_cursor(params.cursor.as_deref()) {
            return Ok(FeedPage::default());
        }
        let cursor = TimeCidCursor::unpack_opt(params.cursor.as_deref())?;
        feed_queries::author_feed(
            state.db(),
            params.actor.clone(),
            effective_limit(params.limit),
            cursor,
            params.filter,
        )
        .await
    }

    async fn hydration(
        &self,
        state: &AppState,
        params: &AuthorFeedParams,
        skeleton: &FeedPage,
    ) -> Result<HydrationState> {
        state
            .hydrator
            .hydrate_feed_items(&skeleton.items, params.viewer.as_deref())
            .await
    }

    fn rules(
        &self,
        _state: &AppState,
        _params: &AuthorFeedParams,
        skeleton: FeedPage,
        hydration: &HydrationState,
    ) -> FeedPage {
        // A block in either direction empties the page: every item shares
        // the same originator.
        visible_feed_rules(skeleton, hydration)
    }

    fn presentation(
        &self,
        _state: &AppState,
        _params: &AuthorFeedParams,
        skeleton: FeedPage,
        hydration: &HydrationState,
    ) -> FeedOutput {
        present_feed(skeleton, hydration)
    }
}

/// Post search over the external backend or the store scan.
struct SearchPosts;

impl FeedPipeline for SearchPosts {
    type Params = SearchParams;
    type Skeleton = SearchSkeleton;
    type Output = SearchOutput;

    async fn skeleton(&self, state: &AppState, params: &SearchParams) -> Result<SearchSkeleton> {
        if params.q.trim().is_empty() {
            return Err(Error::BadRequest("empty search query".to_string()));
        }
        metrics::counter!("feed_requests_total", "feed" => "search").increment(1);

        if let Some(client) = &state.search {
            // The backend owns the cursor format; pass it through verbatim.
            return client
                .search_posts_skeleton(
                    &params.q,
                    params.author.as_deref(),
                    params.cursor.as_deref(),
                    effective_limit(params.limit),
                )
                .await;
        }

        metrics::counter!("search_fallback_total").increment(1);
        if clearly_bad_cursor(params.cursor.as_deref()) {
            return Ok(SearchSkeleton::default());
        }
        let cursor = TimeCidCursor::unpack_opt(params.cursor.as_deref())?;
        store_search_skeleton(
            state.db(),
            params.q.clone(),
            params.author.clone(),
            effective_limit(params.limit),
            cursor,
        )
        .await
    }

    async fn hydration(
        &self,
        state: &AppState,
        params: &SearchParams,
        skeleton: &SearchSkeleton,
    ) -> Result<HydrationState> {
        state
            .hydrator
            .hydrate_content_uris(&skeleton.uris, params.viewer.as_deref())
            .await
    }

    fn rules(
        &self,
        _state: &AppState,
        params: &SearchParams,
        skeleton: SearchSkeleton,
        hydration: &HydrationState,
    ) -> SearchSkeleton {
        let author_scoped = params.author.is_some();
        let uris = skeleton
            .uris
            .into_iter()
            .filter(|uri| {
                let creator_blocked = did_from_uri(uri)
                    .is_some_and(|did| hydration.viewer_block_exists(did));
                let curation_excluded = !author_scoped
                    && views::content_tags(uri, hydration)
                        .is_some_and(|tags| tags.contains(TAG_CURATION_EXCLUDE));
                !creator_blocked
                    && !curation_excluded
                    && !moderation_suppressed(uri, hydration)
            })
            .collect();
        SearchSkeleton {
            uris,
            cursor: skeleton.cursor,
        }
    }

    fn presentation(
        &self,
        _state: &AppState,
        _params: &SearchParams,
        skeleton: SearchSkeleton,
        hydration: &HydrationState,
    ) -> SearchOutput {
        let results = skeleton
            .uris
            .iter()
            .filter_map(|uri| views::content_view(uri, hydration))
            .collect();
        SearchOutput {
            results,
            cursor: skeleton.cursor,
        }
    }
}

/// Thread expansion around one post or recipe.
struct Thread;

impl FeedPipeline for Thread {
    type Params = ThreadParams;
    type Skeleton = Vec<String>;
    type Output = ThreadOutput;

    async fn skeleton(&self, state: &AppState, params: &ThreadParams) -> Result<Vec<String>> {
        let anchor = RecordUri::parse(&params.uri)
            .map_err(|err| Error::BadRequest(err.to_string()))?;
        if !matches!(
            anchor.collection(),
            Collection::Post | Collection::RecipePost
        ) {
            return Err(Error::BadRequest(format!(
                "not a threadable record: {}",
                anchor.collection()
            )));
        }
        metrics::counter!("feed_requests_total", "feed" => "thread").increment(1);

        let above = if params.above == 0 {
            threads::DEFAULT_ABOVE
        } else {
            params.above
        };
        let below = if params.below == 0 {
            threads::DEFAULT_BELOW
        } else {
            params.below
        };
        threads::thread_uris(state.db(), params.uri.clone(), above, below).await
    }

    async fn hydration(
        &self,
        state: &AppState,
        params: &ThreadParams,
        skeleton: &Vec<String>,
    ) -> Result<HydrationState> {
        state
            .hydrator
            .hydrate_content_uris(skeleton, params.viewer.as_deref())
            .await
    }

    fn rules(
        &self,
        _state: &AppState,
        _params: &ThreadParams,
        skeleton: Vec<String>,
        hydration: &HydrationState,
    ) -> Vec<String> {
        // Blocks hide; mutes do not — the viewer chose to open this thread.
        skeleton
            .into_iter()
            .filter(|uri| {
                let creator_blocked = did_from_uri(uri)
                    .is_some_and(|did| hydration.viewer_block_exists(did));
                !creator_blocked && !moderation_suppressed(uri, hydration)
            })
            .collect()
    }

    fn presentation(
        &self,
        _state: &AppState,
        _params: &ThreadParams,
        skeleton: Vec<String>,
        hydration: &HydrationState,
    ) -> ThreadOutput {
        ThreadOutput {
            thread: skeleton
                .iter()
                .filter_map(|uri| views::content_view(uri, hydration))
                .collect(),
        }
    }
}

/// Serve the viewer's following timeline. Requires a viewer.
pub async fn get_following_timeline(state: &AppState, params: FeedParams) -> Result<FeedOutput> {
    run(&FollowingTimeline, state, params).await
}

/// Serve the everything feed.
pub async fn get_everything_feed(state: &AppState, params: FeedParams) -> Result<FeedOutput> {
    run(&EverythingFeed, state, params).await
}

/// Serve the recipes-only feed.
pub async fn get_recipes_feed(state: &AppState, params: FeedParams) -> Result<FeedOutput> {
    run(&RecipesFeed, state, params).await
}

/// Serve one author's feed.
pub async fn get_author_feed(state: &AppState, params: AuthorFeedParams) -> Result<FeedOutput> {
    run(&AuthorFeed, state, params).await
}

/// Serve post search results.
pub async fn search_posts(state: &AppState, params: SearchParams) -> Result<SearchOutput> {
    run(&SearchPosts, state, params).await
}

/// Serve a thread expansion.
pub async fn get_thread(state: &AppState, params: ThreadParams) -> Result<ThreadOutput> {
    run(&Thread, state, params).await
}

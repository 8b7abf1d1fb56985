//! Client-facing view projection.
//!
//! Pure functions from (identifier, hydration state) to serializable view
//! objects. A view either assembles completely from already-hydrated state
//! or not at all: any missing piece drops the item rather than erroring, so
//! presentation returns "at most N, possibly fewer" without shrinking the
//! page cursor's validity.
//!
//! The content type is resolved from the URI's collection exactly once, at
//! [`content_view`]; everything below that matches on the closed
//! [`FeedContentView`] union.

use crate::hydration::{HydrationState, PostAggs};
use crate::queries::feeds::{FeedItemRow, FeedItemType};
use larder_core::record::{Ingredient, Step, SubjectRef};
use larder_core::uri::{did_from_uri, Collection, RecordUri};
use serde::Serialize;
use std::collections::HashSet;

/// Materialized rating aggregate, present once a subject has been reviewed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingView {
    pub rating_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating_average: Option<f64>,
    pub review_count: i64,
}

/// The viewer's own interactions with one subject.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerStateView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub like: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repost: Option<String>,
    pub bookmarked: bool,
    pub thread_muted: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    pub uri: String,
    pub cid: String,
    pub author: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_root: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_parent: Option<String>,
    pub like_count: i64,
    pub repost_count: i64,
    pub reply_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<RatingView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewer: Option<ViewerStateView>,
    pub created_at: String,
    pub indexed_at: String,
}

/// One recipe revision snapshot, rendered inline on the recipe view.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionView {
    pub uri: String,
    pub cid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub ingredients: Vec<Ingredient>,
    pub steps: Vec<Step>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeView {
    pub uri: String,
    pub cid: String,
    pub author: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// The currently-effective revision, resolved via the head pointer.
    /// Absent when no revision has been indexed yet (or the pointer
    /// dangles).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head_revision: Option<RevisionView>,
    pub revision_count: usize,
    pub like_count: i64,
    pub repost_count: i64,
    pub reply_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<RatingView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewer: Option<ViewerStateView>,
    pub created_at: String,
    pub indexed_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewView {
    pub uri: String,
    pub cid: String,
    pub author: String,
    pub subject: SubjectRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub created_at: String,
    pub indexed_at: String,
}

/// The closed union of feed-eligible content views.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FeedContentView {
    Post(PostView),
    Recipe(RecipeView),
    Review(ReviewView),
}

impl FeedContentView {
    pub fn uri(&self) -> &str {
        match self {
            Self::Post(v) => &v.uri,
            Self::Recipe(v) => &v.uri,
            Self::Review(v) => &v.uri,
        }
    }
}

/// Why an item appears in a feed it wasn't authored into.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepostReasonView {
    /// The repost record's own URI.
    pub uri: String,
    /// Who reposted.
    pub by: String,
    pub created_at: String,
}

/// One fully-assembled feed entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedItemView {
    #[serde(flatten)]
    pub content: FeedContentView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repost: Option<RepostReasonView>,
}

/// Assemble the view for one feed row.
///
/// Returns `None` when the subject (or, for reposts, the repost record
/// itself) did not hydrate to a usable entity.
pub fn feed_item_view(item: &FeedItemRow, state: &HydrationState) -> Option<FeedItemView> {
    let repost = match item.item_type {
        FeedItemType::Repost => {
            let repost = state.reposts.lookup(&item.uri)?;
            Some(RepostReasonView {
                uri: item.uri.clone(),
                by: item.originator_did.clone(),
                created_at: repost.record.created_at.clone(),
            })
        }
        _ => None,
    };
    let content = content_view(&item.post_uri, state)?;
    Some(FeedItemView { content, repost })
}

/// Resolve a content URI to its view, dispatching on the collection once.
pub fn content_view(uri: &str, state: &HydrationState) -> Option<FeedContentView> {
    match RecordUri::parse(uri).ok()?.collection() {
        Collection::Post => post_view(uri, state).map(FeedContentView::Post),
        Collection::RecipePost => recipe_view(uri, state).map(FeedContentView::Recipe),
        Collection::ReviewRating => review_view(uri, state).map(FeedContentView::Review),
        _ => None,
    }
}

pub fn post_view(uri: &str, state: &HydrationState) -> Option<PostView> {
    let post = state.posts.lookup(uri)?;
    let author = did_from_uri(uri)?.to_string();
    let aggs = state.aggs.lookup(uri).copied().unwrap_or_default();

    Some(PostView {
        uri: uri.to_string(),
        cid: post.cid.clone(),
        author,
        text: post.record.text.clone(),
        reply_root: post.record.reply.as_ref().map(|r| r.root.uri.clone()),
        reply_parent: post.record.reply.as_ref().map(|r| r.parent.uri.clone()),
        like_count: aggs.likes,
        repost_count: aggs.reposts,
        reply_count: aggs.replies,
        rating: rating_view(&aggs),
        viewer: viewer_view(uri, state),
        created_at: post.record.created_at.clone(),
        indexed_at: post.indexed_at.clone(),
    })
}

pub fn recipe_view(uri: &str, state: &HydrationState) -> Option<RecipeView> {
    let recipe = state.recipes.lookup(uri)?;
    let author = did_from_uri(uri)?.to_string();
    let aggs = state.aggs.lookup(uri).copied().unwrap_or_default();

    let head_revision = recipe.head_revision().map(|rev| RevisionView {
        uri: rev.uri.clone(),
        cid: rev.cid.clone(),
        title: rev.record.title.clone(),
        ingredients: rev.record.ingredients.clone(),
        steps: rev.record.steps.clone(),
        created_at: rev.record.created_at.clone(),
    });

    Some(RecipeView {
        uri: uri.to_string(),
        cid: recipe.cid.clone(),
        author,
        title: recipe.record.title.clone(),
        text: recipe.record.text.clone(),
        head_revision,
        revision_count: recipe.revisions.len(),
        like_count: aggs.likes,
        repost_count: aggs.reposts,
        reply_count: aggs.replies,
        rating: rating_view(&aggs),
        viewer: viewer_view(uri, state),
        created_at: recipe.record.created_at.clone(),
        indexed_at: recipe.indexed_at.clone(),
    })
}

pub fn review_view(uri: &str, state: &HydrationState) -> Option<ReviewView> {
    let review = state.reviews.lookup(uri)?;
    let author = did_from_uri(uri)?.to_string();

    Some(ReviewView {
        uri: uri.to_string(),
        cid: review.cid.clone(),
        author,
        subject: review.record.subject.clone(),
        rating: review.record.rating,
        body: review.record.review_body.clone(),
        created_at: review.record.created_at.clone(),
        indexed_at: review.indexed_at.clone(),
    })
}

fn rating_view(aggs: &PostAggs) -> Option<RatingView> {
    aggs.rating.map(|agg| RatingView {
        rating_count: agg.rating_count,
        rating_average: agg.rating_average,
        review_count: agg.review_count,
    })
}

fn viewer_view(uri: &str, state: &HydrationState) -> Option<ViewerStateView> {
    state.viewer.as_ref()?;
    let vs = state.viewer_states.lookup(uri)?;
    Some(ViewerStateView {
        like: vs.like.clone(),
        repost: vs.repost.clone(),
        bookmarked: vs.bookmarked,
        thread_muted: vs.thread_muted,
    })
}

/// Block/mute verdicts for one feed row, read from hydrated relationships.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlocksAndMutes {
    pub author_blocked: bool,
    pub author_muted: bool,
    pub originator_blocked: bool,
    pub originator_muted: bool,
}

impl BlocksAndMutes {
    /// Whether any verdict hides the item.
    pub fn any(&self) -> bool {
        self.author_blocked || self.author_muted || self.originator_blocked || self.originator_muted
    }
}

/// Evaluate blocks and mutes between the viewer and a feed row's author and
/// originator. With no viewer, everything is visible.
pub fn feed_item_blocks_and_mutes(item: &FeedItemRow, state: &HydrationState) -> BlocksAndMutes {
    let author = did_from_uri(&item.post_uri);
    BlocksAndMutes {
        author_blocked: author.is_some_and(|did| state.viewer_block_exists(did)),
        author_muted: author.is_some_and(|did| state.viewer_mutes(did)),
        originator_blocked: state.viewer_block_exists(&item.originator_did),
        originator_muted: state.viewer_mutes(&item.originator_did),
    }
}

/// The moderation tags attached to a content URI, when it hydrated.
pub fn content_tags<'a>(uri: &str, state: &'a HydrationState) -> Option<&'a HashSet<String>> {
    match RecordUri::parse(uri).ok()?.collection() {
        Collection::Post => state.posts.lookup(uri).map(|p| &p.tags),
        Collection::RecipePost => state.recipes.lookup(uri).map(|r| &r.tags),
        Collection::ReviewRating => state.reviews.lookup(uri).map(|r| &r.tags),
        _ => None,
    }
}

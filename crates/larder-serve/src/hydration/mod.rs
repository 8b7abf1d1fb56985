//! Request-scoped hydration state.
//!
//! A [`HydrationMap`] distinguishes three cases for every URI: never
//! queried (key absent), queried and found invalid or missing (key present,
//! value `None`), and queried with a usable entity. Downstream filters rely
//! on that distinction — a rule that treats "not yet queried" as "allowed"
//! would leak content the hydrator failed to vet.
//!
//! State is owned by exactly one in-flight request, built by the
//! [`Hydrator`](hydrator::Hydrator), and threaded immutably through the
//! rules and presentation stages.

pub mod hydrator;

pub use hydrator::Hydrator;

use crate::store::{LikeRow, RatingAgg, Relationship};
use larder_core::record::{
    PostRecord, RecipePostRecord, RecipeRevisionRecord, RepostRecord, ReviewRatingRecord,
};
use std::collections::{HashMap, HashSet};

/// Map from URI to hydrated entity, with explicit "queried, absent" entries.
#[derive(Debug, Clone)]
pub struct HydrationMap<T>(HashMap<String, Option<T>>);

impl<T> HydrationMap<T> {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    /// Whether this URI was queried at all.
    pub fn contains(&self, uri: &str) -> bool {
        self.0.contains_key(uri)
    }

    /// The entity, if queried and valid.
    pub fn lookup(&self, uri: &str) -> Option<&T> {
        self.0.get(uri).and_then(|entry| entry.as_ref())
    }

    /// Record a lookup result. `None` means "looked up, found invalid or
    /// missing" — load-bearing for downstream filters.
    pub fn set(&mut self, uri: impl Into<String>, value: Option<T>) {
        self.0.insert(uri.into(), value);
    }

    /// Remove and return an entry, preserving the queried/absent distinction.
    pub fn take(&mut self, uri: &str) -> Option<Option<T>> {
        self.0.remove(uri)
    }

    pub fn merge(&mut self, other: Self) {
        self.0.extend(other.0);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T> Default for HydrationMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A hydrated post.
#[derive(Debug, Clone)]
pub struct Post {
    pub record: PostRecord,
    pub cid: String,
    pub indexed_at: String,
    pub sort_at: String,
    pub takedown_ref: Option<String>,
    pub tags: HashSet<String>,
}

/// A hydrated repost record.
#[derive(Debug, Clone)]
pub struct Repost {
    pub record: RepostRecord,
    pub cid: String,
    pub indexed_at: String,
    pub sort_at: String,
}

/// One hydrated recipe revision snapshot.
#[derive(Debug, Clone)]
pub struct RecipeRevision {
    pub uri: String,
    pub record: RecipeRevisionRecord,
    pub cid: String,
    pub sort_at: String,
}

/// A hydrated recipe: base record plus all revisions and the head pointer.
///
/// `revisions` is sorted ascending by sort timestamp. The currently
/// effective revision is whichever one `head_uri` names — never "the last
/// array element", which disagrees with the pointer when revisions were
/// indexed out of order.
#[derive(Debug, Clone)]
pub struct Recipe {
    pub record: RecipePostRecord,
    pub cid: String,
    pub indexed_at: String,
    pub sort_at: String,
    pub takedown_ref: Option<String>,
    pub tags: HashSet<String>,
    pub revisions: Vec<RecipeRevision>,
    pub head_uri: Option<String>,
}

impl Recipe {
    /// The head revision, when the pointer resolves to a fetched revision.
    pub fn head_revision(&self) -> Option<&RecipeRevision> {
        let head_uri = self.head_uri.as_ref()?;
        self.revisions.iter().find(|rev| &rev.uri == head_uri)
    }
}

/// A hydrated review rating.
#[derive(Debug, Clone)]
pub struct ReviewRating {
    pub record: ReviewRatingRecord,
    pub cid: String,
    pub indexed_at: String,
    pub sort_at: String,
    pub takedown_ref: Option<String>,
    pub tags: HashSet<String>,
}

/// A hydrated like record.
pub type Like = LikeRow;

/// Viewer-scoped state on one feed subject.
#[derive(Debug, Clone, Default)]
pub struct PostViewerState {
    /// URI of the viewer's like, when one exists.
    pub like: Option<String>,
    /// URI of the viewer's repost, when one exists.
    pub repost: Option<String>,
    pub bookmarked: bool,
    pub thread_muted: bool,
}

/// Aggregates for one feed subject.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostAggs {
    pub likes: i64,
    pub reposts: i64,
    pub replies: i64,
    /// Present only for subjects that have ever been reviewed.
    pub rating: Option<RatingAgg>,
}

/// Reference to an item within its thread.
#[derive(Debug, Clone)]
pub struct ThreadRef {
    pub uri: String,
    pub thread_root: String,
}

/// Everything one request's pipeline stages read.
#[derive(Debug, Clone, Default)]
pub struct HydrationState {
    pub posts: HydrationMap<Post>,
    pub recipes: HydrationMap<Recipe>,
    pub reviews: HydrationMap<ReviewRating>,
    pub reposts: HydrationMap<Repost>,
    pub likes: HydrationMap<Like>,
    pub viewer_states: HydrationMap<PostViewerState>,
    pub aggs: HydrationMap<PostAggs>,
    /// Block/mute relationships, keyed by DID. Only populated when a
    /// viewer is present.
    pub relationships: HashMap<String, Relationship>,
    pub viewer: Option<String>,
}

impl HydrationState {
    /// Fold another state into this one.
    pub fn merge(&mut self, other: HydrationState) {
        self.posts.merge(other.posts);
        self.recipes.merge(other.recipes);
        self.reviews.merge(other.reviews);
        self.reposts.merge(other.reposts);
        self.likes.merge(other.likes);
        self.viewer_states.merge(other.viewer_states);
        self.aggs.merge(other.aggs);
        self.relationships.extend(other.relationships);
        if other.viewer.is_some() {
            self.viewer = other.viewer;
        }
    }

    /// Whether any block exists between the viewer and this DID.
    pub fn viewer_block_exists(&self, did: &str) -> bool {
        self.relationships
            .get(did)
            .is_some_and(|rel| rel.block_exists())
    }

    /// Whether the viewer mutes this DID.
    pub fn viewer_mutes(&self, did: &str) -> bool {
        self.relationships.get(did).is_some_and(|rel| rel.muted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hydration_map_distinguishes_absent_from_unqueried() {
        let mut map: HydrationMap<i32> = HydrationMap::new();
        map.set("queried-found", Some(1));
        map.set("queried-missing", None);

        assert!(map.contains("queried-found"));
        assert!(map.contains("queried-missing"));
        assert!(!map.contains("never-queried"));

        assert_eq!(map.lookup("queried-found"), Some(&1));
        assert_eq!(map.lookup("queried-missing"), None);
        assert_eq!(map.lookup("never-queried"), None);
    }

    #[test]
    fn test_hydration_map_merge_overwrites() {
        let mut a: HydrationMap<i32> = HydrationMap::new();
        a.set("x", Some(1));
        let mut b: HydrationMap<i32> = HydrationMap::new();
        b.set("x", None);
        b.set("y", Some(2));

        a.merge(b);
        assert_eq!(a.lookup("x"), None);
        assert!(a.contains("x"));
        assert_eq!(a.lookup("y"), Some(&2));
    }

    #[test]
    fn test_head_revision_follows_pointer_not_array_order() {
        let rev = |uri: &str, sort_at: &str| RecipeRevision {
            uri: uri.to_string(),
            record: larder_core::record::RecipeRevisionRecord {
                recipe_post_ref: larder_core::record::SubjectRef {
                    uri: "at://did:plc:a/app.larder.feed.recipePost/r1".into(),
                    cid: "bafyr".into(),
                },
                title: None,
                ingredients: vec![],
                steps: vec![],
                created_at: sort_at.to_string(),
            },
            cid: format!("cid-{}", uri),
            sort_at: sort_at.to_string(),
        };

        let recipe = Recipe {
            record: larder_core::record::RecipePostRecord {
                title: "stew".into(),
                text: None,
                created_at: "2024-03-01T09:00:00.000Z".into(),
            },
            cid: "bafyr".into(),
            indexed_at: "2024-03-01T09:00:00.000Z".into(),
            sort_at: "2024-03-01T09:00:00.000Z".into(),
            takedown_ref: None,
            tags: HashSet::new(),
            revisions: vec![
                rev("at://did:plc:a/app.larder.feed.recipeRevision/v1", "2024-03-01T10:00:00.000Z"),
                rev("at://did:plc:a/app.larder.feed.recipeRevision/v2", "2024-03-01T11:00:00.000Z"),
            ],
            // Head points at the OLDER revision; the pointer wins.
            head_uri: Some("at://did:plc:a/app.larder.feed.recipeRevision/v1".into()),
        };

        assert_eq!(
            recipe.head_revision().unwrap().uri,
            "at://did:plc:a/app.larder.feed.recipeRevision/v1"
        );
    }

    #[test]
    fn test_dangling_head_pointer_yields_none() {
        let recipe = Recipe {
            record: larder_core::record::RecipePostRecord {
                title: "stew".into(),
                text: None,
                created_at: "2024-03-01T09:00:00.000Z".into(),
            },
            cid: "bafyr".into(),
            indexed_at: "2024-03-01T09:00:00.000Z".into(),
            sort_at: "2024-03-01T09:00:00.000Z".into(),
            takedown_ref: None,
            tags: HashSet::new(),
            revisions: vec![],
            head_uri: Some("at://did:plc:a/app.larder.feed.recipeRevision/gone".into()),
        };
        assert!(recipe.head_revision().is_none());
    }
}

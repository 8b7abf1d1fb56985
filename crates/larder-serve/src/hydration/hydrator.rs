//! Batch hydration of content and social context.
//!
//! One public operation per entity family. Each operation deduplicates its
//! input, skips URIs already present in the caller-provided `given` map,
//! issues one batched store fetch for the rest, and re-validates every
//! fetched record against its declared schema before trusting it — a record
//! that fails validation is logged and treated as absent, never surfaced as
//! an error. Availability beats strictness for malformed historical data.
//!
//! `hydrate_feed_items` is the fan-out entry point used by feed pipelines:
//! independent batch fetches run concurrently and are awaited jointly. No
//! ordering is guaranteed between the concurrent batches; callers only rely
//! on per-URI presence in the merged state.

use super::{
    HydrationMap, HydrationState, Post, PostAggs, PostViewerState, Recipe, RecipeRevision,
    Repost, ReviewRating, ThreadRef,
};
use crate::error::Result;
use crate::queries::feeds::{FeedItemRow, FeedItemType};
use crate::store::{FetchedRecord, RecordStore};
use larder_core::record::RecordPayload;
use larder_core::uri::{Collection, RecordUri};

/// Batch-fetch façade over the record store.
#[derive(Clone)]
pub struct Hydrator {
    store: RecordStore,
}

impl Hydrator {
    pub fn new(store: RecordStore) -> Self {
        Self { store }
    }

    /// Hydrate posts by URI.
    pub async fn get_posts(
        &self,
        uris: &[String],
        mut given: HydrationMap<Post>,
    ) -> Result<HydrationMap<Post>> {
        let (mut out, need) = split_known(uris, &mut given);
        if need.is_empty() {
            return Ok(out);
        }

        let fetched = self.store.get_records(Collection::Post, need.clone()).await?;
        for (uri, record) in need.iter().zip(fetched) {
            out.set(uri.clone(), record.and_then(parse_post));
        }
        Ok(out)
    }

    /// Hydrate recipes: base record plus all revisions in one request.
    ///
    /// Revisions come back sorted ascending by sort timestamp. Head
    /// selection happens at the view layer via the fetched head pointer.
    pub async fn get_recipes(
        &self,
        uris: &[String],
        mut given: HydrationMap<Recipe>,
    ) -> Result<HydrationMap<Recipe>> {
        let (mut out, need) = split_known(uris, &mut given);
        if need.is_empty() {
            return Ok(out);
        }

        let bundles = self.store.get_recipe_bundles(need.clone()).await?;
        for (uri, bundle) in need.iter().zip(bundles) {
            let recipe = bundle.base.and_then(|base| {
                let record = match parse_gate(&base, Collection::RecipePost)? {
                    RecordPayload::RecipePost(record) => record,
                    _ => return None,
                };
                let revisions = bundle
                    .revisions
                    .iter()
                    .filter_map(parse_revision)
                    .collect::<Vec<_>>();
                Some(Recipe {
                    record,
                    cid: base.cid,
                    indexed_at: base.indexed_at,
                    sort_at: base.sort_at,
                    takedown_ref: base.takedown_ref,
                    tags: base.tags.into_iter().collect(),
                    revisions,
                    head_uri: bundle.head_uri,
                })
            });
            out.set(uri.clone(), recipe);
        }
        Ok(out)
    }

    /// Hydrate review ratings by URI.
    pub async fn get_review_ratings(
        &self,
        uris: &[String],
        mut given: HydrationMap<ReviewRating>,
    ) -> Result<HydrationMap<ReviewRating>> {
        let (mut out, need) = split_known(uris, &mut given);
        if need.is_empty() {
            return Ok(out);
        }

        let fetched = self
            .store
            .get_records(Collection::ReviewRating, need.clone())
            .await?;
        for (uri, record) in need.iter().zip(fetched) {
            out.set(uri.clone(), record.and_then(parse_review));
        }
        Ok(out)
    }

    /// Hydrate repost records by URI.
    pub async fn get_reposts(
        &self,
        uris: &[String],
        mut given: HydrationMap<Repost>,
    ) -> Result<HydrationMap<Repost>> {
        let (mut out, need) = split_known(uris, &mut given);
        if need.is_empty() {
            return Ok(out);
        }

        let fetched = self.store.get_records(Collection::Repost, need.clone()).await?;
        for (uri, record) in need.iter().zip(fetched) {
            out.set(uri.clone(), record.and_then(parse_repost));
        }
        Ok(out)
    }

    /// Hydrate like rows by URI.
    pub async fn get_likes(
        &self,
        uris: &[String],
        mut given: HydrationMap<super::Like>,
    ) -> Result<HydrationMap<super::Like>> {
        let (mut out, need) = split_known(uris, &mut given);
        if need.is_empty() {
            return Ok(out);
        }

        let rows = self.store.get_likes(need.clone()).await?;
        for (uri, row) in need.iter().zip(rows) {
            out.set(uri.clone(), row);
        }
        Ok(out)
    }

    /// Viewer-scoped state per subject: like, repost, bookmark, thread mute.
    ///
    /// Thread-mute lookups are batched per distinct thread root, so a page
    /// of replies in one thread costs a single root lookup.
    pub async fn get_post_viewer_states(
        &self,
        refs: &[ThreadRef],
        viewer: &str,
    ) -> Result<HydrationMap<PostViewerState>> {
        if refs.is_empty() {
            return Ok(HydrationMap::new());
        }

        let uris: Vec<String> = refs.iter().map(|r| r.uri.clone()).collect();
        let roots = dedupe(&refs.iter().map(|r| r.thread_root.clone()).collect::<Vec<_>>());

        let (likes, reposts, bookmarks, thread_mutes) = tokio::try_join!(
            self.store
                .likes_by_actor_and_subjects(viewer.to_string(), uris.clone()),
            self.store
                .reposts_by_actor_and_subjects(viewer.to_string(), uris.clone()),
            self.store.bookmarks_by_actor(viewer.to_string(), uris.clone()),
            self.store.thread_mutes(viewer.to_string(), roots),
        )?;

        let mut out = HydrationMap::new();
        for (i, r) in refs.iter().enumerate() {
            out.set(
                r.uri.clone(),
                Some(PostViewerState {
                    like: likes.get(i).cloned().flatten(),
                    repost: reposts.get(i).cloned().flatten(),
                    bookmarked: bookmarks.get(i).copied().unwrap_or(false),
                    thread_muted: thread_mutes.get(&r.thread_root).copied().unwrap_or(false),
                }),
            );
        }
        Ok(out)
    }

    /// Interaction counts and rating aggregates per subject.
    pub async fn get_post_aggregates(&self, uris: &[String]) -> Result<HydrationMap<PostAggs>> {
        let need = dedupe(uris);
        if need.is_empty() {
            return Ok(HydrationMap::new());
        }

        let (counts, ratings) = tokio::try_join!(
            self.store.interaction_counts(need.clone()),
            self.store.rating_aggregates(need.clone()),
        )?;

        let mut out = HydrationMap::new();
        for (i, uri) in need.iter().enumerate() {
            out.set(
                uri.clone(),
                Some(PostAggs {
                    likes: counts.get(i).map(|c| c.likes).unwrap_or(0),
                    reposts: counts.get(i).map(|c| c.reposts).unwrap_or(0),
                    replies: counts.get(i).map(|c| c.replies).unwrap_or(0),
                    rating: ratings.get(i).copied().flatten(),
                }),
            );
        }
        Ok(out)
    }

    /// Hydrate everything a page of feed items needs.
    pub async fn hydrate_feed_items(
        &self,
        items: &[FeedItemRow],
        viewer: Option<&str>,
    ) -> Result<HydrationState> {
        let mut post_uris = Vec::new();
        let mut recipe_uris = Vec::new();
        let mut review_uris = Vec::new();
        let mut repost_uris = Vec::new();
        let mut dids = Vec::new();

        for item in items {
            dids.push(item.originator_did.clone());
            if item.item_type == FeedItemType::Repost {
                repost_uris.push(item.uri.clone());
            }
            // Subjects are partitioned by their own collection, not the
            // feed row type: a repost's subject may be a recipe.
            let Ok(subject) = RecordUri::parse(&item.post_uri) else {
                continue;
            };
            dids.push(subject.did().to_string());
            match subject.collection() {
                Collection::Post => post_uris.push(item.post_uri.clone()),
                Collection::RecipePost => recipe_uris.push(item.post_uri.clone()),
                Collection::ReviewRating => review_uris.push(item.post_uri.clone()),
                _ => {}
            }
        }

        // First round: content records and graph context.
        let (posts, recipes, reviews, reposts, relationships) = tokio::try_join!(
            self.get_posts(&post_uris, HydrationMap::new()),
            self.get_recipes(&recipe_uris, HydrationMap::new()),
            self.get_review_ratings(&review_uris, HydrationMap::new()),
            self.get_reposts(&repost_uris, HydrationMap::new()),
            self.get_relationships(viewer, &dids),
        )?;

        // Second round depends on fetched posts for thread roots.
        let mut subject_uris: Vec<String> = Vec::new();
        subject_uris.extend(post_uris.iter().cloned());
        subject_uris.extend(recipe_uris.iter().cloned());

        let thread_refs: Vec<ThreadRef> = dedupe(&subject_uris)
            .into_iter()
            .map(|uri| {
                let thread_root = posts
                    .lookup(&uri)
                    .and_then(|post| post.record.reply.as_ref())
                    .map(|reply| reply.root.uri.clone())
                    .unwrap_or_else(|| uri.clone());
                ThreadRef { uri, thread_root }
            })
            .collect();

        let (aggs, viewer_states) = tokio::try_join!(
            self.get_post_aggregates(&subject_uris),
            async {
                match viewer {
                    Some(viewer) => self.get_post_viewer_states(&thread_refs, viewer).await,
                    None => Ok(HydrationMap::new()),
                }
            },
        )?;

        Ok(HydrationState {
            posts,
            recipes,
            reviews,
            reposts,
            likes: HydrationMap::new(),
            viewer_states,
            aggs,
            relationships,
            viewer: viewer.map(String::from),
        })
    }

    /// Hydrate a bare list of content URIs, as produced by search and
    /// thread skeletons.
    ///
    /// Like [`Hydrator::hydrate_feed_items`] minus the repost handling:
    /// URIs are partitioned by their own collection, fetched concurrently,
    /// then aggregates and viewer state are attached in a second round.
    pub async fn hydrate_content_uris(
        &self,
        uris: &[String],
        viewer: Option<&str>,
    ) -> Result<HydrationState> {
        let mut post_uris = Vec::new();
        let mut recipe_uris = Vec::new();
        let mut review_uris = Vec::new();
        let mut dids = Vec::new();

        for uri in uris {
            let Ok(parsed) = RecordUri::parse(uri) else {
                continue;
            };
            dids.push(parsed.did().to_string());
            match parsed.collection() {
                Collection::Post => post_uris.push(uri.clone()),
                Collection::RecipePost => recipe_uris.push(uri.clone()),
                Collection::ReviewRating => review_uris.push(uri.clone()),
                _ => {}
            }
        }

        let (posts, recipes, reviews, relationships) = tokio::try_join!(
            self.get_posts(&post_uris, HydrationMap::new()),
            self.get_recipes(&recipe_uris, HydrationMap::new()),
            self.get_review_ratings(&review_uris, HydrationMap::new()),
            self.get_relationships(viewer, &dids),
        )?;

        let mut subject_uris: Vec<String> = Vec::new();
        subject_uris.extend(post_uris.iter().cloned());
        subject_uris.extend(recipe_uris.iter().cloned());

        let thread_refs: Vec<ThreadRef> = dedupe(&subject_uris)
            .into_iter()
            .map(|uri| {
                let thread_root = posts
                    .lookup(&uri)
                    .and_then(|post| post.record.reply.as_ref())
                    .map(|reply| reply.root.uri.clone())
                    .unwrap_or_else(|| uri.clone());
                ThreadRef { uri, thread_root }
            })
            .collect();

        let (aggs, viewer_states) = tokio::try_join!(
            self.get_post_aggregates(&subject_uris),
            async {
                match viewer {
                    Some(viewer) => self.get_post_viewer_states(&thread_refs, viewer).await,
                    None => Ok(HydrationMap::new()),
                }
            },
        )?;

        Ok(HydrationState {
            posts,
            recipes,
            reviews,
            reposts: HydrationMap::new(),
            likes: HydrationMap::new(),
            viewer_states,
            aggs,
            relationships,
            viewer: viewer.map(String::from),
        })
    }

    async fn get_relationships(
        &self,
        viewer: Option<&str>,
        dids: &[String],
    ) -> Result<std::collections::HashMap<String, crate::store::Relationship>> {
        let Some(viewer) = viewer else {
            return Ok(Default::default());
        };
        self.store
            .relationships(viewer.to_string(), dedupe(dids))
            .await
    }
}

/// Deduplicate preserving first-occurrence order.
fn dedupe(uris: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    uris.iter()
        .filter(|uri| seen.insert(uri.as_str()))
        .cloned()
        .collect()
}

/// Partition URIs into already-known entries (moved out of `given`) and the
/// set that still needs fetching.
fn split_known<T>(
    uris: &[String],
    given: &mut HydrationMap<T>,
) -> (HydrationMap<T>, Vec<String>) {
    let mut out = HydrationMap::new();
    let mut need = Vec::new();
    for uri in dedupe(uris) {
        match given.take(&uri) {
            Some(entry) => out.set(uri, entry),
            None => need.push(uri),
        }
    }
    (out, need)
}

/// The validation gate: re-parse and re-validate a stored record.
///
/// Returns `None` (logged) for takendown, mis-collectioned, or invalid
/// records.
fn parse_gate(fetched: &FetchedRecord, collection: Collection) -> Option<RecordPayload> {
    if fetched.takedown_ref.is_some() {
        return None;
    }
    match RecordPayload::parse_valid(collection, &fetched.json) {
        Ok(payload) => Some(payload),
        Err(err) => {
            metrics::counter!("hydration_invalid_records_total").increment(1);
            tracing::warn!(uri = %fetched.uri, error = %err, "stored record failed validation, treating as absent");
            None
        }
    }
}

fn parse_post(fetched: FetchedRecord) -> Option<Post> {
    match parse_gate(&fetched, Collection::Post)? {
        RecordPayload::Post(record) => Some(Post {
            record,
            cid: fetched.cid,
            indexed_at: fetched.indexed_at,
            sort_at: fetched.sort_at,
            takedown_ref: fetched.takedown_ref,
            tags: fetched.tags.into_iter().collect(),
        }),
        _ => None,
    }
}

fn parse_repost(fetched: FetchedRecord) -> Option<Repost> {
    match parse_gate(&fetched, Collection::Repost)? {
        RecordPayload::Repost(record) => Some(Repost {
            record,
            cid: fetched.cid,
            indexed_at: fetched.indexed_at,
            sort_at: fetched.sort_at,
        }),
        _ => None,
    }
}

fn parse_review(fetched: FetchedRecord) -> Option<ReviewRating> {
    match parse_gate(&fetched, Collection::ReviewRating)? {
        RecordPayload::ReviewRating(record) => Some(ReviewRating {
            record,
            cid: fetched.cid,
            indexed_at: fetched.indexed_at,
            sort_at: fetched.sort_at,
            takedown_ref: fetched.takedown_ref,
            tags: fetched.tags.into_iter().collect(),
        }),
        _ => None,
    }
}

fn parse_revision(fetched: &FetchedRecord) -> Option<RecipeRevision> {
    match parse_gate(fetched, Collection::RecipeRevision)? {
        RecordPayload::RecipeRevision(record) => Some(RecipeRevision {
            uri: fetched.uri.clone(),
            record,
            cid: fetched.cid.clone(),
            sort_at: fetched.sort_at.clone(),
        }),
        _ => None,
    }
}

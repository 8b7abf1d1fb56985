//! Content record payloads and schema validation.
//!
//! Records arrive as JSON from the repository network and are re-parsed
//! wherever they cross a trust boundary: once at indexing time and again at
//! hydration time (stored data may predate the current schema). A record
//! that fails validation is treated as absent by readers, never surfaced as
//! a hard error.

use crate::error::{Error, Result};
use crate::time::parse_datetime;
use crate::uri::{Collection, RecordUri};
use serde::{Deserialize, Serialize};

/// Maximum length of post text, in characters.
pub const MAX_POST_TEXT_LEN: usize = 3000;

/// Maximum length of a review body, in characters.
pub const MAX_REVIEW_BODY_LEN: usize = 10_000;

/// Inclusive rating bounds for review ratings.
pub const RATING_MIN: f64 = 0.0;
pub const RATING_MAX: f64 = 5.0;

/// A strong reference to another record: URI plus content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectRef {
    pub uri: String,
    pub cid: String,
}

/// Reply references carried by a post that replies to another post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyRef {
    pub root: SubjectRef,
    pub parent: SubjectRef,
}

/// `app.larder.feed.post` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRecord {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<ReplyRef>,
    pub created_at: String,
}

/// `app.larder.feed.repost` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepostRecord {
    pub subject: SubjectRef,
    pub created_at: String,
}

/// `app.larder.feed.recipePost` record.
///
/// The recipe post is a stable anchor; the actual recipe content lives in
/// revision records that reference it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipePostRecord {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub created_at: String,
}

/// One ingredient line in a recipe revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ingredient {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// One preparation step in a recipe revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub text: String,
}

/// `app.larder.feed.recipeRevision` record: a full content snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeRevisionRecord {
    pub recipe_post_ref: SubjectRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub ingredients: Vec<Ingredient>,
    #[serde(default)]
    pub steps: Vec<Step>,
    pub created_at: String,
}

/// `app.larder.feed.reviewRating` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRatingRecord {
    pub subject: SubjectRef,
    #[serde(default, rename = "reviewRating", skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_body: Option<String>,
    pub created_at: String,
}

/// A parsed content record, tagged by collection.
///
/// Parsing resolves the collection exactly once; everything downstream
/// matches on this enum instead of re-inspecting URI strings.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordPayload {
    Post(PostRecord),
    Repost(RepostRecord),
    RecipePost(RecipePostRecord),
    RecipeRevision(RecipeRevisionRecord),
    ReviewRating(ReviewRatingRecord),
}

impl RecordPayload {
    /// Parse a JSON record body for the given collection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] when the body is not valid JSON for the
    /// collection's schema shape. Field-level constraints are checked
    /// separately by [`RecordPayload::validate`].
    pub fn parse(collection: Collection, json: &str) -> Result<Self> {
        let payload = match collection {
            Collection::Post => Self::Post(serde_json::from_str(json)?),
            Collection::Repost => Self::Repost(serde_json::from_str(json)?),
            Collection::RecipePost => Self::RecipePost(serde_json::from_str(json)?),
            Collection::RecipeRevision => Self::RecipeRevision(serde_json::from_str(json)?),
            Collection::ReviewRating => Self::ReviewRating(serde_json::from_str(json)?),
        };
        Ok(payload)
    }

    /// Parse and validate in one step.
    pub fn parse_valid(collection: Collection, json: &str) -> Result<Self> {
        let payload = Self::parse(collection, json)?;
        payload.validate()?;
        Ok(payload)
    }

    /// The collection this payload belongs to.
    pub fn collection(&self) -> Collection {
        match self {
            Self::Post(_) => Collection::Post,
            Self::Repost(_) => Collection::Repost,
            Self::RecipePost(_) => Collection::RecipePost,
            Self::RecipeRevision(_) => Collection::RecipeRevision,
            Self::ReviewRating(_) => Collection::ReviewRating,
        }
    }

    /// The client-declared creation timestamp.
    pub fn created_at(&self) -> &str {
        match self {
            Self::Post(r) => &r.created_at,
            Self::Repost(r) => &r.created_at,
            Self::RecipePost(r) => &r.created_at,
            Self::RecipeRevision(r) => &r.created_at,
            Self::ReviewRating(r) => &r.created_at,
        }
    }

    /// Check the payload against its collection's field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRecord`] naming the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: String| Error::InvalidRecord {
            collection: self.collection().nsid(),
            reason,
        };

        if parse_datetime(self.created_at()).is_none() {
            return Err(fail(format!("createdAt is not RFC 3339: {:?}", self.created_at())));
        }

        match self {
            Self::Post(r) => {
                if r.text.chars().count() > MAX_POST_TEXT_LEN {
                    return Err(fail(format!("text exceeds {} characters", MAX_POST_TEXT_LEN)));
                }
                if let Some(reply) = &r.reply {
                    validate_subject(&reply.root).map_err(&fail)?;
                    validate_subject(&reply.parent).map_err(&fail)?;
                }
            }
            Self::Repost(r) => {
                validate_subject(&r.subject).map_err(&fail)?;
            }
            Self::RecipePost(r) => {
                if r.title.trim().is_empty() {
                    return Err(fail("title is empty".to_string()));
                }
            }
            Self::RecipeRevision(r) => {
                validate_subject(&r.recipe_post_ref).map_err(&fail)?;
                if RecordUri::parse(&r.recipe_post_ref.uri)?.collection() != Collection::RecipePost {
                    return Err(fail("recipePostRef does not reference a recipe post".to_string()));
                }
                if r.ingredients.iter().any(|i| i.name.trim().is_empty()) {
                    return Err(fail("ingredient with empty name".to_string()));
                }
            }
            Self::ReviewRating(r) => {
                validate_subject(&r.subject).map_err(&fail)?;
                if let Some(rating) = r.rating {
                    if !(RATING_MIN..=RATING_MAX).contains(&rating) || !rating.is_finite() {
                        return Err(fail(format!("rating {} outside [{}, {}]", rating, RATING_MIN, RATING_MAX)));
                    }
                }
                if let Some(body) = &r.review_body {
                    if body.chars().count() > MAX_REVIEW_BODY_LEN {
                        return Err(fail(format!("reviewBody exceeds {} characters", MAX_REVIEW_BODY_LEN)));
                    }
                }
            }
        }

        Ok(())
    }
}

fn validate_subject(subject: &SubjectRef) -> std::result::Result<(), String> {
    if !subject.uri.starts_with("at://") {
        return Err(format!("subject uri is not an at:// uri: {:?}", subject.uri));
    }
    if subject.cid.is_empty() {
        return Err("subject cid is empty".to_string());
    }
    Ok(())
}

//! Record URIs and the closed set of content collections.
//!
//! Every content record is addressed by a URI of the form
//! `at://<did>/<collection>/<rkey>`. The collection segment selects which
//! parser, indexing plugin, and view builder applies; it is resolved once
//! here into the [`Collection`] enum and matched explicitly downstream.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// URI scheme prefix for record URIs.
pub const URI_SCHEME: &str = "at://";

/// The content collections this AppView understands.
///
/// This is a closed set: records in any other collection are rejected at
/// the parse boundary rather than carried around as loose strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Collection {
    /// Plain text post (`app.larder.feed.post`).
    Post,
    /// Repost of another item (`app.larder.feed.repost`).
    Repost,
    /// Recipe post, the stable anchor for revisions (`app.larder.feed.recipePost`).
    RecipePost,
    /// One immutable snapshot of a recipe's content (`app.larder.feed.recipeRevision`).
    RecipeRevision,
    /// Rating plus optional review text for a subject (`app.larder.feed.reviewRating`).
    ReviewRating,
}

impl Collection {
    /// The collection's namespaced identifier as it appears in URIs.
    pub fn nsid(&self) -> &'static str {
        match self {
            Self::Post => "app.larder.feed.post",
            Self::Repost => "app.larder.feed.repost",
            Self::RecipePost => "app.larder.feed.recipePost",
            Self::RecipeRevision => "app.larder.feed.recipeRevision",
            Self::ReviewRating => "app.larder.feed.reviewRating",
        }
    }

    /// Resolve an NSID string to a collection, if supported.
    pub fn from_nsid(nsid: &str) -> Option<Self> {
        match nsid {
            "app.larder.feed.post" => Some(Self::Post),
            "app.larder.feed.repost" => Some(Self::Repost),
            "app.larder.feed.recipePost" => Some(Self::RecipePost),
            "app.larder.feed.recipeRevision" => Some(Self::RecipeRevision),
            "app.larder.feed.reviewRating" => Some(Self::ReviewRating),
            _ => None,
        }
    }

    /// The `feed_item.type` value for collections that appear in feeds.
    ///
    /// Recipe revisions are not feed entries themselves; the recipe post is.
    pub fn feed_item_type(&self) -> Option<&'static str> {
        match self {
            Self::Post => Some("post"),
            Self::Repost => Some("repost"),
            Self::RecipePost => Some("recipe"),
            Self::ReviewRating => Some("review"),
            Self::RecipeRevision => None,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.nsid())
    }
}

/// A parsed record URI: owner DID, collection, and record key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordUri {
    did: String,
    collection: Collection,
    rkey: String,
}

impl RecordUri {
    /// Build a URI from its components.
    pub fn new(did: impl Into<String>, collection: Collection, rkey: impl Into<String>) -> Self {
        Self {
            did: did.into(),
            collection,
            rkey: rkey.into(),
        }
    }

    /// Parse an `at://did/collection/rkey` string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUri`] when the scheme, DID, collection, or
    /// record key is missing or the collection is not one this AppView
    /// understands.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidUri {
            uri: input.to_string(),
            reason: reason.to_string(),
        };

        let rest = input
            .strip_prefix(URI_SCHEME)
            .ok_or_else(|| invalid("missing at:// scheme"))?;

        let mut segments = rest.splitn(3, '/');
        let did = segments.next().filter(|s| !s.is_empty()).ok_or_else(|| invalid("missing did"))?;
        let collection = segments.next().ok_or_else(|| invalid("missing collection"))?;
        let rkey = segments.next().filter(|s| !s.is_empty()).ok_or_else(|| invalid("missing record key"))?;

        if !did.starts_with("did:") {
            return Err(invalid("authority is not a did"));
        }
        if rkey.contains('/') {
            return Err(invalid("record key contains '/'"));
        }
        let collection = Collection::from_nsid(collection)
            .ok_or_else(|| invalid("unsupported collection"))?;

        Ok(Self {
            did: did.to_string(),
            collection,
            rkey: rkey.to_string(),
        })
    }

    /// The owner (authority) DID.
    pub fn did(&self) -> &str {
        &self.did
    }

    /// The collection this record belongs to.
    pub fn collection(&self) -> Collection {
        self.collection
    }

    /// The record key within the collection.
    pub fn rkey(&self) -> &str {
        &self.rkey
    }
}

impl fmt::Display for RecordUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}/{}/{}", URI_SCHEME, self.did, self.collection.nsid(), self.rkey)
    }
}

impl FromStr for RecordUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Extract the authority DID from a record URI string without full parsing.
///
/// Used where the collection may be one we don't index (e.g. block/mute
/// checks against arbitrary subject URIs).
pub fn did_from_uri(uri: &str) -> Option<&str> {
    uri.strip_prefix(URI_SCHEME)?.split('/').next().filter(|s| s.starts_with("did:"))
}

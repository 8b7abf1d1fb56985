//! Stateless query routes over the derived tables.
//!
//! Each route produces a raw ordered skeleton: feed item identifiers plus
//! an opaque pagination cursor. Hydration and filtering happen downstream;
//! nothing here reads hydration state.

pub mod cursor;
pub mod feeds;
pub mod threads;

pub use cursor::{clearly_bad_cursor, TimeCidCursor};
pub use feeds::{
    author_feed, everything_feed, following_timeline, recipes_feed, AuthorFeedFilter, FeedItemRow,
    FeedItemType, FeedPage, TypeFilter, SELF_FEED_CAP,
};
pub use threads::thread_uris;

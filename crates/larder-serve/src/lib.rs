//! Larder serving layer.
//!
//! This crate is the read path of the Larder AppView: it turns derived
//! tables written by `larder-index` into paginated, permission-filtered,
//! view-hydrated feed pages.
//!
//! # Architecture
//!
//! Every feed entry point is one instance of the same four-stage pipeline:
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌───────┐   ┌──────────────┐
//! │ skeleton │ → │ hydration │ → │ rules │ → │ presentation │
//! └──────────┘   └───────────┘   └───────┘   └──────────────┘
//!  queries/         hydration/     feeds.rs      views.rs
//!  search.rs
//! ```
//!
//! - **skeleton** — ordered content identifiers plus a keyset cursor, from
//!   the relational store ([`queries`]) or a search backend ([`search`]).
//! - **hydration** — deduplicated parallel batch fetches merged into
//!   request-scoped [`hydration::HydrationState`].
//! - **rules** — stable visibility filter: blocks, mutes, moderation tags.
//! - **presentation** — projection into client-facing views; items that
//!   fail to assemble are dropped, never errors.
//!
//! The HTTP transport that calls the entry points in [`feeds`] lives
//! outside this crate; [`error::Error::is_client_error`] tells it which
//! failures map to 4xx responses.

pub mod cache;
pub mod error;
pub mod feeds;
pub mod hydration;
pub mod pipeline;
pub mod queries;
pub mod search;
pub mod state;
pub mod store;
pub mod views;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use feeds::{
    get_author_feed, get_everything_feed, get_following_timeline, get_recipes_feed, get_thread,
    search_posts, AuthorFeedParams, FeedOutput, FeedParams, SearchOutput, SearchParams,
    ThreadOutput, ThreadParams,
};
pub use hydration::{HydrationState, Hydrator};
pub use pipeline::{run, FeedPipeline};
pub use state::{AppState, Config};
pub use store::RecordStore;

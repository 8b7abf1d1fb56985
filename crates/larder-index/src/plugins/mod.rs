//! Per-collection record plugins.
//!
//! Each module implements [`RecordPlugin`](crate::processor::RecordPlugin)
//! for one content collection. The indexer selects the plugin with a single
//! match on [`Collection`](larder_core::Collection); nothing downstream
//! re-inspects collection strings.

pub mod post;
pub mod recipe_post;
pub mod recipe_revision;
pub mod repost;
pub mod review_rating;

pub use post::PostPlugin;
pub use recipe_post::RecipePostPlugin;
pub use recipe_revision::RecipeRevisionPlugin;
pub use repost::RepostPlugin;
pub use review_rating::ReviewRatingPlugin;

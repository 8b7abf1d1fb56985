//! Larder core - shared foundation for the Larder AppView.
//!
//! This crate holds everything both sides of the system agree on: the
//! record URI grammar, the closed set of content collections, record
//! payload parsing and validation, timestamp normalization, the SQLite
//! handle with its embedded schema, and metrics plumbing.
//!
//! # Modules
//!
//! - [`uri`] - Record URIs and the [`Collection`] enum
//! - [`record`] - Content record payloads and schema validation
//! - [`time`] - Timestamp normalization and the canonical sort key
//! - [`db`] - Shared SQLite handle
//! - [`schema`] - Embedded schema bootstrap
//! - [`metrics`] - Prometheus metrics helpers

pub mod db;
pub mod error;
pub mod metrics;
pub mod record;
pub mod schema;
pub mod time;
pub mod uri;

// Re-export commonly used types at crate root
pub use db::{sql_placeholders, Db};
pub use error::{Error, Result};
pub use record::{
    Ingredient, PostRecord, RecipePostRecord, RecipeRevisionRecord, RecordPayload, ReplyRef,
    RepostRecord, ReviewRatingRecord, Step, SubjectRef,
};
pub use schema::{init_schema, SCHEMA_VERSION};
pub use time::{normalize_datetime, now, parse_datetime, sort_at};
pub use uri::{did_from_uri, Collection, RecordUri};

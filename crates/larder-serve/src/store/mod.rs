//! Read-side access to the record store and derived tables.
//!
//! Every operation is a batched multi-URI lookup issued as a single store
//! round trip, returning results aligned to input order (1:1 operations) or
//! keyed maps (fan-in operations). The hydrator composes these into
//! request-scoped hydration state.

mod records;
mod social;

use larder_core::Db;

pub use records::{FetchedRecord, RecipeBundle};
pub use social::{InteractionCounts, LikeRow, RatingAgg, Relationship};

/// Read façade over the index database.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct RecordStore {
    db: Db,
}

impl RecordStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// The underlying database handle.
    pub fn db(&self) -> &Db {
        &self.db
    }
}

//! Record events from the repository network.
//!
//! The upstream event log delivers at-least-once: the same event can arrive
//! twice, and events for related records can arrive out of order (a recipe
//! revision before its parent recipe post). The indexing layer is built to
//! absorb both.

use serde::{Deserialize, Serialize};

/// What happened to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Create,
    Update,
    Delete,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// One record event as it appears on the wire (one JSON object per line in
/// backfill files).
///
/// `cid` and `record` are present for create/update, absent for delete.
/// `timestamp` is the upstream commit time; when absent the indexer stamps
/// its own observation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoEvent {
    pub kind: EventKind,
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

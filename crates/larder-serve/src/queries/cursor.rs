//! Keyset pagination cursors.
//!
//! Feeds paginate on the composite `(sort_at DESC, cid DESC)` key. The
//! cursor encodes the last-seen pair; feeding it back resumes exactly after
//! that item under stable data, which offset paging cannot guarantee on an
//! insert-heavy table. The cid tie-break makes the order total even when
//! two items share a timestamp.

use crate::error::{Error, Result};
use larder_core::time::parse_datetime;

/// Separator between the two cursor components.
const SEPARATOR: &str = "::";

/// A decoded `(sort_at, cid)` pagination cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeCidCursor {
    pub sort_at: String,
    pub cid: String,
}

impl TimeCidCursor {
    /// Encode as the opaque wire form.
    pub fn pack(&self) -> String {
        format!("{}{}{}", self.sort_at, SEPARATOR, self.cid)
    }

    /// Decode a cursor string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCursor`] for anything that does not decode
    /// to a valid `(timestamp, cid)` pair. A corrupt cursor is a client
    /// error, never a silent reset to page one.
    pub fn unpack(input: &str) -> Result<Self> {
        let (sort_at, cid) = input
            .split_once(SEPARATOR)
            .ok_or_else(|| Error::InvalidCursor("missing separator".to_string()))?;

        if parse_datetime(sort_at).is_none() {
            return Err(Error::InvalidCursor(format!(
                "timestamp component is not RFC 3339: {:?}",
                sort_at
            )));
        }
        if cid.is_empty() {
            return Err(Error::InvalidCursor("empty cid component".to_string()));
        }

        Ok(Self {
            sort_at: sort_at.to_string(),
            cid: cid.to_string(),
        })
    }

    /// Decode an optional cursor param.
    pub fn unpack_opt(input: Option<&str>) -> Result<Option<Self>> {
        input.map(Self::unpack).transpose()
    }
}

/// Cheap pre-check for cursors that obviously belong to a different
/// pagination scheme (e.g. a search-backend token fed to a store-backed
/// feed). Such cursors yield an empty page rather than an error, so clients
/// that switched sources mid-scroll terminate cleanly.
pub fn clearly_bad_cursor(cursor: Option<&str>) -> bool {
    matches!(cursor, Some(c) if !c.contains(SEPARATOR))
}

//! Error types for the Larder indexing layer.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during record event processing.
#[derive(Error, Debug)]
pub enum Error {
    /// Error from the shared foundation layer (URI parsing, validation, DB).
    #[error(transparent)]
    Core(#[from] larder_core::Error),

    /// A create/update event is missing its record body or cid.
    #[error("incomplete {kind} event for {uri}: {reason}")]
    IncompleteEvent {
        /// Event kind as a string ("create", "update", "delete").
        kind: &'static str,
        /// Target record URI.
        uri: String,
        /// Description of what's missing.
        reason: String,
    },

    /// JSON parsing error at the event envelope level.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error while reading an event source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Core(larder_core::Error::Db(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_event_display() {
        let err = Error::IncompleteEvent {
            kind: "create",
            uri: "at://did:plc:a/app.larder.feed.post/p1".to_string(),
            reason: "missing record body".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("create"));
        assert!(msg.contains("missing record body"));
    }

    #[test]
    fn test_core_error_passthrough() {
        let core = larder_core::Error::InvalidDatetime("nope".to_string());
        let err: Error = core.into();
        assert!(err.to_string().contains("nope"));
    }
}

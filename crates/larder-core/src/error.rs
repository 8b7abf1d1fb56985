//! Error types shared across the Larder workspace.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the shared foundation layer.
#[derive(Error, Debug)]
pub enum Error {
    /// A record URI could not be parsed or references an unsupported collection.
    #[error("invalid record uri '{uri}': {reason}")]
    InvalidUri {
        /// The offending URI string.
        uri: String,
        /// Description of what's wrong.
        reason: String,
    },

    /// A record body failed schema validation for its declared collection.
    #[error("invalid {collection} record: {reason}")]
    InvalidRecord {
        /// Collection NSID of the record.
        collection: &'static str,
        /// Description of what's wrong.
        reason: String,
    },

    /// A datetime string could not be parsed as RFC 3339.
    #[error("invalid datetime: {0}")]
    InvalidDatetime(String),

    /// SQLite error.
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking database task failed to complete (panicked or was cancelled).
    #[error("database task failed: {0}")]
    Task(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_uri_display() {
        let err = Error::InvalidUri {
            uri: "at://bad".to_string(),
            reason: "missing collection".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("at://bad"));
        assert!(msg.contains("missing collection"));
    }

    #[test]
    fn test_invalid_record_display() {
        let err = Error::InvalidRecord {
            collection: "app.larder.feed.post",
            reason: "text too long".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("app.larder.feed.post"));
        assert!(msg.contains("text too long"));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_from_db_error() {
        let db_err = rusqlite::Error::InvalidQuery;
        let err: Error = db_err.into();
        assert!(matches!(err, Error::Db(_)));
    }
}

//! Error taxonomy for the serving path.
//!
//! Client input errors (bad cursor, missing viewer, malformed params) are
//! distinct variants so the transport layer can map them to 4xx responses.
//! Everything else is a server-side failure. Upstream data errors —
//! malformed stored records — never surface here at all; the hydrator logs
//! them and treats the record as absent.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while serving feeds.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid request parameters.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A pagination cursor that failed to decode.
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    /// A viewer-scoped endpoint was called without a viewer identity.
    #[error("authentication required")]
    AuthRequired,

    /// Error from the shared foundation layer (DB, URIs, validation).
    #[error(transparent)]
    Core(#[from] larder_core::Error),

    /// External search backend error.
    #[error("search backend error: {0}")]
    Search(#[from] reqwest::Error),

    /// JSON serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// Whether this error is the client's fault (a 4xx at the transport).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::BadRequest(_) | Self::InvalidCursor(_) | Self::AuthRequired
        )
    }
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
    fn test_client_error_classification() {
        assert!(Error::BadRequest("nope".into()).is_client_error());
        assert!(Error::InvalidCursor("junk".into()).is_client_error());
        assert!(Error::AuthRequired.is_client_error());
        assert!(!Error::Internal(anyhow::anyhow!("boom")).is_client_error());
    }

    #[test]
    fn test_invalid_cursor_display() {
        let err = Error::InvalidCursor("missing separator".into());
        assert!(err.to_string().contains("invalid cursor"));
    }
}

//! Timestamp normalization and the canonical sort key.
//!
//! All timestamps are stored as RFC 3339 UTC strings with millisecond
//! precision so that string comparison matches chronological comparison.
//! The canonical sort key of a record is the *earlier* of its client-declared
//! `createdAt` and server-observed `indexedAt`: a client cannot backdate an
//! item into the past of a feed it was never in, and a skewed clock cannot
//! push it into the future.

use chrono::{DateTime, SecondsFormat, Utc};

/// Parse an RFC 3339 datetime string.
pub fn parse_datetime(input: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(input)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Normalize a datetime string to canonical RFC 3339 UTC with milliseconds.
///
/// Returns `None` when the input is not a valid RFC 3339 datetime.
pub fn normalize_datetime(input: &str) -> Option<String> {
    parse_datetime(input).map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Current time in canonical storage format.
pub fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Canonical sort key: the earlier of `created_at` and `indexed_at`.
///
/// Both inputs must already be normalized; comparison is lexicographic.
pub fn sort_at(created_at: &str, indexed_at: &str) -> String {
    if created_at < indexed_at {
        created_at.to_string()
    } else {
        indexed_at.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_to_utc_millis() {
        let normalized = normalize_datetime("2024-03-01T14:30:00+02:00").unwrap();
        assert_eq!(normalized, "2024-03-01T12:30:00.000Z");
    }

    #[test]
    fn test_normalize_preserves_millis() {
        let normalized = normalize_datetime("2024-03-01T12:00:00.123Z").unwrap();
        assert_eq!(normalized, "2024-03-01T12:00:00.123Z");
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(normalize_datetime("last tuesday").is_none());
        assert!(normalize_datetime("").is_none());
        assert!(normalize_datetime("2024-03-01").is_none());
    }

    #[test]
    fn test_sort_at_prefers_earlier() {
        let created = "2024-03-01T10:00:00.000Z";
        let indexed = "2024-03-01T12:00:00.000Z";
        assert_eq!(sort_at(created, indexed), created);
        // Backdated createdAt still wins (it's earlier), but a future
        // createdAt is clamped by indexedAt.
        assert_eq!(sort_at("2030-01-01T00:00:00.000Z", indexed), indexed);
    }

    #[test]
    fn test_normalized_strings_compare_chronologically() {
        let a = normalize_datetime("2024-03-01T12:00:00.000Z").unwrap();
        let b = normalize_datetime("2024-03-01T12:00:00.001Z").unwrap();
        let c = normalize_datetime("2024-03-02T00:00:00.000Z").unwrap();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_now_is_normalized() {
        let now = now();
        assert_eq!(normalize_datetime(&now).unwrap(), now);
    }
}

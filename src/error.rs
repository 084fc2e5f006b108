//! Error taxonomy. Six discriminable kinds so a
//! caller — and a test — can match on *why* an operation failed rather than
//! scrape a message string.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MongoLiteError {
    /// Invalid argument shape: non-mapping where a mapping is required, empty
    /// update, update mixing operators and plain fields, replacement
    /// containing `$` fields, non-string document keys, unsupported
    /// projection mode mix, bad sort directions.
    #[error("validation error: {0}")]
    Validation(String),

    /// Unique-index violation on insert, or on post-update re-validation.
    #[error("duplicate key error: {0}")]
    DuplicateKey(String),

    /// Semantic misuse detected at evaluation time: bad `$bucket`
    /// boundaries, `$lookup` with non-string arguments, positional
    /// projection, and similar.
    #[error("operation failure: {0}")]
    OperationFailure(String),

    /// A recognized MongoDB operation this engine does not implement —
    /// distinguishable from an unknown/invalid operator so callers can skip
    /// rather than fail a whole suite.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// A call supplied an argument the operation forbids (e.g. a session, a
    /// non-default read/write concern).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// JSON codec failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MongoLiteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_are_discriminable_by_match_not_message() {
        let err = MongoLiteError::DuplicateKey("email".to_string());
        assert!(matches!(err, MongoLiteError::DuplicateKey(_)));

        let err = MongoLiteError::NotImplemented("array filters".to_string());
        assert!(matches!(err, MongoLiteError::NotImplemented(_)));
        assert!(!matches!(err, MongoLiteError::Validation(_)));
    }

    #[test]
    fn serialization_error_converts_via_from() {
        let bad: std::result::Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: MongoLiteError = bad.unwrap_err().into();
        assert!(matches!(err, MongoLiteError::Serialization(_)));
    }
}

use std::time::Duration;

use thiserror::Error;

use crate::record::RecordId;

/// Errors from backend operations (used by the backend port in mnemo-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend timed out after {0:?}")]
    Timeout(Duration),

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("record id already exists: {0}")]
    Duplicate(RecordId),
}

impl RepositoryError {
    /// Whether this failure means the backend cannot serve requests right now,
    /// as opposed to an answer about the data (`NotFound`, `Conflict`, ...).
    pub fn is_failover(&self) -> bool {
        matches!(
            self,
            RepositoryError::Unavailable(_) | RepositoryError::Timeout(_) | RepositoryError::Query(_)
        )
    }
}

/// Errors surfaced by the dual-backend store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(RecordId),

    #[error("version conflict on {id}: expected {expected}, found {actual}")]
    Conflict {
        id: RecordId,
        expected: u32,
        actual: u32,
    },

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("store timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid record: {0}")]
    Invalid(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Errors from an extraction collaborator.
#[derive(Debug, Clone, Error)]
pub enum ExtractionError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("extraction service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("rate limited")]
    RateLimited,

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl ExtractionError {
    /// Transient failures are worth another attempt; the rest are final.
    pub fn is_transient(&self) -> bool {
        match self {
            ExtractionError::Transport(_) | ExtractionError::RateLimited => true,
            ExtractionError::Status { status, .. } => *status >= 500,
            ExtractionError::AuthenticationFailed | ExtractionError::Malformed(_) => false,
        }
    }
}

/// Errors from turning a transcript into a record draft.
#[derive(Debug, Error)]
pub enum DistillationError {
    #[error("transcript is empty")]
    EmptyTranscript,

    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("extraction timed out after {0:?}")]
    Timeout(Duration),
}

/// A migration that finished but could not copy every record.
#[derive(Debug, Error)]
#[error("migration incomplete: {failed} record(s) failed ({migrated} migrated, {skipped} skipped)")]
pub struct MigrationPartialFailure {
    pub migrated: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Errors from the capture flow as a whole.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error(transparent)]
    Distillation(#[from] DistillationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("flag store error: {0}")]
    Flags(String),

    #[error("capture task ended without reporting")]
    Abandoned,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");
    }

    #[test]
    fn test_repository_error_failover_classes() {
        assert!(RepositoryError::Unavailable("down".into()).is_failover());
        assert!(RepositoryError::Timeout(Duration::from_secs(1)).is_failover());
        assert!(!RepositoryError::NotFound.is_failover());
        assert!(!RepositoryError::Conflict("stale".into()).is_failover());
        assert!(!RepositoryError::Duplicate(RecordId::from("x")).is_failover());
    }

    #[test]
    fn test_store_conflict_display() {
        let err = StoreError::Conflict {
            id: RecordId::from("20261019T000000000-0001"),
            expected: 1,
            actual: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("20261019T000000000-0001"));
        assert!(msg.contains("expected 1"));
        assert!(msg.contains("found 2"));
    }

    #[test]
    fn test_extraction_error_transient() {
        assert!(ExtractionError::Transport("reset".into()).is_transient());
        assert!(
            ExtractionError::Status {
                status: 529,
                body: "overloaded".into()
            }
            .is_transient()
        );
        assert!(
            !ExtractionError::Status {
                status: 400,
                body: "bad".into()
            }
            .is_transient()
        );
        assert!(!ExtractionError::Malformed("no summary".into()).is_transient());
    }

    #[test]
    fn test_migration_partial_failure_display() {
        let err = MigrationPartialFailure {
            migrated: 3,
            skipped: 1,
            failed: 2,
        };
        assert_eq!(
            err.to_string(),
            "migration incomplete: 2 record(s) failed (3 migrated, 1 skipped)"
        );
    }

    #[test]
    fn test_capture_error_is_transparent() {
        let err: CaptureError = DistillationError::EmptyTranscript.into();
        assert_eq!(err.to_string(), "transcript is empty");
    }
}

//! Stable process exit codes.

use mnemo_types::error::{CaptureError, DistillationError, MigrationPartialFailure, StoreError};

pub const SUCCESS: i32 = 0;
pub const GENERIC: i32 = 1;
pub const USAGE: i32 = 2;
pub const NOT_FOUND: i32 = 3;
pub const CONFLICT: i32 = 4;
pub const STORE_UNAVAILABLE: i32 = 5;
pub const TIMEOUT: i32 = 6;
pub const EMPTY_TRANSCRIPT: i32 = 7;
pub const EXTRACTION_FAILED: i32 = 8;
pub const MIGRATION_PARTIAL: i32 = 9;

fn store_code(err: &StoreError) -> i32 {
    match err {
        StoreError::NotFound(_) => NOT_FOUND,
        StoreError::Conflict { .. } => CONFLICT,
        StoreError::StoreUnavailable(_) => STORE_UNAVAILABLE,
        StoreError::Timeout(_) => TIMEOUT,
        StoreError::Invalid(_) | StoreError::Backend(_) => GENERIC,
    }
}

fn distill_code(err: &DistillationError) -> i32 {
    match err {
        DistillationError::EmptyTranscript => EMPTY_TRANSCRIPT,
        DistillationError::ExtractionFailed(_) => EXTRACTION_FAILED,
        DistillationError::Timeout(_) => TIMEOUT,
    }
}

/// Map an error chain to an exit code. The first domain error found wins.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<StoreError>() {
            return store_code(e);
        }
        if let Some(e) = cause.downcast_ref::<DistillationError>() {
            return distill_code(e);
        }
        if let Some(e) = cause.downcast_ref::<CaptureError>() {
            return match e {
                CaptureError::Distillation(d) => distill_code(d),
                CaptureError::Store(s) => store_code(s),
                CaptureError::Flags(_) | CaptureError::Abandoned => GENERIC,
            };
        }
        if cause.downcast_ref::<MigrationPartialFailure>().is_some() {
            return MIGRATION_PARTIAL;
        }
        if cause.downcast_ref::<clap::Error>().is_some() {
            return USAGE;
        }
    }
    GENERIC
}

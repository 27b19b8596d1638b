//! Time-sortable record id assignment.
//!
//! Ids look like `20261019T101500123-0007`: the UTC millisecond bucket
//! followed by a 4-digit counter within that bucket. Lexicographic order
//! equals creation order as long as all ids come from one generator.

use std::sync::Mutex;

use chrono::{DateTime, Utc};

use mnemo_types::record::RecordId;

const MAX_COUNTER: u32 = 9_999;

#[derive(Debug, Default)]
struct IdState {
    bucket_ms: i64,
    counter: u32,
}

/// Serializes id assignment behind a mutex.
///
/// Clock regressions clamp to the last bucket; a bucket that exhausts its
/// counter spills into the next millisecond.
#[derive(Debug, Default)]
pub struct RecordIdGenerator {
    state: Mutex<IdState>,
}

impl RecordIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id and the creation timestamp it encodes.
    pub fn next(&self) -> (RecordId, DateTime<Utc>) {
        self.next_at(Utc::now())
    }

    /// Next id as if the clock read `now`.
    pub fn next_at(&self, now: DateTime<Utc>) -> (RecordId, DateTime<Utc>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let now_ms = now.timestamp_millis();

        if now_ms > state.bucket_ms {
            state.bucket_ms = now_ms;
            state.counter = 0;
        } else if state.counter >= MAX_COUNTER {
            state.bucket_ms += 1;
            state.counter = 0;
        } else {
            state.counter += 1;
        }

        let created_at = DateTime::<Utc>::from_timestamp_millis(state.bucket_ms).unwrap_or(now);
        let id = format!(
            "{}-{:04}",
            created_at.format("%Y%m%dT%H%M%S%3f"),
            state.counter
        );
        (RecordId(id), created_at)
    }
}

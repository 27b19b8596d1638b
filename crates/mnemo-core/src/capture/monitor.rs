//! Usage-threshold monitor.
//!
//! Signals `CaptureRequested` the first time a session's usage reaches the
//! configured share of its capacity, then stays silent until the session is
//! reset. The one-shot flag lives in a `FlagStore` so a durable table keeps a
//! restart from prompting twice.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use mnemo_types::error::CaptureError;

/// Durable one-shot flag table keyed by session id.
pub trait FlagStore: Send + Sync {
    /// Set the flag. Returns `true` only for the call that actually set it.
    fn set_once(&self, session_id: &str) -> impl Future<Output = Result<bool, CaptureError>> + Send;

    fn is_set(&self, session_id: &str) -> impl Future<Output = Result<bool, CaptureError>> + Send;

    fn clear(&self, session_id: &str) -> impl Future<Output = Result<(), CaptureError>> + Send;
}

type FlagFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CaptureError>> + Send + 'a>>;

/// Object-safe version of [`FlagStore`] with boxed futures.
pub trait FlagStoreDyn: Send + Sync {
    fn set_once_boxed<'a>(&'a self, session_id: &'a str) -> FlagFuture<'a, bool>;

    fn is_set_boxed<'a>(&'a self, session_id: &'a str) -> FlagFuture<'a, bool>;

    fn clear_boxed<'a>(&'a self, session_id: &'a str) -> FlagFuture<'a, ()>;
}

impl<T: FlagStore> FlagStoreDyn for T {
    fn set_once_boxed<'a>(&'a self, session_id: &'a str) -> FlagFuture<'a, bool> {
        Box::pin(self.set_once(session_id))
    }

    fn is_set_boxed<'a>(&'a self, session_id: &'a str) -> FlagFuture<'a, bool> {
        Box::pin(self.is_set(session_id))
    }

    fn clear_boxed<'a>(&'a self, session_id: &'a str) -> FlagFuture<'a, ()> {
        Box::pin(self.clear(session_id))
    }
}

/// In-memory flag table for tests and embedded use. Clones share the table.
#[derive(Debug, Clone, Default)]
pub struct MemoryFlagStore {
    flags: Arc<DashMap<String, ()>>,
}

impl MemoryFlagStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FlagStore for MemoryFlagStore {
    async fn set_once(&self, session_id: &str) -> Result<bool, CaptureError> {
        Ok(self.flags.insert(session_id.to_string(), ()).is_none())
    }

    async fn is_set(&self, session_id: &str) -> Result<bool, CaptureError> {
        Ok(self.flags.contains_key(session_id))
    }

    async fn clear(&self, session_id: &str) -> Result<(), CaptureError> {
        self.flags.remove(session_id);
        Ok(())
    }
}

/// Signal raised by the monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum Signal {
    CaptureRequested {
        session_id: String,
        usage_count: u64,
        capacity: u64,
    },
}

/// Decides when a session should be captured.
#[derive(Clone)]
pub struct ThresholdMonitor {
    flags: Arc<dyn FlagStoreDyn>,
    threshold_percent: u8,
}

impl ThresholdMonitor {
    pub fn new<F: FlagStore + 'static>(flags: F, threshold_percent: u8) -> Self {
        Self {
            flags: Arc::new(flags),
            threshold_percent: threshold_percent.min(100),
        }
    }

    pub fn threshold_percent(&self) -> u8 {
        self.threshold_percent
    }

    /// Whether `usage_count` has reached the threshold share of `capacity`.
    ///
    /// Integer comparison, so no rounding can fire early or late. Zero
    /// capacity never arms.
    pub fn crosses(&self, usage_count: u64, capacity: u64) -> bool {
        if capacity == 0 {
            return false;
        }
        u128::from(usage_count) * 100 >= u128::from(self.threshold_percent) * u128::from(capacity)
    }

    /// Feed one usage observation. Returns a signal at most once per session.
    #[tracing::instrument(skip(self))]
    pub async fn observe(
        &self,
        session_id: &str,
        usage_count: u64,
        capacity: u64,
    ) -> Result<Option<Signal>, CaptureError> {
        if !self.crosses(usage_count, capacity) {
            return Ok(None);
        }
        if !self.flags.set_once_boxed(session_id).await? {
            tracing::debug!("threshold already signalled for session");
            return Ok(None);
        }
        tracing::info!(threshold = self.threshold_percent, "usage threshold crossed");
        Ok(Some(Signal::CaptureRequested {
            session_id: session_id.to_string(),
            usage_count,
            capacity,
        }))
    }

    /// Whether the session has already been signalled.
    pub async fn has_fired(&self, session_id: &str) -> Result<bool, CaptureError> {
        self.flags.is_set_boxed(session_id).await
    }

    /// Re-arm the monitor for a session.
    pub async fn reset(&self, session_id: &str) -> Result<(), CaptureError> {
        self.flags.clear_boxed(session_id).await
    }
}

impl std::fmt::Debug for ThresholdMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThresholdMonitor")
            .field("threshold_percent", &self.threshold_percent)
            .finish()
    }
}

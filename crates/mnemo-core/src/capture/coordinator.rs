//! Capture orchestration: monitor -> confirmation -> distiller -> store.
//!
//! `on_turn` never blocks the conversation on distillation. Once a capture is
//! confirmed the work runs on a spawned Tokio task and the caller gets a
//! `CaptureHandle` to await the outcome if it cares to. A record is either
//! fully committed or nothing is; failures are logged and reported, never
//! propagated as panics.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::Instrument;

use mnemo_types::config::CaptureConfig;
use mnemo_types::error::CaptureError;
use mnemo_types::record::{Record, RecordId};

use super::monitor::{Signal, ThresholdMonitor};
use super::session::SessionState;
use crate::distill::{DistillHints, Distiller};
use crate::retrieval::RetrievalEngine;
use crate::store::Store;

/// User confirmation channel.
pub trait Confirmer: Send + Sync {
    /// Ask whether to capture. The coordinator bounds the wait; no answer is "no".
    fn confirm(&self, session_id: &str, prompt: &str) -> impl Future<Output = bool> + Send;
}

/// Capture behaviour knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureSettings {
    /// Skip confirmation and capture as soon as the threshold is crossed.
    pub auto_save: bool,
    pub confirmation_timeout: Duration,
    /// Jaccard similarity at which a capture counts as a duplicate.
    pub dedup_similarity: Option<f64>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self::from(&CaptureConfig::default())
    }
}

impl From<&CaptureConfig> for CaptureSettings {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            auto_save: config.auto_save,
            confirmation_timeout: config.confirmation_timeout(),
            dedup_similarity: config.dedup_similarity,
        }
    }
}

/// How a capture ended.
#[derive(Debug)]
pub enum CaptureOutcome {
    Stored(Record),
    Declined,
    Duplicate { existing_id: RecordId },
    Failed(CaptureError),
}

/// Completion handle for a capture running in the background.
#[derive(Debug)]
pub struct CaptureHandle {
    rx: oneshot::Receiver<CaptureOutcome>,
}

impl CaptureHandle {
    fn ready(outcome: CaptureOutcome) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(outcome);
        Self { rx }
    }

    /// Wait for the capture to finish.
    pub async fn wait(self) -> CaptureOutcome {
        self.rx
            .await
            .unwrap_or(CaptureOutcome::Failed(CaptureError::Abandoned))
    }
}

/// Wires the monitor, confirmer, distiller and store together.
pub struct CaptureCoordinator<C> {
    monitor: ThresholdMonitor,
    confirmer: C,
    distiller: Arc<Distiller>,
    store: Arc<Store>,
    sessions: DashMap<String, SessionState>,
    settings: CaptureSettings,
}

impl<C: Confirmer> CaptureCoordinator<C> {
    pub fn new(
        monitor: ThresholdMonitor,
        confirmer: C,
        distiller: Arc<Distiller>,
        store: Arc<Store>,
        settings: CaptureSettings,
    ) -> Self {
        Self {
            monitor,
            confirmer,
            distiller,
            store,
            sessions: DashMap::new(),
            settings,
        }
    }

    pub fn monitor(&self) -> &ThresholdMonitor {
        &self.monitor
    }

    /// Append a conversation turn to the session's transcript buffer.
    pub fn record_turn(&self, session_id: &str, turn: impl Into<String>) {
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionState::new(session_id))
            .transcript
            .push(turn);
    }

    /// Snapshot of a session's state.
    pub fn session(&self, session_id: &str) -> Option<SessionState> {
        self.sessions.get(session_id).map(|s| s.clone())
    }

    /// Feed a usage observation.
    ///
    /// Returns `None` while nothing needs capturing. On the first crossing it
    /// asks for confirmation (unless `auto_save`) and, on "yes", starts the
    /// capture in the background.
    #[tracing::instrument(skip(self, hints))]
    pub async fn on_turn(
        &self,
        session_id: &str,
        usage_count: u64,
        capacity: u64,
        hints: DistillHints,
    ) -> Result<Option<CaptureHandle>, CaptureError> {
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionState::new(session_id))
            .record_usage(usage_count, capacity);

        let Some(Signal::CaptureRequested {
            usage_count,
            capacity,
            ..
        }) = self.monitor.observe(session_id, usage_count, capacity).await?
        else {
            return Ok(None);
        };
        if let Some(mut state) = self.sessions.get_mut(session_id) {
            state.threshold_crossed = true;
        }

        let percent = usage_count.saturating_mul(100) / capacity.max(1);
        let prompt = format!("Context is {percent}% full. Save a memory of this session?");
        Ok(Some(self.request_capture(session_id, &prompt, hints).await))
    }

    /// Confirm (unless `auto_save`), then capture the session's buffered
    /// transcript in the background. A "no" leaves the buffer untouched.
    pub async fn request_capture(
        &self,
        session_id: &str,
        prompt: &str,
        hints: DistillHints,
    ) -> CaptureHandle {
        if !self.settings.auto_save && !self.ask(session_id, prompt).await {
            tracing::info!(session_id, "capture declined");
            return CaptureHandle::ready(CaptureOutcome::Declined);
        }

        let transcript = self
            .sessions
            .get_mut(session_id)
            .map(|mut state| state.transcript.drain())
            .unwrap_or_default();
        self.spawn_capture(transcript, hints)
    }

    async fn ask(&self, session_id: &str, prompt: &str) -> bool {
        match tokio::time::timeout(
            self.settings.confirmation_timeout,
            self.confirmer.confirm(session_id, prompt),
        )
        .await
        {
            Ok(answer) => answer,
            Err(_) => {
                tracing::warn!(
                    timeout = ?self.settings.confirmation_timeout,
                    "no confirmation received; not capturing"
                );
                false
            }
        }
    }

    /// Distill and store `transcript` on a background task.
    pub fn spawn_capture(&self, transcript: String, hints: DistillHints) -> CaptureHandle {
        let (tx, rx) = oneshot::channel();
        let distiller = Arc::clone(&self.distiller);
        let store = Arc::clone(&self.store);
        let dedup = self.settings.dedup_similarity;
        let span = tracing::info_span!("capture", transcript_len = transcript.len());

        tokio::spawn(
            async move {
                let outcome = run_capture(&distiller, store, &transcript, &hints, dedup).await;
                let _ = tx.send(outcome);
            }
            .instrument(span),
        );

        CaptureHandle { rx }
    }

    /// Capture immediately and wait for the outcome.
    pub async fn capture_now(&self, transcript: String, hints: DistillHints) -> CaptureOutcome {
        self.spawn_capture(transcript, hints).wait().await
    }

    /// Forget a session and re-arm its threshold.
    pub async fn reset(&self, session_id: &str) -> Result<(), CaptureError> {
        self.sessions.remove(session_id);
        self.monitor.reset(session_id).await
    }
}

async fn run_capture(
    distiller: &Distiller,
    store: Arc<Store>,
    transcript: &str,
    hints: &DistillHints,
    dedup: Option<f64>,
) -> CaptureOutcome {
    let draft = match distiller.distill(transcript, hints).await {
        Ok(draft) => draft,
        Err(e) => {
            tracing::warn!(error = %e, "capture failed during distillation");
            return CaptureOutcome::Failed(e.into());
        }
    };

    if let Some(threshold) = dedup {
        let retrieval = RetrievalEngine::new(Arc::clone(&store), 0);
        match retrieval.find_duplicate(&draft, threshold).await {
            Ok(Some(existing)) => {
                tracing::info!(existing_id = %existing.id, "capture matches an existing record");
                return CaptureOutcome::Duplicate {
                    existing_id: existing.id,
                };
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "duplicate check failed; storing anyway"),
        }
    }

    match store.write(draft).await {
        Ok(record) => {
            tracing::info!(id = %record.id, degraded = record.is_degraded(), "capture stored");
            CaptureOutcome::Stored(record)
        }
        Err(e) => {
            tracing::warn!(error = %e, "capture failed during write");
            CaptureOutcome::Failed(e.into())
        }
    }
}

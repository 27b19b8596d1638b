//! Application state: data directory, configuration, and the service wiring
//! shared by the commands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;

use mnemo_core::capture::ThresholdMonitor;
use mnemo_core::distill::{Distiller, DistillerPolicy};
use mnemo_core::retrieval::RetrievalEngine;
use mnemo_core::store::Store;
use mnemo_infra::config::{load_config, resolve_data_dir};
use mnemo_infra::extraction::build_extractor;
use mnemo_infra::wiring::{build_store, flag_store};
use mnemo_types::config::MnemoConfig;

/// Resolved configuration. Services are built on demand so commands that
/// never touch the store (`observe`, `session reset`) never open it.
pub struct AppState {
    pub data_dir: PathBuf,
    pub config: MnemoConfig,
}

impl AppState {
    /// Resolve the data directory, create it, and load `config.toml`.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
        let config = load_config(&data_dir).await;
        tracing::debug!(data_dir = %data_dir.display(), "state initialized");
        Ok(Self { data_dir, config })
    }

    /// Open the configured dual-backend store.
    pub async fn open_store(&self) -> anyhow::Result<Arc<Store>> {
        let store = build_store(&self.config, &self.data_dir)
            .await
            .context("Failed to open the record store")?;
        Ok(Arc::new(store))
    }

    pub fn retrieval(&self, store: Arc<Store>) -> RetrievalEngine {
        RetrievalEngine::new(store, self.config.retrieval.summary_recent)
    }

    pub fn distiller(&self) -> Arc<Distiller> {
        let extractor = build_extractor(&self.config.extraction);
        Arc::new(Distiller::new(
            extractor,
            DistillerPolicy::from(&self.config.extraction),
        ))
    }

    /// Threshold monitor backed by the durable flag table.
    pub fn monitor(&self) -> ThresholdMonitor {
        ThresholdMonitor::new(
            flag_store(&self.data_dir),
            self.config.capture.threshold_percent,
        )
    }
}

//! Configuration types for Mnemo.
//!
//! `MnemoConfig` represents the `config.toml` in the data directory. Every
//! field has a default so a missing or partial file is always usable.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
///
/// Loaded from `~/.mnemo/config.toml` (or `$MNEMO_DATA_DIR/config.toml`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MnemoConfig {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

/// When and how a capture is triggered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Usage percentage of capacity at which a capture is requested.
    #[serde(default = "default_threshold_percent")]
    pub threshold_percent: u8,

    /// Skip the confirmation prompt and capture immediately.
    #[serde(default)]
    pub auto_save: bool,

    /// How long to wait for a yes/no answer before treating it as "no".
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,

    /// Jaccard similarity (0.0..=1.0) above which a new capture is treated as
    /// a duplicate of an existing record. Unset disables duplicate detection.
    #[serde(default)]
    pub dedup_similarity: Option<f64>,
}

fn default_threshold_percent() -> u8 {
    80
}

fn default_confirmation_timeout_secs() -> u64 {
    60
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            threshold_percent: default_threshold_percent(),
            auto_save: false,
            confirmation_timeout_secs: default_confirmation_timeout_secs(),
            dedup_similarity: None,
        }
    }
}

impl CaptureConfig {
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }
}

/// Persistence backend kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// File-based store under the data directory.
    Local,
    /// Relational store addressed by URL.
    Remote,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Local => write!(f, "local"),
            BackendKind::Remote => write!(f, "remote"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" | "file" => Ok(BackendKind::Local),
            "remote" | "sqlite" => Ok(BackendKind::Remote),
            other => Err(format!("invalid backend: '{other}'")),
        }
    }
}

/// Store backends and the fallback policy between them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_primary")]
    pub primary: BackendKind,

    /// Fallback backend. Must differ from `primary` to take effect.
    #[serde(default)]
    pub secondary: Option<BackendKind>,

    /// Root of the file store. Defaults to `{data_dir}/records`.
    #[serde(default)]
    pub local_dir: Option<PathBuf>,

    /// Database URL of the relational store. Defaults to `{data_dir}/mnemo.db`.
    #[serde(default)]
    pub remote_url: Option<String>,

    /// Pause before the single retry against the primary.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Upper bound on any single backend call.
    #[serde(default = "default_backend_timeout_secs")]
    pub backend_timeout_secs: u64,
}

fn default_primary() -> BackendKind {
    BackendKind::Local
}

fn default_retry_backoff_ms() -> u64 {
    250
}

fn default_backend_timeout_secs() -> u64 {
    10
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            primary: default_primary(),
            secondary: None,
            local_dir: None,
            remote_url: None,
            retry_backoff_ms: default_retry_backoff_ms(),
            backend_timeout_secs: default_backend_timeout_secs(),
        }
    }
}

impl StoreConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }

    /// The secondary backend, if configured and distinct from the primary.
    pub fn effective_secondary(&self) -> Option<BackendKind> {
        self.secondary.filter(|s| *s != self.primary)
    }
}

/// Which extraction collaborator distills transcripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorKind {
    /// Offline keyword/marker extraction.
    Heuristic,
    /// Anthropic Messages API.
    Anthropic,
}

/// Extraction collaborator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default = "default_provider")]
    pub provider: ExtractorKind,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_extraction_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries after a timed-out or transient failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_provider() -> ExtractorKind {
    ExtractorKind::Heuristic
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_extraction_timeout_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    2
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_extraction_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl ExtractionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Retrieval settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Number of recent records in `export_summary`.
    #[serde(default = "default_summary_recent")]
    pub summary_recent: usize,
}

fn default_summary_recent() -> usize {
    5
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            summary_recent: default_summary_recent(),
        }
    }
}

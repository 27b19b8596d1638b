//! Configuration loader for Mnemo.
//!
//! Reads `config.toml` from the data directory (`~/.mnemo/` in production)
//! and deserializes it into [`MnemoConfig`]. Falls back to defaults when the
//! file is missing or malformed, then applies environment overrides.

use std::path::{Path, PathBuf};

use mnemo_types::config::{BackendKind, MnemoConfig};

/// Overrides `store.remote_url`.
pub const ENV_REMOTE_URL: &str = "MNEMO_REMOTE_URL";
/// Overrides `store.primary` (`local` or `remote`).
pub const ENV_PRIMARY: &str = "MNEMO_PRIMARY";
/// Overrides the data directory.
pub const ENV_DATA_DIR: &str = "MNEMO_DATA_DIR";

/// The data directory: `$MNEMO_DATA_DIR`, else `~/.mnemo`.
pub fn resolve_data_dir() -> PathBuf {
    resolve_data_dir_with(std::env::var(ENV_DATA_DIR).ok())
}

fn resolve_data_dir_with(env: Option<String>) -> PathBuf {
    match env.filter(|d| !d.trim().is_empty()) {
        Some(dir) => PathBuf::from(dir),
        None => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".mnemo"),
    }
}

/// Load configuration from `{data_dir}/config.toml` and apply environment overrides.
pub async fn load_config(data_dir: &Path) -> MnemoConfig {
    let mut config = load_config_file(data_dir).await;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    config
}

/// Load `{data_dir}/config.toml` without environment overrides.
///
/// - Missing file: defaults.
/// - Unreadable or unparsable file: logs a warning and returns defaults.
pub async fn load_config_file(data_dir: &Path) -> MnemoConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return MnemoConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return MnemoConfig::default();
        }
    };

    match toml::from_str::<MnemoConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            MnemoConfig::default()
        }
    }
}

/// Apply `MNEMO_REMOTE_URL` and `MNEMO_PRIMARY`. Invalid values are ignored with a warning.
pub fn apply_env_overrides(config: &mut MnemoConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(url) = lookup(ENV_REMOTE_URL).filter(|u| !u.trim().is_empty()) {
        config.store.remote_url = Some(url);
    }
    if let Some(primary) = lookup(ENV_PRIMARY) {
        match primary.parse::<BackendKind>() {
            Ok(kind) => config.store.primary = kind,
            Err(err) => tracing::warn!("Ignoring {ENV_PRIMARY}: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_config_file(tmp.path()).await;
        assert_eq!(config, MnemoConfig::default());
        assert_eq!(config.capture.threshold_percent, 80);
    }

    #[tokio::test]
    async fn load_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
[capture]
threshold_percent = 90
auto_save = true

[store]
primary = "remote"
secondary = "local"
remote_url = "sqlite:///tmp/m.db"
"#,
        )
        .await
        .unwrap();

        let config = load_config_file(tmp.path()).await;
        assert_eq!(config.capture.threshold_percent, 90);
        assert!(config.capture.auto_save);
        assert_eq!(config.store.primary, BackendKind::Remote);
        assert_eq!(config.store.effective_secondary(), Some(BackendKind::Local));
        assert_eq!(config.retrieval.summary_recent, 5);
    }

    #[tokio::test]
    async fn load_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_config_file(tmp.path()).await;
        assert_eq!(config, MnemoConfig::default());
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = MnemoConfig::default();
        apply_env_overrides(&mut config, |name| match name {
            ENV_REMOTE_URL => Some("sqlite:///srv/m.db".to_string()),
            ENV_PRIMARY => Some("remote".to_string()),
            _ => None,
        });
        assert_eq!(config.store.remote_url.as_deref(), Some("sqlite:///srv/m.db"));
        assert_eq!(config.store.primary, BackendKind::Remote);
    }

    #[test]
    fn invalid_primary_override_is_ignored() {
        let mut config = MnemoConfig::default();
        apply_env_overrides(&mut config, |name| {
            (name == ENV_PRIMARY).then(|| "cloud".to_string())
        });
        assert_eq!(config.store.primary, BackendKind::Local);
    }

    #[test]
    fn data_dir_prefers_env() {
        assert_eq!(
            resolve_data_dir_with(Some("/srv/mnemo".to_string())),
            PathBuf::from("/srv/mnemo")
        );
        assert!(resolve_data_dir_with(None).ends_with(".mnemo"));
    }
}

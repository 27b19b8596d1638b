//! Durable one-shot flag table for the threshold monitor.
//!
//! One empty file per fired session at `{dir}/{hex(session_id)}.flag`. The
//! hex name is lossless, so distinct session ids never share a flag and none
//! can escape the directory. Creation uses `create_new`, so two processes
//! racing on the same session agree on a single winner.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs::{self, OpenOptions};

use mnemo_core::capture::FlagStore;
use mnemo_types::error::CaptureError;

#[derive(Debug, Clone)]
pub struct FileFlagStore {
    dir: PathBuf,
}

impl FileFlagStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, session_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.flag", hex::encode(session_id.as_bytes())))
    }
}

fn flag_err(e: std::io::Error) -> CaptureError {
    CaptureError::Flags(e.to_string())
}

impl FlagStore for FileFlagStore {
    async fn set_once(&self, session_id: &str) -> Result<bool, CaptureError> {
        fs::create_dir_all(&self.dir).await.map_err(flag_err)?;
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.path(session_id))
            .await
        {
            Ok(file) => {
                file.sync_all().await.map_err(flag_err)?;
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(flag_err(e)),
        }
    }

    async fn is_set(&self, session_id: &str) -> Result<bool, CaptureError> {
        fs::try_exists(self.path(session_id)).await.map_err(flag_err)
    }

    async fn clear(&self, session_id: &str) -> Result<(), CaptureError> {
        match fs::remove_file(self.path(session_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(flag_err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_core::capture::ThresholdMonitor;

    #[tokio::test]
    async fn test_set_once_is_one_shot() {
        let dir = tempfile::tempdir().unwrap();
        let flags = FileFlagStore::new(dir.path().join("flags"));
        assert!(!flags.is_set("s1").await.unwrap());
        assert!(flags.set_once("s1").await.unwrap());
        assert!(!flags.set_once("s1").await.unwrap());
        assert!(flags.is_set("s1").await.unwrap());
        flags.clear("s1").await.unwrap();
        assert!(!flags.is_set("s1").await.unwrap());
        flags.clear("s1").await.unwrap();
    }

    #[tokio::test]
    async fn test_session_ids_stay_inside_dir() {
        let dir = tempfile::tempdir().unwrap();
        let flags = FileFlagStore::new(dir.path());
        assert!(flags.set_once("../escape").await.unwrap());

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["2e2e2f657363617065.flag".to_string()]);
        assert!(!dir.path().parent().unwrap().join("escape.flag").exists());
    }

    #[tokio::test]
    async fn test_similar_session_ids_keep_separate_flags() {
        let dir = tempfile::tempdir().unwrap();
        let flags = FileFlagStore::new(dir.path());

        assert!(flags.set_once("sess.1").await.unwrap());
        assert!(!flags.is_set("sess_1").await.unwrap());
        assert!(!flags.is_set("sess/1").await.unwrap());

        assert!(flags.set_once("sess_1").await.unwrap());
        assert!(flags.set_once("sess/1").await.unwrap());

        flags.clear("sess_1").await.unwrap();
        assert!(flags.is_set("sess.1").await.unwrap());
        assert!(flags.is_set("sess/1").await.unwrap());
    }

    #[tokio::test]
    async fn test_monitor_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let first = ThresholdMonitor::new(FileFlagStore::new(dir.path()), 80);
        assert!(first.observe("s", 80, 100).await.unwrap().is_some());

        let restarted = ThresholdMonitor::new(FileFlagStore::new(dir.path()), 80);
        assert!(restarted.observe("s", 99, 100).await.unwrap().is_none());
    }
}

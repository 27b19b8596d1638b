//! Record storage: the backend port, its boxed wrapper, id assignment and
//! the dual-backend store that applies the fallback policy.

pub mod backend;
pub mod box_backend;
pub mod dual;
pub mod id;

use std::future::Future;
use std::time::Duration;

use mnemo_types::error::RepositoryError;

pub use backend::RecordBackend;
pub use box_backend::BoxRecordBackend;
pub use dual::{ReconcileReport, Store, StorePolicy};
pub use id::RecordIdGenerator;

/// Run a backend call under `limit`, surfacing expiry as `RepositoryError::Timeout`.
pub(crate) async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, RepositoryError>
where
    F: Future<Output = Result<T, RepositoryError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(RepositoryError::Timeout(limit)),
    }
}

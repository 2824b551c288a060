use std::path::Path;

use aig_core::TaskError;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for TaskError {
    fn from(e: ServiceError) -> Self {
        TaskError::Transport(e.to_string())
    }
}

/// File exchange with the orchestration server.
///
/// Handlers program against this trait so tests can swap in
/// [`crate::mock::MockTransfer`]. Neither call retries; retry policy belongs
/// to the caller.
#[async_trait]
pub trait FileTransfer: Send + Sync {
    /// Download an attachment of `session_id` named `remote_name` to
    /// `local_path`, creating parent directories as needed.
    async fn download_file(
        &self,
        session_id: &str,
        remote_name: &str,
        local_path: &Path,
    ) -> Result<(), ServiceError>;

    /// Fetch the raw content of a named evaluation dataset.
    async fn fetch_named_dataset(&self, name: &str) -> Result<Vec<u8>, ServiceError>;
}

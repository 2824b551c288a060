use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{FileTransfer, ServiceError};

/// A recorded call against [`MockTransfer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferCall {
    Download {
        session_id: String,
        remote_name: String,
        local_path: PathBuf,
    },
    FetchDataset {
        name: String,
    },
}

/// In-memory [`FileTransfer`] for tests. Serves canned files and datasets
/// and records every call in order.
#[derive(Default)]
pub struct MockTransfer {
    files: HashMap<String, Vec<u8>>,
    datasets: HashMap<String, Vec<u8>>,
    calls: Mutex<Vec<TransferCall>>,
}

impl MockTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, remote_name: &str, content: &[u8]) -> Self {
        self.files.insert(remote_name.to_string(), content.to_vec());
        self
    }

    pub fn with_dataset(mut self, name: &str, content: &[u8]) -> Self {
        self.datasets.insert(name.to_string(), content.to_vec());
        self
    }

    pub fn calls(&self) -> Vec<TransferCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: TransferCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

#[async_trait]
impl FileTransfer for MockTransfer {
    async fn download_file(
        &self,
        session_id: &str,
        remote_name: &str,
        local_path: &Path,
    ) -> Result<(), ServiceError> {
        self.record(TransferCall::Download {
            session_id: session_id.to_string(),
            remote_name: remote_name.to_string(),
            local_path: local_path.to_path_buf(),
        });
        let data = self
            .files
            .get(remote_name)
            .ok_or_else(|| ServiceError::NotFound(remote_name.to_string()))?;
        if let Some(parent) = local_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(local_path, data)?;
        Ok(())
    }

    async fn fetch_named_dataset(&self, name: &str) -> Result<Vec<u8>, ServiceError> {
        self.record(TransferCall::FetchDataset {
            name: name.to_string(),
        });
        self.datasets
            .get(name)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(name.to_string()))
    }
}

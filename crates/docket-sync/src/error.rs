use thiserror::Error;

use docket_core::ProviderError;
use docket_store::StoreError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("training failed: {0}")]
    Training(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

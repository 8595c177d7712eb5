use thiserror::Error;

use docket_core::{CnjError, ProviderError};
use docket_store::StoreError;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("invalid process identifier: {0}")]
    InvalidInput(#[from] CnjError),

    /// No tier had data and the provider could not be reached.
    #[error("no cached data for {cnj} and provider unavailable: {source}")]
    Unavailable {
        cnj: String,
        #[source]
        source: ProviderError,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

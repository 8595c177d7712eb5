//! Contract the cache needs from the external movement provider.

use async_trait::async_trait;
use thiserror::Error;

use crate::cnj::Cnj;
use crate::movement::Movement;

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("provider timed out after {0}s")]
    Timeout(u64),
    #[error("provider rate limit reached")]
    RateLimited { retry_after_secs: Option<u64> },
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Whether a later retry can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::InvalidResponse(_))
    }
}

/// Authoritative, rate-limited, metered source of movements.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Fetch up to `limit` movements for `cnj`, newest first.
    async fn fetch_movements(&self, cnj: &Cnj, limit: usize) -> Result<Vec<Movement>, ProviderError>;

    /// Cheap availability probe. Callers apply their own timeout.
    async fn health_check(&self) -> Result<(), ProviderError>;
}

/// Provider that is never reachable. Reads are served from cached data only.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineProvider;

#[async_trait]
impl Provider for OfflineProvider {
    async fn fetch_movements(&self, _cnj: &Cnj, _limit: usize) -> Result<Vec<Movement>, ProviderError> {
        Err(ProviderError::Unavailable("no provider configured".into()))
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        Err(ProviderError::Unavailable("no provider configured".into()))
    }
}

pub mod cnj;
pub mod config;
pub mod movement;
pub mod phase;
pub mod provider;
pub mod status;
pub mod ttl;

pub use cnj::{Cnj, CnjError, ProcessArea};
pub use config::{CacheConfig, PolicyConfig, SyncConfig};
pub use movement::{Movement, MovementType, mark_current};
pub use phase::{classify_access_pattern, classify_movements, classify_phase, synthesize_status};
pub use provider::{OfflineProvider, Provider, ProviderError};
pub use status::{
    AccessPattern, CacheSource, OptimizationConfig, Outcome, Phase, StatusSummary, SyncStatus,
};
pub use ttl::{TtlPlan, default_plan};

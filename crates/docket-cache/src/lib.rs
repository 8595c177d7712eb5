//! Tiered cache orchestrator: fast tier, durable tier, provider, in that order.

mod error;
pub use error::CacheError;

mod flight;
pub use flight::{FlightGuard, KeyedLocks};

mod orchestrator;
pub use orchestrator::{Lookup, TieredCache};

pub mod policy;
pub use policy::{PolicyDecision, decide_policy};

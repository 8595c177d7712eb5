//! Background work around the tiered cache: prioritized refresh cycles, the
//! daily optimization pass, proactive caching, and the HTTP provider client.

mod error;
pub use error::SyncError;

pub mod candidates;
pub use candidates::{Candidate, Priority, select_candidates};

mod scheduler;
pub use scheduler::{MaintenanceReport, SyncCycleReport, SyncOutcome, SyncScheduler};

pub mod optimize;
pub use optimize::{OptimizationReport, run_optimization_pass};

pub mod proactive;
pub use proactive::{ProactiveReport, run_proactive_pass, should_prefetch};

pub mod diagnostics;
pub use diagnostics::{EligibilityStats, eligibility};

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::HttpProvider;

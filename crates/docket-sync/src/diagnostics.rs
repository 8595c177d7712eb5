//! Read-only operator diagnostics.

use chrono::{DateTime, Utc};
use serde::Serialize;

use docket_ai::PolicyEngine;
use docket_ai::training::extract_samples;
use docket_core::SyncConfig;
use docket_store::DuckStore;

use crate::candidates::{Priority, remaining_budget, tier_members};
use crate::error::SyncError;

/// Upper bound on tier members counted per priority.
const TIER_COUNT_LIMIT: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EligibilityStats {
    pub training_samples: usize,
    pub required_samples: usize,
    pub processes_with_history: usize,
    pub processes_with_intervals: usize,
    pub total_movements: usize,
    pub models_trained: bool,
    pub trained_at: Option<DateTime<Utc>>,
    pub high_priority: usize,
    pub medium_priority: usize,
    pub low_priority: usize,
    pub remaining_budget: u64,
    pub tracked_processes: usize,
}

impl EligibilityStats {
    pub fn can_train(&self) -> bool {
        self.training_samples >= self.required_samples
    }
}

/// Training readiness, sync candidate counts and today's remaining budget.
pub fn eligibility(
    store: &DuckStore,
    engine: &PolicyEngine,
    config: &SyncConfig,
    now: DateTime<Utc>,
) -> Result<EligibilityStats, SyncError> {
    let batches = store.movement_history_batches()?;
    let samples = extract_samples(&batches).map_err(|e| SyncError::Training(format!("{e:#}")))?;
    let history = store.history_stats()?;

    let mut stats = EligibilityStats {
        training_samples: samples.len(),
        required_samples: engine.config().min_training_samples,
        processes_with_history: history.processes,
        processes_with_intervals: history.processes_with_intervals,
        total_movements: history.total_movements,
        models_trained: engine.is_trained(),
        trained_at: engine.trained_at(),
        high_priority: 0,
        medium_priority: 0,
        low_priority: 0,
        remaining_budget: remaining_budget(store, config.max_daily_syncs, now)?,
        tracked_processes: store.optimization_configs()?.len(),
    };
    for (priority, members) in tier_members(store, now, TIER_COUNT_LIMIT)? {
        match priority {
            Priority::High => stats.high_priority = members.len(),
            Priority::Medium => stats.medium_priority = members.len(),
            Priority::Low => stats.low_priority = members.len(),
        }
    }
    Ok(stats)
}

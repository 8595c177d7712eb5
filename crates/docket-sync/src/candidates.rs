//! Priority-ranked selection of entries to refresh.
//!
//! Three tiers, always evaluated in this order:
//!
//! - **High**: status rows expiring within the next 2 hours, unless their
//!   last sync failed.
//! - **Medium**: status rows that expired within the last 24 hours.
//! - **Low**: processes with movement activity in the last 7 days, last
//!   synced more than 6 hours ago, and accessed in the last 7 days.
//!
//! The combined list is capped at `min(batch_size * 3, remaining budget)`.
//! The budget is spent by every successful scheduled or proactive refresh.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use docket_core::SyncConfig;
use docket_store::{DuckStore, StoreError};

pub const HIGH_HORIZON_HOURS: i64 = 2;
pub const MEDIUM_LOOKBACK_HOURS: i64 = 24;
pub const LOW_ACTIVITY_DAYS: i64 = 7;
pub const LOW_SYNC_AGE_HOURS: i64 = 6;
pub const LOW_ACCESS_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub cnj: String,
    pub priority: Priority,
}

/// Provider refreshes still allowed on the UTC day containing `now`.
pub fn remaining_budget(store: &DuckStore, max_daily_syncs: u64, now: DateTime<Utc>) -> Result<u64, StoreError> {
    let used = store.provider_syncs_on(now.date_naive())?;
    Ok(max_daily_syncs.saturating_sub(used))
}

/// Members of each priority tier, in tier order, at most `limit` each.
pub fn tier_members(
    store: &DuckStore,
    now: DateTime<Utc>,
    limit: usize,
) -> Result<[(Priority, Vec<String>); 3], StoreError> {
    Ok([
        (
            Priority::High,
            store.expiring_between(now, now + Duration::hours(HIGH_HORIZON_HOURS), limit)?,
        ),
        (
            Priority::Medium,
            store.expired_between(now - Duration::hours(MEDIUM_LOOKBACK_HOURS), now, limit)?,
        ),
        (
            Priority::Low,
            store.stale_active(
                now - Duration::days(LOW_ACTIVITY_DAYS),
                now - Duration::hours(LOW_SYNC_AGE_HOURS),
                now - Duration::days(LOW_ACCESS_DAYS),
                limit,
            )?,
        ),
    ])
}

/// Candidates for this cycle, High before Medium before Low, deduplicated.
///
/// Empty once today's budget is spent.
pub fn select_candidates(
    store: &DuckStore,
    config: &SyncConfig,
    now: DateTime<Utc>,
) -> Result<Vec<Candidate>, StoreError> {
    let remaining = remaining_budget(store, config.max_daily_syncs, now)?;
    let cap = config
        .batch_size
        .saturating_mul(3)
        .min(usize::try_from(remaining).unwrap_or(usize::MAX));
    if cap == 0 {
        return Ok(Vec::new());
    }

    let mut seen = HashSet::new();
    let mut selected = Vec::with_capacity(cap);
    for (priority, cnjs) in tier_members(store, now, cap)? {
        for cnj in cnjs {
            if selected.len() == cap {
                return Ok(selected);
            }
            if seen.insert(cnj.clone()) {
                selected.push(Candidate { cnj, priority });
            }
        }
    }
    Ok(selected)
}

//! Freshness windows per process and the static default table.
//!
//! The table is fixed configuration: a base fast-tier TTL per phase, scaled by
//! access pattern and court area. Durable TTL and sync interval are derived
//! from the fast-tier TTL by fixed multiples.
//!
//! # Ordering
//!
//! Every plan handed out satisfies `fast ≤ durable ≤ sync_interval`.
//! [`TtlPlan::normalized`] raises later fields to at least the earlier ones
//! and reports whether it had to.

use serde::{Deserialize, Serialize};

use crate::cnj::ProcessArea;
use crate::status::{AccessPattern, Phase};

/// Floor for any fast-tier TTL: 15 minutes.
pub const MIN_TTL_SECS: u64 = 15 * 60;
/// Ceiling for any fast-tier TTL: 7 days.
pub const MAX_TTL_SECS: u64 = 7 * 24 * 3600;
pub const DURABLE_MULTIPLIER: u64 = 3;
pub const SYNC_MULTIPLIER: u64 = 2;

/// Freshness windows for one process, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlPlan {
    /// Fast-tier (in-memory) freshness window.
    pub fast_secs: u64,
    /// Durable-tier validity window.
    pub durable_secs: u64,
    /// Interval between scheduled provider refreshes.
    pub sync_interval_secs: u64,
}

impl TtlPlan {
    /// Derive a plan from a recommended fast-tier TTL.
    ///
    /// The fast TTL is clamped to `[MIN_TTL_SECS, MAX_TTL_SECS]`, then
    /// multiplied out and normalized.
    pub fn from_fast(fast_secs: u64) -> Self {
        let fast = fast_secs.clamp(MIN_TTL_SECS, MAX_TTL_SECS);
        let (plan, _) = Self {
            fast_secs: fast,
            durable_secs: fast * DURABLE_MULTIPLIER,
            sync_interval_secs: fast * SYNC_MULTIPLIER,
        }
        .normalized();
        plan
    }

    /// Enforce `fast ≤ durable ≤ sync_interval`.
    ///
    /// Returns the fixed plan and `true` if any field had to be raised.
    pub fn normalized(self) -> (Self, bool) {
        let durable_secs = self.durable_secs.max(self.fast_secs);
        let sync_interval_secs = self.sync_interval_secs.max(durable_secs);
        let fixed = Self {
            fast_secs: self.fast_secs,
            durable_secs,
            sync_interval_secs,
        };
        (fixed, fixed != self)
    }

    pub fn is_ordered(&self) -> bool {
        self.fast_secs <= self.durable_secs && self.durable_secs <= self.sync_interval_secs
    }
}

// ── Static table ──

/// Base fast-tier TTL per phase.
///
/// Decision-phase processes change quickly; archived ones barely change.
const PHASE_BASE_SECS: [(Phase, u64); 6] = [
    (Phase::Initial, 2 * 3600),
    (Phase::Instructional, 4 * 3600),
    (Phase::Decision, 3600),
    (Phase::Appeal, 3 * 3600),
    (Phase::Final, 12 * 3600),
    (Phase::Archived, 24 * 3600),
];

/// Multiplier in percent per access pattern.
const PATTERN_PERCENT: [(AccessPattern, u64); 4] = [
    (AccessPattern::Daily, 50),
    (AccessPattern::Weekly, 100),
    (AccessPattern::Monthly, 200),
    (AccessPattern::Rarely, 400),
];

/// Multiplier in percent per court area.
const AREA_PERCENT: [(ProcessArea, u64); 7] = [
    (ProcessArea::State, 100),
    (ProcessArea::Federal, 100),
    (ProcessArea::Labor, 80),
    (ProcessArea::Electoral, 50),
    (ProcessArea::Military, 120),
    (ProcessArea::Superior, 150),
    (ProcessArea::General, 100),
];

fn lookup<K: PartialEq + Copy>(table: &[(K, u64)], key: K, default: u64) -> u64 {
    table
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| *v)
        .unwrap_or(default)
}

/// Base fast-tier TTL for `(phase, area, pattern)`, before clamping.
pub fn base_ttl_secs(phase: Phase, area: ProcessArea, pattern: AccessPattern) -> u64 {
    let base = lookup(&PHASE_BASE_SECS, phase, 4 * 3600);
    let pattern_pct = lookup(&PATTERN_PERCENT, pattern, 100);
    let area_pct = lookup(&AREA_PERCENT, area, 100);
    base * pattern_pct / 100 * area_pct / 100
}

/// Rule-based plan from the static table.
pub fn default_plan(phase: Phase, area: ProcessArea, pattern: AccessPattern) -> TtlPlan {
    TtlPlan::from_fast(base_ttl_secs(phase, area, pattern))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_fast_clamps_minimum() {
        let plan = TtlPlan::from_fast(60);
        assert_eq!(plan.fast_secs, MIN_TTL_SECS);
    }

    #[test]
    fn from_fast_clamps_maximum() {
        let plan = TtlPlan::from_fast(MAX_TTL_SECS * 10);
        assert_eq!(plan.fast_secs, MAX_TTL_SECS);
    }

    #[test]
    fn multiples_are_normalized_into_order() {
        // ×3 durable and ×2 sync would invert durable/sync; normalization fixes it.
        let plan = TtlPlan::from_fast(3600);
        assert_eq!(plan.fast_secs, 3600);
        assert_eq!(plan.durable_secs, 3 * 3600);
        assert_eq!(plan.sync_interval_secs, 3 * 3600);
        assert!(plan.is_ordered());
    }

    #[test]
    fn normalized_reports_change() {
        let raw = TtlPlan {
            fast_secs: 100,
            durable_secs: 300,
            sync_interval_secs: 200,
        };
        let (fixed, changed) = raw.normalized();
        assert!(changed);
        assert_eq!(fixed.sync_interval_secs, 300);

        let (same, changed) = fixed.normalized();
        assert!(!changed);
        assert_eq!(same, fixed);
    }

    #[test]
    fn decision_phase_shorter_than_archived() {
        let decision = base_ttl_secs(Phase::Decision, ProcessArea::State, AccessPattern::Weekly);
        let archived = base_ttl_secs(Phase::Archived, ProcessArea::State, AccessPattern::Weekly);
        assert!(decision < archived);
    }

    #[test]
    fn frequent_access_shortens_ttl() {
        let daily = base_ttl_secs(Phase::Appeal, ProcessArea::Federal, AccessPattern::Daily);
        let rarely = base_ttl_secs(Phase::Appeal, ProcessArea::Federal, AccessPattern::Rarely);
        assert_eq!(daily, 3 * 3600 / 2);
        assert_eq!(rarely, 3 * 3600 * 4);
    }

    #[test]
    fn every_table_entry_is_ordered() {
        for phase in Phase::ALL {
            for area in ProcessArea::ALL {
                for pattern in AccessPattern::ALL {
                    let plan = default_plan(phase, area, pattern);
                    assert!(plan.is_ordered(), "{phase:?}/{area:?}/{pattern:?}");
                    assert!(plan.fast_secs >= MIN_TTL_SECS);
                }
            }
        }
    }
}

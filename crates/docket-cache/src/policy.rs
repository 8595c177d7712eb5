//! Per-process cache policy derived from movements and access history.

use docket_ai::{PolicyEngine, PolicySource, Prediction, TtlRequest};
use docket_core::{
    AccessPattern, Cnj, Movement, OptimizationConfig, Phase, ProcessArea, TtlPlan,
    classify_access_pattern, classify_movements,
};

/// Outcome of classifying a process and choosing its freshness windows.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyDecision {
    pub phase: Phase,
    pub area: ProcessArea,
    pub pattern: AccessPattern,
    pub plan: TtlPlan,
    pub source: PolicySource,
    pub prediction: Option<Prediction>,
}

impl PolicyDecision {
    /// Apply onto an existing policy row, keeping its counters and sync outcome.
    pub fn apply_to(&self, row: &OptimizationConfig) -> OptimizationConfig {
        OptimizationConfig {
            detected_phase: self.phase,
            process_area: self.area,
            access_pattern: self.pattern,
            ttl: self.plan,
            ..row.clone()
        }
    }

    /// A fresh policy row with no recorded accesses.
    pub fn new_row(&self, cnj: &Cnj) -> OptimizationConfig {
        OptimizationConfig {
            cnj: cnj.to_string(),
            detected_phase: self.phase,
            process_area: self.area,
            access_pattern: self.pattern,
            access_count: 0,
            last_accessed_at: None,
            ttl: self.plan,
            last_sync_status: None,
            last_sync_error: None,
        }
    }
}

/// Classify a process and pick its TTL plan.
///
/// `movements` may be the newest slice of a longer history of
/// `total_movements`. `recent_accesses` counts accesses over the pattern
/// window; `access_count` is the lifetime counter.
pub fn decide_policy(
    engine: &PolicyEngine,
    cnj: &Cnj,
    movements: &[Movement],
    total_movements: usize,
    recent_accesses: u64,
    access_count: u64,
) -> PolicyDecision {
    let phase = classify_movements(movements);
    let area = cnj.area();
    let pattern = classify_access_pattern(recent_accesses);
    let prediction = engine.predict_next(movements, total_movements);
    let (plan, source) = engine.recommend_ttl(&TtlRequest {
        phase,
        area,
        pattern,
        access_count,
        prediction: prediction.as_ref(),
    });
    PolicyDecision {
        phase,
        area,
        pattern,
        plan,
        source,
        prediction,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use docket_core::{PolicyConfig, default_plan};

    #[test]
    fn untrained_engine_falls_back_to_rules() {
        let engine = PolicyEngine::new(PolicyConfig::default());
        let cnj = Cnj::parse("0000001-23.2024.5.02.0001").unwrap();
        let movements = vec![Movement::from_text("1", "Sentença publicada", Utc::now())];

        let decision = decide_policy(&engine, &cnj, &movements, 1, 25, 100);
        assert_eq!(decision.phase, Phase::Decision);
        assert_eq!(decision.area, ProcessArea::Labor);
        assert_eq!(decision.pattern, AccessPattern::Daily);
        assert_eq!(decision.source, PolicySource::Rules);
        assert!(decision.prediction.is_none());
        assert_eq!(
            decision.plan,
            default_plan(Phase::Decision, ProcessArea::Labor, AccessPattern::Daily)
        );
    }

    #[test]
    fn apply_keeps_counters() {
        let engine = PolicyEngine::new(PolicyConfig::default());
        let cnj = Cnj::parse("0001").unwrap();
        let decision = decide_policy(&engine, &cnj, &[], 0, 0, 0);
        let mut row = decision.new_row(&cnj);
        row.access_count = 9;
        row.detected_phase = Phase::Archived;

        let updated = decision.apply_to(&row);
        assert_eq!(updated.access_count, 9);
        assert_eq!(updated.detected_phase, Phase::Instructional);
    }
}

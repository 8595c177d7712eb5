//! Daily optimization pass.
//!
//! Reclassifies every tracked process from its stored movements and 7-day
//! access history, rewrites its cache policy, and saves a summary report on
//! today's metrics row. Given the same store contents, models and `now`,
//! a second run writes nothing.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use docket_ai::{PolicyEngine, PolicySource};
use docket_cache::{TieredCache, decide_policy};
use docket_core::Cnj;
use docket_store::{DailyMetrics, DuckStore};

use crate::error::SyncError;

pub const REPORT_WINDOW_DAYS: i64 = 7;
const LOW_HIT_RATE: f64 = 0.5;
const HIGH_PROVIDER_SHARE: f64 = 0.3;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub generated_at: Option<DateTime<Utc>>,
    pub processes: usize,
    /// Rows whose policy changed.
    pub updated: usize,
    /// Stored plans that violated `fast ≤ durable ≤ sync_interval`.
    pub ttl_anomalies: usize,
    pub model_policies: usize,
    pub rule_policies: usize,
    pub phase_distribution: BTreeMap<String, usize>,
    pub pattern_distribution: BTreeMap<String, usize>,
    pub window_days: i64,
    pub total_requests: i64,
    pub hit_rate: f64,
    /// Share of requests answered without a provider call.
    pub provider_avoidance: f64,
    pub stale_served: i64,
    pub recommendations: Vec<String>,
}

/// Run the pass over every tracked process and save the report.
pub async fn run_optimization_pass(
    cache: &TieredCache,
    now: DateTime<Utc>,
) -> Result<OptimizationReport, SyncError> {
    let engine = Arc::clone(cache.engine());
    let limit = cache.config().default_movement_limit;
    let window = cache.config().access_window_days;
    let report = cache
        .store()
        .blocking(move |s| Ok(optimize(s, &engine, limit, window, now)))
        .await??;
    info!(
        processes = report.processes,
        updated = report.updated,
        hit_rate = report.hit_rate,
        "optimization pass finished"
    );
    Ok(report)
}

fn optimize(
    store: &DuckStore,
    engine: &PolicyEngine,
    movement_limit: usize,
    access_window_days: i64,
    now: DateTime<Utc>,
) -> Result<OptimizationReport, SyncError> {
    let mut report = OptimizationReport {
        generated_at: Some(now),
        window_days: REPORT_WINDOW_DAYS,
        ..Default::default()
    };
    let since = now - Duration::days(access_window_days);

    for row in store.optimization_configs()? {
        let cnj = match Cnj::parse(&row.cnj) {
            Ok(cnj) => cnj,
            Err(e) => {
                warn!(cnj = %row.cnj, error = %e, "skipping policy row with invalid identifier");
                continue;
            }
        };
        report.processes += 1;
        if !row.ttl.is_ordered() {
            report.ttl_anomalies += 1;
        }

        let movements = store.movements(cnj.as_str(), movement_limit, None)?;
        let total = store.movement_count(cnj.as_str())?;
        let recent = store.access_count_since(cnj.as_str(), since)?;
        let decision = decide_policy(engine, &cnj, &movements, total, recent, row.access_count);
        match decision.source {
            PolicySource::Model => report.model_policies += 1,
            PolicySource::Rules => report.rule_policies += 1,
        }
        *report
            .phase_distribution
            .entry(decision.phase.as_str().to_string())
            .or_default() += 1;
        *report
            .pattern_distribution
            .entry(decision.pattern.as_str().to_string())
            .or_default() += 1;

        let updated = decision.apply_to(&row);
        if updated != row {
            store.write_policy(&updated)?;
            report.updated += 1;
        }
    }

    let first_day = (now - Duration::days(REPORT_WINDOW_DAYS - 1)).date_naive();
    let metrics = store.metrics_since(first_day)?;
    summarize(&mut report, &metrics);
    report.recommendations = recommendations(&report, engine.is_trained());

    store.save_report(now.date_naive(), &serde_json::to_string(&report)?)?;
    Ok(report)
}

fn summarize(report: &mut OptimizationReport, metrics: &[DailyMetrics]) {
    let total: i64 = metrics.iter().map(|m| m.total_requests).sum();
    let hits: i64 = metrics.iter().map(|m| m.fast_hits + m.durable_hits).sum();
    let provider: i64 = metrics.iter().map(|m| m.provider_calls).sum();
    report.total_requests = total;
    report.stale_served = metrics.iter().map(|m| m.stale_served).sum();
    if total > 0 {
        report.hit_rate = hits as f64 / total as f64;
        report.provider_avoidance = (total - provider).max(0) as f64 / total as f64;
    }
}

fn recommendations(report: &OptimizationReport, models_trained: bool) -> Vec<String> {
    let mut out = Vec::new();
    if report.total_requests > 0 && report.hit_rate < LOW_HIT_RATE {
        out.push(format!(
            "Cache hit rate is {:.0}%: consider longer fast-tier windows for frequently read processes",
            report.hit_rate * 100.0
        ));
    }
    if report.total_requests > 0 && 1.0 - report.provider_avoidance > HIGH_PROVIDER_SHARE {
        out.push(format!(
            "{:.0}% of requests reached the provider: review sync intervals and the daily budget",
            (1.0 - report.provider_avoidance) * 100.0
        ));
    }
    if report.stale_served > 0 {
        out.push(format!(
            "{} requests were answered with stale data: check provider availability",
            report.stale_served
        ));
    }
    if report.ttl_anomalies > 0 {
        out.push(format!(
            "{} stored plans had inverted freshness windows and were rewritten",
            report.ttl_anomalies
        ));
    }
    if !models_trained {
        out.push("Predictive models are not trained; rule-based windows are in use".to_string());
    }
    out
}

//! Vertical card display for process status, movements and reports.
//!
//! Every card is a title line followed by labelled sections; empty fields are
//! left out.

use chrono::{DateTime, Utc};

use docket_cache::Lookup;
use docket_core::{Movement, StatusSummary};
use docket_store::MigrationStatus;
use docket_sync::{EligibilityStats, OptimizationReport, ProactiveReport, SyncCycleReport, SyncOutcome};

const MAX_TEXT: usize = 90;

// ── Public API ──

pub fn print_status(lookup: &Lookup<StatusSummary>) {
    let s = &lookup.value;
    println!("=== {} ===", s.cnj);
    println!("{}", s.description);
    println!();

    print_section(
        "Progress",
        &[
            ("phase", Some(s.current_phase.as_str().to_string())),
            ("progress", Some(format!("{}%", s.progress_percentage))),
            ("outcome", Some(s.outcome.as_str().to_string())),
            ("total_movements", Some(s.total_movements.to_string())),
            ("last_movement", s.last_movement_date.map(date)),
        ],
    );
    print_section(
        "Tribunal",
        &[
            ("name", s.tribunal_name.clone()),
            ("grade", s.tribunal_grade.clone()),
        ],
    );
    print_section(
        "Cache",
        &[
            ("served_from", Some(lookup.source.as_str().to_string())),
            ("valid_until", Some(timestamp(s.cache_valid_until))),
            ("sync_status", Some(s.sync_status.as_str().to_string())),
            ("sync_error", s.sync_error.clone()),
            ("last_provider_sync", s.last_provider_sync_at.map(timestamp)),
            ("updated_at", Some(timestamp(s.updated_at))),
        ],
    );
}

pub fn print_movements(cnj: &str, lookup: &Lookup<Vec<Movement>>) {
    println!("=== {cnj} ===");
    println!(
        "{} movements (served from {})",
        lookup.value.len(),
        lookup.source.as_str()
    );
    println!();
    for m in &lookup.value {
        let marker = if m.is_current { "*" } else { " " };
        println!(
            "{marker} {}  {:<10} {}",
            date(m.date),
            m.movement_type.as_str(),
            truncate(&m.raw_text, MAX_TEXT)
        );
        if let Some(tribunal) = &m.tribunal {
            println!("  {:<22} {tribunal}", "");
        }
    }
}

pub fn print_cycle(report: &SyncCycleReport) {
    println!("=== Sync cycle {} ===", timestamp(report.started_at));
    if let Some(reason) = &report.skipped {
        println!("skipped: {reason}");
        return;
    }
    println!();
    print_section(
        "Summary",
        &[
            ("candidates", Some(report.candidates.to_string())),
            ("succeeded", Some(report.succeeded().to_string())),
            ("failed", Some(report.failed().to_string())),
            ("not_attempted", nonzero(report.not_attempted)),
            ("pruned_access_rows", nonzero(report.pruned_access_rows)),
            ("remaining_budget", report.remaining_budget.map(|b| b.to_string())),
        ],
    );

    let failures: Vec<&SyncOutcome> = report.outcomes.iter().filter(|o| !o.is_success()).collect();
    if !failures.is_empty() {
        println!("Failures");
        for outcome in failures {
            if let SyncOutcome::Failed {
                cnj,
                priority,
                error,
            } = outcome
            {
                println!("  {:<26} [{priority:?}] {error}", cnj);
            }
        }
        println!();
    }
}

pub fn print_optimization(report: &OptimizationReport) {
    println!("=== Optimization report ===");
    println!();
    print_section(
        "Policies",
        &[
            ("processes", Some(report.processes.to_string())),
            ("updated", Some(report.updated.to_string())),
            ("model_policies", Some(report.model_policies.to_string())),
            ("rule_policies", Some(report.rule_policies.to_string())),
            ("ttl_anomalies", nonzero(report.ttl_anomalies)),
        ],
    );
    let phases: Vec<(&str, Option<String>)> = report
        .phase_distribution
        .iter()
        .map(|(k, v)| (k.as_str(), Some(v.to_string())))
        .collect();
    print_section("Phases", &phases);
    let patterns: Vec<(&str, Option<String>)> = report
        .pattern_distribution
        .iter()
        .map(|(k, v)| (k.as_str(), Some(v.to_string())))
        .collect();
    print_section("Access patterns", &patterns);
    print_section(
        &format!("Economy (last {} days)", report.window_days),
        &[
            ("total_requests", Some(report.total_requests.to_string())),
            ("hit_rate", Some(percent(report.hit_rate))),
            ("provider_avoidance", Some(percent(report.provider_avoidance))),
            ("stale_served", nonzero(report.stale_served as usize)),
        ],
    );
    if !report.recommendations.is_empty() {
        println!("Recommendations");
        for r in &report.recommendations {
            println!("  - {r}");
        }
        println!();
    }
}

pub fn print_proactive(report: &ProactiveReport) {
    println!("=== Proactive caching ===");
    print_section(
        "Summary",
        &[
            ("skipped", report.skipped.clone()),
            ("inspected", Some(report.inspected.to_string())),
            ("due", Some(report.due.to_string())),
            ("refreshed", Some(report.refreshed.to_string())),
            ("failed", nonzero(report.failed)),
        ],
    );
}

pub fn print_migration_status(status: &MigrationStatus) {
    println!("=== Schema ===");
    print_section(
        "Version",
        &[
            ("schema_version", status.schema_version.map(|v| v.to_string())),
            ("expected_version", Some(status.expected_version.to_string())),
            ("up_to_date", Some(yes_no(status.up_to_date))),
        ],
    );
    let tables: Vec<(&str, Option<String>)> = status
        .tables
        .iter()
        .map(|(name, count)| {
            let value = count.map_or_else(|| "missing".to_string(), |c| format!("{c} rows"));
            (name.as_str(), Some(value))
        })
        .collect();
    print_section("Tables", &tables);
}

pub fn print_eligibility(stats: &EligibilityStats) {
    println!("=== Eligibility ===");
    print_section(
        "Training",
        &[
            (
                "samples",
                Some(format!("{} / {}", stats.training_samples, stats.required_samples)),
            ),
            ("can_train", Some(yes_no(stats.can_train()))),
            ("models_trained", Some(yes_no(stats.models_trained))),
            ("trained_at", stats.trained_at.map(timestamp)),
        ],
    );
    print_section(
        "History",
        &[
            ("processes", Some(stats.processes_with_history.to_string())),
            ("with_intervals", Some(stats.processes_with_intervals.to_string())),
            ("movements", Some(stats.total_movements.to_string())),
            ("tracked_processes", Some(stats.tracked_processes.to_string())),
        ],
    );
    print_section(
        "Sync candidates",
        &[
            ("high", Some(stats.high_priority.to_string())),
            ("medium", Some(stats.medium_priority.to_string())),
            ("low", Some(stats.low_priority.to_string())),
            ("remaining_budget", Some(stats.remaining_budget.to_string())),
        ],
    );
}

// ── Section rendering ──

fn print_section(header: &str, rows: &[(&str, Option<String>)]) {
    if rows.iter().all(|(_, v)| v.is_none()) {
        return;
    }
    println!("{header}");
    for (label, value) in rows {
        if let Some(value) = value {
            println!("  {:<26} {}", label, value);
        }
    }
    println!();
}

fn nonzero(n: usize) -> Option<String> {
    (n > 0).then(|| n.to_string())
}

fn yes_no(b: bool) -> String {
    let s = if b { "yes" } else { "no" };
    s.to_string()
}

fn percent(ratio: f64) -> String {
    format!("{:.1}%", ratio * 100.0)
}

fn date(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{cut}...")
}

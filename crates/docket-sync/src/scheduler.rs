//! Recurring refresh cycles and the daily maintenance loop.
//!
//! One cycle: check provider health → select candidates → refresh in
//! batches → prune the access log → record statistics. A failed item never
//! fails the cycle, and a failed cycle never stops the loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use docket_ai::TrainingReport;
use docket_cache::TieredCache;
use docket_core::{Cnj, ProviderError, SyncConfig, SyncStatus};
use docket_store::Metric;

use crate::candidates::{Candidate, Priority, remaining_budget, select_candidates};
use crate::error::SyncError;
use crate::optimize::{OptimizationReport, run_optimization_pass};
use crate::proactive::{ProactiveReport, run_proactive_pass};

/// Result of refreshing one candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SyncOutcome {
    Success {
        cnj: String,
        priority: Priority,
    },
    Failed {
        cnj: String,
        priority: Priority,
        error: String,
    },
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncCycleReport {
    pub started_at: DateTime<Utc>,
    /// Set when the cycle was skipped before selecting candidates.
    pub skipped: Option<String>,
    pub candidates: usize,
    pub outcomes: Vec<SyncOutcome>,
    /// Candidates left untouched because shutdown was requested.
    pub not_attempted: usize,
    pub pruned_access_rows: usize,
    pub remaining_budget: Option<u64>,
}

impl SyncCycleReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            skipped: None,
            candidates: 0,
            outcomes: Vec::new(),
            not_attempted: 0,
            pruned_access_rows: 0,
            remaining_budget: None,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Output of one maintenance round: training, optimization, proactive caching.
#[derive(Debug, Clone, Serialize)]
pub struct MaintenanceReport {
    /// `None` when training failed; see `training_error`.
    pub training: Option<TrainingReport>,
    pub training_error: Option<String>,
    pub optimization: OptimizationReport,
    pub proactive: ProactiveReport,
}

pub struct SyncScheduler {
    cache: Arc<TieredCache>,
    config: SyncConfig,
}

impl SyncScheduler {
    pub fn new(cache: Arc<TieredCache>, config: SyncConfig) -> Self {
        Self { cache, config }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    /// Candidates the next cycle would refresh.
    pub async fn select_candidates(&self) -> Result<Vec<Candidate>, SyncError> {
        let config = self.config.clone();
        let now = Utc::now();
        Ok(self
            .cache
            .store()
            .blocking(move |s| select_candidates(s, &config, now))
            .await?)
    }

    /// Run one sync cycle.
    ///
    /// Shutdown is checked between batches: the current batch finishes and the
    /// remaining candidates are skipped.
    pub async fn run_cycle(&self, shutdown: &watch::Receiver<bool>) -> Result<SyncCycleReport, SyncError> {
        let started_at = Utc::now();
        let mut report = SyncCycleReport::new(started_at);
        let store = self.cache.store();

        if let Err(e) = self.check_health().await {
            warn!(error = %e, "provider unhealthy, skipping sync cycle");
            report.skipped = Some(e.to_string());
            return Ok(report);
        }

        let candidates = self.select_candidates().await?;
        report.candidates = candidates.len();
        info!(candidates = candidates.len(), "sync cycle started");

        let batch_size = self.config.batch_size.max(1);
        for (index, batch) in candidates.chunks(batch_size).enumerate() {
            if index > 0 {
                pause(self.config.batch_delay).await;
            }
            if *shutdown.borrow() {
                report.not_attempted = candidates.len() - index * batch_size;
                info!(skipped = report.not_attempted, "shutdown requested, skipping remaining candidates");
                break;
            }
            for (i, candidate) in batch.iter().enumerate() {
                if i > 0 {
                    pause(self.config.item_delay).await;
                }
                report.outcomes.push(self.sync_one(candidate).await);
            }
        }

        let retention = started_at - chrono::Duration::days(self.config.access_log_retention_days);
        match store.blocking(move |s| s.prune_access_log(retention)).await {
            Ok(pruned) => report.pruned_access_rows = pruned,
            Err(e) => warn!(error = %e, "access log cleanup failed"),
        }

        let (succeeded, failed) = (report.succeeded(), report.failed());
        let max_daily = self.config.max_daily_syncs;
        match store
            .blocking(move |s| remaining_budget(s, max_daily, Utc::now()))
            .await
        {
            Ok(remaining) => report.remaining_budget = Some(remaining),
            Err(e) => warn!(error = %e, "failed to read remaining sync budget"),
        }

        info!(
            candidates = report.candidates,
            succeeded,
            failed,
            pruned = report.pruned_access_rows,
            remaining_budget = ?report.remaining_budget,
            "sync cycle finished"
        );
        Ok(report)
    }

    async fn check_health(&self) -> Result<(), ProviderError> {
        let timeout = self.config.health_timeout;
        match tokio::time::timeout(timeout, self.cache.provider().health_check()).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(timeout.as_secs())),
        }
    }

    async fn sync_one(&self, candidate: &Candidate) -> SyncOutcome {
        let result = match Cnj::parse(&candidate.cnj) {
            Ok(cnj) => self.cache.refresh(&cnj).await.map(|_| ()).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        let (status, error, metric) = match &result {
            Ok(()) => (SyncStatus::Success, None, Metric::SyncSuccesses),
            Err(e) => (SyncStatus::Failed, Some(e.clone()), Metric::SyncFailures),
        };
        // Counted per item: the daily budget reads these counters.
        let cnj = candidate.cnj.clone();
        let recorded = self
            .cache
            .store()
            .blocking(move |s| {
                let now = Utc::now();
                s.record_sync_outcome(&cnj, status, error.as_deref(), now)?;
                s.increment_metrics(now.date_naive(), &[(metric, 1)])
            })
            .await;
        if let Err(e) = recorded {
            warn!(cnj = %candidate.cnj, error = %e, "failed to record sync outcome");
        }

        let (cnj, priority) = (candidate.cnj.clone(), candidate.priority);
        match result {
            Ok(()) => {
                debug!(cnj = %cnj, ?priority, "refreshed");
                SyncOutcome::Success { cnj, priority }
            }
            Err(error) => {
                warn!(cnj = %cnj, ?priority, error = %error, "scheduled refresh failed");
                SyncOutcome::Failed {
                    cnj,
                    priority,
                    error,
                }
            }
        }
    }

    // ── Maintenance ──

    /// Retrain models when due.
    pub async fn train(&self, force: bool) -> Result<TrainingReport, SyncError> {
        let engine = Arc::clone(self.cache.engine());
        let store = Arc::clone(self.cache.store());
        tokio::task::spawn_blocking(move || engine.train(&store, force))
            .await
            .map_err(|e| SyncError::Training(e.to_string()))?
            .map_err(|e| SyncError::Training(format!("{e:#}")))
    }

    /// Training when due, then the optimization and proactive caching passes.
    ///
    /// A training failure keeps the installed models and does not stop the
    /// remaining passes.
    pub async fn run_maintenance(&self) -> Result<MaintenanceReport, SyncError> {
        let (training, training_error) = match self.train(false).await {
            Ok(report) => (Some(report), None),
            Err(e) => {
                warn!(error = %e, "training failed; keeping current policy models");
                (None, Some(e.to_string()))
            }
        };
        let optimization = run_optimization_pass(&self.cache, Utc::now()).await?;
        let proactive = run_proactive_pass(&self.cache, &self.config, Utc::now()).await?;
        Ok(MaintenanceReport {
            training,
            training_error,
            optimization,
            proactive,
        })
    }

    // ── Loops ──

    /// Run sync cycles until shutdown, retrying sooner after a failed cycle.
    pub async fn run_sync_loop(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.config.cycle_interval.as_secs(), "sync loop started");
        while !*shutdown.borrow() {
            let wait = match self.run_cycle(&shutdown).await {
                Ok(_) => self.config.cycle_interval,
                Err(e) => {
                    error!(error = %e, "sync cycle failed");
                    self.config.retry_interval
                }
            };
            if wait_or_shutdown(&mut shutdown, wait).await {
                break;
            }
        }
        info!("sync loop stopped");
    }

    /// Run maintenance rounds until shutdown.
    pub async fn run_optimization_loop(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.optimization_interval.as_secs(),
            "optimization loop started"
        );
        while !*shutdown.borrow() {
            let wait = match self.run_maintenance().await {
                Ok(report) => {
                    info!(
                        trained = report.training.as_ref().is_some_and(|t| t.trained()),
                        training_failed = report.training_error.is_some(),
                        updated = report.optimization.updated,
                        prefetched = report.proactive.refreshed,
                        "maintenance finished"
                    );
                    self.config.optimization_interval
                }
                Err(e) => {
                    error!(error = %e, "maintenance failed");
                    self.config.retry_interval
                }
            };
            if wait_or_shutdown(&mut shutdown, wait).await {
                break;
            }
        }
        info!("optimization loop stopped");
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

/// Sleep for `wait` or until shutdown. Returns `true` on shutdown.
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, wait: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(wait) => *shutdown.borrow(),
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

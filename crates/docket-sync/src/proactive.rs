//! Proactive caching: refresh hot processes whose next movement is imminent.
//!
//! Spends one provider call now instead of a burst of misses later. Only
//! confident predictions count; a low-confidence prediction is treated as no
//! prediction at all.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use docket_ai::Prediction;
use docket_cache::TieredCache;
use docket_core::{Cnj, SyncConfig, SyncStatus};
use docket_store::Metric;

use crate::candidates::remaining_budget;
use crate::error::SyncError;

/// Accesses older than this do not make a process hot.
pub const HOT_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProactiveReport {
    pub skipped: Option<String>,
    pub inspected: usize,
    /// Candidates with a confident prediction inside the horizon.
    pub due: usize,
    pub refreshed: usize,
    pub failed: usize,
}

/// Whether a prediction justifies refreshing now.
pub fn should_prefetch(prediction: Option<&Prediction>, confidence_threshold: f32, horizon_days: f64) -> bool {
    prediction.is_some_and(|p| p.confidence >= confidence_threshold && p.days_to_next <= horizon_days)
}

/// Inspect the most accessed processes and refresh those predicted to move soon.
///
/// Each successful refresh is counted against the daily budget as it happens.
pub async fn run_proactive_pass(
    cache: &TieredCache,
    config: &SyncConfig,
    now: DateTime<Utc>,
) -> Result<ProactiveReport, SyncError> {
    let mut report = ProactiveReport::default();
    let engine = cache.engine();
    if !engine.is_trained() {
        report.skipped = Some("models not trained".into());
        info!("proactive caching skipped: models not trained");
        return Ok(report);
    }

    let batch = config.proactive_batch_size;
    let max_daily = config.max_daily_syncs;
    let (mut budget, hot) = cache
        .store()
        .blocking(move |s| {
            let budget = remaining_budget(s, max_daily, now)?;
            let hot = s.top_accessed(now - Duration::days(HOT_WINDOW_DAYS), batch)?;
            Ok((budget, hot))
        })
        .await?;

    let threshold = engine.config().confidence_threshold;
    let limit = cache.config().default_movement_limit;
    for cnj in hot {
        if budget == 0 {
            report.skipped = Some("daily budget exhausted".into());
            break;
        }
        let Ok(cnj) = Cnj::parse(&cnj) else {
            continue;
        };
        report.inspected += 1;

        let key = cnj.to_string();
        let (movements, total) = cache
            .store()
            .blocking(move |s| Ok((s.movements(&key, limit, None)?, s.movement_count(&key)?)))
            .await?;
        let prediction = engine.predict_next(&movements, total);
        if !should_prefetch(prediction.as_ref(), threshold, config.proactive_horizon_days) {
            continue;
        }
        report.due += 1;
        if report.due > 1 && !config.item_delay.is_zero() {
            tokio::time::sleep(config.item_delay).await;
        }

        let (status, error) = match cache.refresh(&cnj).await {
            Ok(_) => {
                debug!(cnj = %cnj, "proactively refreshed");
                report.refreshed += 1;
                budget -= 1;
                (SyncStatus::Success, None)
            }
            Err(e) => {
                warn!(cnj = %cnj, error = %e, "proactive refresh failed");
                report.failed += 1;
                (SyncStatus::Failed, Some(e.to_string()))
            }
        };
        let key = cnj.to_string();
        cache
            .store()
            .blocking(move |s| {
                let at = Utc::now();
                s.record_sync_outcome(&key, status, error.as_deref(), at)?;
                if status == SyncStatus::Success {
                    s.increment_metrics(at.date_naive(), &[(Metric::ProactiveRefreshes, 1)])?;
                }
                Ok(())
            })
            .await?;
    }

    info!(
        inspected = report.inspected,
        due = report.due,
        refreshed = report.refreshed,
        "proactive caching finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::TimeZone;
    use docket_ai::PolicyEngine;
    use docket_core::{
        AccessPattern, CacheConfig, Movement, MovementType, OptimizationConfig, Phase, PolicyConfig,
        ProcessArea, Provider, ProviderError, TtlPlan,
    };
    use docket_store::{DuckStore, MokaCache};

    fn prediction(confidence: f32, days_to_next: f64) -> Prediction {
        Prediction {
            next_type: MovementType::Decision,
            confidence,
            days_to_next,
            expected_date: Utc::now() + Duration::days(days_to_next as i64),
        }
    }

    #[test]
    fn confident_and_imminent() {
        assert!(should_prefetch(Some(&prediction(0.9, 2.0)), 0.75, 3.0));
        assert!(should_prefetch(Some(&prediction(0.75, 3.0)), 0.75, 3.0));
    }

    #[test]
    fn low_confidence_never_prefetches() {
        assert!(!should_prefetch(Some(&prediction(0.74, 0.1)), 0.75, 3.0));
        assert!(!should_prefetch(Some(&prediction(0.0, 0.0)), 0.75, 3.0));
    }

    #[test]
    fn distant_or_missing_prediction() {
        assert!(!should_prefetch(Some(&prediction(0.99, 10.0)), 0.75, 3.0));
        assert!(!should_prefetch(None, 0.75, 3.0));
    }

    struct CountingProvider(AtomicUsize);

    #[async_trait]
    impl Provider for CountingProvider {
        async fn fetch_movements(&self, _cnj: &Cnj, _limit: usize) -> Result<Vec<Movement>, ProviderError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        async fn health_check(&self) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn untrained_engine_refreshes_nothing() {
        let provider = Arc::new(CountingProvider(AtomicUsize::new(0)));
        let cache = TieredCache::new(
            Arc::new(DuckStore::open().unwrap()),
            Arc::new(MokaCache::new(10)),
            Arc::clone(&provider) as Arc<dyn Provider>,
            Arc::new(PolicyEngine::new(PolicyConfig::default())),
            CacheConfig::default(),
        );
        cache.get_movements("0001", 10, false).await.unwrap();
        let calls_before = provider.0.load(Ordering::SeqCst);

        let report = run_proactive_pass(&cache, &SyncConfig::immediate(), Utc::now())
            .await
            .unwrap();
        assert!(report.skipped.is_some());
        assert_eq!(report.refreshed, 0);
        assert_eq!(provider.0.load(Ordering::SeqCst), calls_before);
    }

    const SEQUENCE: [&str; 6] = [
        "Processo distribuído por sorteio",
        "Citação do réu expedida",
        "Audiência de conciliação designada",
        "Sentença de procedência publicada",
        "Petição de recurso de apelação",
        "Trânsito em julgado certificado",
    ];

    fn timeline(offset_days: i64) -> Vec<Movement> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap() + Duration::days(offset_days);
        SEQUENCE
            .iter()
            .enumerate()
            .map(|(i, text)| Movement::from_text(i.to_string(), *text, start + Duration::days(5 * i as i64)))
            .collect()
    }

    fn policy_row(cnj: &str) -> OptimizationConfig {
        OptimizationConfig {
            cnj: cnj.to_string(),
            detected_phase: Phase::Final,
            process_area: ProcessArea::General,
            access_pattern: AccessPattern::Rarely,
            access_count: 0,
            last_accessed_at: None,
            ttl: TtlPlan::from_fast(3600),
            last_sync_status: None,
            last_sync_error: None,
        }
    }

    /// 25 recently accessed processes with enough history to train on.
    fn trained_cache(provider: Arc<CountingProvider>, confidence_threshold: f32) -> TieredCache {
        let store = Arc::new(DuckStore::open().unwrap());
        for p in 0..25 {
            let cnj = format!("{:04}", p + 1);
            store.upsert_movements(&cnj, &timeline(p), Utc::now()).unwrap();
            store.touch_access(&policy_row(&cnj), Utc::now()).unwrap();
        }
        let engine = PolicyEngine::new(PolicyConfig {
            confidence_threshold,
            ..PolicyConfig::default()
        });
        assert!(engine.train(&store, false).unwrap().trained());
        TieredCache::new(
            store,
            Arc::new(MokaCache::new(100)),
            provider as Arc<dyn Provider>,
            Arc::new(engine),
            CacheConfig::default(),
        )
    }

    fn wide_horizon(batch: usize, max_daily_syncs: u64) -> SyncConfig {
        SyncConfig {
            proactive_batch_size: batch,
            proactive_horizon_days: 10_000.0,
            max_daily_syncs,
            ..SyncConfig::immediate()
        }
    }

    fn proactive_refreshes(cache: &TieredCache) -> i64 {
        cache
            .store()
            .metrics_since(Utc::now().date_naive())
            .unwrap()
            .first()
            .map_or(0, |m| m.proactive_refreshes)
    }

    #[tokio::test]
    async fn confident_predictions_are_refreshed() {
        let provider = Arc::new(CountingProvider(AtomicUsize::new(0)));
        let cache = trained_cache(Arc::clone(&provider), 0.0);

        let report = run_proactive_pass(&cache, &wide_horizon(3, 200), Utc::now())
            .await
            .unwrap();
        assert_eq!(report.skipped, None);
        assert_eq!(report.inspected, 3);
        assert_eq!(report.due, 3);
        assert_eq!(report.refreshed, 3);
        assert_eq!(provider.0.load(Ordering::SeqCst), 3);
        assert_eq!(proactive_refreshes(&cache), 3);
    }

    #[tokio::test]
    async fn unconfident_predictions_are_left_alone() {
        let provider = Arc::new(CountingProvider(AtomicUsize::new(0)));
        let cache = trained_cache(Arc::clone(&provider), 1.01);

        let report = run_proactive_pass(&cache, &wide_horizon(3, 200), Utc::now())
            .await
            .unwrap();
        assert_eq!(report.inspected, 3);
        assert_eq!(report.due, 0);
        assert_eq!(report.refreshed, 0);
        assert_eq!(provider.0.load(Ordering::SeqCst), 0);
        assert_eq!(proactive_refreshes(&cache), 0);
    }

    #[tokio::test]
    async fn refreshes_stop_at_the_daily_budget() {
        let provider = Arc::new(CountingProvider(AtomicUsize::new(0)));
        let cache = trained_cache(Arc::clone(&provider), 0.0);
        let config = wide_horizon(5, 2);

        let report = run_proactive_pass(&cache, &config, Utc::now()).await.unwrap();
        assert_eq!(report.refreshed, 2);
        assert_eq!(report.skipped.as_deref(), Some("daily budget exhausted"));
        assert_eq!(provider.0.load(Ordering::SeqCst), 2);

        // The spent budget carries over to the next pass on the same day.
        let again = run_proactive_pass(&cache, &config, Utc::now()).await.unwrap();
        assert_eq!(again.refreshed, 0);
        assert_eq!(provider.0.load(Ordering::SeqCst), 2);
        assert_eq!(proactive_refreshes(&cache), 2);
    }
}

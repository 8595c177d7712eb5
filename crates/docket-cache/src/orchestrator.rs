//! Tiered read path: fast tier → durable tier → provider → stale durable.
//!
//! Every read is logged as an access and counted in the request-economy
//! metrics. Concurrent fetches for the same process are serialized through
//! [`KeyedLocks`], so a burst of cold reads costs one provider call.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use docket_ai::PolicyEngine;
use docket_core::{
    AccessPattern, CacheConfig, CacheSource, Cnj, Movement, OptimizationConfig, Phase, Provider,
    ProviderError, StatusSummary, SyncStatus, TtlPlan, mark_current, synthesize_status,
};
use docket_store::{DuckStore, FastCache, Metric};

use crate::error::CacheError;
use crate::flight::KeyedLocks;
use crate::policy::decide_policy;

/// A value and the tier that served it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Lookup<T> {
    pub value: T,
    pub source: CacheSource,
}

impl<T> Lookup<T> {
    fn new(value: T, source: CacheSource) -> Self {
        Self { value, source }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct MovementsEntry {
    cached_at: DateTime<Utc>,
    /// Limit the entry was fetched with.
    limit: usize,
    movements: Vec<Movement>,
}

impl MovementsEntry {
    /// The cached movements if the entry is fresh and covers `limit`.
    ///
    /// With `filled_since`, only entries written at or after that instant count.
    fn serve(
        self,
        limit: usize,
        fast_secs: u64,
        now: DateTime<Utc>,
        filled_since: Option<DateTime<Utc>>,
    ) -> Option<Vec<Movement>> {
        if now - self.cached_at >= secs(fast_secs) {
            return None;
        }
        if filled_since.is_some_and(|t| self.cached_at < t) {
            return None;
        }
        // A short list means the process has no more movements to give.
        let covers = self.limit >= limit || self.movements.len() < self.limit;
        if !covers {
            return None;
        }
        let mut movements = self.movements;
        movements.truncate(limit);
        Some(movements)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StatusEntry {
    cached_at: DateTime<Utc>,
    status: StatusSummary,
}

fn movements_key(cnj: &Cnj) -> String {
    format!("movements:{cnj}")
}

fn status_key(cnj: &Cnj) -> String {
    format!("status:{cnj}")
}

fn secs(n: u64) -> Duration {
    Duration::seconds(n.min(i32::MAX as u64) as i64)
}

/// Movements plus the status row a provider fetch produced alongside them.
struct Fetched {
    lookup: Lookup<Vec<Movement>>,
    status: Option<StatusSummary>,
}

/// Single entry point for movement and status reads.
pub struct TieredCache {
    durable: Arc<DuckStore>,
    fast: Arc<dyn FastCache>,
    provider: Arc<dyn Provider>,
    engine: Arc<PolicyEngine>,
    config: CacheConfig,
    inflight: KeyedLocks,
}

impl TieredCache {
    pub fn new(
        durable: Arc<DuckStore>,
        fast: Arc<dyn FastCache>,
        provider: Arc<dyn Provider>,
        engine: Arc<PolicyEngine>,
        config: CacheConfig,
    ) -> Self {
        Self {
            durable,
            fast,
            provider,
            engine,
            config,
            inflight: KeyedLocks::new(),
        }
    }

    pub fn store(&self) -> &Arc<DuckStore> {
        &self.durable
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn engine(&self) -> &Arc<PolicyEngine> {
        &self.engine
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    // ── Public API ──

    /// Newest-first movements for a process, at most `limit`.
    ///
    /// `force` skips the fast and durable lookups but still falls back to
    /// stale durable data when the provider fails.
    pub async fn get_movements(
        &self,
        cnj: &str,
        limit: usize,
        force: bool,
    ) -> Result<Lookup<Vec<Movement>>, CacheError> {
        let cnj = Cnj::parse(cnj)?;
        let plan = self.track_access(&cnj, Utc::now()).await;
        let result = self
            .movements_inner(&cnj, limit, force, plan)
            .await
            .map(|f| f.lookup);
        self.record_outcome(result.as_ref().ok().map(|l| l.source)).await;
        result
    }

    /// Aggregated status for a process.
    ///
    /// Served from the fast tier or a still-valid durable row; otherwise
    /// synthesized from movement data and persisted.
    pub async fn get_status(
        &self,
        cnj: &str,
        force: bool,
    ) -> Result<Lookup<StatusSummary>, CacheError> {
        let cnj = Cnj::parse(cnj)?;
        let plan = self.track_access(&cnj, Utc::now()).await;
        let result = self.status_inner(&cnj, force, plan).await;
        self.record_outcome(result.as_ref().ok().map(|l| l.source)).await;
        result
    }

    /// Expire the durable status row now and drop the fast entries.
    ///
    /// History is kept. Returns `false` if the process had no status row.
    pub async fn invalidate(&self, cnj: &str) -> Result<bool, CacheError> {
        let cnj = Cnj::parse(cnj)?;
        let key = cnj.to_string();
        let now = Utc::now();
        let existed = self
            .durable
            .blocking(move |s| s.invalidate(&key, now))
            .await?;
        for key in [movements_key(&cnj), status_key(&cnj)] {
            if let Err(e) = self.fast.delete(&key).await {
                warn!(key = %key, error = %e, "fast tier delete failed");
            }
        }
        info!(cnj = %cnj, existed, "invalidated cache entry");
        Ok(existed)
    }

    /// Fetch a process from the provider and write it through both tiers.
    ///
    /// Used by the scheduler; no access is logged and no stale fallback applies.
    pub async fn refresh(&self, cnj: &Cnj) -> Result<StatusSummary, ProviderError> {
        let _flight = self.inflight.lock(cnj.as_str()).await;
        let (_, status) = self
            .fetch_and_store(cnj, self.config.default_movement_limit)
            .await?;
        Ok(status)
    }

    // ── Read path ──

    async fn movements_inner(
        &self,
        cnj: &Cnj,
        limit: usize,
        force: bool,
        plan: TtlPlan,
    ) -> Result<Fetched, CacheError> {
        let key = movements_key(cnj);

        if !force && let Some(movements) = self.fast_movements(&key, limit, plan, None).await {
            debug!(cnj = %cnj, "fast tier hit");
            return Ok(Fetched {
                lookup: Lookup::new(movements, CacheSource::Fast),
                status: None,
            });
        }

        let started = Utc::now();
        let _flight = self.inflight.lock(cnj.as_str()).await;

        // Another caller may have completed a fetch while this one waited.
        let filled_since = if force { Some(started) } else { None };
        if let Some(movements) = self.fast_movements(&key, limit, plan, filled_since).await {
            debug!(cnj = %cnj, "fast tier filled by concurrent fetch");
            return Ok(Fetched {
                lookup: Lookup::new(movements, CacheSource::Fast),
                status: None,
            });
        }

        if !force && let Some(movements) = self.durable_movements(cnj, limit, plan).await {
            debug!(cnj = %cnj, count = movements.len(), "durable tier hit");
            let entry = MovementsEntry {
                cached_at: Utc::now(),
                limit,
                movements: movements.clone(),
            };
            self.fast_put(&key, &entry, plan.fast_secs).await;
            return Ok(Fetched {
                lookup: Lookup::new(movements, CacheSource::Durable),
                status: None,
            });
        }

        match self.fetch_and_store(cnj, limit).await {
            Ok((movements, status)) => Ok(Fetched {
                lookup: Lookup::new(movements, CacheSource::Provider),
                status: Some(status),
            }),
            Err(err) => {
                warn!(cnj = %cnj, error = %err, "provider fetch failed, trying stale durable data");
                let c = cnj.to_string();
                match self.durable.blocking(move |s| s.movements(&c, limit, None)).await {
                    Ok(movements) if !movements.is_empty() => Ok(Fetched {
                        lookup: Lookup::new(movements, CacheSource::DurableStale),
                        status: None,
                    }),
                    Ok(_) => Err(CacheError::Unavailable {
                        cnj: cnj.to_string(),
                        source: err,
                    }),
                    Err(e) => {
                        warn!(cnj = %cnj, error = %e, "stale durable read failed");
                        Err(CacheError::Unavailable {
                            cnj: cnj.to_string(),
                            source: err,
                        })
                    }
                }
            }
        }
    }

    async fn fast_movements(
        &self,
        key: &str,
        limit: usize,
        plan: TtlPlan,
        filled_since: Option<DateTime<Utc>>,
    ) -> Option<Vec<Movement>> {
        let entry: MovementsEntry = self.fast_get(key).await?;
        entry.serve(limit, plan.fast_secs, Utc::now(), filled_since)
    }

    /// Movements fetched within the durable window, unless the status row
    /// says the entry was expired.
    async fn durable_movements(&self, cnj: &Cnj, limit: usize, plan: TtlPlan) -> Option<Vec<Movement>> {
        let c = cnj.to_string();
        let now = Utc::now();
        let since = now - secs(plan.durable_secs);
        let result = self
            .durable
            .blocking(move |s| {
                let movements = s.movements(&c, limit, Some(since))?;
                if movements.is_empty() {
                    return Ok(None);
                }
                let valid = s
                    .status(&c)?
                    .is_none_or(|status| status.cache_valid_until > now);
                Ok(valid.then_some(movements))
            })
            .await;
        match result {
            Ok(found) => found,
            Err(e) => {
                warn!(cnj = %cnj, error = %e, "durable tier read failed");
                None
            }
        }
    }

    async fn status_inner(
        &self,
        cnj: &Cnj,
        force: bool,
        plan: TtlPlan,
    ) -> Result<Lookup<StatusSummary>, CacheError> {
        let key = status_key(cnj);
        let now = Utc::now();

        if !force {
            if let Some(entry) = self.fast_get::<StatusEntry>(&key).await
                && now - entry.cached_at < secs(plan.fast_secs)
            {
                debug!(cnj = %cnj, "fast tier status hit");
                return Ok(Lookup::new(entry.status, CacheSource::Fast));
            }
            if let Some(status) = self.durable_status(cnj).await
                && status.cache_valid_until > now
            {
                debug!(cnj = %cnj, "durable tier status hit");
                self.put_status(&key, &status, plan.fast_secs).await;
                return Ok(Lookup::new(status, CacheSource::Durable));
            }
        }

        let limit = self.config.default_movement_limit;
        let fetched = self.movements_inner(cnj, limit, force, plan).await?;
        if let Some(status) = fetched.status {
            return Ok(Lookup::new(status, CacheSource::Provider));
        }

        let Lookup { value: movements, source } = fetched.lookup;
        let existing = self.durable_status(cnj).await;
        if source == CacheSource::DurableStale
            && let Some(status) = existing
        {
            return Ok(Lookup::new(status, source));
        }

        let now = Utc::now();
        let valid_until = match source {
            CacheSource::DurableStale => now,
            _ => now + secs(plan.durable_secs),
        };
        let last_sync = existing.and_then(|s| s.last_provider_sync_at);
        let status = synthesize_status(
            cnj.as_str(),
            &movements,
            now,
            valid_until,
            SyncStatus::Cached,
            last_sync,
        );

        let row = status.clone();
        if let Err(e) = self.durable.blocking(move |s| s.upsert_status(&row)).await {
            warn!(cnj = %cnj, error = %e, "failed to persist synthesized status");
        }
        if source != CacheSource::DurableStale {
            self.put_status(&key, &status, plan.fast_secs).await;
        }
        Ok(Lookup::new(status, source))
    }

    async fn durable_status(&self, cnj: &Cnj) -> Option<StatusSummary> {
        let c = cnj.to_string();
        match self.durable.blocking(move |s| s.status(&c)).await {
            Ok(status) => status,
            Err(e) => {
                warn!(cnj = %cnj, error = %e, "durable status read failed");
                None
            }
        }
    }

    // ── Provider write-through ──

    /// Fetch from the provider, re-derive the process policy, and write the
    /// result to both tiers.
    ///
    /// Tier write failures are logged; only the provider error is returned.
    async fn fetch_and_store(
        &self,
        cnj: &Cnj,
        limit: usize,
    ) -> Result<(Vec<Movement>, StatusSummary), ProviderError> {
        let fetched = self.provider.fetch_movements(cnj, limit).await?;
        let mut movements: Vec<Movement> = fetched.into_iter().map(Movement::with_presentation).collect();
        mark_current(&mut movements);
        movements.truncate(limit);

        let now = Utc::now();
        let plan = self.refresh_policy(cnj, &movements, now).await;
        let status = synthesize_status(
            cnj.as_str(),
            &movements,
            now,
            now + secs(plan.durable_secs),
            SyncStatus::Success,
            Some(now),
        );

        let (c, rows, row) = (cnj.to_string(), movements.clone(), status.clone());
        match self
            .durable
            .blocking(move |s| s.write_through(&c, &rows, &row, now))
            .await
        {
            Ok(written) => debug!(cnj = %cnj, written, "wrote provider fetch to durable tier"),
            Err(e) => warn!(cnj = %cnj, error = %e, "durable write-through failed"),
        }

        let entry = MovementsEntry {
            cached_at: now,
            limit,
            movements: movements.clone(),
        };
        self.fast_put(&movements_key(cnj), &entry, plan.fast_secs).await;
        self.put_status(&status_key(cnj), &status, plan.fast_secs).await;

        info!(cnj = %cnj, count = movements.len(), phase = ?status.current_phase, "fetched from provider");
        Ok((movements, status))
    }

    /// Reclassify the process from fresh movements and persist its plan.
    async fn refresh_policy(&self, cnj: &Cnj, movements: &[Movement], now: DateTime<Utc>) -> TtlPlan {
        let c = cnj.to_string();
        let since = now - Duration::days(self.config.access_window_days);
        let history = self
            .durable
            .blocking(move |s| {
                Ok((
                    s.access_count_since(&c, since)?,
                    s.optimization_config(&c)?,
                    s.movement_count(&c)?,
                ))
            })
            .await;
        let (recent, row, stored) = match history {
            Ok(found) => found,
            Err(e) => {
                warn!(cnj = %cnj, error = %e, "access history unavailable, using empty history");
                (0, None, 0)
            }
        };

        let access_count = row.as_ref().map(|r| r.access_count).unwrap_or(0);
        let total = stored.max(movements.len());
        let decision = decide_policy(&self.engine, cnj, movements, total, recent, access_count);
        let updated = match &row {
            Some(row) => decision.apply_to(row),
            None => decision.new_row(cnj),
        };
        if let Err(e) = self.durable.blocking(move |s| s.write_policy(&updated)).await {
            warn!(cnj = %cnj, error = %e, "failed to persist cache policy");
        }
        debug!(
            cnj = %cnj,
            phase = ?decision.phase,
            pattern = ?decision.pattern,
            source = ?decision.source,
            fast_secs = decision.plan.fast_secs,
            "policy refreshed"
        );
        decision.plan
    }

    // ── Access and metrics ──

    fn default_plan(&self) -> TtlPlan {
        let durable_secs = self.config.default_durable_ttl.as_secs();
        let (plan, _) = TtlPlan {
            fast_secs: self.config.default_fast_ttl.as_secs(),
            durable_secs,
            sync_interval_secs: durable_secs,
        }
        .normalized();
        plan
    }

    fn default_row(&self, cnj: &Cnj) -> OptimizationConfig {
        OptimizationConfig {
            cnj: cnj.to_string(),
            detected_phase: Phase::Instructional,
            process_area: cnj.area(),
            access_pattern: AccessPattern::Rarely,
            access_count: 0,
            last_accessed_at: None,
            ttl: self.default_plan(),
            last_sync_status: None,
            last_sync_error: None,
        }
    }

    /// Log the access and return the process's current plan.
    async fn track_access(&self, cnj: &Cnj, at: DateTime<Utc>) -> TtlPlan {
        let defaults = self.default_row(cnj);
        let fallback = defaults.ttl;
        let result = self
            .durable
            .blocking(move |s| {
                s.touch_access(&defaults, at)?;
                s.optimization_config(&defaults.cnj)
            })
            .await;
        match result {
            Ok(Some(row)) => row.ttl,
            Ok(None) => fallback,
            Err(e) => {
                warn!(cnj = %cnj, error = %e, "access tracking failed");
                fallback
            }
        }
    }

    async fn record_outcome(&self, source: Option<CacheSource>) {
        let metric = match source {
            Some(CacheSource::Fast) => Metric::FastHits,
            Some(CacheSource::Durable) => Metric::DurableHits,
            Some(CacheSource::Provider) => Metric::ProviderCalls,
            Some(CacheSource::DurableStale) => Metric::StaleServed,
            None => Metric::Misses,
        };
        let today = Utc::now().date_naive();
        let result = self
            .durable
            .blocking(move |s| s.increment_metrics(today, &[(Metric::TotalRequests, 1), (metric, 1)]))
            .await;
        if let Err(e) = result {
            warn!(error = %e, "failed to record request metrics");
        }
    }

    // ── Fast tier helpers ──

    async fn fast_get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.fast.get(key).await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!(key, error = %e, "discarding undecodable fast tier entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key, error = %e, "fast tier read failed");
                None
            }
        }
    }

    async fn fast_put<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) {
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                warn!(key, error = %e, "failed to encode fast tier entry");
                return;
            }
        };
        if let Err(e) = self.fast.set(key, value, StdDuration::from_secs(ttl_secs)).await {
            warn!(key, error = %e, "fast tier write failed");
        }
    }

    async fn put_status(&self, key: &str, status: &StatusSummary, ttl_secs: u64) {
        let entry = StatusEntry {
            cached_at: Utc::now(),
            status: status.clone(),
        };
        self.fast_put(key, &entry, ttl_secs).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::TimeZone;
    use docket_core::{Outcome, PolicyConfig};
    use docket_store::MokaCache;

    struct StubProvider {
        calls: AtomicUsize,
        up: AtomicBool,
        delay: StdDuration,
        movements: Vec<Movement>,
    }

    impl StubProvider {
        fn new(delay: StdDuration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                up: AtomicBool::new(true),
                delay,
                movements: sample_movements(),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn set_up(&self, up: bool) {
            self.up.store(up, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Provider for StubProvider {
        async fn fetch_movements(&self, _cnj: &Cnj, limit: usize) -> Result<Vec<Movement>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if !self.up.load(Ordering::SeqCst) {
                return Err(ProviderError::Unavailable("stub provider down".into()));
            }
            Ok(self.movements.iter().take(limit).cloned().collect())
        }

        async fn health_check(&self) -> Result<(), ProviderError> {
            if self.up.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(ProviderError::Unavailable("stub provider down".into()))
            }
        }
    }

    fn sample_movements() -> Vec<Movement> {
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap();
        vec![
            Movement::from_text("1", "Processo distribuído por sorteio", base),
            Movement::from_text("2", "Audiência de conciliação designada", base + Duration::days(10)),
            Movement::from_text(
                "3",
                "Sentença publicada: julgado procedente",
                base + Duration::days(40),
            ),
        ]
    }

    fn cache_over(store: Arc<DuckStore>, provider: Arc<StubProvider>) -> TieredCache {
        TieredCache::new(
            store,
            Arc::new(MokaCache::new(100)),
            provider,
            Arc::new(PolicyEngine::new(PolicyConfig::default())),
            CacheConfig::default(),
        )
    }

    fn setup() -> (TieredCache, Arc<DuckStore>, Arc<StubProvider>) {
        let store = Arc::new(DuckStore::open().unwrap());
        let provider = Arc::new(StubProvider::new(StdDuration::ZERO));
        let cache = cache_over(Arc::clone(&store), Arc::clone(&provider));
        (cache, store, provider)
    }

    #[tokio::test]
    async fn cold_entry_then_fast_hit() {
        let (cache, _, provider) = setup();

        let first = cache.get_movements("0001", 10, false).await.unwrap();
        assert_eq!(first.source, CacheSource::Provider);
        assert_eq!(first.value.len(), 3);
        assert!(first.value[0].is_current);
        assert_eq!(first.value[0].id, "3");

        let second = cache.get_movements("0001", 10, false).await.unwrap();
        assert_eq!(second.source, CacheSource::Fast);
        assert_eq!(second.value, first.value);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn durable_hit_rebuilds_fast_tier() {
        let (cache, store, provider) = setup();
        cache.get_movements("0001", 10, false).await.unwrap();

        let restarted = cache_over(Arc::clone(&store), Arc::clone(&provider));
        let lookup = restarted.get_movements("0001", 10, false).await.unwrap();
        assert_eq!(lookup.source, CacheSource::Durable);
        assert_eq!(lookup.value.len(), 3);
        assert!(lookup.value[0].is_current);

        let again = restarted.get_movements("0001", 10, false).await.unwrap();
        assert_eq!(again.source, CacheSource::Fast);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn smaller_limit_is_served_from_fast_tier() {
        let (cache, _, provider) = setup();
        cache.get_movements("0001", 10, false).await.unwrap();

        let lookup = cache.get_movements("0001", 2, false).await.unwrap();
        assert_eq!(lookup.source, CacheSource::Fast);
        assert_eq!(lookup.value.len(), 2);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn provider_down_serves_stale_durable_data() {
        let (cache, _, provider) = setup();
        cache.get_movements("0001", 10, false).await.unwrap();
        assert!(cache.invalidate("0001").await.unwrap());

        provider.set_up(false);
        let lookup = cache.get_movements("0001", 10, false).await.unwrap();
        assert_eq!(lookup.source, CacheSource::DurableStale);
        assert_eq!(lookup.value.len(), 3);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn nothing_cached_and_provider_down_is_unavailable() {
        let (cache, _, provider) = setup();
        provider.set_up(false);

        let err = cache.get_movements("0001", 10, false).await.unwrap_err();
        assert!(matches!(
            err,
            CacheError::Unavailable {
                source: ProviderError::Unavailable(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn malformed_identifier_is_rejected() {
        let (cache, _, provider) = setup();
        let err = cache.get_movements("abc", 10, false).await.unwrap_err();
        assert!(matches!(err, CacheError::InvalidInput(_)));
        assert!(matches!(
            cache.get_status("", false).await,
            Err(CacheError::InvalidInput(_))
        ));
        assert!(matches!(
            cache.get_status("...", false).await,
            Err(CacheError::InvalidInput(_))
        ));
        assert!(matches!(
            cache.get_movements("-", 10, false).await,
            Err(CacheError::InvalidInput(_))
        ));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn force_refresh_goes_to_provider() {
        let (cache, store, provider) = setup();
        cache.get_movements("0001", 10, false).await.unwrap();

        let lookup = cache.get_movements("0001", 10, true).await.unwrap();
        assert_eq!(lookup.source, CacheSource::Provider);
        assert_eq!(provider.calls(), 2);
        // Identity is (cnj, content, date): the refetch does not duplicate rows.
        assert_eq!(store.movement_count("0001").unwrap(), 3);
    }

    #[tokio::test]
    async fn force_refresh_falls_back_to_stale() {
        let (cache, _, provider) = setup();
        cache.get_movements("0001", 10, false).await.unwrap();
        provider.set_up(false);

        let lookup = cache.get_movements("0001", 10, true).await.unwrap();
        assert_eq!(lookup.source, CacheSource::DurableStale);
    }

    #[tokio::test]
    async fn status_cold_then_fast() {
        let (cache, store, provider) = setup();

        let first = cache.get_status("0001", false).await.unwrap();
        assert_eq!(first.source, CacheSource::Provider);
        assert_eq!(first.value.current_phase, Phase::Decision);
        assert_eq!(first.value.outcome, Outcome::Won);
        assert_eq!(first.value.total_movements, 3);
        assert_eq!(first.value.sync_status, SyncStatus::Success);
        assert!(first.value.last_provider_sync_at.is_some());

        let second = cache.get_status("0001", false).await.unwrap();
        assert_eq!(second.source, CacheSource::Fast);
        assert_eq!(provider.calls(), 1);

        let row = store.status("0001").unwrap().unwrap();
        assert_eq!(row.current_phase, Phase::Decision);
    }

    #[tokio::test]
    async fn status_from_valid_durable_row() {
        let (cache, store, provider) = setup();
        cache.get_status("0001", false).await.unwrap();

        let restarted = cache_over(Arc::clone(&store), Arc::clone(&provider));
        let lookup = restarted.get_status("0001", false).await.unwrap();
        assert_eq!(lookup.source, CacheSource::Durable);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn status_is_synthesized_from_cached_movements() {
        let (cache, store, provider) = setup();
        cache.get_movements("0001", 50, false).await.unwrap();
        assert!(store.invalidate("0001", Utc::now()).unwrap());
        cache.fast.delete("status:0001").await.unwrap();

        let lookup = cache.get_status("0001", false).await.unwrap();
        assert_eq!(lookup.source, CacheSource::Fast);
        assert_eq!(lookup.value.sync_status, SyncStatus::Cached);
        assert!(lookup.value.last_provider_sync_at.is_some());
        assert!(lookup.value.cache_valid_until > Utc::now());
        assert_eq!(provider.calls(), 1);
        assert_eq!(store.status("0001").unwrap().unwrap().sync_status, SyncStatus::Cached);
    }

    #[tokio::test]
    async fn stale_status_keeps_existing_row() {
        let (cache, _, provider) = setup();
        cache.get_status("0001", false).await.unwrap();
        cache.invalidate("0001").await.unwrap();
        provider.set_up(false);

        let lookup = cache.get_status("0001", false).await.unwrap();
        assert_eq!(lookup.source, CacheSource::DurableStale);
        assert_eq!(lookup.value.sync_status, SyncStatus::Invalidated);
    }

    #[tokio::test]
    async fn invalidate_unknown_process() {
        let (cache, _, _) = setup();
        assert!(!cache.invalidate("0002").await.unwrap());
    }

    #[tokio::test]
    async fn reads_are_tracked_and_counted() {
        let (cache, store, _) = setup();
        cache.get_movements("0001", 10, false).await.unwrap();
        cache.get_movements("0001", 10, false).await.unwrap();

        let config = store.optimization_config("0001").unwrap().unwrap();
        assert_eq!(config.access_count, 2);
        assert!(config.last_accessed_at.is_some());
        assert_eq!(config.detected_phase, Phase::Decision);
        assert!(config.ttl.is_ordered());

        let today = Utc::now().date_naive();
        let metrics = store.metrics_since(today).unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].total_requests, 2);
        assert_eq!(metrics[0].provider_calls, 1);
        assert_eq!(metrics[0].fast_hits, 1);
    }

    #[tokio::test]
    async fn misses_are_counted() {
        let (cache, store, provider) = setup();
        provider.set_up(false);
        let _ = cache.get_movements("0001", 10, false).await;

        let metrics = store.metrics_since(Utc::now().date_naive()).unwrap();
        assert_eq!(metrics[0].misses, 1);
    }

    #[tokio::test]
    async fn concurrent_cold_reads_share_one_fetch() {
        let store = Arc::new(DuckStore::open().unwrap());
        let provider = Arc::new(StubProvider::new(StdDuration::from_millis(50)));
        let cache = Arc::new(cache_over(store, Arc::clone(&provider)));

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get_movements("0001", 10, false).await })
            })
            .collect();
        for handle in handles {
            let lookup = handle.await.unwrap().unwrap();
            assert_eq!(lookup.value.len(), 3);
        }
        assert_eq!(provider.calls(), 1);
        assert_eq!(cache.inflight.active(), 0);
    }

    #[tokio::test]
    async fn refresh_writes_through() {
        let (cache, store, provider) = setup();
        let cnj = Cnj::parse("0001").unwrap();

        let status = cache.refresh(&cnj).await.unwrap();
        assert_eq!(status.sync_status, SyncStatus::Success);
        assert_eq!(provider.calls(), 1);
        assert_eq!(store.movement_count("0001").unwrap(), 3);

        let lookup = cache.get_movements("0001", 10, false).await.unwrap();
        assert_eq!(lookup.source, CacheSource::Fast);
    }

    #[test]
    fn entry_respects_limit_coverage() {
        let now = Utc::now();
        let entry = |limit, n| MovementsEntry {
            cached_at: now,
            limit,
            movements: sample_movements().into_iter().take(n).collect(),
        };
        assert!(entry(2, 2).serve(3, 3600, now, None).is_none());
        assert_eq!(entry(10, 3).serve(50, 3600, now, None).map(|m| m.len()), Some(3));
        assert!(entry(10, 3).serve(3, 3600, now + Duration::hours(2), None).is_none());
        assert!(entry(10, 3).serve(3, 3600, now, Some(now + Duration::seconds(1))).is_none());
    }
}

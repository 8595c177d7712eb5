//! Runtime configuration for the cache, the scheduler, and the policy engine.
//!
//! Every struct has a `Default` built from the constants below and a
//! `from_env()` constructor reading `DOCKET_*` variables, falling back to the
//! default for anything unset or unparsable.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

// ── Cache ──

pub const DEFAULT_FAST_TTL_SECS: u64 = 3600;
pub const DEFAULT_DURABLE_TTL_SECS: u64 = 3 * 3600;
pub const DEFAULT_MOVEMENT_LIMIT: usize = 50;
pub const DEFAULT_FAST_CAPACITY: u64 = 10_000;
pub const DEFAULT_ACCESS_WINDOW_DAYS: i64 = 7;

// ── Sync ──

pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30 * 60;
pub const DEFAULT_SYNC_RETRY_SECS: u64 = 5 * 60;
pub const DEFAULT_SYNC_BATCH_SIZE: usize = 10;
pub const DEFAULT_ITEM_DELAY_MS: u64 = 2_000;
pub const DEFAULT_BATCH_DELAY_MS: u64 = 10_000;
pub const DEFAULT_MAX_DAILY_SYNCS: u64 = 200;
pub const DEFAULT_HEALTH_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_OPTIMIZATION_INTERVAL_SECS: u64 = 24 * 3600;
pub const DEFAULT_ACCESS_LOG_RETENTION_DAYS: i64 = 30;
pub const DEFAULT_PROACTIVE_BATCH_SIZE: usize = 50;
pub const DEFAULT_PROACTIVE_HORIZON_DAYS: f64 = 3.0;

// ── Policy ──

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.75;
pub const DEFAULT_MIN_TRAINING_SAMPLES: usize = 100;
pub const DEFAULT_RETRAIN_INTERVAL_DAYS: i64 = 7;
pub const MIN_INTERVAL_DAYS: f64 = 0.1;
pub const MAX_INTERVAL_DAYS: f64 = 90.0;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(v) => v,
            Err(_) => {
                warn!(key, value = %raw, "ignoring unparsable configuration value");
                default
            }
        },
        Err(_) => default,
    }
}

/// Tiered cache settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Fast-tier freshness window when no per-process policy exists.
    pub default_fast_ttl: Duration,
    /// Durable-tier validity window when no per-process policy exists.
    pub default_durable_ttl: Duration,
    /// Movement limit used when status reads need movement data.
    pub default_movement_limit: usize,
    /// Maximum entries held by the in-memory tier.
    pub fast_capacity: u64,
    /// Window for access-pattern classification.
    pub access_window_days: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_fast_ttl: Duration::from_secs(DEFAULT_FAST_TTL_SECS),
            default_durable_ttl: Duration::from_secs(DEFAULT_DURABLE_TTL_SECS),
            default_movement_limit: DEFAULT_MOVEMENT_LIMIT,
            fast_capacity: DEFAULT_FAST_CAPACITY,
            access_window_days: DEFAULT_ACCESS_WINDOW_DAYS,
        }
    }
}

impl CacheConfig {
    /// # Environment Variables
    /// - `DOCKET_FAST_TTL_SECS` (default: 3600)
    /// - `DOCKET_DURABLE_TTL_SECS` (default: 10800)
    /// - `DOCKET_MOVEMENT_LIMIT` (default: 50)
    /// - `DOCKET_FAST_CAPACITY` (default: 10000)
    pub fn from_env() -> Self {
        Self {
            default_fast_ttl: Duration::from_secs(env_or(
                "DOCKET_FAST_TTL_SECS",
                DEFAULT_FAST_TTL_SECS,
            )),
            default_durable_ttl: Duration::from_secs(env_or(
                "DOCKET_DURABLE_TTL_SECS",
                DEFAULT_DURABLE_TTL_SECS,
            )),
            default_movement_limit: env_or("DOCKET_MOVEMENT_LIMIT", DEFAULT_MOVEMENT_LIMIT),
            fast_capacity: env_or("DOCKET_FAST_CAPACITY", DEFAULT_FAST_CAPACITY),
            access_window_days: DEFAULT_ACCESS_WINDOW_DAYS,
        }
    }
}

/// Sync scheduler settings.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Time between scheduler cycles.
    pub cycle_interval: Duration,
    /// Shortened wait after a cycle fails.
    pub retry_interval: Duration,
    /// Items refreshed per batch.
    pub batch_size: usize,
    /// Pause between items within a batch.
    pub item_delay: Duration,
    /// Pause between batches.
    pub batch_delay: Duration,
    /// Hard daily provider budget for scheduled and proactive refreshes.
    pub max_daily_syncs: u64,
    /// Timeout for the provider health probe.
    pub health_timeout: Duration,
    /// Time between optimization passes.
    pub optimization_interval: Duration,
    /// Access-log rows older than this are pruned.
    pub access_log_retention_days: i64,
    /// Candidates inspected per proactive caching pass.
    pub proactive_batch_size: usize,
    /// Predicted days-to-next-movement at or below which an entry is prefetched.
    pub proactive_horizon_days: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
            retry_interval: Duration::from_secs(DEFAULT_SYNC_RETRY_SECS),
            batch_size: DEFAULT_SYNC_BATCH_SIZE,
            item_delay: Duration::from_millis(DEFAULT_ITEM_DELAY_MS),
            batch_delay: Duration::from_millis(DEFAULT_BATCH_DELAY_MS),
            max_daily_syncs: DEFAULT_MAX_DAILY_SYNCS,
            health_timeout: Duration::from_secs(DEFAULT_HEALTH_TIMEOUT_SECS),
            optimization_interval: Duration::from_secs(DEFAULT_OPTIMIZATION_INTERVAL_SECS),
            access_log_retention_days: DEFAULT_ACCESS_LOG_RETENTION_DAYS,
            proactive_batch_size: DEFAULT_PROACTIVE_BATCH_SIZE,
            proactive_horizon_days: DEFAULT_PROACTIVE_HORIZON_DAYS,
        }
    }
}

impl SyncConfig {
    /// # Environment Variables
    /// - `DOCKET_SYNC_INTERVAL_SECS` (default: 1800)
    /// - `DOCKET_SYNC_RETRY_SECS` (default: 300)
    /// - `DOCKET_SYNC_BATCH_SIZE` (default: 10)
    /// - `DOCKET_SYNC_ITEM_DELAY_MS` (default: 2000)
    /// - `DOCKET_SYNC_BATCH_DELAY_MS` (default: 10000)
    /// - `DOCKET_MAX_DAILY_SYNCS` (default: 200)
    /// - `DOCKET_OPTIMIZATION_INTERVAL_SECS` (default: 86400)
    /// - `DOCKET_PROACTIVE_BATCH_SIZE` (default: 50)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cycle_interval: Duration::from_secs(env_or(
                "DOCKET_SYNC_INTERVAL_SECS",
                DEFAULT_SYNC_INTERVAL_SECS,
            )),
            retry_interval: Duration::from_secs(env_or(
                "DOCKET_SYNC_RETRY_SECS",
                DEFAULT_SYNC_RETRY_SECS,
            )),
            batch_size: env_or("DOCKET_SYNC_BATCH_SIZE", DEFAULT_SYNC_BATCH_SIZE),
            item_delay: Duration::from_millis(env_or(
                "DOCKET_SYNC_ITEM_DELAY_MS",
                DEFAULT_ITEM_DELAY_MS,
            )),
            batch_delay: Duration::from_millis(env_or(
                "DOCKET_SYNC_BATCH_DELAY_MS",
                DEFAULT_BATCH_DELAY_MS,
            )),
            max_daily_syncs: env_or("DOCKET_MAX_DAILY_SYNCS", DEFAULT_MAX_DAILY_SYNCS),
            optimization_interval: Duration::from_secs(env_or(
                "DOCKET_OPTIMIZATION_INTERVAL_SECS",
                DEFAULT_OPTIMIZATION_INTERVAL_SECS,
            )),
            proactive_batch_size: env_or(
                "DOCKET_PROACTIVE_BATCH_SIZE",
                DEFAULT_PROACTIVE_BATCH_SIZE,
            ),
            ..defaults
        }
    }

    /// No delays, small batches. For tests and manual recovery runs.
    pub fn immediate() -> Self {
        Self {
            item_delay: Duration::ZERO,
            batch_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Predictive policy engine settings.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// Predictions below this confidence are treated as absent.
    pub confidence_threshold: f32,
    /// Minimum `(history → next interval)` samples required to train.
    pub min_training_samples: usize,
    /// Models younger than this are not retrained unless forced.
    pub retrain_interval_days: i64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            min_training_samples: DEFAULT_MIN_TRAINING_SAMPLES,
            retrain_interval_days: DEFAULT_RETRAIN_INTERVAL_DAYS,
        }
    }
}

impl PolicyConfig {
    /// # Environment Variables
    /// - `DOCKET_CONFIDENCE_THRESHOLD` (default: 0.75)
    /// - `DOCKET_MIN_TRAINING_SAMPLES` (default: 100)
    /// - `DOCKET_RETRAIN_INTERVAL_DAYS` (default: 7)
    pub fn from_env() -> Self {
        Self {
            confidence_threshold: env_or(
                "DOCKET_CONFIDENCE_THRESHOLD",
                DEFAULT_CONFIDENCE_THRESHOLD,
            ),
            min_training_samples: env_or(
                "DOCKET_MIN_TRAINING_SAMPLES",
                DEFAULT_MIN_TRAINING_SAMPLES,
            ),
            retrain_interval_days: env_or(
                "DOCKET_RETRAIN_INTERVAL_DAYS",
                DEFAULT_RETRAIN_INTERVAL_DAYS,
            ),
        }
    }
}

//! DuckDB durable tier for process movements, status, and cache policy.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use arrow::record_batch::RecordBatch;
use chrono::{DateTime, NaiveDate, Utc};
use duckdb::{Connection, params};
use serde::Serialize;
use tracing::{debug, info};

use docket_core::{
    AccessPattern, Movement, MovementType, OptimizationConfig, Outcome, Phase, ProcessArea,
    StatusSummary, SyncStatus, TtlPlan,
};

use crate::StoreError;
use crate::schema::{MIGRATIONS, SCHEMA_VERSION, SCHEMA_VERSION_DDL, TABLES};

/// DuckDB store backing the durable tier.
///
/// The durable tier is the single source of truth: movement history is
/// append-mostly (unique on `(cnj, content, movement_date)`), status and
/// policy rows are one per process and only ever superseded.
///
/// The connection sits behind a mutex so the store can be shared across
/// tasks. Every method is synchronous; async callers go through
/// [`blocking`](Self::blocking).
///
/// Supports both in-memory (ephemeral) and persistent (file-backed) modes.
/// Both constructors run [`migrate`](Self::migrate).
pub struct DuckStore {
    conn: Mutex<Connection>,
}

/// A movement row as read back from the durable tier.
struct RawMovement {
    id: String,
    movement_type: String,
    content: String,
    movement_date: i64,
    tribunal: Option<String>,
    grade: Option<String>,
    icon: Option<String>,
    color: Option<String>,
}

struct RawStatus {
    cnj: String,
    current_phase: String,
    description: String,
    progress_percentage: i32,
    outcome: String,
    total_movements: i32,
    last_movement_date: Option<i64>,
    tribunal_name: Option<String>,
    tribunal_grade: Option<String>,
    last_provider_sync_at: Option<i64>,
    cache_valid_until: i64,
    sync_status: String,
    sync_error: Option<String>,
    updated_at: i64,
}

struct RawConfig {
    cnj: String,
    detected_phase: String,
    process_area: String,
    access_pattern: String,
    access_count: i64,
    last_accessed_at: Option<i64>,
    redis_ttl_seconds: i64,
    db_ttl_seconds: i64,
    sync_interval_seconds: i64,
    last_sync_status: Option<String>,
    last_sync_error: Option<String>,
}

/// Request-economy counters kept per day in `api_economy_metrics`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    TotalRequests,
    FastHits,
    DurableHits,
    ProviderCalls,
    StaleServed,
    Misses,
    SyncSuccesses,
    SyncFailures,
    ProactiveRefreshes,
}

impl Metric {
    fn column(&self) -> &'static str {
        match self {
            Self::TotalRequests => "total_requests",
            Self::FastHits => "fast_hits",
            Self::DurableHits => "durable_hits",
            Self::ProviderCalls => "provider_calls",
            Self::StaleServed => "stale_served",
            Self::Misses => "misses",
            Self::SyncSuccesses => "sync_successes",
            Self::SyncFailures => "sync_failures",
            Self::ProactiveRefreshes => "proactive_refreshes",
        }
    }
}

/// One row of `api_economy_metrics`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DailyMetrics {
    pub metric_date: String,
    pub total_requests: i64,
    pub fast_hits: i64,
    pub durable_hits: i64,
    pub provider_calls: i64,
    pub stale_served: i64,
    pub misses: i64,
    pub sync_successes: i64,
    pub sync_failures: i64,
    pub proactive_refreshes: i64,
    pub optimization_report: Option<String>,
}

/// Schema state for operators.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub schema_version: Option<i64>,
    pub expected_version: i64,
    pub up_to_date: bool,
    /// `(table, row count)`; count is `None` when the table is missing.
    pub tables: Vec<(String, Option<usize>)>,
}

/// Aggregate counts over movement history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HistoryStats {
    pub total_movements: usize,
    pub processes: usize,
    /// Processes with at least two movements (at least one interval).
    pub processes_with_intervals: usize,
}

pub(crate) fn to_ts(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

pub(crate) fn from_ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn parse_field<T>(
    table: &'static str,
    column: &'static str,
    raw: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T, StoreError> {
    parse(raw).ok_or_else(|| StoreError::Corrupt {
        table,
        column,
        value: raw.to_string(),
    })
}

impl RawMovement {
    fn into_movement(self) -> Result<Movement, StoreError> {
        let movement_type = parse_field(
            "process_movements",
            "movement_type",
            &self.movement_type,
            MovementType::parse,
        )?;
        Ok(Movement {
            id: self.id,
            movement_type,
            raw_text: self.content,
            date: from_ts(self.movement_date),
            tribunal: self.tribunal,
            grade: self.grade,
            icon: self.icon,
            color: self.color,
            is_current: false,
        })
    }
}

impl RawStatus {
    fn into_status(self) -> Result<StatusSummary, StoreError> {
        const T: &str = "process_status_cache";
        Ok(StatusSummary {
            current_phase: parse_field(T, "current_phase", &self.current_phase, Phase::parse)?,
            outcome: parse_field(T, "outcome", &self.outcome, Outcome::parse)?,
            sync_status: parse_field(T, "sync_status", &self.sync_status, SyncStatus::parse)?,
            cnj: self.cnj,
            description: self.description,
            progress_percentage: self.progress_percentage.clamp(0, 100) as u8,
            total_movements: self.total_movements.max(0) as u32,
            last_movement_date: self.last_movement_date.map(from_ts),
            tribunal_name: self.tribunal_name,
            tribunal_grade: self.tribunal_grade,
            last_provider_sync_at: self.last_provider_sync_at.map(from_ts),
            cache_valid_until: from_ts(self.cache_valid_until),
            sync_error: self.sync_error,
            updated_at: from_ts(self.updated_at),
        })
    }
}

impl RawConfig {
    fn into_config(self) -> Result<OptimizationConfig, StoreError> {
        const T: &str = "process_optimization_config";
        let last_sync_status = match self.last_sync_status.as_deref() {
            Some(s) => Some(parse_field(T, "last_sync_status", s, SyncStatus::parse)?),
            None => None,
        };
        Ok(OptimizationConfig {
            detected_phase: parse_field(T, "detected_phase", &self.detected_phase, Phase::parse)?,
            process_area: parse_field(T, "process_area", &self.process_area, ProcessArea::parse)?,
            access_pattern: parse_field(
                T,
                "access_pattern",
                &self.access_pattern,
                AccessPattern::parse,
            )?,
            cnj: self.cnj,
            access_count: self.access_count.max(0) as u64,
            last_accessed_at: self.last_accessed_at.map(from_ts),
            ttl: TtlPlan {
                fast_secs: self.redis_ttl_seconds.max(0) as u64,
                durable_secs: self.db_ttl_seconds.max(0) as u64,
                sync_interval_secs: self.sync_interval_seconds.max(0) as u64,
            },
            last_sync_status,
            last_sync_error: self.last_sync_error,
        })
    }
}

const MOVEMENT_COLUMNS: &str =
    "id, movement_type, content, movement_date, tribunal, grade, icon, color";

const STATUS_COLUMNS: &str = "cnj, current_phase, description, progress_percentage, outcome, \
     total_movements, last_movement_date, tribunal_name, tribunal_grade, \
     last_provider_sync_at, cache_valid_until, sync_status, sync_error, updated_at";

const CONFIG_COLUMNS: &str = "cnj, detected_phase, process_area, access_pattern, access_count, \
     last_accessed_at, redis_ttl_seconds, db_ttl_seconds, sync_interval_seconds, \
     last_sync_status, last_sync_error";

fn map_movement(row: &duckdb::Row<'_>) -> duckdb::Result<RawMovement> {
    Ok(RawMovement {
        id: row.get(0)?,
        movement_type: row.get(1)?,
        content: row.get(2)?,
        movement_date: row.get(3)?,
        tribunal: row.get(4)?,
        grade: row.get(5)?,
        icon: row.get(6)?,
        color: row.get(7)?,
    })
}

fn map_status(row: &duckdb::Row<'_>) -> duckdb::Result<RawStatus> {
    Ok(RawStatus {
        cnj: row.get(0)?,
        current_phase: row.get(1)?,
        description: row.get(2)?,
        progress_percentage: row.get(3)?,
        outcome: row.get(4)?,
        total_movements: row.get(5)?,
        last_movement_date: row.get(6)?,
        tribunal_name: row.get(7)?,
        tribunal_grade: row.get(8)?,
        last_provider_sync_at: row.get(9)?,
        cache_valid_until: row.get(10)?,
        sync_status: row.get(11)?,
        sync_error: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

fn map_config(row: &duckdb::Row<'_>) -> duckdb::Result<RawConfig> {
    Ok(RawConfig {
        cnj: row.get(0)?,
        detected_phase: row.get(1)?,
        process_area: row.get(2)?,
        access_pattern: row.get(3)?,
        access_count: row.get(4)?,
        last_accessed_at: row.get(5)?,
        redis_ttl_seconds: row.get(6)?,
        db_ttl_seconds: row.get(7)?,
        sync_interval_seconds: row.get(8)?,
        last_sync_status: row.get(9)?,
        last_sync_error: row.get(10)?,
    })
}

impl DuckStore {
    /// Open an in-memory DuckDB database with the schema applied.
    pub fn open() -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Open or create a persistent DuckDB database at the given path.
    ///
    /// Existing data is kept; missing tables are created.
    pub fn open_persistent(path: &Path) -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(Connection::open(path)?),
        };
        store.migrate()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Other("duckdb connection lock poisoned".into()))
    }

    /// Run a closure against the store on the blocking thread pool.
    pub async fn blocking<T, F>(self: &Arc<Self>, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&DuckStore) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| StoreError::Other(format!("blocking store task failed: {e}")))?
    }

    // ── Schema ──

    /// Apply any migrations newer than the recorded schema version.
    pub fn migrate(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute_batch(SCHEMA_VERSION_DDL)?;
        let current: i64 = conn.query_row(
            "SELECT coalesce(max(version), 0)::BIGINT FROM schema_version",
            [],
            |row| row.get(0),
        )?;
        for (i, ddl) in MIGRATIONS.iter().enumerate() {
            let version = i as i64 + 1;
            if version <= current {
                continue;
            }
            conn.execute_batch(ddl)?;
            conn.execute(
                "INSERT INTO schema_version (version, applied_at) VALUES (?, ?)",
                params![version, to_ts(Utc::now())],
            )?;
            info!(version, "applied durable-tier migration");
        }
        Ok(())
    }

    /// Recorded schema version, `None` if never migrated.
    pub fn schema_version(&self) -> Result<Option<i64>, StoreError> {
        let conn = self.lock()?;
        let version: Option<i64> = conn.query_row(
            "SELECT max(version)::BIGINT FROM schema_version",
            [],
            |row| row.get(0),
        )?;
        Ok(version)
    }

    /// Schema version plus presence and row count of every table.
    pub fn migration_status(&self) -> Result<MigrationStatus, StoreError> {
        let schema_version = self.schema_version()?;
        let expected_version = SCHEMA_VERSION;
        let tables = TABLES
            .iter()
            .map(|t| (t.to_string(), self.count_table(t).ok()))
            .collect();
        Ok(MigrationStatus {
            up_to_date: schema_version == Some(expected_version),
            schema_version,
            expected_version,
            tables,
        })
    }

    pub fn count_table(&self, table: &str) -> Result<usize, StoreError> {
        let sql = format!("SELECT count(*)::BIGINT AS cnt FROM {table}");
        let conn = self.lock()?;
        let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // ── Movements ──

    /// Upsert movements for a process.
    ///
    /// Identity is `(cnj, content, date)`: re-writing the same movement only
    /// refreshes its `fetched_at` and mutable metadata. Returns the number of
    /// distinct movements written.
    pub fn upsert_movements(
        &self,
        cnj: &str,
        movements: &[Movement],
        fetched_at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let written = upsert_movements_on(&tx, cnj, movements, fetched_at)?;
        tx.commit()?;
        debug!(cnj, count = written, "upserted movements");
        Ok(written)
    }

    /// Persist a provider fetch: movements and the superseding status row,
    /// in one transaction.
    pub fn write_through(
        &self,
        cnj: &str,
        movements: &[Movement],
        status: &StatusSummary,
        fetched_at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let written = upsert_movements_on(&tx, cnj, movements, fetched_at)?;
        upsert_status_on(&tx, status)?;
        tx.commit()?;
        debug!(cnj, count = written, "wrote provider fetch through");
        Ok(written)
    }

    /// Newest-first movements for a process.
    ///
    /// With `fetched_since`, only rows fetched from the provider at or after
    /// that instant are returned (the durable freshness filter).
    pub fn movements(
        &self,
        cnj: &str,
        limit: usize,
        fetched_since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Movement>, StoreError> {
        let since = fetched_since.map(to_ts).unwrap_or(i64::MIN);
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM process_movements
             WHERE cnj = ? AND fetched_at >= ?
             ORDER BY movement_date DESC, content
             LIMIT {limit}"
        );
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let raw = stmt
            .query_map(params![cnj, since], map_movement)?
            .collect::<Result<Vec<_>, _>>()?;
        let mut movements = raw
            .into_iter()
            .map(RawMovement::into_movement)
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(first) = movements.first_mut() {
            first.is_current = true;
        }
        Ok(movements)
    }

    pub fn movement_count(&self, cnj: &str) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT count(*)::BIGINT FROM process_movements WHERE cnj = ?",
            params![cnj],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Full movement history as Arrow batches, ordered by process then date.
    ///
    /// Columns: `cnj`, `movement_type`, `content` (Utf8), `movement_date` (Int64).
    pub fn movement_history_batches(&self) -> Result<Vec<RecordBatch>, StoreError> {
        self.query_arrow(
            "SELECT cnj, movement_type, content, movement_date
             FROM process_movements
             ORDER BY cnj, movement_date",
        )
    }

    pub fn history_stats(&self) -> Result<HistoryStats, StoreError> {
        let conn = self.lock()?;
        let (total, processes, with_intervals): (i64, i64, i64) = conn.query_row(
            "SELECT coalesce(sum(n), 0)::BIGINT,
                    count(*)::BIGINT,
                    coalesce(sum(CASE WHEN n >= 2 THEN 1 ELSE 0 END), 0)::BIGINT
             FROM (SELECT cnj, count(*) AS n FROM process_movements GROUP BY cnj)",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        Ok(HistoryStats {
            total_movements: total as usize,
            processes: processes as usize,
            processes_with_intervals: with_intervals as usize,
        })
    }

    // ── Status ──

    /// Insert or supersede the status row for a process.
    pub fn upsert_status(&self, status: &StatusSummary) -> Result<(), StoreError> {
        let conn = self.lock()?;
        upsert_status_on(&conn, status)
    }

    pub fn status(&self, cnj: &str) -> Result<Option<StatusSummary>, StoreError> {
        let sql = format!("SELECT {STATUS_COLUMNS} FROM process_status_cache WHERE cnj = ?");
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![cnj], map_status)?;
        match rows.next() {
            Some(raw) => Ok(Some(raw?.into_status()?)),
            None => Ok(None),
        }
    }

    /// Expire the status row now without deleting anything.
    ///
    /// Returns `false` if the process has no status row.
    pub fn invalidate(&self, cnj: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE process_status_cache
             SET cache_valid_until = ?, sync_status = 'invalidated', updated_at = ?
             WHERE cnj = ?",
            params![to_ts(now), to_ts(now), cnj],
        )?;
        Ok(changed > 0)
    }

    /// Record the outcome of a scheduled refresh.
    ///
    /// Successful refreshes already superseded the status row through
    /// [`upsert_status`](Self::upsert_status); failures mark it `failed`.
    pub fn record_sync_outcome(
        &self,
        cnj: &str,
        status: SyncStatus,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE process_optimization_config
             SET last_sync_status = ?, last_sync_error = ?
             WHERE cnj = ?",
            params![status.as_str(), error, cnj],
        )?;
        if status == SyncStatus::Failed {
            tx.execute(
                "UPDATE process_status_cache
                 SET sync_status = 'failed', sync_error = ?, updated_at = ?
                 WHERE cnj = ?",
                params![error, to_ts(now), cnj],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Scheduled and proactive provider refreshes that succeeded on `date`.
    ///
    /// Read from the day's counters, so repeated refreshes of one process
    /// each count.
    pub fn provider_syncs_on(&self, date: NaiveDate) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT coalesce(sum(sync_successes + proactive_refreshes), 0)::BIGINT
             FROM api_economy_metrics WHERE metric_date = ?",
            params![date.format("%Y-%m-%d").to_string()],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    // ── Sync candidates ──

    /// Rows whose validity ends within `[now, until]`, soonest first,
    /// skipping rows whose last sync failed.
    pub fn expiring_between(
        &self,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        let sql = format!(
            "SELECT cnj FROM process_status_cache
             WHERE cache_valid_until >= ? AND cache_valid_until <= ?
               AND sync_status <> 'failed'
             ORDER BY cache_valid_until ASC, cnj
             LIMIT {limit}"
        );
        self.query_cnjs(&sql, params![to_ts(now), to_ts(until)])
    }

    /// Rows that expired within `[since, now)`, most recently expired first.
    pub fn expired_between(
        &self,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        let sql = format!(
            "SELECT cnj FROM process_status_cache
             WHERE cache_valid_until >= ? AND cache_valid_until < ?
             ORDER BY cache_valid_until DESC, cnj
             LIMIT {limit}"
        );
        self.query_cnjs(&sql, params![to_ts(since), to_ts(now)])
    }

    /// Processes with movement activity since `active_since`, last synced
    /// before `synced_before` (or never), and accessed since `accessed_since`.
    pub fn stale_active(
        &self,
        active_since: DateTime<Utc>,
        synced_before: DateTime<Utc>,
        accessed_since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        let sql = format!(
            "SELECT m.cnj FROM process_movements m
             LEFT JOIN process_status_cache s ON s.cnj = m.cnj
             WHERE m.movement_date >= ?
               AND (s.last_provider_sync_at IS NULL OR s.last_provider_sync_at < ?)
               AND EXISTS (
                   SELECT 1 FROM process_access_log a
                   WHERE a.cnj = m.cnj AND a.accessed_at >= ?
               )
             GROUP BY m.cnj
             ORDER BY max(m.movement_date) DESC, m.cnj
             LIMIT {limit}"
        );
        self.query_cnjs(
            &sql,
            params![to_ts(active_since), to_ts(synced_before), to_ts(accessed_since)],
        )
    }

    fn query_cnjs(&self, sql: &str, params: &[&dyn duckdb::ToSql]) -> Result<Vec<String>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let cnjs = stmt
            .query_map(params, |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(cnjs)
    }

    // ── Access tracking and policy ──

    /// Log an access and bump the process's access counter.
    ///
    /// `defaults` seeds the policy row on first access. Returns the new
    /// lifetime access count.
    pub fn touch_access(
        &self,
        defaults: &OptimizationConfig,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO process_access_log (cnj, accessed_at) VALUES (?, ?)",
            params![defaults.cnj, to_ts(at)],
        )?;
        insert_config_if_missing(&tx, defaults)?;
        tx.execute(
            "UPDATE process_optimization_config
             SET access_count = access_count + 1, last_accessed_at = ?
             WHERE cnj = ?",
            params![to_ts(at), defaults.cnj],
        )?;
        let count: i64 = tx.query_row(
            "SELECT access_count FROM process_optimization_config WHERE cnj = ?",
            params![defaults.cnj],
            |row| row.get(0),
        )?;
        tx.commit()?;
        Ok(count.max(0) as u64)
    }

    /// Accesses logged for a process since `since`.
    pub fn access_count_since(&self, cnj: &str, since: DateTime<Utc>) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT count(*)::BIGINT FROM process_access_log WHERE cnj = ? AND accessed_at >= ?",
            params![cnj, to_ts(since)],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Delete access-log rows older than `before`. Returns rows removed.
    pub fn prune_access_log(&self, before: DateTime<Utc>) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM process_access_log WHERE accessed_at < ?",
            params![to_ts(before)],
        )?;
        Ok(removed)
    }

    pub fn optimization_config(&self, cnj: &str) -> Result<Option<OptimizationConfig>, StoreError> {
        let sql = format!("SELECT {CONFIG_COLUMNS} FROM process_optimization_config WHERE cnj = ?");
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![cnj], map_config)?;
        match rows.next() {
            Some(raw) => Ok(Some(raw?.into_config()?)),
            None => Ok(None),
        }
    }

    /// Every policy row, ordered by process identifier.
    pub fn optimization_configs(&self) -> Result<Vec<OptimizationConfig>, StoreError> {
        let sql = format!("SELECT {CONFIG_COLUMNS} FROM process_optimization_config ORDER BY cnj");
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let raw = stmt
            .query_map([], map_config)?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(RawConfig::into_config).collect()
    }

    /// Write the policy columns of a process's row, creating it if needed.
    ///
    /// Access counters and sync outcome columns are left untouched.
    pub fn write_policy(&self, config: &OptimizationConfig) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        insert_config_if_missing(&tx, config)?;
        tx.execute(
            "UPDATE process_optimization_config
             SET detected_phase = ?, process_area = ?, access_pattern = ?,
                 redis_ttl_seconds = ?, db_ttl_seconds = ?, sync_interval_seconds = ?
             WHERE cnj = ?",
            params![
                config.detected_phase.as_str(),
                config.process_area.as_str(),
                config.access_pattern.as_str(),
                config.ttl.fast_secs as i64,
                config.ttl.durable_secs as i64,
                config.ttl.sync_interval_secs as i64,
                config.cnj,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Most frequently accessed processes seen since `since`.
    pub fn top_accessed(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<String>, StoreError> {
        let sql = format!(
            "SELECT cnj FROM process_optimization_config
             WHERE last_accessed_at >= ?
             ORDER BY access_count DESC, last_accessed_at DESC, cnj
             LIMIT {limit}"
        );
        self.query_cnjs(&sql, params![to_ts(since)])
    }

    // ── Request economy metrics ──

    /// Add to one or more of a day's counters.
    pub fn increment_metrics(
        &self,
        date: NaiveDate,
        deltas: &[(Metric, i64)],
    ) -> Result<(), StoreError> {
        if deltas.is_empty() {
            return Ok(());
        }
        let day = date.format("%Y-%m-%d").to_string();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO api_economy_metrics (metric_date) VALUES (?)",
            params![day],
        )?;
        for (metric, delta) in deltas {
            let col = metric.column();
            tx.execute(
                &format!("UPDATE api_economy_metrics SET {col} = {col} + ? WHERE metric_date = ?"),
                params![delta, day],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Daily metric rows from `since` onwards, oldest first.
    pub fn metrics_since(&self, since: NaiveDate) -> Result<Vec<DailyMetrics>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT metric_date, total_requests, fast_hits, durable_hits, provider_calls,
                    stale_served, misses, sync_successes, sync_failures,
                    proactive_refreshes, optimization_report
             FROM api_economy_metrics
             WHERE metric_date >= ?
             ORDER BY metric_date",
        )?;
        let rows = stmt
            .query_map(params![since.format("%Y-%m-%d").to_string()], |row| {
                Ok(DailyMetrics {
                    metric_date: row.get(0)?,
                    total_requests: row.get(1)?,
                    fast_hits: row.get(2)?,
                    durable_hits: row.get(3)?,
                    provider_calls: row.get(4)?,
                    stale_served: row.get(5)?,
                    misses: row.get(6)?,
                    sync_successes: row.get(7)?,
                    sync_failures: row.get(8)?,
                    proactive_refreshes: row.get(9)?,
                    optimization_report: row.get(10)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Attach an optimization report (JSON) to a day's metrics row.
    pub fn save_report(&self, date: NaiveDate, report_json: &str) -> Result<(), StoreError> {
        let day = date.format("%Y-%m-%d").to_string();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO api_economy_metrics (metric_date) VALUES (?)",
            params![day],
        )?;
        tx.execute(
            "UPDATE api_economy_metrics SET optimization_report = ? WHERE metric_date = ?",
            params![report_json, day],
        )?;
        tx.commit()?;
        Ok(())
    }

    // ── Escape hatch ──

    /// Execute arbitrary SQL and return Arrow RecordBatches.
    pub fn query_arrow(&self, sql: &str) -> Result<Vec<RecordBatch>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let batches: Vec<RecordBatch> = stmt.query_arrow([])?.collect();
        Ok(batches)
    }

    /// Run a closure against the locked connection.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.lock()?;
        f(&mut conn)
    }
}

/// Identity is `(cnj, content, date)`: re-writing the same movement only
/// refreshes its `fetched_at` and mutable metadata.
fn upsert_movements_on(
    conn: &Connection,
    cnj: &str,
    movements: &[Movement],
    fetched_at: DateTime<Utc>,
) -> Result<usize, StoreError> {
    let mut seen = HashSet::new();
    let unique: Vec<&Movement> = movements
        .iter()
        .filter(|m| seen.insert((m.raw_text.as_str(), to_ts(m.date))))
        .collect();

    let mut stmt = conn.prepare(
        "INSERT INTO process_movements
            (id, cnj, movement_type, content, movement_date, tribunal, grade,
             icon, color, fetched_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT (cnj, content, movement_date) DO UPDATE SET
            id = EXCLUDED.id,
            movement_type = EXCLUDED.movement_type,
            tribunal = EXCLUDED.tribunal,
            grade = EXCLUDED.grade,
            icon = EXCLUDED.icon,
            color = EXCLUDED.color,
            fetched_at = EXCLUDED.fetched_at",
    )?;
    for m in &unique {
        stmt.execute(params![
            m.id,
            cnj,
            m.movement_type.as_str(),
            m.raw_text,
            to_ts(m.date),
            m.tribunal,
            m.grade,
            m.icon,
            m.color,
            to_ts(fetched_at),
        ])?;
    }
    Ok(unique.len())
}

fn upsert_status_on(conn: &Connection, status: &StatusSummary) -> Result<(), StoreError> {
    let sql = format!(
        "INSERT OR REPLACE INTO process_status_cache ({STATUS_COLUMNS})
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    );
    conn.execute(
        &sql,
        params![
            status.cnj,
            status.current_phase.as_str(),
            status.description,
            status.progress_percentage as i32,
            status.outcome.as_str(),
            status.total_movements as i32,
            status.last_movement_date.map(to_ts),
            status.tribunal_name,
            status.tribunal_grade,
            status.last_provider_sync_at.map(to_ts),
            to_ts(status.cache_valid_until),
            status.sync_status.as_str(),
            status.sync_error,
            to_ts(status.updated_at),
        ],
    )?;
    Ok(())
}

fn insert_config_if_missing(conn: &Connection, config: &OptimizationConfig) -> Result<(), StoreError> {
    conn.execute(
        "INSERT OR IGNORE INTO process_optimization_config
            (cnj, detected_phase, process_area, access_pattern, access_count,
             redis_ttl_seconds, db_ttl_seconds, sync_interval_seconds)
         VALUES (?, ?, ?, ?, 0, ?, ?, ?)",
        params![
            config.cnj,
            config.detected_phase.as_str(),
            config.process_area.as_str(),
            config.access_pattern.as_str(),
            config.ttl.fast_secs as i64,
            config.ttl.durable_secs as i64,
            config.ttl.sync_interval_secs as i64,
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use docket_core::{Phase, synthesize_status};

    fn movement(id: &str, text: &str, days_ago: i64) -> Movement {
        Movement::from_text(id, text, Utc::now() - Duration::days(days_ago))
    }

    fn config(cnj: &str) -> OptimizationConfig {
        OptimizationConfig {
            cnj: cnj.to_string(),
            detected_phase: Phase::Instructional,
            process_area: ProcessArea::General,
            access_pattern: AccessPattern::Rarely,
            access_count: 0,
            last_accessed_at: None,
            ttl: TtlPlan::from_fast(3600),
            last_sync_status: None,
            last_sync_error: None,
        }
    }

    fn status_row(cnj: &str, valid_until: DateTime<Utc>, sync: SyncStatus) -> StatusSummary {
        let now = Utc::now();
        synthesize_status(cnj, &[], now, valid_until, sync, Some(now))
    }

    #[test]
    fn open_in_memory_applies_schema() {
        let store = DuckStore::open().unwrap();
        assert_eq!(store.schema_version().unwrap(), Some(MIGRATIONS.len() as i64));
        for table in TABLES {
            assert_eq!(store.count_table(table).unwrap(), 0, "{table}");
        }
    }

    #[test]
    fn migrate_is_idempotent() {
        let store = DuckStore::open().unwrap();
        store.migrate().unwrap();
        store.migrate().unwrap();
        let status = store.migration_status().unwrap();
        assert!(status.up_to_date);
        assert!(status.tables.iter().all(|(_, count)| count.is_some()));
    }

    #[test]
    fn upsert_movements_never_duplicates() {
        let store = DuckStore::open().unwrap();
        let ms = vec![movement("1", "Juntada de petição", 3), movement("2", "Despacho", 1)];
        store.upsert_movements("0001", &ms, Utc::now()).unwrap();
        store.upsert_movements("0001", &ms, Utc::now()).unwrap();
        assert_eq!(store.movement_count("0001").unwrap(), 2);
    }

    #[test]
    fn upsert_dedupes_within_batch() {
        let store = DuckStore::open().unwrap();
        let m = movement("1", "Despacho", 1);
        let written = store
            .upsert_movements("0001", &[m.clone(), m], Utc::now())
            .unwrap();
        assert_eq!(written, 1);
        assert_eq!(store.movement_count("0001").unwrap(), 1);
    }

    #[test]
    fn movements_newest_first_with_current_flag() {
        let store = DuckStore::open().unwrap();
        let ms = vec![movement("old", "Distribuído", 10), movement("new", "Sentença", 1)];
        store.upsert_movements("0001", &ms, Utc::now()).unwrap();

        let read = store.movements("0001", 10, None).unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read[0].id, "new");
        assert!(read[0].is_current);
        assert!(!read[1].is_current);
        assert_eq!(read[0].movement_type, MovementType::Decision);
    }

    #[test]
    fn movements_fetched_since_filters_old_fetches() {
        let store = DuckStore::open().unwrap();
        let ms = vec![movement("1", "Despacho", 1)];
        store
            .upsert_movements("0001", &ms, Utc::now() - Duration::hours(5))
            .unwrap();

        let fresh = store
            .movements("0001", 10, Some(Utc::now() - Duration::hours(3)))
            .unwrap();
        assert!(fresh.is_empty());
        let any = store.movements("0001", 10, None).unwrap();
        assert_eq!(any.len(), 1);
    }

    #[test]
    fn movements_respects_limit() {
        let store = DuckStore::open().unwrap();
        let ms: Vec<Movement> = (0..5)
            .map(|i| movement(&i.to_string(), &format!("Juntada {i}"), i))
            .collect();
        store.upsert_movements("0001", &ms, Utc::now()).unwrap();
        assert_eq!(store.movements("0001", 3, None).unwrap().len(), 3);
    }

    #[test]
    fn status_roundtrip_and_supersede() {
        let store = DuckStore::open().unwrap();
        let later = Utc::now() + Duration::hours(3);
        let mut row = status_row("0001", later, SyncStatus::Success);
        store.upsert_status(&row).unwrap();

        let read = store.status("0001").unwrap().unwrap();
        assert_eq!(read.sync_status, SyncStatus::Success);
        assert_eq!(read.cache_valid_until.timestamp(), later.timestamp());

        row.sync_status = SyncStatus::Cached;
        store.upsert_status(&row).unwrap();
        assert_eq!(store.count_table("process_status_cache").unwrap(), 1);
        assert_eq!(
            store.status("0001").unwrap().unwrap().sync_status,
            SyncStatus::Cached
        );
    }

    #[test]
    fn write_through_persists_movements_and_status() {
        let store = DuckStore::open().unwrap();
        let ms = vec![movement("1", "Sentença", 1)];
        let now = Utc::now();
        let status = synthesize_status("0001", &ms, now, now + Duration::hours(3), SyncStatus::Success, Some(now));
        assert_eq!(store.write_through("0001", &ms, &status, now).unwrap(), 1);
        assert_eq!(store.movement_count("0001").unwrap(), 1);
        assert_eq!(store.status("0001").unwrap().unwrap().current_phase, Phase::Decision);
    }

    #[test]
    fn status_missing_is_none() {
        let store = DuckStore::open().unwrap();
        assert!(store.status("nope").unwrap().is_none());
    }

    #[test]
    fn invalidate_expires_without_deleting() {
        let store = DuckStore::open().unwrap();
        store
            .upsert_status(&status_row("0001", Utc::now() + Duration::hours(3), SyncStatus::Success))
            .unwrap();
        let now = Utc::now();
        assert!(store.invalidate("0001", now).unwrap());

        let read = store.status("0001").unwrap().unwrap();
        assert_eq!(read.sync_status, SyncStatus::Invalidated);
        assert!(read.cache_valid_until <= now);
        assert!(!store.invalidate("missing", now).unwrap());
    }

    #[test]
    fn record_sync_failure_marks_rows() {
        let store = DuckStore::open().unwrap();
        store.write_policy(&config("0001")).unwrap();
        store
            .upsert_status(&status_row("0001", Utc::now(), SyncStatus::Success))
            .unwrap();
        store
            .record_sync_outcome("0001", SyncStatus::Failed, Some("timeout"), Utc::now())
            .unwrap();

        let status = store.status("0001").unwrap().unwrap();
        assert_eq!(status.sync_status, SyncStatus::Failed);
        assert_eq!(status.sync_error.as_deref(), Some("timeout"));
        let cfg = store.optimization_config("0001").unwrap().unwrap();
        assert_eq!(cfg.last_sync_status, Some(SyncStatus::Failed));
    }

    #[test]
    fn provider_syncs_count_every_refresh() {
        let store = DuckStore::open().unwrap();
        let today = Utc::now().date_naive();
        assert_eq!(store.provider_syncs_on(today).unwrap(), 0);

        store.upsert_status(&status_row("a", Utc::now(), SyncStatus::Success)).unwrap();
        store
            .increment_metrics(today, &[(Metric::SyncSuccesses, 2), (Metric::SyncFailures, 5)])
            .unwrap();
        store
            .increment_metrics(today, &[(Metric::ProactiveRefreshes, 1)])
            .unwrap();
        assert_eq!(store.provider_syncs_on(today).unwrap(), 3);

        store.invalidate("a", Utc::now()).unwrap();
        assert_eq!(store.provider_syncs_on(today).unwrap(), 3);
        assert_eq!(store.provider_syncs_on(today - Duration::days(1)).unwrap(), 0);
    }

    #[test]
    fn candidate_queries_partition_by_expiry() {
        let store = DuckStore::open().unwrap();
        let now = Utc::now();
        store
            .upsert_status(&status_row("soon", now + Duration::minutes(30), SyncStatus::Success))
            .unwrap();
        store
            .upsert_status(&status_row("failed", now + Duration::minutes(30), SyncStatus::Failed))
            .unwrap();
        store
            .upsert_status(&status_row("expired", now - Duration::hours(2), SyncStatus::Success))
            .unwrap();
        store
            .upsert_status(&status_row("ancient", now - Duration::days(3), SyncStatus::Success))
            .unwrap();

        let high = store
            .expiring_between(now, now + Duration::hours(2), 10)
            .unwrap();
        assert_eq!(high, vec!["soon".to_string()]);

        let medium = store
            .expired_between(now - Duration::hours(24), now, 10)
            .unwrap();
        assert_eq!(medium, vec!["expired".to_string()]);
    }

    #[test]
    fn stale_active_requires_recent_access() {
        let store = DuckStore::open().unwrap();
        let now = Utc::now();
        store
            .upsert_movements("active", &[movement("1", "Despacho", 1)], now - Duration::days(2))
            .unwrap();
        store
            .upsert_movements("unseen", &[movement("1", "Despacho", 1)], now - Duration::days(2))
            .unwrap();
        store.touch_access(&config("active"), now).unwrap();

        let low = store
            .stale_active(
                now - Duration::days(7),
                now - Duration::hours(6),
                now - Duration::days(7),
                10,
            )
            .unwrap();
        assert_eq!(low, vec!["active".to_string()]);
    }

    #[test]
    fn touch_access_counts_and_logs() {
        let store = DuckStore::open().unwrap();
        let now = Utc::now();
        assert_eq!(store.touch_access(&config("0001"), now).unwrap(), 1);
        assert_eq!(store.touch_access(&config("0001"), now).unwrap(), 2);
        assert_eq!(
            store
                .access_count_since("0001", now - Duration::days(7))
                .unwrap(),
            2
        );
        let cfg = store.optimization_config("0001").unwrap().unwrap();
        assert_eq!(cfg.access_count, 2);
        assert_eq!(cfg.last_accessed_at.map(|t| t.timestamp()), Some(now.timestamp()));
    }

    #[test]
    fn write_policy_preserves_access_count() {
        let store = DuckStore::open().unwrap();
        store.touch_access(&config("0001"), Utc::now()).unwrap();

        let mut cfg = config("0001");
        cfg.detected_phase = Phase::Appeal;
        cfg.ttl = TtlPlan::from_fast(7200);
        store.write_policy(&cfg).unwrap();

        let read = store.optimization_config("0001").unwrap().unwrap();
        assert_eq!(read.detected_phase, Phase::Appeal);
        assert_eq!(read.ttl.fast_secs, 7200);
        assert_eq!(read.access_count, 1);
    }

    #[test]
    fn prune_access_log_removes_old_rows() {
        let store = DuckStore::open().unwrap();
        let now = Utc::now();
        store.touch_access(&config("0001"), now - Duration::days(40)).unwrap();
        store.touch_access(&config("0001"), now).unwrap();
        assert_eq!(store.prune_access_log(now - Duration::days(30)).unwrap(), 1);
        assert_eq!(store.count_table("process_access_log").unwrap(), 1);
    }

    #[test]
    fn top_accessed_orders_by_count() {
        let store = DuckStore::open().unwrap();
        let now = Utc::now();
        store.touch_access(&config("a"), now).unwrap();
        store.touch_access(&config("b"), now).unwrap();
        store.touch_access(&config("b"), now).unwrap();
        let top = store.top_accessed(now - Duration::days(7), 10).unwrap();
        assert_eq!(top, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn metrics_accumulate_per_day() {
        let store = DuckStore::open().unwrap();
        let today = Utc::now().date_naive();
        store
            .increment_metrics(today, &[(Metric::TotalRequests, 1), (Metric::FastHits, 1)])
            .unwrap();
        store
            .increment_metrics(today, &[(Metric::TotalRequests, 1), (Metric::ProviderCalls, 1)])
            .unwrap();
        store.save_report(today, "{\"ok\":true}").unwrap();

        let rows = store.metrics_since(today).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].total_requests, 2);
        assert_eq!(rows[0].fast_hits, 1);
        assert_eq!(rows[0].provider_calls, 1);
        assert_eq!(rows[0].optimization_report.as_deref(), Some("{\"ok\":true}"));
    }

    #[test]
    fn history_batches_have_expected_columns() {
        let store = DuckStore::open().unwrap();
        store
            .upsert_movements(
                "0001",
                &[movement("1", "Distribuído", 5), movement("2", "Despacho", 1)],
                Utc::now(),
            )
            .unwrap();
        let batches = store.movement_history_batches().unwrap();
        let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
        assert_eq!(rows, 2);
        let schema = batches[0].schema();
        assert_eq!(schema.field(0).name(), "cnj");
        assert_eq!(schema.field(3).name(), "movement_date");
    }

    #[test]
    fn history_stats_counts_intervals() {
        let store = DuckStore::open().unwrap();
        store
            .upsert_movements(
                "a",
                &[movement("1", "Distribuído", 5), movement("2", "Despacho", 1)],
                Utc::now(),
            )
            .unwrap();
        store
            .upsert_movements("b", &[movement("1", "Distribuído", 5)], Utc::now())
            .unwrap();
        let stats = store.history_stats().unwrap();
        assert_eq!(stats.total_movements, 3);
        assert_eq!(stats.processes, 2);
        assert_eq!(stats.processes_with_intervals, 1);
    }

    #[tokio::test]
    async fn blocking_runs_off_the_async_thread() {
        let store = Arc::new(DuckStore::open().unwrap());
        let count = store
            .blocking(|db| db.count_table("process_movements"))
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    // ── Persistent storage tests ──

    #[test]
    fn open_persistent_creates_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let db_path = tmp.path().join("test.duckdb");
        assert!(!db_path.exists());

        let store = DuckStore::open_persistent(&db_path).unwrap();
        assert!(db_path.exists());
        assert!(store.migration_status().unwrap().up_to_date);
    }

    #[test]
    fn persistent_reopen_keeps_rows() {
        let tmp = tempfile::TempDir::new().unwrap();
        let db_path = tmp.path().join("test.duckdb");

        let store = DuckStore::open_persistent(&db_path).unwrap();
        store
            .upsert_movements("0001", &[movement("1", "Despacho", 1)], Utc::now())
            .unwrap();
        drop(store);

        let store = DuckStore::open_persistent(&db_path).unwrap();
        assert_eq!(store.movement_count("0001").unwrap(), 1);
        assert_eq!(store.schema_version().unwrap(), Some(MIGRATIONS.len() as i64));
    }
}

//! Durable-tier table definitions.
//!
//! All timestamps are stored as `BIGINT` Unix seconds (UTC).

/// Bumped whenever [`MIGRATIONS`] gains an entry.
pub const SCHEMA_VERSION: i64 = 1;

pub const TABLES: &[&str] = &[
    "process_movements",
    "process_status_cache",
    "process_optimization_config",
    "process_access_log",
    "ml_models_cache",
    "api_economy_metrics",
];

/// Ordered, idempotent migrations. Index + 1 is the schema version.
pub const MIGRATIONS: &[&str] = &[r#"
CREATE TABLE IF NOT EXISTS process_movements (
    id              VARCHAR NOT NULL,
    cnj             VARCHAR NOT NULL,
    movement_type   VARCHAR NOT NULL,
    content         VARCHAR NOT NULL,
    movement_date   BIGINT  NOT NULL,
    tribunal        VARCHAR,
    grade           VARCHAR,
    icon            VARCHAR,
    color           VARCHAR,
    fetched_at      BIGINT  NOT NULL,
    UNIQUE (cnj, content, movement_date)
);

CREATE TABLE IF NOT EXISTS process_status_cache (
    cnj                    VARCHAR PRIMARY KEY,
    current_phase          VARCHAR NOT NULL,
    description            VARCHAR NOT NULL,
    progress_percentage    INTEGER NOT NULL,
    outcome                VARCHAR NOT NULL,
    total_movements        INTEGER NOT NULL,
    last_movement_date     BIGINT,
    tribunal_name          VARCHAR,
    tribunal_grade         VARCHAR,
    last_provider_sync_at  BIGINT,
    cache_valid_until      BIGINT  NOT NULL,
    sync_status            VARCHAR NOT NULL,
    sync_error             VARCHAR,
    updated_at             BIGINT  NOT NULL
);

CREATE TABLE IF NOT EXISTS process_optimization_config (
    cnj                    VARCHAR PRIMARY KEY,
    detected_phase         VARCHAR NOT NULL,
    process_area           VARCHAR NOT NULL,
    access_pattern         VARCHAR NOT NULL,
    access_count           BIGINT  NOT NULL DEFAULT 0,
    last_accessed_at       BIGINT,
    redis_ttl_seconds      BIGINT  NOT NULL,
    db_ttl_seconds         BIGINT  NOT NULL,
    sync_interval_seconds  BIGINT  NOT NULL,
    last_sync_status       VARCHAR,
    last_sync_error        VARCHAR
);

CREATE TABLE IF NOT EXISTS process_access_log (
    cnj          VARCHAR NOT NULL,
    accessed_at  BIGINT  NOT NULL
);

CREATE TABLE IF NOT EXISTS ml_models_cache (
    model_name  VARCHAR PRIMARY KEY,
    model_blob  BLOB    NOT NULL,
    trained_at  BIGINT  NOT NULL,
    metrics     VARCHAR
);

CREATE TABLE IF NOT EXISTS api_economy_metrics (
    metric_date          VARCHAR PRIMARY KEY,
    total_requests       BIGINT NOT NULL DEFAULT 0,
    fast_hits            BIGINT NOT NULL DEFAULT 0,
    durable_hits         BIGINT NOT NULL DEFAULT 0,
    provider_calls       BIGINT NOT NULL DEFAULT 0,
    stale_served         BIGINT NOT NULL DEFAULT 0,
    misses               BIGINT NOT NULL DEFAULT 0,
    sync_successes       BIGINT NOT NULL DEFAULT 0,
    sync_failures        BIGINT NOT NULL DEFAULT 0,
    proactive_refreshes  BIGINT NOT NULL DEFAULT 0,
    optimization_report  VARCHAR
);
"#];

pub const SCHEMA_VERSION_DDL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version     BIGINT PRIMARY KEY,
    applied_at  BIGINT NOT NULL
);";

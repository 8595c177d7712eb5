//! Aggregated process status and per-process cache policy records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cnj::ProcessArea;
use crate::ttl::TtlPlan;

/// Coarse lifecycle stage of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Initial,
    Instructional,
    Decision,
    Appeal,
    Final,
    Archived,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Self::Initial,
        Self::Instructional,
        Self::Decision,
        Self::Appeal,
        Self::Final,
        Self::Archived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Instructional => "instructional",
            Self::Decision => "decision",
            Self::Appeal => "appeal",
            Self::Final => "final",
            Self::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == s)
    }

    /// Progress through the lifecycle, 0–100.
    pub fn progress_percentage(&self) -> u8 {
        match self {
            Self::Initial => 10,
            Self::Instructional => 35,
            Self::Decision => 60,
            Self::Appeal => 75,
            Self::Final => 90,
            Self::Archived => 100,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Initial => "Process filed, awaiting initial procedural steps",
            Self::Instructional => "Evidence and hearings in progress",
            Self::Decision => "Decision issued or awaiting judgment",
            Self::Appeal => "Under appeal at a higher instance",
            Self::Final => "Final judgment, enforcement or compliance stage",
            Self::Archived => "Process archived",
        }
    }

    /// Relative procedural complexity, 0.0–1.0. Used as a model feature.
    pub fn complexity(&self) -> f32 {
        match self {
            Self::Initial => 0.2,
            Self::Instructional => 0.5,
            Self::Decision => 0.7,
            Self::Appeal => 0.9,
            Self::Final => 0.4,
            Self::Archived => 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Pending,
    Ongoing,
    Won,
    Lost,
    Settled,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ongoing => "ongoing",
            Self::Won => "won",
            Self::Lost => "lost",
            Self::Settled => "settled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            Self::Pending,
            Self::Ongoing,
            Self::Won,
            Self::Lost,
            Self::Settled,
        ]
        .into_iter()
        .find(|o| o.as_str() == s)
    }
}

/// Outcome of the most recent synchronization attempt for a durable row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Success,
    Failed,
    Invalidated,
    Cached,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Invalidated => "invalidated",
            Self::Cached => "cached",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [Self::Success, Self::Failed, Self::Invalidated, Self::Cached]
            .into_iter()
            .find(|s2| s2.as_str() == s)
    }
}

/// Which tier answered a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSource {
    Fast,
    Durable,
    Provider,
    DurableStale,
}

impl CacheSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Durable => "durable",
            Self::Provider => "provider",
            Self::DurableStale => "durable_stale",
        }
    }
}

/// Historical access-frequency bucket over the access window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessPattern {
    Daily,
    Weekly,
    Monthly,
    Rarely,
}

impl AccessPattern {
    pub const ALL: [AccessPattern; 4] = [Self::Daily, Self::Weekly, Self::Monthly, Self::Rarely];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Rarely => "rarely",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == s)
    }

    /// Position in [`ALL`](Self::ALL), for one-hot encoding.
    pub fn index(&self) -> usize {
        match self {
            Self::Daily => 0,
            Self::Weekly => 1,
            Self::Monthly => 2,
            Self::Rarely => 3,
        }
    }
}

/// Aggregated view of a process (durable row `process_status_cache`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub cnj: String,
    pub current_phase: Phase,
    pub description: String,
    pub progress_percentage: u8,
    pub outcome: Outcome,
    pub total_movements: u32,
    pub last_movement_date: Option<DateTime<Utc>>,
    pub tribunal_name: Option<String>,
    pub tribunal_grade: Option<String>,
    pub last_provider_sync_at: Option<DateTime<Utc>>,
    pub cache_valid_until: DateTime<Utc>,
    pub sync_status: SyncStatus,
    pub sync_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Per-process cache policy (durable row `process_optimization_config`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationConfig {
    pub cnj: String,
    pub detected_phase: Phase,
    pub process_area: ProcessArea,
    pub access_pattern: AccessPattern,
    pub access_count: u64,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub ttl: TtlPlan,
    pub last_sync_status: Option<SyncStatus>,
    pub last_sync_error: Option<String>,
}

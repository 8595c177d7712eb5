//! Persisted model artifacts.

use chrono::{DateTime, Utc};
use duckdb::params;

use crate::duck::{from_ts, to_ts};
use crate::{DuckStore, StoreError};

/// A serialized model as stored in `ml_models_cache`.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredArtifact {
    pub name: String,
    pub bytes: Vec<u8>,
    pub trained_at: DateTime<Utc>,
    pub metrics: Option<String>,
}

/// Storage for trained model artifacts.
///
/// `save_all` is all-or-nothing: a failed save leaves the previously stored
/// set intact.
pub trait ArtifactStore: Send + Sync {
    fn save_all(&self, artifacts: &[StoredArtifact]) -> Result<(), StoreError>;
    fn load(&self, name: &str) -> Result<Option<StoredArtifact>, StoreError>;
}

impl ArtifactStore for DuckStore {
    fn save_all(&self, artifacts: &[StoredArtifact]) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO ml_models_cache
                        (model_name, model_blob, trained_at, metrics)
                     VALUES (?, ?, ?, ?)",
                )?;
                for a in artifacts {
                    stmt.execute(params![a.name, a.bytes, to_ts(a.trained_at), a.metrics])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    fn load(&self, name: &str) -> Result<Option<StoredArtifact>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT model_name, model_blob, trained_at, metrics
                 FROM ml_models_cache WHERE model_name = ?",
            )?;
            let mut rows = stmt.query_map(params![name], |row| {
                Ok(StoredArtifact {
                    name: row.get(0)?,
                    bytes: row.get(1)?,
                    trained_at: from_ts(row.get(2)?),
                    metrics: row.get(3)?,
                })
            })?;
            Ok(rows.next().transpose()?)
        })
    }
}

//! Storage layer: DuckDB (durable tier, model artifacts), Moka (fast tier).

mod error;
pub use error::StoreError;

pub mod schema;

mod duck;
pub use duck::{DailyMetrics, DuckStore, HistoryStats, Metric, MigrationStatus};

mod fast;
pub use fast::{FastCache, MokaCache};

mod artifact;
pub use artifact::{ArtifactStore, StoredArtifact};

//! Training samples extracted from durable-tier movement history.
//!
//! Input is the Arrow output of `DuckStore::movement_history_batches()`:
//! `cnj`, `movement_type`, `content` (Utf8) and `movement_date` (Int64 Unix
//! seconds), ordered by process then date.

use std::collections::BTreeMap;

use arrow::array::{Array, ArrayRef, Int64Array, LargeStringArray, StringArray};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};

use docket_core::MovementType;
use docket_core::config::{MAX_INTERVAL_DAYS, MIN_INTERVAL_DAYS};

use crate::features::MovementContext;

const SECS_PER_DAY: f64 = 86_400.0;

/// One `(movement history → next movement)` observation.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingSample {
    pub cnj: String,
    pub context: MovementContext,
    pub next_type: MovementType,
    pub interval_days: f64,
}

#[derive(Debug, Clone)]
struct HistoryRow {
    movement_type: MovementType,
    content: String,
    date: i64,
}

/// Group history rows per process, oldest first.
fn group_history(batches: &[RecordBatch]) -> anyhow::Result<BTreeMap<String, Vec<HistoryRow>>> {
    let mut by_cnj: BTreeMap<String, Vec<HistoryRow>> = BTreeMap::new();

    for batch in batches {
        let cnj_col = column(batch, "cnj")?;
        let type_col = column(batch, "movement_type")?;
        let content_col = column(batch, "content")?;
        let date_col = column(batch, "movement_date")?
            .as_any()
            .downcast_ref::<Int64Array>()
            .ok_or_else(|| anyhow::anyhow!("movement_date column is not Int64"))?;

        for row in 0..batch.num_rows() {
            let (Some(cnj), Some(content)) = (
                get_string(cnj_col.as_ref(), row),
                get_string(content_col.as_ref(), row),
            ) else {
                continue;
            };
            if date_col.is_null(row) {
                continue;
            }
            let movement_type = get_string(type_col.as_ref(), row)
                .and_then(|t| MovementType::parse(&t))
                .unwrap_or_else(|| MovementType::classify(&content));
            by_cnj.entry(cnj).or_default().push(HistoryRow {
                movement_type,
                content,
                date: date_col.value(row),
            });
        }
    }

    for rows in by_cnj.values_mut() {
        rows.sort_by_key(|r| r.date);
    }
    Ok(by_cnj)
}

/// Every `(history prefix → next movement)` pair with an interval inside
/// `[MIN_INTERVAL_DAYS, MAX_INTERVAL_DAYS]`.
pub fn extract_samples(batches: &[RecordBatch]) -> anyhow::Result<Vec<TimingSample>> {
    let mut samples = Vec::new();
    for (cnj, rows) in group_history(batches)? {
        for i in 1..rows.len() {
            let interval_days = (rows[i].date - rows[i - 1].date) as f64 / SECS_PER_DAY;
            if !(MIN_INTERVAL_DAYS..=MAX_INTERVAL_DAYS).contains(&interval_days) {
                continue;
            }
            let newest_first: Vec<&str> = rows[..i].iter().rev().map(|r| r.content.as_str()).collect();
            let last_date = DateTime::<Utc>::from_timestamp(rows[i - 1].date, 0).unwrap_or_default();
            samples.push(TimingSample {
                cnj: cnj.clone(),
                context: MovementContext::new(&newest_first, last_date, i),
                next_type: rows[i].movement_type,
                interval_days,
            });
        }
    }
    Ok(samples)
}

/// Median in-range interval between movements, in days, per process.
pub fn median_intervals(samples: &[TimingSample]) -> BTreeMap<String, f64> {
    let mut by_cnj: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for s in samples {
        by_cnj.entry(s.cnj.clone()).or_default().push(s.interval_days);
    }
    by_cnj
        .into_iter()
        .map(|(cnj, mut v)| {
            v.sort_by(|a, b| a.total_cmp(b));
            let mid = v.len() / 2;
            let median = if v.len() % 2 == 0 {
                (v[mid - 1] + v[mid]) / 2.0
            } else {
                v[mid]
            };
            (cnj, median)
        })
        .collect()
}

fn column<'a>(batch: &'a RecordBatch, name: &str) -> anyhow::Result<&'a ArrayRef> {
    batch
        .column_by_name(name)
        .ok_or_else(|| anyhow::anyhow!("missing '{name}' column"))
}

fn get_string(col: &dyn Array, row: usize) -> Option<String> {
    if col.is_null(row) {
        return None;
    }
    col.as_any()
        .downcast_ref::<StringArray>()
        .map(|arr| arr.value(row).to_string())
        .or_else(|| {
            col.as_any()
                .downcast_ref::<LargeStringArray>()
                .map(|arr| arr.value(row).to_string())
        })
}

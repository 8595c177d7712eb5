//! Centroid-based prediction of the next movement type.
//!
//! Each training sample is a movement-context feature vector labelled with
//! the type of the movement that followed it. Centroids are the normalized
//! mean per label; a new context is assigned to the centroid with highest
//! cosine similarity, which doubles as the confidence.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use docket_core::MovementType;

use crate::features::normalize;

/// Nearest-centroid classifier over movement-context features.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MovementClassifier {
    centroids: Vec<(MovementType, Vec<f32>)>,
    dim: usize,
}

impl MovementClassifier {
    /// Build centroids from `(features, next movement type)` samples.
    pub fn build(samples: &[(Vec<f32>, MovementType)]) -> Self {
        let dim = samples.first().map(|(f, _)| f.len()).unwrap_or(0);
        let mut accum: BTreeMap<MovementType, (Vec<f32>, usize)> = BTreeMap::new();

        for (features, label) in samples {
            let mut unit = features.clone();
            normalize(&mut unit);
            let entry = accum.entry(*label).or_insert_with(|| (vec![0.0f32; dim], 0));
            for (acc, &val) in entry.0.iter_mut().zip(&unit) {
                *acc += val;
            }
            entry.1 += 1;
        }

        let centroids = accum
            .into_iter()
            .filter(|(_, (_, count))| *count > 0)
            .map(|(label, (mut sum, count))| {
                for v in &mut sum {
                    *v /= count as f32;
                }
                normalize(&mut sum);
                (label, sum)
            })
            .collect();

        Self { centroids, dim }
    }

    /// Best-matching movement type and its confidence in `[0, 1]`.
    ///
    /// `None` when the classifier has no centroids.
    pub fn predict(&self, features: &[f32]) -> Option<(MovementType, f32)> {
        let mut unit = features.to_vec();
        normalize(&mut unit);

        let mut best: Option<(MovementType, f32)> = None;
        for (label, centroid) in &self.centroids {
            let sim = cosine_sim(&unit, centroid);
            if best.is_none_or(|(_, b)| sim > b) {
                best = Some((*label, sim));
            }
        }
        best.map(|(label, sim)| (label, sim.clamp(0.0, 1.0)))
    }

    /// Fraction of samples whose label matches the prediction.
    pub fn accuracy(&self, samples: &[(Vec<f32>, MovementType)]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let hits = samples
            .iter()
            .filter(|(f, label)| self.predict(f).map(|(p, _)| p) == Some(*label))
            .count();
        hits as f32 / samples.len() as f32
    }

    /// Number of label centroids.
    pub fn label_count(&self) -> usize {
        self.centroids.len()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }
}

fn cosine_sim(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

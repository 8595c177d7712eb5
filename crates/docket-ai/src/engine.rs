//! Predictive policy engine: next-movement prediction and TTL recommendation.
//!
//! The engine owns one [`ModelSet`] at a time behind an `RwLock<Arc<_>>`.
//! Readers clone the `Arc` and never see a half-built set; training builds a
//! complete new set, persists it, and only then swaps it in.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use docket_core::config::{MAX_INTERVAL_DAYS, MIN_INTERVAL_DAYS};
use docket_core::ttl::{MAX_TTL_SECS, MIN_TTL_SECS};
use docket_core::{
    AccessPattern, Movement, MovementType, Phase, PolicyConfig, ProcessArea, TtlPlan, default_plan,
};
use docket_store::{ArtifactStore, DuckStore, StoredArtifact};

use crate::classifier::MovementClassifier;
use crate::features::{MovementContext, TextVectorizer, TtlFeatures, movement_features};
use crate::regressor::LinearRegressor;
use crate::training::{TimingSample, extract_samples, median_intervals};

pub const MOVEMENT_CLASSIFIER: &str = "movement_classifier";
pub const TIMING_PREDICTOR: &str = "timing_predictor";
pub const TTL_OPTIMIZER: &str = "ttl_optimizer";
pub const TEXT_VECTORIZER: &str = "text_vectorizer";

/// The TTL optimizer is only fitted with at least this many processes.
pub const MIN_TTL_SAMPLES: usize = 10;
/// Every n-th process is held out for evaluation.
const HOLDOUT_EVERY: usize = 5;
const ACCESS_WINDOW_DAYS: f64 = 7.0;
const SECS_PER_DAY: f64 = 86_400.0;

/// A complete, consistent set of fitted models.
#[derive(Debug, Clone)]
pub struct ModelSet {
    pub vectorizer: TextVectorizer,
    pub classifier: MovementClassifier,
    pub timing: LinearRegressor,
    /// `None` when too few processes had access data to fit it.
    pub ttl: Option<LinearRegressor>,
    pub trained_at: DateTime<Utc>,
}

/// A confident next-movement prediction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub next_type: MovementType,
    pub confidence: f32,
    pub days_to_next: f64,
    pub expected_date: DateTime<Utc>,
}

/// Where a TTL plan came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicySource {
    Model,
    Rules,
}

/// Inputs for a TTL recommendation.
#[derive(Debug, Clone, Copy)]
pub struct TtlRequest<'a> {
    pub phase: Phase,
    pub area: ProcessArea,
    pub pattern: AccessPattern,
    pub access_count: u64,
    /// Only confident predictions; `None` forces the rule table.
    pub prediction: Option<&'a Prediction>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub samples: usize,
    pub train_samples: usize,
    pub holdout_samples: usize,
    pub vocabulary: usize,
    pub classifier_accuracy: f32,
    pub timing_mae_days: f64,
    pub ttl_samples: usize,
    pub ttl_trained: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrainingStatus {
    Trained,
    /// Models are younger than the retrain interval.
    Fresh { trained_at: DateTime<Utc> },
    /// Too little history; existing models were left in place.
    InsufficientData { available: usize, required: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingReport {
    #[serde(flatten)]
    pub status: TrainingStatus,
    pub metrics: Option<TrainingMetrics>,
}

impl TrainingReport {
    pub fn trained(&self) -> bool {
        self.status == TrainingStatus::Trained
    }
}

pub struct PolicyEngine {
    config: PolicyConfig,
    models: RwLock<Option<Arc<ModelSet>>>,
}

impl PolicyEngine {
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            config,
            models: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Current model set, if any.
    pub fn models(&self) -> Option<Arc<ModelSet>> {
        self.models.read().ok().and_then(|guard| (*guard).clone())
    }

    fn install(&self, set: ModelSet) {
        match self.models.write() {
            Ok(mut guard) => *guard = Some(Arc::new(set)),
            Err(poisoned) => *poisoned.into_inner() = Some(Arc::new(set)),
        }
    }

    pub fn is_trained(&self) -> bool {
        self.models().is_some()
    }

    pub fn trained_at(&self) -> Option<DateTime<Utc>> {
        self.models().map(|m| m.trained_at)
    }

    // ── Artifacts ──

    /// Load persisted models. Returns `false` if any artifact is missing.
    pub fn load(&self, store: &dyn ArtifactStore) -> anyhow::Result<bool> {
        let names = [TEXT_VECTORIZER, MOVEMENT_CLASSIFIER, TIMING_PREDICTOR, TTL_OPTIMIZER];
        let mut loaded = Vec::with_capacity(names.len());
        for name in names {
            match store.load(name)? {
                Some(a) => loaded.push(a),
                None => {
                    info!(model = name, "no persisted model; using rule-based policy");
                    return Ok(false);
                }
            }
        }

        let set = ModelSet {
            vectorizer: serde_json::from_slice(&loaded[0].bytes)?,
            classifier: serde_json::from_slice(&loaded[1].bytes)?,
            timing: serde_json::from_slice(&loaded[2].bytes)?,
            ttl: serde_json::from_slice(&loaded[3].bytes)?,
            trained_at: loaded[0].trained_at,
        };
        info!(trained_at = %set.trained_at, "loaded policy models");
        self.install(set);
        Ok(true)
    }

    fn artifacts(set: &ModelSet, metrics: &TrainingMetrics) -> anyhow::Result<Vec<StoredArtifact>> {
        let metrics = Some(serde_json::to_string(metrics)?);
        let blobs = [
            (TEXT_VECTORIZER, serde_json::to_vec(&set.vectorizer)?),
            (MOVEMENT_CLASSIFIER, serde_json::to_vec(&set.classifier)?),
            (TIMING_PREDICTOR, serde_json::to_vec(&set.timing)?),
            (TTL_OPTIMIZER, serde_json::to_vec(&set.ttl)?),
        ];
        Ok(blobs
            .into_iter()
            .map(|(name, bytes)| StoredArtifact {
                name: name.to_string(),
                bytes,
                trained_at: set.trained_at,
                metrics: metrics.clone(),
            })
            .collect())
    }

    // ── Inference ──

    /// Raw next-movement classification, without confidence gating.
    pub fn classify_next(&self, movements: &[Movement], total_movements: usize) -> Option<(MovementType, f32)> {
        let models = self.models()?;
        let ctx = context_of(movements, total_movements)?;
        models
            .classifier
            .predict(&movement_features(&models.vectorizer, &ctx))
    }

    /// Predict the next movement and when it will happen.
    ///
    /// `movements` may be the newest slice of the history; `total_movements`
    /// is the full count. `None` when no model is loaded, there is no
    /// history, or confidence is below the configured threshold.
    pub fn predict_next(&self, movements: &[Movement], total_movements: usize) -> Option<Prediction> {
        let models = self.models()?;
        let ctx = context_of(movements, total_movements)?;
        let features = movement_features(&models.vectorizer, &ctx);
        let (next_type, confidence) = models.classifier.predict(&features)?;
        if confidence < self.config.confidence_threshold {
            return None;
        }

        let row: Vec<f64> = features.iter().map(|&v| v as f64).collect();
        let days_to_next = models
            .timing
            .predict(&row)
            .exp_m1()
            .clamp(MIN_INTERVAL_DAYS, MAX_INTERVAL_DAYS);
        let expected_date = ctx.last_date + Duration::seconds((days_to_next * SECS_PER_DAY) as i64);

        Some(Prediction {
            next_type,
            confidence,
            days_to_next,
            expected_date,
        })
    }

    /// Recommend freshness windows for one process.
    ///
    /// Uses the TTL optimizer when it is fitted and a confident prediction is
    /// available; otherwise the static rule table.
    pub fn recommend_ttl(&self, req: &TtlRequest<'_>) -> (TtlPlan, PolicySource) {
        let fitted = self.models().and_then(|m| m.ttl.clone());
        match (fitted, req.prediction) {
            (Some(model), Some(prediction)) => {
                let features = TtlFeatures {
                    access_count: req.access_count,
                    predicted_days: prediction.days_to_next,
                    pattern: req.pattern,
                    phase: req.phase,
                    area: req.area,
                };
                let secs = model.predict(&features.to_vec()).exp();
                if !secs.is_finite() {
                    return (default_plan(req.phase, req.area, req.pattern), PolicySource::Rules);
                }
                let fast = secs.clamp(MIN_TTL_SECS as f64, MAX_TTL_SECS as f64) as u64;
                (TtlPlan::from_fast(fast), PolicySource::Model)
            }
            _ => (default_plan(req.phase, req.area, req.pattern), PolicySource::Rules),
        }
    }

    // ── Training ──

    pub fn train(&self, store: &DuckStore, force: bool) -> anyhow::Result<TrainingReport> {
        self.train_at(store, force, Utc::now())
    }

    /// Retrain from durable-tier history.
    ///
    /// Skips when models are fresh (unless `force`) or history is too thin.
    /// On any failure the previous models stay installed.
    pub fn train_at(
        &self,
        store: &DuckStore,
        force: bool,
        now: DateTime<Utc>,
    ) -> anyhow::Result<TrainingReport> {
        if !force
            && let Some(trained_at) = self.trained_at()
            && now - trained_at < Duration::days(self.config.retrain_interval_days)
        {
            info!(%trained_at, "policy models are fresh; skipping training");
            return Ok(TrainingReport {
                status: TrainingStatus::Fresh { trained_at },
                metrics: None,
            });
        }

        let samples = extract_samples(&store.movement_history_batches()?)?;
        let required = self.config.min_training_samples;
        if samples.len() < required {
            info!(available = samples.len(), required, "not enough history to train");
            return Ok(TrainingReport {
                status: TrainingStatus::InsufficientData {
                    available: samples.len(),
                    required,
                },
                metrics: None,
            });
        }

        let (set, metrics) = self.fit(store, &samples, now)?;
        let artifacts = Self::artifacts(&set, &metrics)?;
        if let Err(e) = store.save_all(&artifacts) {
            warn!(error = %e, "failed to persist models; keeping previous set");
            return Err(e.into());
        }
        self.install(set);

        info!(
            samples = metrics.samples,
            accuracy = metrics.classifier_accuracy,
            mae_days = metrics.timing_mae_days,
            ttl_trained = metrics.ttl_trained,
            "trained policy models"
        );
        Ok(TrainingReport {
            status: TrainingStatus::Trained,
            metrics: Some(metrics),
        })
    }

    fn fit(
        &self,
        store: &DuckStore,
        samples: &[TimingSample],
        now: DateTime<Utc>,
    ) -> anyhow::Result<(ModelSet, TrainingMetrics)> {
        let mut processes: Vec<&str> = samples.iter().map(|s| s.cnj.as_str()).collect();
        processes.dedup();
        let held_out: HashSet<&str> = processes
            .into_iter()
            .enumerate()
            .filter(|(i, _)| i % HOLDOUT_EVERY == HOLDOUT_EVERY - 1)
            .map(|(_, cnj)| cnj)
            .collect();
        let (holdout, train): (Vec<&TimingSample>, Vec<&TimingSample>) = samples
            .iter()
            .partition(|s| held_out.contains(s.cnj.as_str()));

        let documents: Vec<String> = train.iter().map(|s| s.context.document()).collect();
        let vectorizer = TextVectorizer::fit(&documents);

        let encode = |set: &[&TimingSample]| -> (Vec<(Vec<f32>, MovementType)>, Vec<Vec<f64>>, Vec<f64>) {
            let labelled: Vec<(Vec<f32>, MovementType)> = set
                .iter()
                .map(|s| (movement_features(&vectorizer, &s.context), s.next_type))
                .collect();
            let rows = labelled
                .iter()
                .map(|(f, _)| f.iter().map(|&v| v as f64).collect())
                .collect();
            let targets = set.iter().map(|s| s.interval_days.ln_1p()).collect();
            (labelled, rows, targets)
        };
        let (train_labelled, train_rows, train_targets) = encode(&train);
        let (holdout_labelled, holdout_rows, holdout_targets) = encode(&holdout);

        let classifier = MovementClassifier::build(&train_labelled);
        let timing = LinearRegressor::fit(&train_rows, &train_targets)
            .ok_or_else(|| anyhow::anyhow!("timing regressor could not be fitted"))?;

        let (ttl, ttl_samples) = fit_ttl(store, samples)?;

        let metrics = TrainingMetrics {
            samples: samples.len(),
            train_samples: train.len(),
            holdout_samples: holdout.len(),
            vocabulary: vectorizer.dim(),
            classifier_accuracy: classifier.accuracy(&holdout_labelled),
            timing_mae_days: timing.mean_absolute_error(&holdout_rows, &holdout_targets, f64::exp_m1),
            ttl_samples,
            ttl_trained: ttl.is_some(),
        };

        Ok((
            ModelSet {
                vectorizer,
                classifier,
                timing,
                ttl,
                trained_at: now,
            },
            metrics,
        ))
    }
}

/// Fit the TTL optimizer against per-process access behaviour.
///
/// Target: the median movement interval divided by daily access rate, i.e.
/// roughly how long an entry can be served before the next change matters
/// to a reader, as `ln(seconds)`.
fn fit_ttl(
    store: &DuckStore,
    samples: &[TimingSample],
) -> anyhow::Result<(Option<LinearRegressor>, usize)> {
    let medians = median_intervals(samples);
    let mut rows = Vec::new();
    let mut targets = Vec::new();

    for cfg in store.optimization_configs()? {
        let Some(&median_days) = medians.get(&cfg.cnj) else {
            continue;
        };
        let per_day = (cfg.access_count as f64 / ACCESS_WINDOW_DAYS).max(1.0);
        let secs = (median_days * SECS_PER_DAY / per_day).clamp(MIN_TTL_SECS as f64, MAX_TTL_SECS as f64);
        let features = TtlFeatures {
            access_count: cfg.access_count,
            predicted_days: median_days,
            pattern: cfg.access_pattern,
            phase: cfg.detected_phase,
            area: cfg.process_area,
        };
        rows.push(features.to_vec());
        targets.push(secs.ln());
    }

    if rows.len() < MIN_TTL_SAMPLES {
        return Ok((None, rows.len()));
    }
    Ok((LinearRegressor::fit(&rows, &targets), rows.len()))
}

/// Newest-first context of a movement list. `None` if empty.
///
/// `total_movements` is the length of the whole history; it is never taken
/// as less than `movements.len()`.
pub fn context_of(movements: &[Movement], total_movements: usize) -> Option<MovementContext> {
    let mut sorted: Vec<&Movement> = movements.iter().collect();
    sorted.sort_by(|a, b| b.date.cmp(&a.date));
    let last_date = sorted.first()?.date;
    let texts: Vec<&str> = sorted.iter().map(|m| m.raw_text.as_str()).collect();
    Some(MovementContext::new(&texts, last_date, total_movements.max(movements.len())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use docket_core::OptimizationConfig;

    const SEQUENCE: [&str; 6] = [
        "Processo distribuído por sorteio",
        "Citação do réu expedida",
        "Audiência de conciliação designada",
        "Sentença de procedência publicada",
        "Petição de recurso de apelação",
        "Trânsito em julgado certificado",
    ];
    const INTERVAL_DAYS: i64 = 5;

    fn timeline(offset_days: i64) -> Vec<Movement> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap() + Duration::days(offset_days);
        SEQUENCE
            .iter()
            .enumerate()
            .map(|(i, text)| {
                Movement::from_text(i.to_string(), *text, start + Duration::days(INTERVAL_DAYS * i as i64))
            })
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

    /// 25 processes × 5 intervals = 125 samples.
    fn trained_store() -> DuckStore {
        let store = DuckStore::open().unwrap();
        for p in 0..25 {
            let cnj = format!("proc-{p:02}");
            store.upsert_movements(&cnj, &timeline(p), Utc::now()).unwrap();
            store.touch_access(&policy_row(&cnj), Utc::now()).unwrap();
        }
        store
    }

    fn engine() -> PolicyEngine {
        PolicyEngine::new(PolicyConfig::default())
    }

    #[test]
    fn insufficient_history_is_a_status_not_an_error() {
        let store = DuckStore::open().unwrap();
        store.upsert_movements("only", &timeline(0), Utc::now()).unwrap();

        let engine = engine();
        let report = engine.train(&store, false).unwrap();
        assert!(!report.trained());
        assert_eq!(
            report.status,
            TrainingStatus::InsufficientData {
                available: 5,
                required: 100
            }
        );
        assert!(!engine.is_trained());
    }

    #[test]
    fn trains_and_persists_all_artifacts() {
        let store = trained_store();
        let engine = engine();
        let report = engine.train(&store, false).unwrap();

        assert!(report.trained());
        let metrics = report.metrics.unwrap();
        assert_eq!(metrics.samples, 125);
        assert_eq!(metrics.train_samples, 100);
        assert_eq!(metrics.holdout_samples, 25);
        assert!(metrics.ttl_trained);
        assert!(engine.is_trained());
        for name in [TEXT_VECTORIZER, MOVEMENT_CLASSIFIER, TIMING_PREDICTOR, TTL_OPTIMIZER] {
            assert!(store.load(name).unwrap().is_some(), "{name}");
        }
    }

    #[test]
    fn fresh_models_are_not_retrained() {
        let store = trained_store();
        let engine = engine();
        engine.train(&store, false).unwrap();
        let trained_at = engine.trained_at().unwrap();

        let report = engine.train(&store, false).unwrap();
        assert_eq!(report.status, TrainingStatus::Fresh { trained_at });
        assert!(!report.trained());
    }

    #[test]
    fn stale_models_are_retrained() {
        let store = trained_store();
        let engine = engine();
        let long_ago = Utc::now() - Duration::days(30);
        engine.train_at(&store, false, long_ago).unwrap();

        let report = engine.train(&store, false).unwrap();
        assert!(report.trained());
    }

    #[test]
    fn insufficient_data_keeps_existing_models() {
        let engine = engine();
        engine.train(&trained_store(), false).unwrap();
        let trained_at = engine.trained_at();

        let thin = DuckStore::open().unwrap();
        thin.upsert_movements("only", &timeline(0), Utc::now()).unwrap();
        let report = engine.train(&thin, true).unwrap();

        assert!(matches!(report.status, TrainingStatus::InsufficientData { .. }));
        assert_eq!(engine.trained_at(), trained_at);
    }

    #[test]
    fn predicts_next_movement_type() {
        let engine = engine();
        engine.train(&trained_store(), false).unwrap();

        // After distribution, citation and hearing comes the judgment.
        let history = &timeline(0)[..3];
        let (next, _) = engine.classify_next(history, history.len()).unwrap();
        assert_eq!(next, MovementType::Decision);
    }

    #[test]
    fn predicts_interval_when_confident() {
        let engine = PolicyEngine::new(PolicyConfig {
            confidence_threshold: 0.0,
            ..PolicyConfig::default()
        });
        engine.train(&trained_store(), false).unwrap();

        let history = &timeline(0)[..3];
        let prediction = engine.predict_next(history, history.len()).unwrap();
        assert!(
            (prediction.days_to_next - INTERVAL_DAYS as f64).abs() < 1.0,
            "got {}",
            prediction.days_to_next
        );
        assert!(prediction.expected_date > history[2].date);
    }

    #[test]
    fn low_confidence_prediction_is_absent() {
        let engine = PolicyEngine::new(PolicyConfig {
            confidence_threshold: 1.01,
            ..PolicyConfig::default()
        });
        engine.train(&trained_store(), false).unwrap();

        let history = &timeline(0)[..3];
        assert!(engine.classify_next(history, history.len()).is_some());
        assert!(engine.predict_next(history, history.len()).is_none());
    }

    #[test]
    fn context_counts_full_history() {
        let history = timeline(0);
        let newest = &history[3..];
        let ctx = context_of(newest, 40).unwrap();
        assert_eq!(ctx.movement_count, 40);
        assert_eq!(ctx.last_date, history[5].date);
        assert_eq!(ctx.recent_texts[0], SEQUENCE[5]);

        assert_eq!(context_of(newest, 0).unwrap().movement_count, 3);
        assert!(context_of(&[], 10).is_none());
    }

    #[test]
    fn untrained_engine_predicts_nothing() {
        assert!(engine().predict_next(&timeline(0), 6).is_none());
        assert!(engine().predict_next(&[], 0).is_none());
    }

    #[test]
    fn untrained_engine_uses_rule_table() {
        let req = TtlRequest {
            phase: Phase::Decision,
            area: ProcessArea::Labor,
            pattern: AccessPattern::Daily,
            access_count: 40,
            prediction: None,
        };
        let (plan, source) = engine().recommend_ttl(&req);
        assert_eq!(source, PolicySource::Rules);
        assert_eq!(plan, default_plan(Phase::Decision, ProcessArea::Labor, AccessPattern::Daily));
    }

    #[test]
    fn trained_engine_without_prediction_uses_rule_table() {
        let engine = engine();
        engine.train(&trained_store(), false).unwrap();
        let req = TtlRequest {
            phase: Phase::Appeal,
            area: ProcessArea::State,
            pattern: AccessPattern::Weekly,
            access_count: 6,
            prediction: None,
        };
        assert_eq!(engine.recommend_ttl(&req).1, PolicySource::Rules);
    }

    #[test]
    fn model_ttl_is_clamped_and_ordered() {
        let engine = engine();
        engine.train(&trained_store(), false).unwrap();
        let prediction = Prediction {
            next_type: MovementType::Decision,
            confidence: 0.9,
            days_to_next: 5.0,
            expected_date: Utc::now(),
        };
        let req = TtlRequest {
            phase: Phase::Final,
            area: ProcessArea::General,
            pattern: AccessPattern::Rarely,
            access_count: 1,
            prediction: Some(&prediction),
        };
        let (plan, source) = engine.recommend_ttl(&req);
        assert_eq!(source, PolicySource::Model);
        assert!(plan.fast_secs >= MIN_TTL_SECS && plan.fast_secs <= MAX_TTL_SECS);
        assert!(plan.is_ordered());
    }

    #[test]
    fn load_restores_persisted_models() {
        let store = trained_store();
        let trainer = engine();
        trainer.train(&store, false).unwrap();

        let fresh = engine();
        assert!(fresh.load(&store).unwrap());
        let history = &timeline(3)[..3];
        assert_eq!(
            fresh.classify_next(history, history.len()),
            trainer.classify_next(history, history.len())
        );
    }

    #[test]
    fn load_without_artifacts_reports_false() {
        let store = DuckStore::open().unwrap();
        let engine = engine();
        assert!(!engine.load(&store).unwrap());
        assert!(!engine.is_trained());
    }
}

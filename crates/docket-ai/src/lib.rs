//! Predictive policy engine: feature extraction, next-movement classifier,
//! timing and TTL regressors, and the training pipeline over durable history.

pub mod classifier;
pub mod features;
pub mod regressor;
pub mod training;

mod engine;
pub use engine::{
    ModelSet, PolicyEngine, PolicySource, Prediction, TrainingMetrics, TrainingReport,
    TrainingStatus, TtlRequest, context_of,
};
pub use engine::{MOVEMENT_CLASSIFIER, TEXT_VECTORIZER, TIMING_PREDICTOR, TTL_OPTIMIZER};

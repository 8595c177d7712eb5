//! Feature extraction shared by the movement, timing, and TTL models.
//!
//! A movement context is the text of the most recent movements plus a handful
//! of temporal and processual signals. Text goes through a small TF-IDF
//! vectorizer fitted on training contexts; numeric features are appended.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

use docket_core::{AccessPattern, Phase, ProcessArea};

/// Movements whose text forms the context, newest first.
pub const CONTEXT_MOVEMENTS: usize = 3;
pub const MAX_VOCABULARY: usize = 200;
/// Terms must appear in at least this many training documents.
pub const MIN_DOCUMENT_FREQUENCY: usize = 2;
const MIN_TOKEN_CHARS: usize = 3;

const URGENCY_TERMS: &[&str] = &[
    "urgente",
    "urgência",
    "urgencia",
    "liminar",
    "tutela",
    "injunction",
    "urgent",
];

/// Snapshot of a process timeline at prediction time.
#[derive(Debug, Clone, PartialEq)]
pub struct MovementContext {
    /// Texts of the latest movements, newest first, at most [`CONTEXT_MOVEMENTS`].
    pub recent_texts: Vec<String>,
    /// Date of the latest movement.
    pub last_date: DateTime<Utc>,
    /// Movements recorded so far.
    pub movement_count: usize,
}

impl MovementContext {
    /// Build from newest-first texts.
    pub fn new<S: AsRef<str>>(newest_first: &[S], last_date: DateTime<Utc>, movement_count: usize) -> Self {
        Self {
            recent_texts: newest_first
                .iter()
                .take(CONTEXT_MOVEMENTS)
                .map(|s| s.as_ref().to_string())
                .collect(),
            last_date,
            movement_count,
        }
    }

    pub fn document(&self) -> String {
        self.recent_texts.join(" ")
    }

    /// `[hour, weekday, business_hours, log_count, urgency]`, each in `[0, 1]`.
    pub fn numeric(&self) -> [f32; 5] {
        let hour = self.last_date.hour();
        let weekday = self.last_date.weekday().num_days_from_monday();
        let business = weekday < 5 && (9..18).contains(&hour);
        let doc = self.document().to_lowercase();
        let urgent = URGENCY_TERMS.iter().any(|t| doc.contains(t));
        [
            hour as f32 / 24.0,
            weekday as f32 / 6.0,
            if business { 1.0 } else { 0.0 },
            ((1.0 + self.movement_count as f32).ln() / 5.0).min(1.0),
            if urgent { 1.0 } else { 0.0 },
        ]
    }
}

/// Lowercase alphanumeric tokens of at least three characters.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= MIN_TOKEN_CHARS)
        .map(str::to_string)
        .collect()
}

/// TF-IDF over a fixed vocabulary, L2-normalized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextVectorizer {
    vocabulary: Vec<String>,
    idf: Vec<f32>,
}

impl TextVectorizer {
    /// Keep the [`MAX_VOCABULARY`] most common terms seen in at least
    /// [`MIN_DOCUMENT_FREQUENCY`] documents.
    pub fn fit<S: AsRef<str>>(documents: &[S]) -> Self {
        let mut df: HashMap<String, usize> = HashMap::new();
        for doc in documents {
            let unique: BTreeSet<String> = tokenize(doc.as_ref()).into_iter().collect();
            for term in unique {
                *df.entry(term).or_insert(0) += 1;
            }
        }

        let mut terms: Vec<(String, usize)> = df
            .into_iter()
            .filter(|(_, n)| *n >= MIN_DOCUMENT_FREQUENCY)
            .collect();
        terms.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        terms.truncate(MAX_VOCABULARY);

        let n = documents.len() as f32;
        let idf = terms
            .iter()
            .map(|(_, d)| ((1.0 + n) / (1.0 + *d as f32)).ln() + 1.0)
            .collect();
        let vocabulary = terms.into_iter().map(|(t, _)| t).collect();
        Self { vocabulary, idf }
    }

    pub fn dim(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn transform(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.vocabulary.len()];
        for token in tokenize(text) {
            if let Some(i) = self.vocabulary.iter().position(|t| *t == token) {
                v[i] += self.idf[i];
            }
        }
        normalize(&mut v);
        v
    }
}

/// Full feature vector for the movement and timing models.
pub fn movement_features(vectorizer: &TextVectorizer, ctx: &MovementContext) -> Vec<f32> {
    let mut features = vectorizer.transform(&ctx.document());
    features.extend_from_slice(&ctx.numeric());
    features
}

/// Inputs to the TTL optimizer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TtlFeatures {
    pub access_count: u64,
    pub predicted_days: f64,
    pub pattern: AccessPattern,
    pub phase: Phase,
    pub area: ProcessArea,
}

impl TtlFeatures {
    /// `[log access, log days, pattern one-hot ×4, complexity, area one-hot ×7]`.
    pub fn to_vec(&self) -> Vec<f64> {
        let mut v = Vec::with_capacity(3 + 4 + ProcessArea::ALL.len());
        v.push((1.0 + self.access_count as f64).ln());
        v.push((1.0 + self.predicted_days.max(0.0)).ln());
        for p in AccessPattern::ALL {
            v.push(if p == self.pattern { 1.0 } else { 0.0 });
        }
        v.push(self.phase.complexity() as f64);
        for a in ProcessArea::ALL {
            v.push(if a == self.area { 1.0 } else { 0.0 });
        }
        v
    }
}

/// L2-normalize a vector in place.
pub fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

//! Rule-based phase and access-pattern classification.
//!
//! Both functions are pure. Phase detection walks a fixed, ordered table of
//! trigger terms per phase against the most recent movement texts; the first
//! phase with a matching term wins, and `Instructional` is the default.

use chrono::{DateTime, Utc};

use crate::movement::Movement;
use crate::status::{AccessPattern, Outcome, Phase, StatusSummary, SyncStatus};

/// Number of most recent movements inspected for phase detection.
pub const RECENT_WINDOW: usize = 5;

pub const DAILY_THRESHOLD: u64 = 20;
pub const WEEKLY_THRESHOLD: u64 = 5;
pub const MONTHLY_THRESHOLD: u64 = 2;

/// Trigger terms per phase, in evaluation order.
///
/// Later lifecycle stages come first so that an archived process whose
/// history also mentions a hearing is not reported as instructional.
const PHASE_TERMS: &[(Phase, &[&str])] = &[
    (
        Phase::Archived,
        &[
            "arquivado definitivamente",
            "arquivamento definitivo",
            "baixa definitiva",
            "arquivado",
            "archived",
        ],
    ),
    (
        Phase::Final,
        &[
            "trânsito em julgado",
            "transito em julgado",
            "transitado em julgado",
            "cumprimento de sentença",
            "cumprimento de sentenca",
            "execução",
            "execucao",
            "res judicata",
        ],
    ),
    (
        Phase::Appeal,
        &[
            "recurso",
            "apelação",
            "apelacao",
            "agravo",
            "embargos",
            "recurso especial",
            "recurso extraordinário",
            "appeal",
        ],
    ),
    (
        Phase::Decision,
        &[
            "sentença",
            "sentenca",
            "acórdão",
            "acordao",
            "julgamento",
            "julgado",
            "decisão",
            "decisao",
            "conclusos para sentença",
            "judgment",
        ],
    ),
    (
        Phase::Instructional,
        &[
            "audiência",
            "audiencia",
            "perícia",
            "pericia",
            "instrução",
            "instrucao",
            "prova",
            "testemunha",
            "laudo",
            "hearing",
        ],
    ),
    (
        Phase::Initial,
        &[
            "distribuído",
            "distribuido",
            "distribuição",
            "distribuicao",
            "petição inicial",
            "peticao inicial",
            "autuado",
            "citação",
            "citacao",
            "filed",
        ],
    ),
];

/// Map recent movement texts to a lifecycle phase.
///
/// Texts are expected newest first; only the first [`RECENT_WINDOW`] are used.
pub fn classify_phase<S: AsRef<str>>(recent_texts: &[S]) -> Phase {
    let haystack: Vec<String> = recent_texts
        .iter()
        .take(RECENT_WINDOW)
        .map(|t| t.as_ref().to_lowercase())
        .collect();

    PHASE_TERMS
        .iter()
        .find(|(_, terms)| {
            terms
                .iter()
                .any(|term| haystack.iter().any(|text| text.contains(term)))
        })
        .map(|(phase, _)| *phase)
        .unwrap_or(Phase::Instructional)
}

/// Convenience wrapper over [`classify_phase`] for movement records.
pub fn classify_movements(movements: &[Movement]) -> Phase {
    let mut sorted: Vec<&Movement> = movements.iter().collect();
    sorted.sort_by(|a, b| b.date.cmp(&a.date));
    let texts: Vec<&str> = sorted.iter().map(|m| m.raw_text.as_str()).collect();
    classify_phase(&texts)
}

/// Bucket an access count over the access window (7 days).
pub fn classify_access_pattern(access_count: u64) -> AccessPattern {
    if access_count >= DAILY_THRESHOLD {
        AccessPattern::Daily
    } else if access_count >= WEEKLY_THRESHOLD {
        AccessPattern::Weekly
    } else if access_count >= MONTHLY_THRESHOLD {
        AccessPattern::Monthly
    } else {
        AccessPattern::Rarely
    }
}

/// Infer the outcome from recent texts.
///
/// "improcedente" contains "procedente", so losses are checked first.
pub fn detect_outcome<S: AsRef<str>>(recent_texts: &[S], phase: Phase) -> Outcome {
    let lower: Vec<String> = recent_texts
        .iter()
        .take(RECENT_WINDOW)
        .map(|t| t.as_ref().to_lowercase())
        .collect();
    let any = |terms: &[&str]| lower.iter().any(|t| terms.iter().any(|term| t.contains(term)));

    if any(&["acordo", "homologação de acordo", "homologacao de acordo", "settlement"]) {
        Outcome::Settled
    } else if any(&["improcedente", "improvido", "desprovido", "dismissed"]) {
        Outcome::Lost
    } else if any(&["procedente", "provido", "granted"]) {
        Outcome::Won
    } else if phase == Phase::Initial {
        Outcome::Pending
    } else {
        Outcome::Ongoing
    }
}

/// Build a status summary from a movement list.
///
/// Used when no fresh durable status row exists; the caller persists it.
pub fn synthesize_status(
    cnj: &str,
    movements: &[Movement],
    now: DateTime<Utc>,
    cache_valid_until: DateTime<Utc>,
    sync_status: SyncStatus,
    last_provider_sync_at: Option<DateTime<Utc>>,
) -> StatusSummary {
    let mut sorted: Vec<&Movement> = movements.iter().collect();
    sorted.sort_by(|a, b| b.date.cmp(&a.date));
    let texts: Vec<&str> = sorted.iter().map(|m| m.raw_text.as_str()).collect();

    let phase = classify_phase(&texts);
    let outcome = detect_outcome(&texts, phase);
    let latest = sorted.first();

    StatusSummary {
        cnj: cnj.to_string(),
        current_phase: phase,
        description: phase.description().to_string(),
        progress_percentage: phase.progress_percentage(),
        outcome,
        total_movements: movements.len() as u32,
        last_movement_date: latest.map(|m| m.date),
        tribunal_name: latest.and_then(|m| m.tribunal.clone()),
        tribunal_grade: latest.and_then(|m| m.grade.clone()),
        last_provider_sync_at,
        cache_valid_until,
        sync_status,
        sync_error: None,
        updated_at: now,
    }
}

//! Movement records: single events in a process timeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse category of a movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    Petition,
    Decision,
    Filing,
    Citation,
    Hearing,
    Conclusion,
    Other,
}

/// Trigger terms per movement type, checked in order. First hit wins.
///
/// Terms are lowercase; matching is a substring test on lowercased text.
const TYPE_TERMS: &[(MovementType, &[&str])] = &[
    (
        MovementType::Conclusion,
        &[
            "conclusos",
            "concluso",
            "arquivado",
            "arquivamento",
            "baixa definitiva",
            "trânsito em julgado",
            "transito em julgado",
            "closed",
        ],
    ),
    (
        MovementType::Decision,
        &[
            "sentença",
            "sentenca",
            "decisão",
            "decisao",
            "acórdão",
            "acordao",
            "julgado",
            "julgamento",
            "despacho",
            "decision",
            "judgment",
        ],
    ),
    (
        MovementType::Hearing,
        &["audiência", "audiencia", "sessão", "sessao", "hearing"],
    ),
    (
        MovementType::Citation,
        &["citação", "citacao", "intimação", "intimacao", "notificação", "citation", "summons"],
    ),
    (
        MovementType::Petition,
        &["petição", "peticao", "requerimento", "petition", "motion"],
    ),
    (
        MovementType::Filing,
        &[
            "juntada",
            "protocolo",
            "distribuído",
            "distribuido",
            "distribuição",
            "autuado",
            "filed",
            "filing",
        ],
    ),
];

impl MovementType {
    pub const ALL: [MovementType; 7] = [
        Self::Petition,
        Self::Decision,
        Self::Filing,
        Self::Citation,
        Self::Hearing,
        Self::Conclusion,
        Self::Other,
    ];

    /// Categorize raw movement text with the keyword table.
    pub fn classify(text: &str) -> Self {
        let lower = text.to_lowercase();
        TYPE_TERMS
            .iter()
            .find(|(_, terms)| terms.iter().any(|t| lower.contains(t)))
            .map(|(ty, _)| *ty)
            .unwrap_or(Self::Other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Petition => "petition",
            Self::Decision => "decision",
            Self::Filing => "filing",
            Self::Citation => "citation",
            Self::Hearing => "hearing",
            Self::Conclusion => "conclusion",
            Self::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    /// Presentation hint: icon name.
    pub fn icon(&self) -> &'static str {
        match self {
            Self::Petition => "file-text",
            Self::Decision => "gavel",
            Self::Filing => "folder-plus",
            Self::Citation => "mail",
            Self::Hearing => "users",
            Self::Conclusion => "check-circle",
            Self::Other => "circle",
        }
    }

    /// Presentation hint: hex color.
    pub fn color(&self) -> &'static str {
        match self {
            Self::Petition => "#2563eb",
            Self::Decision => "#dc2626",
            Self::Filing => "#6b7280",
            Self::Citation => "#d97706",
            Self::Hearing => "#7c3aed",
            Self::Conclusion => "#059669",
            Self::Other => "#9ca3af",
        }
    }
}

/// A single recorded event in a process timeline.
///
/// Immutable once recorded. Identity in the durable tier is
/// `(cnj, raw_text, date)`; `id` is the provider's own reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movement {
    pub id: String,
    #[serde(rename = "type")]
    pub movement_type: MovementType,
    pub raw_text: String,
    pub date: DateTime<Utc>,
    pub tribunal: Option<String>,
    pub grade: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
    #[serde(default)]
    pub is_current: bool,
}

impl Movement {
    /// Build a movement from raw text, categorizing it and filling presentation hints.
    pub fn from_text(id: impl Into<String>, raw_text: impl Into<String>, date: DateTime<Utc>) -> Self {
        let raw_text = raw_text.into();
        let movement_type = MovementType::classify(&raw_text);
        Self {
            id: id.into(),
            movement_type,
            raw_text,
            date,
            tribunal: None,
            grade: None,
            icon: Some(movement_type.icon().to_string()),
            color: Some(movement_type.color().to_string()),
            is_current: false,
        }
    }

    /// Fill missing presentation hints from the movement type.
    pub fn with_presentation(mut self) -> Self {
        if self.icon.is_none() {
            self.icon = Some(self.movement_type.icon().to_string());
        }
        if self.color.is_none() {
            self.color = Some(self.movement_type.color().to_string());
        }
        self
    }
}

/// Sort newest first and flag only the newest movement as current.
pub fn mark_current(movements: &mut [Movement]) {
    movements.sort_by(|a, b| b.date.cmp(&a.date));
    for (i, m) in movements.iter_mut().enumerate() {
        m.is_current = i == 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn classify_decision() {
        assert_eq!(
            MovementType::classify("Sentença proferida: julgado procedente"),
            MovementType::Decision
        );
    }

    #[test]
    fn classify_hearing_accented_and_plain() {
        assert_eq!(
            MovementType::classify("Audiência de conciliação designada"),
            MovementType::Hearing
        );
        assert_eq!(
            MovementType::classify("AUDIENCIA REDESIGNADA"),
            MovementType::Hearing
        );
    }

    #[test]
    fn classify_filing() {
        assert_eq!(
            MovementType::classify("Juntada de petição"),
            MovementType::Petition
        );
        assert_eq!(
            MovementType::classify("Processo distribuído por sorteio"),
            MovementType::Filing
        );
    }

    #[test]
    fn classify_unknown_is_other() {
        assert_eq!(MovementType::classify("Remessa"), MovementType::Other);
        assert_eq!(MovementType::classify(""), MovementType::Other);
    }

    #[test]
    fn type_roundtrips_through_str() {
        for ty in MovementType::ALL {
            assert_eq!(MovementType::parse(ty.as_str()), Some(ty));
        }
    }

    #[test]
    fn serializes_type_field_name() {
        let date = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        let m = Movement::from_text("m1", "Citação expedida", date);
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["type"], "citation");
        assert_eq!(json["icon"], "mail");
    }

    #[test]
    fn mark_current_flags_newest_only() {
        let d1 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let d2 = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();
        let mut ms = vec![
            Movement::from_text("a", "Juntada", d1),
            Movement::from_text("b", "Despacho", d2),
        ];
        mark_current(&mut ms);
        assert_eq!(ms[0].id, "b");
        assert!(ms[0].is_current);
        assert!(!ms[1].is_current);
    }
}

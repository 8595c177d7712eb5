//! Process identifier parsing.
//!
//! Identifiers follow the unified numbering `NNNNNNN-DD.AAAA.J.TR.OOOO`
//! (20 digits once punctuation is removed), but short internal identifiers
//! are accepted too. Only the character set and length are enforced, plus
//! at least one digit.
//!
//! # Judiciary segment
//!
//! For 20-digit identifiers the 14th digit (`J`) names the judiciary branch:
//!
//! - 1, 2, 3: superior courts and the national council
//! - 4: federal courts
//! - 5: labor courts
//! - 6: electoral courts
//! - 7, 9: military courts
//! - 8: state courts

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const MAX_LEN: usize = 25;
const UNIFIED_DIGITS: usize = 20;
const SEGMENT_POSITION: usize = 13;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CnjError {
    #[error("process identifier is empty")]
    Empty,
    #[error("process identifier longer than 25 characters: {0}")]
    TooLong(String),
    #[error("invalid character {ch:?} in process identifier {input}")]
    InvalidChar { input: String, ch: char },
    #[error("process identifier has no digits: {0}")]
    NoDigits(String),
}

/// A validated process identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cnj(String);

impl Cnj {
    /// Validate and trim a raw identifier.
    pub fn parse(raw: &str) -> Result<Self, CnjError> {
        let s = raw.trim();
        if s.is_empty() {
            return Err(CnjError::Empty);
        }
        if s.chars().count() > MAX_LEN {
            return Err(CnjError::TooLong(s.to_string()));
        }
        if let Some(ch) = s
            .chars()
            .find(|c| !(c.is_ascii_digit() || *c == '.' || *c == '-'))
        {
            return Err(CnjError::InvalidChar {
                input: s.to_string(),
                ch,
            });
        }
        if !s.chars().any(|c| c.is_ascii_digit()) {
            return Err(CnjError::NoDigits(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Digits only, punctuation stripped.
    pub fn digits(&self) -> String {
        self.0.chars().filter(|c| c.is_ascii_digit()).collect()
    }

    /// Court branch derived from the judiciary segment digit.
    ///
    /// Returns [`ProcessArea::General`] for identifiers that are not in the
    /// 20-digit unified format.
    pub fn area(&self) -> ProcessArea {
        let digits = self.digits();
        if digits.len() != UNIFIED_DIGITS {
            return ProcessArea::General;
        }
        match digits.as_bytes()[SEGMENT_POSITION] {
            b'1' | b'2' | b'3' => ProcessArea::Superior,
            b'4' => ProcessArea::Federal,
            b'5' => ProcessArea::Labor,
            b'6' => ProcessArea::Electoral,
            b'7' | b'9' => ProcessArea::Military,
            b'8' => ProcessArea::State,
            _ => ProcessArea::General,
        }
    }
}

impl fmt::Display for Cnj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Cnj {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Court branch a process belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessArea {
    State,
    Federal,
    Labor,
    Electoral,
    Military,
    Superior,
    General,
}

impl ProcessArea {
    pub const ALL: [ProcessArea; 7] = [
        Self::State,
        Self::Federal,
        Self::Labor,
        Self::Electoral,
        Self::Military,
        Self::Superior,
        Self::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::State => "state",
            Self::Federal => "federal",
            Self::Labor => "labor",
            Self::Electoral => "electoral",
            Self::Military => "military",
            Self::Superior => "superior",
            Self::General => "general",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == s)
    }
}

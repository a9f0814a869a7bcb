//! Likert confidence extraction from free-text model responses.
//!
//! Extraction is positional: the first confidence mention is taken as the
//! "without history" score and the second as the "with history" score.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Serialize, Serializer};

pub const LIKERT_MIN: u8 = 1;
pub const LIKERT_MAX: u8 = 5;

/// Rendered for scores that could not be extracted.
pub const NOT_AVAILABLE: &str = "N/A";

static TOLERANT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:likert|confidence|skala)\s*[:\-]?\s*(\d{1,2})")
        .expect("Invalid tolerant likert regex")
});

static LIKERT_ONLY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Likert[^:]*[:\-]?\s*([1-5])").expect("Invalid likert-only regex")
});

/// A single confidence score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LikertScore {
    /// Value in `LIKERT_MIN..=LIKERT_MAX`.
    Known(u8),
    #[default]
    Unknown,
}

impl LikertScore {
    /// `Known` only for values on the scale.
    pub fn new(value: u8) -> Self {
        if (LIKERT_MIN..=LIKERT_MAX).contains(&value) {
            LikertScore::Known(value)
        } else {
            LikertScore::Unknown
        }
    }

    pub fn value(&self) -> Option<u8> {
        match self {
            LikertScore::Known(v) => Some(*v),
            LikertScore::Unknown => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, LikertScore::Known(_))
    }
}

impl fmt::Display for LikertScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LikertScore::Known(v) => write!(f, "{v}"),
            LikertScore::Unknown => f.write_str(NOT_AVAILABLE),
        }
    }
}

impl Serialize for LikertScore {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            LikertScore::Known(v) => serializer.serialize_u8(*v),
            LikertScore::Unknown => serializer.serialize_str(NOT_AVAILABLE),
        }
    }
}

/// Scores for the two sub-requests of one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ScorePair {
    pub without_history: LikertScore,
    pub with_history: LikertScore,
}

impl ScorePair {
    pub fn new(without_history: LikertScore, with_history: LikertScore) -> Self {
        Self {
            without_history,
            with_history,
        }
    }

    pub fn unknown() -> Self {
        Self::default()
    }
}

/// Which confidence mentions count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtractionPolicy {
    /// "likert", "confidence" or "skala" (any case) followed by a 1-2 digit
    /// number; values off the scale are dropped.
    #[default]
    Tolerant,
    /// Literal "Likert" followed, after any non-colon text, by a digit 1-5.
    LikertOnly,
}

impl ExtractionPolicy {
    /// Every on-scale score in order of appearance.
    pub fn scan(&self, text: &str) -> Vec<u8> {
        let pattern = match self {
            ExtractionPolicy::Tolerant => &*TOLERANT_PATTERN,
            ExtractionPolicy::LikertOnly => &*LIKERT_ONLY_PATTERN,
        };

        pattern
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .filter_map(|m| m.as_str().parse::<u8>().ok())
            .filter(|v| (LIKERT_MIN..=LIKERT_MAX).contains(v))
            .collect()
    }
}

impl FromStr for ExtractionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tolerant" => Ok(ExtractionPolicy::Tolerant),
            "likert-only" | "likert_only" | "strict" => Ok(ExtractionPolicy::LikertOnly),
            other => Err(format!("unknown extraction policy: {other}")),
        }
    }
}

/// Map a response to its (without history, with history) scores.
///
/// Never fails: missing mentions become `Unknown`, mentions past the second
/// are ignored.
pub fn extract_scores(text: &str, policy: ExtractionPolicy) -> ScorePair {
    let found = policy.scan(text);
    match found.as_slice() {
        [] => ScorePair::unknown(),
        [only] => ScorePair::new(LikertScore::new(*only), LikertScore::Unknown),
        [first, second, ..] => ScorePair::new(LikertScore::new(*first), LikertScore::new(*second)),
    }
}

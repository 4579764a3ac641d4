//! Anonymization levels, field values and results

use std::collections::BTreeMap;

use aegis_common::impl_status_conversions;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Anonymization strength
///
/// Each level applies every transform of the levels below it:
/// substitution, then generalization, then suppression, then noise.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AnonymizationLevel {
    /// Pass-through
    None,
    /// Substitute detected identifiers
    Basic,
    /// Also generalize dates, numbers and locations
    #[default]
    Standard,
    /// Also suppress direct identifiers
    Strong,
    /// Also add noise to numeric fields
    Complete,
}

impl_status_conversions!(AnonymizationLevel {
    None => "none",
    Basic => "basic",
    Standard => "standard",
    Strong => "strong",
    Complete => "complete",
});

impl AnonymizationLevel {
    /// Every level, weakest first
    pub const ALL: [AnonymizationLevel; 5] =
        [Self::None, Self::Basic, Self::Standard, Self::Strong, Self::Complete];

    /// Nominal privacy score of the level
    pub fn privacy_score(self) -> f64 {
        match self {
            Self::None => 0.0,
            Self::Basic => 0.3,
            Self::Standard => 0.55,
            Self::Strong => 0.8,
            Self::Complete => 1.0,
        }
    }

    pub(crate) fn substitutes(self) -> bool {
        self >= Self::Basic
    }

    pub(crate) fn generalizes(self) -> bool {
        self >= Self::Standard
    }

    pub(crate) fn suppresses(self) -> bool {
        self >= Self::Strong
    }

    pub(crate) fn adds_noise(self) -> bool {
        self >= Self::Complete
    }
}

/// A typed record field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    /// Free text
    Text(String),
    /// Whole number
    Integer(i64),
    /// Floating-point number
    Float(f64),
    /// Calendar date
    Date(NaiveDate),
    /// Boolean flag
    Bool(bool),
    /// Missing value
    Null,
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(value: NaiveDate) -> Self {
        Self::Date(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Field name to value
pub type Record = BTreeMap<String, FieldValue>;

/// What happened to one field or text span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldTreatment {
    /// Left as is
    Untouched,
    /// Replaced by a surrogate
    Substituted,
    /// Coarsened into a range or bucket
    Generalized,
    /// Perturbed with noise
    Noised,
    /// Removed
    Suppressed,
}

impl_status_conversions!(FieldTreatment {
    Untouched => "untouched",
    Substituted => "substituted",
    Generalized => "generalized",
    Noised => "noised",
    Suppressed => "suppressed",
});

impl FieldTreatment {
    /// Residual analytical value of a field after this treatment
    pub fn utility(self) -> f64 {
        match self {
            Self::Untouched => 1.0,
            Self::Substituted => 0.8,
            Self::Generalized => 0.6,
            Self::Noised => 0.5,
            Self::Suppressed => 0.0,
        }
    }
}

/// Transformed data with quality metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnonymizationResult<T> {
    /// The anonymized record or text
    pub data: T,
    /// Level that was applied
    pub level: AnonymizationLevel,
    /// Level's nominal privacy score
    pub privacy_score: f64,
    /// Share of analytical value lost, 0 to 1
    pub information_loss: f64,
    /// `1 - information_loss`
    pub utility_score: f64,
    /// Per-field (records) or per-span (text) treatment
    pub treatments: BTreeMap<String, FieldTreatment>,
}

impl<T> AnonymizationResult<T> {
    pub(crate) fn new(
        data: T,
        level: AnonymizationLevel,
        utility_score: f64,
        treatments: BTreeMap<String, FieldTreatment>,
    ) -> Self {
        let privacy_score = level.privacy_score();
        Self {
            data,
            level,
            privacy_score,
            information_loss: 1.0 - privacy_score,
            utility_score: utility_score.clamp(0.0, 1.0),
            treatments,
        }
    }
}

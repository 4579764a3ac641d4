//! Sensitive substring detection
//!
//! Built-in classes are backed by precompiled regexes; card numbers are
//! additionally Luhn-checked and national ids range-checked to cut false
//! positives. Custom classes are registered at runtime.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{CommonError, ErrorSeverity};
use crate::impl_error_classification;

pub(crate) const EMAIL_PATTERN: &str = r"(?u)\b[\p{L}\p{N}._%+-]+@[\p{L}\p{N}.-]+\.[\p{L}]{2,}\b";
const PHONE_PATTERN: &str = r"(?:\+\d{1,3}[\s.-]?)?(?:\(\d{3}\)|\b\d{3})[\s.-]?\d{3}[\s.-]?\d{4}\b";
const NATIONAL_ID_PATTERN: &str = r"\b\d{3}-\d{2}-\d{4}\b";
const CARD_PATTERN: &str = r"\b(?:\d[ -]?){12,18}\d\b";

#[allow(clippy::expect_used)]
static EMAIL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(EMAIL_PATTERN).expect("EMAIL_REGEX should compile - this is a bug"));

#[allow(clippy::expect_used)]
static PHONE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(PHONE_PATTERN).expect("PHONE_REGEX should compile - this is a bug"));

#[allow(clippy::expect_used)]
static NATIONAL_ID_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(NATIONAL_ID_PATTERN).expect("NATIONAL_ID_REGEX should compile - this is a bug")
});

#[allow(clippy::expect_used)]
static CARD_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(CARD_PATTERN).expect("CARD_REGEX should compile - this is a bug"));

/// Errors raised while registering custom patterns
#[derive(Debug, Error)]
pub enum PatternError {
    /// The regex did not compile
    #[error("Invalid pattern '{name}': {reason}")]
    InvalidPattern { name: String, reason: String },

    /// A custom class with this name already exists
    #[error("Pattern '{0}' is already registered")]
    Duplicate(String),

    /// Shared failure from a lower layer
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl_error_classification!(PatternError, Common,
    Self::InvalidPattern { .. } => {
        retryable: false,
        severity: ErrorSeverity::Error,
        critical: false,
    },
    Self::Duplicate(_) => {
        retryable: false,
        severity: ErrorSeverity::Warning,
        critical: false,
    }
);

/// Class of sensitive substring
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternClass {
    /// Email address
    Email,
    /// Phone number in common national and international formats
    Phone,
    /// National identifier such as a US SSN
    NationalId,
    /// Payment card number that passes the Luhn check
    CardNumber,
    /// Runtime-registered class, by name
    Custom(String),
}

impl PatternClass {
    /// Built-in classes in priority order
    pub const BUILT_IN: [PatternClass; 4] =
        [Self::CardNumber, Self::NationalId, Self::Email, Self::Phone];

    /// Short label used in pseudonyms and masks
    pub fn label(&self) -> &str {
        match self {
            Self::Email => "email",
            Self::Phone => "phone",
            Self::NationalId => "national_id",
            Self::CardNumber => "card",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for PatternClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One detected span, byte offsets into the scanned text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternMatch {
    /// Detected class
    pub class: PatternClass,
    /// Byte offset of the first matched byte
    pub start: usize,
    /// Byte offset one past the last matched byte
    pub end: usize,
    /// Matched text
    pub value: String,
}

impl PatternMatch {
    /// Span length in bytes
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// `true` for a zero-length span
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Scanner over the enabled built-in classes plus any custom patterns
#[derive(Debug, Clone)]
pub struct PatternScanner {
    enabled: Vec<PatternClass>,
    custom: Vec<(String, Regex)>,
}

impl Default for PatternScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternScanner {
    /// Scanner with every built-in class enabled
    pub fn new() -> Self {
        Self { enabled: PatternClass::BUILT_IN.to_vec(), custom: Vec::new() }
    }

    /// Scanner limited to the given built-in classes
    pub fn with_classes(classes: impl IntoIterator<Item = PatternClass>) -> Self {
        let enabled = classes.into_iter().filter(|c| !matches!(c, PatternClass::Custom(_))).collect();
        Self { enabled, custom: Vec::new() }
    }

    /// Register a custom regex under `name`
    pub fn add_custom(&mut self, name: &str, pattern: &str) -> Result<(), PatternError> {
        if name.trim().is_empty() {
            return Err(PatternError::InvalidPattern {
                name: name.to_string(),
                reason: "name cannot be empty".to_string(),
            });
        }
        if self.custom.iter().any(|(existing, _)| existing == name) {
            return Err(PatternError::Duplicate(name.to_string()));
        }
        let regex = Regex::new(pattern).map_err(|e| PatternError::InvalidPattern {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        self.custom.push((name.to_string(), regex));
        Ok(())
    }

    /// Names of the registered custom classes, in registration order
    pub fn custom_names(&self) -> impl Iterator<Item = &str> {
        self.custom.iter().map(|(name, _)| name.as_str())
    }

    /// Find all sensitive spans in `text`
    ///
    /// Returned spans are sorted by start offset and never overlap. When two
    /// candidates overlap, the earlier one wins; at equal starts the longer
    /// one wins.
    pub fn scan(&self, text: &str) -> Vec<PatternMatch> {
        let mut candidates = Vec::new();

        for class in &self.enabled {
            let regex: &Regex = match class {
                PatternClass::Email => &EMAIL_REGEX,
                PatternClass::Phone => &PHONE_REGEX,
                PatternClass::NationalId => &NATIONAL_ID_REGEX,
                PatternClass::CardNumber => &CARD_REGEX,
                PatternClass::Custom(_) => continue,
            };
            for m in regex.find_iter(text) {
                let accepted = match class {
                    PatternClass::CardNumber => luhn_check(m.as_str()),
                    PatternClass::NationalId => is_valid_national_id(m.as_str()),
                    _ => true,
                };
                if accepted {
                    candidates.push(PatternMatch {
                        class: class.clone(),
                        start: m.start(),
                        end: m.end(),
                        value: m.as_str().to_string(),
                    });
                }
            }
        }

        for (name, regex) in &self.custom {
            for m in regex.find_iter(text).filter(|m| !m.is_empty()) {
                candidates.push(PatternMatch {
                    class: PatternClass::Custom(name.clone()),
                    start: m.start(),
                    end: m.end(),
                    value: m.as_str().to_string(),
                });
            }
        }

        resolve_overlaps(candidates)
    }

    /// `true` when any enabled class matches
    pub fn contains_sensitive(&self, text: &str) -> bool {
        !self.scan(text).is_empty()
    }
}

fn resolve_overlaps(mut candidates: Vec<PatternMatch>) -> Vec<PatternMatch> {
    candidates.sort_by(|a, b| a.start.cmp(&b.start).then(b.len().cmp(&a.len())));

    let mut resolved: Vec<PatternMatch> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        match resolved.last() {
            Some(last) if candidate.start < last.end => {}
            _ => resolved.push(candidate),
        }
    }
    resolved
}

/// Luhn checksum over the digits of `number`, ignoring spaces and dashes
pub fn luhn_check(number: &str) -> bool {
    let digits: Vec<u32> = number.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() < 13 || digits.len() > 19 {
        return false;
    }

    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();

    sum % 10 == 0
}

/// Reject area/group/serial values that are never issued (000, 666, 9xx, 00, 0000)
pub fn is_valid_national_id(value: &str) -> bool {
    let parts: Vec<&str> = value.split('-').collect();
    let [area, group, serial] = parts.as_slice() else {
        return false;
    };
    let (Ok(area), Ok(group), Ok(serial)) =
        (area.parse::<u16>(), group.parse::<u16>(), serial.parse::<u16>())
    else {
        return false;
    };

    area != 0 && area != 666 && area < 900 && group != 0 && serial != 0
}

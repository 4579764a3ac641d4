//! Irreversible anonymization of records and free text

use std::collections::{BTreeMap, BTreeSet};

use aegis_common::{CommonError, ContentHasher, HashAlgorithm, PatternClass, PatternScanner};
use chrono::Datelike;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::model::{AnonymizationLevel, AnonymizationResult, FieldTreatment, FieldValue, Record};
use crate::error::{PrivacyError, PrivacyResult};

const PSEUDONYM_HEX_CHARS: usize = 12;
const PSEUDONYM_SALT_LABEL: &[u8] = b"aegis.anonymize.v1";

/// Field roles and transform parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnonymizerConfig {
    /// Fields that identify a person on their own
    pub direct_identifiers: BTreeSet<String>,
    /// Fields that identify a person in combination
    pub quasi_identifiers: BTreeSet<String>,
    /// Width of numeric generalization buckets
    pub numeric_bucket: i64,
    /// Laplace scale for noise injection
    pub noise_scale: f64,
    /// Seed for pseudonyms and noise; equal seeds give equal output
    pub seed: u64,
}

fn names(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for AnonymizerConfig {
    fn default() -> Self {
        Self {
            direct_identifiers: names(&[
                "name",
                "full_name",
                "email",
                "phone",
                "ssn",
                "national_id",
                "address",
                "card_number",
                "user_id",
            ]),
            quasi_identifiers: names(&[
                "age",
                "zip",
                "zip_code",
                "postal_code",
                "birth_date",
                "date_of_birth",
                "gender",
                "city",
                "occupation",
                "salary",
            ]),
            numeric_bucket: 10,
            noise_scale: 1.0,
            seed: 0x5eed_ae91,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldRole {
    Direct,
    Quasi,
    Other,
}

/// Applies the anonymization ladder
///
/// Output is a pure function of (input, level, config).
#[derive(Debug, Clone)]
pub struct Anonymizer {
    config: AnonymizerConfig,
    hasher: ContentHasher,
    scanner: PatternScanner,
}

impl Anonymizer {
    /// Validate `config` and build the anonymizer
    pub fn new(config: AnonymizerConfig) -> PrivacyResult<Self> {
        if config.numeric_bucket <= 0 {
            return Err(CommonError::validation("numeric_bucket", "must be positive").into());
        }
        if !config.noise_scale.is_finite() || config.noise_scale < 0.0 {
            return Err(CommonError::validation("noise_scale", "must be a non-negative number").into());
        }
        let mut salt = PSEUDONYM_SALT_LABEL.to_vec();
        salt.extend_from_slice(&config.seed.to_be_bytes());
        let hasher = ContentHasher::new(HashAlgorithm::Sha256, salt)
            .map_err(|e| PrivacyError::Common(CommonError::internal(e.to_string())))?;
        Ok(Self { config, hasher, scanner: PatternScanner::new() })
    }

    /// Anonymizer with the default field roles
    pub fn with_defaults() -> PrivacyResult<Self> {
        Self::new(AnonymizerConfig::default())
    }

    /// Active configuration
    pub fn config(&self) -> &AnonymizerConfig {
        &self.config
    }

    fn role(&self, field: &str) -> FieldRole {
        let field = field.to_ascii_lowercase();
        if self.config.direct_identifiers.contains(&field) {
            FieldRole::Direct
        } else if self.config.quasi_identifiers.contains(&field) {
            FieldRole::Quasi
        } else {
            FieldRole::Other
        }
    }

    /// Anonymize each field according to its role and `level`
    pub fn anonymize_record(
        &self,
        record: &Record,
        level: AnonymizationLevel,
    ) -> AnonymizationResult<Record> {
        let mut treatments = BTreeMap::new();
        let mut output = Record::new();
        for (field, value) in record {
            let (value, treatment) = self.anonymize_field(field, value, level);
            treatments.insert(field.clone(), treatment);
            output.insert(field.clone(), value);
        }
        let utility = mean_utility(treatments.values().copied());
        AnonymizationResult::new(output, level, utility, treatments)
    }

    /// Like [`Self::anonymize_record`], checking `cancel` between fields
    pub fn anonymize_record_cancellable(
        &self,
        record: &Record,
        level: AnonymizationLevel,
        cancel: &CancellationToken,
    ) -> PrivacyResult<AnonymizationResult<Record>> {
        let mut treatments = BTreeMap::new();
        let mut output = Record::new();
        for (field, value) in record {
            if cancel.is_cancelled() {
                return Err(PrivacyError::Cancelled);
            }
            let (value, treatment) = self.anonymize_field(field, value, level);
            treatments.insert(field.clone(), treatment);
            output.insert(field.clone(), value);
        }
        let utility = mean_utility(treatments.values().copied());
        Ok(AnonymizationResult::new(output, level, utility, treatments))
    }

    fn anonymize_field(
        &self,
        field: &str,
        value: &FieldValue,
        level: AnonymizationLevel,
    ) -> (FieldValue, FieldTreatment) {
        if matches!(value, FieldValue::Null) || level == AnonymizationLevel::None {
            return (value.clone(), FieldTreatment::Untouched);
        }

        match self.role(field) {
            FieldRole::Direct if level.adds_noise() => (FieldValue::Null, FieldTreatment::Suppressed),
            FieldRole::Direct => (
                FieldValue::Text(self.hasher.pseudonym(field, &canonical(value), PSEUDONYM_HEX_CHARS)),
                FieldTreatment::Substituted,
            ),
            FieldRole::Quasi if level.suppresses() => (FieldValue::Null, FieldTreatment::Suppressed),
            FieldRole::Quasi if level.generalizes() => self.generalize(value),
            FieldRole::Quasi => (value.clone(), FieldTreatment::Untouched),
            FieldRole::Other => match value {
                FieldValue::Integer(n) if level.adds_noise() => (
                    FieldValue::Integer(n.saturating_add(self.laplace(field).round() as i64)),
                    FieldTreatment::Noised,
                ),
                FieldValue::Float(x) if level.adds_noise() => {
                    (FieldValue::Float(x + self.laplace(field)), FieldTreatment::Noised)
                }
                FieldValue::Text(text) => {
                    let (masked, spans) = self.rewrite_text(text, level);
                    if spans.is_empty() {
                        (value.clone(), FieldTreatment::Untouched)
                    } else {
                        (FieldValue::Text(masked), worst(spans.values().copied()))
                    }
                }
                _ => (value.clone(), FieldTreatment::Untouched),
            },
        }
    }

    fn generalize(&self, value: &FieldValue) -> (FieldValue, FieldTreatment) {
        let bucket = self.config.numeric_bucket;
        let generalized = match value {
            FieldValue::Integer(n) => {
                let Some(low) = n.checked_div_euclid(bucket).and_then(|q| q.checked_mul(bucket)) else {
                    return (FieldValue::Null, FieldTreatment::Suppressed);
                };
                FieldValue::Text(format!("{low}-{}", low.saturating_add(bucket - 1)))
            }
            FieldValue::Float(x) => {
                // Non-finite or out-of-range values have no printable bucket
                let Some(low) = float_bucket(*x, bucket) else {
                    return (FieldValue::Null, FieldTreatment::Suppressed);
                };
                FieldValue::Text(format!("{low}-{}", low.saturating_add(bucket)))
            }
            FieldValue::Date(date) => FieldValue::Text(format!("{:04}-{:02}", date.year(), date.month())),
            FieldValue::Text(text) => FieldValue::Text(mask_suffix(text)),
            FieldValue::Bool(_) | FieldValue::Null => return (value.clone(), FieldTreatment::Untouched),
        };
        (generalized, FieldTreatment::Generalized)
    }

    /// Laplace(0, noise_scale) sample seeded by the field name
    fn laplace(&self, field: &str) -> f64 {
        let digest = Sha256::new()
            .chain_update(self.config.seed.to_be_bytes())
            .chain_update(field.as_bytes())
            .finalize();
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&digest);
        let mut rng = StdRng::from_seed(seed);

        let u: f64 = rng.gen_range(-0.5..0.5);
        -self.config.noise_scale * u.signum() * (1.0 - 2.0 * u.abs()).ln()
    }

    /// Rewrite detected spans in free text
    pub fn anonymize_text(&self, text: &str, level: AnonymizationLevel) -> AnonymizationResult<String> {
        if level == AnonymizationLevel::None {
            return AnonymizationResult::new(text.to_string(), level, 1.0, BTreeMap::new());
        }
        let matches = self.scanner.scan(text);
        let (output, treatments) = self.rewrite_text(text, level);

        let changed: usize = matches
            .iter()
            .zip(treatments.values())
            .map(|(m, t)| ((1.0 - t.utility()) * m.len() as f64) as usize)
            .sum();
        let utility = if text.is_empty() { 1.0 } else { 1.0 - changed as f64 / text.len() as f64 };
        debug!(spans = matches.len(), level = %level, "Anonymized text");
        AnonymizationResult::new(output, level, utility, treatments)
    }

    /// Like [`anonymize_text`](Self::anonymize_text), checking `cancel` first
    pub fn anonymize_text_cancellable(
        &self,
        text: &str,
        level: AnonymizationLevel,
        cancel: &CancellationToken,
    ) -> PrivacyResult<AnonymizationResult<String>> {
        if cancel.is_cancelled() {
            return Err(PrivacyError::Cancelled);
        }
        Ok(self.anonymize_text(text, level))
    }

    /// Replace sensitive spans: pseudonyms below `Strong`, masks above
    fn rewrite_text(
        &self,
        text: &str,
        level: AnonymizationLevel,
    ) -> (String, BTreeMap<String, FieldTreatment>) {
        let mut treatments = BTreeMap::new();
        if !level.substitutes() {
            return (text.to_string(), treatments);
        }

        let mut output = String::with_capacity(text.len());
        let mut cursor = 0;
        for (i, m) in self.scanner.scan(text).into_iter().enumerate() {
            output.push_str(&text[cursor..m.start]);
            let treatment = if level.suppresses() {
                output.push_str(&format!("[{}]", mask_label(&m.class)));
                FieldTreatment::Suppressed
            } else {
                output.push_str(&self.hasher.pseudonym(m.class.label(), &m.value, PSEUDONYM_HEX_CHARS));
                FieldTreatment::Substituted
            };
            treatments.insert(format!("span{i:03}:{}", m.class), treatment);
            cursor = m.end;
        }
        output.push_str(&text[cursor..]);
        (output, treatments)
    }
}

fn canonical(value: &FieldValue) -> String {
    match value {
        FieldValue::Text(s) => s.trim().to_lowercase(),
        FieldValue::Integer(n) => n.to_string(),
        FieldValue::Float(x) => x.to_string(),
        FieldValue::Date(d) => d.to_string(),
        FieldValue::Bool(b) => b.to_string(),
        FieldValue::Null => String::new(),
    }
}

fn mask_label(class: &PatternClass) -> String {
    class.label().to_ascii_uppercase()
}

/// Keep the first two characters, mask the rest
/// Lower bound of the `bucket`-wide range holding `x`
fn float_bucket(x: f64, bucket: i64) -> Option<i64> {
    let index = (x / bucket as f64).floor();
    // `i64::MAX as f64` rounds up to 2^63, itself out of range
    if !index.is_finite() || index < i64::MIN as f64 || index >= i64::MAX as f64 {
        return None;
    }
    (index as i64).checked_mul(bucket)
}

fn mask_suffix(text: &str) -> String {
    let count = text.chars().count();
    let kept: String = text.chars().take(2).collect();
    format!("{kept}{}", "*".repeat(count.saturating_sub(2)))
}

fn mean_utility(treatments: impl Iterator<Item = FieldTreatment>) -> f64 {
    let (sum, count) = treatments.fold((0.0, 0usize), |(sum, n), t| (sum + t.utility(), n + 1));
    if count == 0 {
        1.0
    } else {
        sum / count as f64
    }
}

/// The most destructive treatment in the set
fn worst(treatments: impl Iterator<Item = FieldTreatment>) -> FieldTreatment {
    treatments
        .min_by(|a, b| a.utility().total_cmp(&b.utility()))
        .unwrap_or(FieldTreatment::Untouched)
}

#[cfg(test)]
mod tests {
    //! Unit tests for anonymize::anonymizer.
    use chrono::NaiveDate;

    use super::*;

    fn sample() -> Record {
        let mut record = Record::new();
        record.insert("name".into(), "Jane Roe".into());
        record.insert("email".into(), "jane@example.com".into());
        record.insert("age".into(), FieldValue::Integer(34));
        record.insert("zip".into(), "94107".into());
        record.insert(
            "birth_date".into(),
            FieldValue::Date(NaiveDate::from_ymd_opt(1990, 7, 14).unwrap()),
        );
        record.insert("visits".into(), FieldValue::Integer(12));
        record.insert("notes".into(), "call 555-867-5309 after 5".into());
        record
    }

    /// Validates `Anonymizer::anonymize_record` behavior for the level
    /// ladder scenario.
    ///
    /// Assertions:
    /// - Confirms `None` leaves the record untouched.
    /// - Confirms `Basic` substitutes direct identifiers only.
    /// - Confirms `Standard` generalizes quasi-identifiers.
    /// - Confirms `Strong` suppresses quasi-identifiers.
    /// - Confirms `Complete` suppresses direct identifiers and noises numbers.
    #[test]
    fn test_level_ladder() {
        let anonymizer = Anonymizer::with_defaults().unwrap();
        let record = sample();

        let none = anonymizer.anonymize_record(&record, AnonymizationLevel::None);
        assert_eq!(none.data, record);
        assert_eq!(none.utility_score, 1.0);

        let basic = anonymizer.anonymize_record(&record, AnonymizationLevel::Basic);
        assert!(matches!(&basic.data["name"], FieldValue::Text(s) if s.starts_with("name_")));
        assert_eq!(basic.data["age"], FieldValue::Integer(34));

        let standard = anonymizer.anonymize_record(&record, AnonymizationLevel::Standard);
        assert_eq!(standard.data["age"], FieldValue::Text("30-39".into()));
        assert_eq!(standard.data["zip"], FieldValue::Text("94***".into()));
        assert_eq!(standard.data["birth_date"], FieldValue::Text("1990-07".into()));

        let strong = anonymizer.anonymize_record(&record, AnonymizationLevel::Strong);
        assert_eq!(strong.data["age"], FieldValue::Null);
        assert!(matches!(&strong.data["notes"], FieldValue::Text(s) if s.contains("[PHONE]")));

        let complete = anonymizer.anonymize_record(&record, AnonymizationLevel::Complete);
        assert_eq!(complete.data["name"], FieldValue::Null);
        assert_eq!(complete.treatments["visits"], FieldTreatment::Noised);
        assert!(complete.utility_score < strong.utility_score);
    }

    /// Validates `Anonymizer::anonymize_record` behavior for the
    /// determinism scenario.
    ///
    /// Assertions:
    /// - Confirms identical inputs give identical outputs at every level.
    #[test]
    fn test_deterministic_output() {
        let a = Anonymizer::with_defaults().unwrap();
        let b = Anonymizer::with_defaults().unwrap();
        for level in AnonymizationLevel::ALL {
            assert_eq!(a.anonymize_record(&sample(), level), b.anonymize_record(&sample(), level));
        }
    }

    /// Validates `Anonymizer::anonymize_text` behavior for the free text
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms spans are pseudonymized at `Basic` and masked at `Strong`.
    /// - Confirms surrounding text is preserved.
    #[test]
    fn test_text_spans() {
        let anonymizer = Anonymizer::with_defaults().unwrap();
        let text = "Contact john@example.com today";

        let basic = anonymizer.anonymize_text(text, AnonymizationLevel::Basic);
        assert!(basic.data.starts_with("Contact email_"));
        assert!(basic.data.ends_with(" today"));
        assert!(!basic.data.contains("john@example.com"));

        let strong = anonymizer.anonymize_text(text, AnonymizationLevel::Strong);
        assert_eq!(strong.data, "Contact [EMAIL] today");
        assert!(strong.utility_score < basic.utility_score);
    }

    /// Validates `Anonymizer::anonymize_record_cancellable` behavior for the
    /// cancelled token scenario.
    ///
    /// Assertions:
    /// - Confirms a cancelled token stops the run with `Cancelled`.
    #[test]
    fn test_cancellation() {
        let anonymizer = Anonymizer::with_defaults().unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let result =
            anonymizer.anonymize_record_cancellable(&sample(), AnonymizationLevel::Strong, &token);
        assert!(matches!(result, Err(PrivacyError::Cancelled)));
    }

    /// Validates `Anonymizer::anonymize_record` behavior for the extreme
    /// numeric value scenario.
    ///
    /// Assertions:
    /// - Confirms bucket bounds saturate at the edge of the integer range.
    /// - Confirms values with no representable bucket are suppressed.
    /// - Confirms ordinary floats still generalize.
    #[test]
    fn test_generalize_extreme_values() {
        let anonymizer = Anonymizer::with_defaults().unwrap();
        let generalize = |value: FieldValue| {
            let mut record = Record::new();
            record.insert("salary".into(), value);
            let result = anonymizer.anonymize_record(&record, AnonymizationLevel::Standard);
            (result.data["salary"].clone(), result.treatments["salary"])
        };

        assert_eq!(
            generalize(FieldValue::Integer(i64::MAX)),
            (
                FieldValue::Text("9223372036854775800-9223372036854775807".into()),
                FieldTreatment::Generalized
            )
        );
        for extreme in [
            FieldValue::Integer(i64::MIN),
            FieldValue::Float(1e300),
            FieldValue::Float(-1e300),
            FieldValue::Float(f64::NAN),
            FieldValue::Float(f64::INFINITY),
        ] {
            assert_eq!(generalize(extreme), (FieldValue::Null, FieldTreatment::Suppressed));
        }
        assert_eq!(
            generalize(FieldValue::Float(1234.5)),
            (FieldValue::Text("1230-1240".into()), FieldTreatment::Generalized)
        );

        let mut record = Record::new();
        record.insert("visits".into(), FieldValue::Integer(i64::MAX));
        let complete = anonymizer.anonymize_record(&record, AnonymizationLevel::Complete);
        assert_eq!(complete.treatments["visits"], FieldTreatment::Noised);
    }
}

//! Irreversible anonymization of structured records and free text

mod anonymizer;
mod model;

pub use anonymizer::{Anonymizer, AnonymizerConfig};
pub use model::{AnonymizationLevel, AnonymizationResult, FieldTreatment, FieldValue, Record};

//! Envelope encryption
//!
//! [`EncryptionService`] seals payloads under the active key of an
//! [`EncryptionContext`](crate::keys::EncryptionContext) and produces
//! self-describing [`EncryptedEnvelope`]s that name their key, so decryption
//! keeps working across rotations for as long as the old key is in grace.

pub mod envelope;
pub mod service;

pub use envelope::{EncryptedEnvelope, EncryptionAlgorithm, ENVELOPE_VERSION};
pub use service::EncryptionService;

//! Port interface for platform biometric prompts

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Biometric modality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiometricMethod {
    /// Face recognition
    Face,
    /// Fingerprint sensor
    Fingerprint,
    /// Iris scanner
    Iris,
    /// Device passcode entered instead of a biometric
    Passcode,
}

aegis_common::impl_status_conversions!(BiometricMethod {
    Face => "face",
    Fingerprint => "fingerprint",
    Iris => "iris",
    Passcode => "passcode",
});

/// What the platform can do right now
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Availability {
    /// A sensor is present and usable
    pub available: bool,
    /// An identity is enrolled
    pub enrolled: bool,
    /// Modalities the device offers
    pub supported_methods: Vec<BiometricMethod>,
}

/// Raw result of a single platform prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptResult {
    /// Matched with the given method
    Authenticated(BiometricMethod),
    /// The user chose the device passcode
    Fallback,
    /// Biometric did not match
    Failed(String),
    /// The user dismissed the prompt
    Cancelled,
    /// No identity enrolled
    NotEnrolled,
    /// Sensor unreachable
    Unavailable,
}

/// A platform biometric facility (sensor, secure enclave, test double)
#[async_trait]
pub trait PlatformAuthenticator: Send + Sync + std::fmt::Debug {
    /// Current capabilities
    async fn availability(&self) -> Availability;

    /// Show one prompt and wait for the user
    async fn prompt(&self, reason: &str) -> PromptResult;
}

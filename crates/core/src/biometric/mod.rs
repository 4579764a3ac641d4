//! Biometric authentication
//!
//! The sensor is an external collaborator behind [`PlatformAuthenticator`];
//! [`BiometricAuthenticator`] layers retry limits, lockout cool-down,
//! timeouts, cancellation and a short-lived session cache on top of it.

pub mod authenticator;
pub mod ports;
pub mod software;

pub use authenticator::{AuthenticationOptions, AuthenticationOutcome, BiometricAuthenticator};
pub use ports::{Availability, BiometricMethod, PlatformAuthenticator, PromptResult};
pub use software::{NoHardwareAuthenticator, SoftwareAuthenticator};

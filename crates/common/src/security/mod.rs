//! Secret handling
//!
//! - [`secret`]: zeroizing containers for key material and passphrases
//! - [`keychain`]: platform keychain access (requires the `platform` feature)

pub mod secret;

#[cfg(feature = "platform")]
pub mod keychain;

pub use secret::{constant_time_eq, SecretBytes, SecureString};

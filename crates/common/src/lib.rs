//! Modular common utilities shared across Aegis crates.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: errors, utilities, content hashing, sensitive-pattern
//!   scanning
//! - `runtime`: wall clock abstraction, AEAD primitives, zeroizing secrets
//! - `platform`: platform keychain integration
//! - `observability`: optional tracing (pulled in by `runtime`)

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod error;
#[cfg(feature = "foundation")]
pub mod privacy;
#[cfg(feature = "foundation")]
#[macro_use]
pub mod utils;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod crypto;
#[cfg(feature = "runtime")]
pub mod security;
#[cfg(feature = "runtime")]
pub mod time;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "runtime")]
pub use crypto::aead::{AeadCipher, SealedPayload};
#[cfg(feature = "foundation")]
pub use error::{CommonError, CommonResult, ErrorClassification, ErrorSeverity};
#[cfg(feature = "foundation")]
pub use privacy::hash::{ContentHasher, HashAlgorithm};
#[cfg(feature = "foundation")]
pub use privacy::patterns::{PatternClass, PatternMatch, PatternScanner};
#[cfg(feature = "platform")]
pub use security::keychain::{KeychainError, KeychainProvider};
#[cfg(feature = "runtime")]
pub use security::secret::{SecretBytes, SecureString};
#[cfg(feature = "runtime")]
pub use time::{Clock, MockClock, SharedClock, SystemClock};
#[cfg(feature = "foundation")]
pub use utils::serde::{duration_millis, duration_secs, option_duration_secs};

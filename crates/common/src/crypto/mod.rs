//! Cryptographic primitives.
//!
//! - [`aead`]: AES-256-GCM sealing with detached tags and associated data,
//!   key generation, Argon2 key derivation and key fingerprints.
//!
//! Key lifecycle (contexts, rotation, grace windows) lives in `aegis-core`;
//! this module only knows about raw key bytes.

pub mod aead;

pub use aead::{AeadCipher, AeadError, SealedPayload, KEY_LEN, NONCE_LEN, TAG_LEN};

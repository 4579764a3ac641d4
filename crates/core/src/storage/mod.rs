//! Secure storage
//!
//! [`StorageBackend`] is the raw key→bytes port shared by secure storage and
//! key ring persistence. [`SecureStorageService`] encrypts values, gates
//! access behind biometric authentication when asked to, and audits every
//! operation.

pub mod file;
pub mod memory;
pub mod ports;
pub mod service;

pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use ports::StorageBackend;
pub use service::{AccessibilityClass, SecureStorageOptions, SecureStorageService, ITEM_PREFIX};

//! Port interfaces for secure storage
//!
//! A backend is a flat key→bytes map. Values handed to a backend are already
//! encrypted; backends never see plaintext.

use async_trait::async_trait;

use crate::error::PrivacyResult;

/// Key→bytes persistence used by secure storage and key ring persistence
#[async_trait]
pub trait StorageBackend: Send + Sync + std::fmt::Debug {
    /// Insert or overwrite a value
    async fn put(&self, key: &str, value: Vec<u8>) -> PrivacyResult<()>;

    /// Read a value, `None` when absent
    async fn get(&self, key: &str) -> PrivacyResult<Option<Vec<u8>>>;

    /// Overwrite the stored bytes, then remove the entry
    ///
    /// Returns whether an entry existed.
    async fn secure_delete(&self, key: &str) -> PrivacyResult<bool>;

    /// Whether a value exists under `key`
    async fn contains(&self, key: &str) -> PrivacyResult<bool>;

    /// All keys starting with `prefix`, sorted
    async fn list_keys(&self, prefix: &str) -> PrivacyResult<Vec<String>>;
}

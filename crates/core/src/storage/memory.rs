//! In-memory storage backend

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use zeroize::Zeroize;

use super::ports::StorageBackend;
use crate::error::PrivacyResult;

/// Process-local backend; contents are lost on drop
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    /// Empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn put(&self, key: &str, value: Vec<u8>) -> PrivacyResult<()> {
        let mut entries = self.entries.write();
        if let Some(mut previous) = entries.insert(key.to_string(), value) {
            previous.zeroize();
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> PrivacyResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn secure_delete(&self, key: &str) -> PrivacyResult<bool> {
        match self.entries.write().remove(key) {
            Some(mut value) => {
                value.zeroize();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn contains(&self, key: &str) -> PrivacyResult<bool> {
        Ok(self.entries.read().contains_key(key))
    }

    async fn list_keys(&self, prefix: &str) -> PrivacyResult<Vec<String>> {
        let mut keys: Vec<String> =
            self.entries.read().keys().filter(|k| k.starts_with(prefix)).cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for storage::memory.
    use super::*;

    /// Validates `MemoryBackend` behavior for the put/get/delete scenario.
    ///
    /// Assertions:
    /// - Confirms stored values are readable and overwritten in place.
    /// - Confirms delete reports whether an entry existed.
    #[tokio::test]
    async fn test_memory_backend_lifecycle() {
        let backend = MemoryBackend::new();
        backend.put("a", b"one".to_vec()).await.unwrap();
        backend.put("a", b"two".to_vec()).await.unwrap();
        assert_eq!(backend.get("a").await.unwrap().as_deref(), Some(&b"two"[..]));
        assert!(backend.contains("a").await.unwrap());

        assert!(backend.secure_delete("a").await.unwrap());
        assert!(!backend.secure_delete("a").await.unwrap());
        assert!(backend.get("a").await.unwrap().is_none());
        assert!(backend.is_empty());
    }

    /// Validates `MemoryBackend::list_keys` behavior for the prefix scenario.
    ///
    /// Assertions:
    /// - Confirms only matching keys are returned, sorted.
    #[tokio::test]
    async fn test_memory_backend_list_prefix() {
        let backend = MemoryBackend::new();
        for key in ["item/b", "item/a", "__keystore/general"] {
            backend.put(key, vec![1]).await.unwrap();
        }
        assert_eq!(backend.list_keys("item/").await.unwrap(), vec!["item/a", "item/b"]);
        assert_eq!(backend.len(), 3);
    }

    /// Validates `MemoryBackend` behavior for the shared trait object scenario.
    ///
    /// Assertions:
    /// - Confirms a write through one `Arc<dyn StorageBackend>` handle is
    ///   visible through another.
    #[test]
    fn test_memory_backend_shared_handles() {
        tokio_test::block_on(async {
            let backend: std::sync::Arc<dyn StorageBackend> = std::sync::Arc::new(MemoryBackend::new());
            let other = std::sync::Arc::clone(&backend);
            backend.put("shared", b"v".to_vec()).await.unwrap();
            assert!(other.contains("shared").await.unwrap());
        });
    }
}

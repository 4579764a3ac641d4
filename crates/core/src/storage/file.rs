//! Directory-backed storage
//!
//! One file per key. File names are the hex encoding of the key so arbitrary
//! key strings map to safe names. Writes go to a temporary sibling and are
//! renamed into place; deletes overwrite the file with zeros and fsync before
//! unlinking.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use aegis_common::CommonError;
use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

use super::ports::StorageBackend;
use crate::error::PrivacyResult;

const VALUE_EXTENSION: &str = "bin";
const TEMP_EXTENSION: &str = "tmp";

/// One file per key under a root directory, written atomically
#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    /// Open (creating if needed) a backend rooted at `root`
    pub async fn open(root: impl Into<PathBuf>) -> PrivacyResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| CommonError::persistence_op("create_dir", e.to_string()))?;
        Ok(Self { root })
    }

    /// Directory holding the value files
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.{VALUE_EXTENSION}", hex::encode(key.as_bytes())))
    }

    fn key_for(path: &Path) -> Option<String> {
        if path.extension()?.to_str()? != VALUE_EXTENSION {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        String::from_utf8(hex::decode(stem).ok()?).ok()
    }
}

fn storage_error(operation: &str, err: std::io::Error) -> CommonError {
    CommonError::storage_op(operation, err.to_string())
}

#[async_trait]
impl StorageBackend for FileBackend {
    #[instrument(skip(self, value), fields(bytes = value.len()))]
    async fn put(&self, key: &str, value: Vec<u8>) -> PrivacyResult<()> {
        let path = self.path_for(key);
        let temp = path.with_extension(TEMP_EXTENSION);

        let mut file = fs::File::create(&temp).await.map_err(|e| storage_error("create", e))?;
        file.write_all(&value).await.map_err(|e| storage_error("write", e))?;
        file.sync_all().await.map_err(|e| storage_error("fsync", e))?;
        drop(file);

        fs::rename(&temp, &path).await.map_err(|e| storage_error("rename", e))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> PrivacyResult<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error("read", e).into()),
        }
    }

    #[instrument(skip(self))]
    async fn secure_delete(&self, key: &str) -> PrivacyResult<bool> {
        let path = self.path_for(key);
        let len = match fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(storage_error("stat", e).into()),
        };

        let mut file = fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .await
            .map_err(|e| storage_error("open", e))?;
        let zeros = vec![0u8; usize::try_from(len).unwrap_or(usize::MAX)];
        file.write_all(&zeros).await.map_err(|e| storage_error("overwrite", e))?;
        file.sync_all().await.map_err(|e| storage_error("fsync", e))?;
        drop(file);

        fs::remove_file(&path).await.map_err(|e| storage_error("remove", e))?;
        debug!(bytes = len, "Securely erased stored value");
        Ok(true)
    }

    async fn contains(&self, key: &str) -> PrivacyResult<bool> {
        Ok(fs::try_exists(self.path_for(key)).await.map_err(|e| storage_error("stat", e))?)
    }

    async fn list_keys(&self, prefix: &str) -> PrivacyResult<Vec<String>> {
        let mut dir = fs::read_dir(&self.root).await.map_err(|e| storage_error("read_dir", e))?;
        let mut keys = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(|e| storage_error("read_dir", e))? {
            if let Some(key) = Self::key_for(&entry.path()) {
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

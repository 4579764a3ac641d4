//! Directory-backed audit store
//!
//! Layout under the root directory:
//!
//! ```text
//! segment-000003.jsonl        active segment, one AuditEntry per line
//! head.json                   chain head, replaced atomically via rename
//! anchor.json                 last purged link, if any
//! archive/segment-000001.jsonl
//! archive/segment-000002.jsonl
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use aegis_common::CommonError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::event::AuditEntry;
use super::ports::{AuditStore, ChainAnchor, ChainHead};
use crate::error::{PrivacyError, PrivacyResult};

const ARCHIVE_DIR: &str = "archive";
const HEAD_FILE: &str = "head.json";
const ANCHOR_FILE: &str = "anchor.json";
const SEGMENT_PREFIX: &str = "segment-";
const SEGMENT_SUFFIX: &str = ".jsonl";

#[derive(Debug)]
struct ActiveSegment {
    number: u32,
    bytes: u64,
}

/// Segmented JSONL audit store on the local filesystem
#[derive(Debug)]
pub struct FileAuditStore {
    root: PathBuf,
    active: Mutex<ActiveSegment>,
}

fn io_error(operation: &str, err: std::io::Error) -> PrivacyError {
    PrivacyError::Common(CommonError::persistence_op(operation, err.to_string()))
}

fn segment_name(number: u32) -> String {
    format!("{SEGMENT_PREFIX}{number:06}{SEGMENT_SUFFIX}")
}

fn segment_number(path: &Path) -> Option<u32> {
    let name = path.file_name()?.to_str()?;
    name.strip_prefix(SEGMENT_PREFIX)?.strip_suffix(SEGMENT_SUFFIX)?.parse().ok()
}

async fn list_segments(dir: &Path) -> PrivacyResult<Vec<(u32, PathBuf)>> {
    let mut segments = Vec::new();
    let mut entries = fs::read_dir(dir).await.map_err(|e| io_error("read_dir", e))?;
    while let Some(entry) = entries.next_entry().await.map_err(|e| io_error("read_dir", e))? {
        let path = entry.path();
        if let Some(number) = segment_number(&path) {
            segments.push((number, path));
        }
    }
    segments.sort_by_key(|(number, _)| *number);
    Ok(segments)
}

async fn read_segment(path: &Path) -> PrivacyResult<Vec<AuditEntry>> {
    let contents = match fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_error("read_segment", e)),
    };
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(PrivacyError::from))
        .collect()
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> PrivacyResult<Option<T>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_error("read", e)),
    }
}

async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> PrivacyResult<()> {
    let temp = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(value)?;
    let mut file = fs::File::create(&temp).await.map_err(|e| io_error("create", e))?;
    file.write_all(&bytes).await.map_err(|e| io_error("write", e))?;
    file.sync_all().await.map_err(|e| io_error("fsync", e))?;
    drop(file);
    fs::rename(&temp, path).await.map_err(|e| io_error("rename", e))
}

impl FileAuditStore {
    /// Open the store at `root`, resuming the newest active segment
    pub async fn open(root: impl Into<PathBuf>) -> PrivacyResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(ARCHIVE_DIR)).await.map_err(|e| io_error("create_dir", e))?;

        let active = match list_segments(&root).await?.pop() {
            Some((number, path)) => {
                let bytes = fs::metadata(&path).await.map_err(|e| io_error("stat", e))?.len();
                ActiveSegment { number, bytes }
            }
            None => {
                let archived = list_segments(&root.join(ARCHIVE_DIR)).await?;
                let number = archived.last().map_or(1, |(n, _)| n + 1);
                ActiveSegment { number, bytes: 0 }
            }
        };

        info!(root = %root.display(), segment = active.number, "Opened audit store");
        Ok(Self { root, active: Mutex::new(active) })
    }

    /// Directory holding the segments and the chain head
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the segment file currently receiving appends
    pub async fn active_segment_path(&self) -> PathBuf {
        self.root.join(segment_name(self.active.lock().await.number))
    }

    /// Archived segment files, oldest first
    pub async fn archived_segment_paths(&self) -> PrivacyResult<Vec<PathBuf>> {
        Ok(list_segments(&self.root.join(ARCHIVE_DIR)).await?.into_iter().map(|(_, p)| p).collect())
    }
}

#[async_trait]
impl AuditStore for FileAuditStore {
    async fn load_head(&self) -> PrivacyResult<Option<ChainHead>> {
        let head: Option<ChainHead> = read_json(&self.root.join(HEAD_FILE)).await?;

        // A crash between the segment write and the head rename leaves the
        // head one entry behind the segment
        let active_path = self.active_segment_path().await;
        let last = read_segment(&active_path).await?.pop();
        match (head, last) {
            (Some(head), Some(last)) if last.sequence > head.sequence => {
                warn!(head = head.sequence, segment = last.sequence, "Audit head behind segment");
                Ok(Some(ChainHead::of(&last)))
            }
            (None, Some(last)) => Ok(Some(ChainHead::of(&last))),
            (head, _) => Ok(head),
        }
    }

    async fn append(&self, entry: &AuditEntry) -> PrivacyResult<u64> {
        let mut active = self.active.lock().await;
        let path = self.root.join(segment_name(active.number));

        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| io_error("open_segment", e))?;
        file.write_all(&line).await.map_err(|e| io_error("append", e))?;
        file.sync_data().await.map_err(|e| io_error("fsync", e))?;
        drop(file);
        active.bytes += line.len() as u64;

        // A failed head write is repaired from the segment by `load_head`
        write_json_atomic(&self.root.join(HEAD_FILE), &ChainHead::of(entry)).await?;
        Ok(active.bytes)
    }

    async fn entries(&self) -> PrivacyResult<Vec<AuditEntry>> {
        let active_number = self.active.lock().await.number;
        let mut entries = Vec::new();
        for (_, path) in list_segments(&self.root.join(ARCHIVE_DIR)).await? {
            entries.extend(read_segment(&path).await?);
        }
        entries.extend(read_segment(&self.root.join(segment_name(active_number))).await?);
        Ok(entries)
    }

    async fn roll_over(&self) -> PrivacyResult<u32> {
        let mut active = self.active.lock().await;
        let sealed = active.number;
        let from = self.root.join(segment_name(sealed));
        let to = self.root.join(ARCHIVE_DIR).join(segment_name(sealed));

        match fs::rename(&from, &to).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(io_error("archive_segment", e)),
        }

        active.number = sealed + 1;
        active.bytes = 0;
        info!(archived = sealed, active = active.number, "Audit segment rolled over");
        Ok(sealed)
    }

    async fn purge_archived_before(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> PrivacyResult<Option<ChainAnchor>> {
        let mut anchor = None;
        for (number, path) in list_segments(&self.root.join(ARCHIVE_DIR)).await? {
            let Some(newest) = read_segment(&path).await?.pop() else {
                fs::remove_file(&path).await.map_err(|e| io_error("remove_segment", e))?;
                continue;
            };
            if newest.event.timestamp >= cutoff {
                break;
            }
            let next = ChainAnchor {
                sequence: newest.sequence,
                checksum: newest.checksum,
                purged_at: now,
            };
            // Anchor first so a crash never leaves a gap without an anchor
            write_json_atomic(&self.root.join(ANCHOR_FILE), &next).await?;
            fs::remove_file(&path).await.map_err(|e| io_error("remove_segment", e))?;
            info!(segment = number, last_sequence = next.sequence, "Purged audit segment");
            anchor = Some(next);
        }
        Ok(anchor)
    }

    async fn anchor(&self) -> PrivacyResult<Option<ChainAnchor>> {
        read_json(&self.root.join(ANCHOR_FILE)).await
    }
}

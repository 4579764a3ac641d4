//! Port interfaces for audit persistence
//!
//! A store keeps entries in segments: one active segment that receives
//! appends, and archived segments sealed by a rollover. Only archived
//! segments are ever purged.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::AuditEntry;
use crate::error::PrivacyResult;

/// Latest appended link, persisted so restarts continue the chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHead {
    /// Sequence of the last appended entry
    pub sequence: u64,
    /// Checksum of the last appended entry
    pub checksum: String,
}

impl ChainHead {
    /// Head pointing at `entry`
    pub fn of(entry: &AuditEntry) -> Self {
        Self { sequence: entry.sequence, checksum: entry.checksum.clone() }
    }
}

/// Last link removed by a retention purge
///
/// Verification restarts from the anchor instead of genesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainAnchor {
    /// Sequence of the newest purged entry
    pub sequence: u64,
    /// Checksum of the newest purged entry
    pub checksum: String,
    /// When the purge ran
    pub purged_at: DateTime<Utc>,
}

/// Persistence for the audit chain
#[async_trait]
pub trait AuditStore: Send + Sync + std::fmt::Debug {
    /// The persisted chain head, `None` for an empty store
    async fn load_head(&self) -> PrivacyResult<Option<ChainHead>>;

    /// Persist an entry and advance the head
    ///
    /// Returns the size in bytes of the active segment after the append.
    async fn append(&self, entry: &AuditEntry) -> PrivacyResult<u64>;

    /// Every retained entry, archived segments first, in sequence order
    async fn entries(&self) -> PrivacyResult<Vec<AuditEntry>>;

    /// Seal the active segment into the archive and start a new one
    ///
    /// Returns the archived segment number.
    async fn roll_over(&self) -> PrivacyResult<u32>;

    /// Remove archived segments whose newest entry is older than `cutoff`
    ///
    /// Returns the new anchor, stamped with `now`, when anything was removed.
    async fn purge_archived_before(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> PrivacyResult<Option<ChainAnchor>>;

    /// Current purge anchor, if any purge has run
    async fn anchor(&self) -> PrivacyResult<Option<ChainAnchor>>;
}

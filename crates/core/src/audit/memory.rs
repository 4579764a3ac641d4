//! In-memory audit store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::event::AuditEntry;
use super::ports::{AuditStore, ChainAnchor, ChainHead};
use crate::error::PrivacyResult;

#[derive(Debug, Default)]
struct Segment {
    number: u32,
    entries: Vec<AuditEntry>,
    bytes: u64,
}

#[derive(Debug, Default)]
struct MemoryState {
    archived: Vec<Segment>,
    active: Segment,
    head: Option<ChainHead>,
    anchor: Option<ChainAnchor>,
}

/// Audit store kept entirely in memory
#[derive(Debug)]
pub struct MemoryAuditStore {
    state: Mutex<MemoryState>,
}

impl Default for MemoryAuditStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAuditStore {
    /// Empty store with segment 1 active
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                active: Segment { number: 1, ..Segment::default() },
                ..MemoryState::default()
            }),
        }
    }

    /// Overwrite a stored entry in place, bypassing the chain
    ///
    /// Simulates an out-of-band edit. Returns `false` when no entry has that
    /// sequence number.
    pub fn replace_entry(&self, sequence: u64, entry: AuditEntry) -> bool {
        let mut state = self.state.lock();
        let MemoryState { archived, active, .. } = &mut *state;
        archived
            .iter_mut()
            .chain(std::iter::once(active))
            .flat_map(|segment| segment.entries.iter_mut())
            .find(|e| e.sequence == sequence)
            .map(|slot| *slot = entry)
            .is_some()
    }

    /// Number of sealed segments
    pub fn archived_segments(&self) -> usize {
        self.state.lock().archived.len()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn load_head(&self) -> PrivacyResult<Option<ChainHead>> {
        Ok(self.state.lock().head.clone())
    }

    async fn append(&self, entry: &AuditEntry) -> PrivacyResult<u64> {
        let line_len = serde_json::to_vec(entry)?.len() as u64 + 1;
        let mut state = self.state.lock();
        state.active.entries.push(entry.clone());
        state.active.bytes += line_len;
        state.head = Some(ChainHead::of(entry));
        Ok(state.active.bytes)
    }

    async fn entries(&self) -> PrivacyResult<Vec<AuditEntry>> {
        let state = self.state.lock();
        Ok(state
            .archived
            .iter()
            .chain(std::iter::once(&state.active))
            .flat_map(|segment| segment.entries.iter().cloned())
            .collect())
    }

    async fn roll_over(&self) -> PrivacyResult<u32> {
        let mut state = self.state.lock();
        let next = Segment { number: state.active.number + 1, ..Segment::default() };
        let sealed = std::mem::replace(&mut state.active, next);
        let number = sealed.number;
        state.archived.push(sealed);
        Ok(number)
    }

    async fn purge_archived_before(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> PrivacyResult<Option<ChainAnchor>> {
        let mut state = self.state.lock();
        let mut anchor = None;
        while let Some(segment) = state.archived.first() {
            let Some(newest) = segment.entries.last() else {
                state.archived.remove(0);
                continue;
            };
            if newest.event.timestamp >= cutoff {
                break;
            }
            anchor = Some(ChainAnchor {
                sequence: newest.sequence,
                checksum: newest.checksum.clone(),
                purged_at: now,
            });
            state.archived.remove(0);
        }
        if anchor.is_some() {
            state.anchor.clone_from(&anchor);
        }
        Ok(anchor)
    }

    async fn anchor(&self) -> PrivacyResult<Option<ChainAnchor>> {
        Ok(self.state.lock().anchor.clone())
    }
}

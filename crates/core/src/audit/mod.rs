//! Tamper-evident audit journal
//!
//! Every entry links to its predecessor through a SHA-256 checksum starting
//! from a fixed genesis value, so any out-of-band edit, deletion or
//! reordering is detected by [`AuditLogger::verify_chain_integrity`].
//!
//! Persistence goes through the [`AuditStore`] port:
//! - [`MemoryAuditStore`] for tests and ephemeral engines
//! - [`FileAuditStore`] for JSON-lines segments on disk

pub mod event;
pub mod file_store;
pub mod logger;
pub mod memory;
pub mod ports;

pub use event::{
    compute_checksum, genesis_checksum, AuditEntry, AuditEvent, AuditEventType, AuditFilter,
    AuditOutcome, AuditSeverity,
};
pub use file_store::FileAuditStore;
pub use logger::{AuditLogger, AuditStatistics, ChainVerification};
pub use memory::MemoryAuditStore;
pub use ports::{AuditStore, ChainAnchor, ChainHead};

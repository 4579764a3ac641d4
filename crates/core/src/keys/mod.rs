//! Key lifecycle: contexts, rings, rotation and the master key
//!
//! Keys are created on first use per [`EncryptionContext`], rotated on
//! schedule or on demand, and retired once their grace window closes or
//! every envelope sealed under them has been migrated.

pub mod master;
pub mod model;
pub mod schedule;
pub mod store;

pub use master::MasterKeySource;
pub use model::{EncryptionContext, KeyHandle, KeyMetadata, KeyState, SymmetricKey};
pub use schedule::{EncryptionLevel, RotationSchedule};
pub use store::{KeyStore, SweepReport, KEYSTORE_PREFIX};

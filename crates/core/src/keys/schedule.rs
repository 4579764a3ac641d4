//! Encryption levels and rotation timing

use std::time::Duration;

use aegis_common::impl_status_conversions;
use aegis_common::time::add_saturating;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const DAY: u64 = 24 * 60 * 60;

/// Protection tier, ordered from weakest to strongest
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionLevel {
    /// 365-day rotation
    Basic,
    /// 90-day rotation
    #[default]
    Standard,
    /// 30-day rotation
    High,
    /// 7-day rotation, biometric-gated storage
    Maximum,
}

impl_status_conversions!(EncryptionLevel {
    Basic => "basic",
    Standard => "standard",
    High => "high",
    Maximum => "maximum",
});

impl EncryptionLevel {
    /// Default key rotation interval for this level
    pub fn rotation_interval(self) -> Duration {
        match self {
            Self::Basic => Duration::from_secs(365 * DAY),
            Self::Standard => Duration::from_secs(90 * DAY),
            Self::High => Duration::from_secs(30 * DAY),
            Self::Maximum => Duration::from_secs(7 * DAY),
        }
    }

    /// `Maximum` gates secure storage behind biometric authentication
    pub fn requires_biometric(self) -> bool {
        matches!(self, Self::Maximum)
    }
}

/// Rotation interval and grace window applied to every context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationSchedule {
    /// Age at which an active key is rotated
    pub interval: Duration,
    /// How long a retiring key still decrypts
    pub grace_period: Duration,
}

impl RotationSchedule {
    /// Schedule from explicit durations
    pub fn new(interval: Duration, grace_period: Duration) -> Self {
        Self { interval, grace_period }
    }

    /// When a key created at `created_at` is due for rotation
    pub fn rotation_due(&self, created_at: DateTime<Utc>) -> DateTime<Utc> {
        add_saturating(created_at, self.interval)
    }

    /// When a key retiring since `retiring_since` is retired
    pub fn grace_deadline(&self, retiring_since: DateTime<Utc>) -> DateTime<Utc> {
        add_saturating(retiring_since, self.grace_period)
    }
}

impl Default for RotationSchedule {
    fn default() -> Self {
        Self::new(EncryptionLevel::default().rotation_interval(), Duration::from_secs(7 * DAY))
    }
}

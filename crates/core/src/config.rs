//! Engine configuration
//!
//! Loaded from a TOML or JSON file (format chosen by extension) and/or
//! overlaid from `AEGIS_*` environment variables. Every update goes through
//! [`PrivacyConfiguration::validate`]; a rejected update leaves the previous
//! configuration in effect.
//!
//! ## Environment Variables
//! - `AEGIS_DEFAULT_ALGORITHM`: `aes256gcm`
//! - `AEGIS_DEFAULT_ENCRYPTION_LEVEL`: `basic` | `standard` | `high` | `maximum`
//! - `AEGIS_AUDIT_ENABLED`: `true` / `false`
//! - `AEGIS_AUDIT_MAX_SIZE`: segment size threshold in bytes
//! - `AEGIS_AUDIT_RETENTION_SECS`: audit retention in seconds
//! - `AEGIS_BIOMETRIC_ENABLED`: `true` / `false`
//! - `AEGIS_BIOMETRIC_SESSION_TTL_SECS`: biometric session lifetime
//! - `AEGIS_DATA_RETENTION_SECS`: data retention in seconds
//! - `AEGIS_SENSITIVE_SCAN_ENABLED`: `true` / `false`
//! - `AEGIS_COMPLIANCE_MODE`: `permissive` | `standard` | `strict` | `enterprise`
//! - `AEGIS_ENABLED_REGULATIONS`: comma separated, e.g. `gdpr,hipaa`
//! - `AEGIS_KEY_ROTATION_INTERVAL_SECS`: overrides the level's interval
//! - `AEGIS_KEY_GRACE_PERIOD_SECS`: grace window for retiring keys
//! - `AEGIS_TOKEN_SESSION_TTL_SECS`: session token lifetime
//! - `AEGIS_MAX_CONCURRENT_REQUESTS`: engine request concurrency bound
//! - `AEGIS_MAINTENANCE_INTERVAL_SECS`: background maintenance period

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::compliance::{ComplianceMode, Regulation};
use crate::crypto::EncryptionAlgorithm;
use crate::error::{ConfigurationFailure, PrivacyResult};
use crate::keys::{EncryptionLevel, RotationSchedule};

const MINUTE: u64 = 60;
const DAY: u64 = 24 * 60 * MINUTE;

/// Smallest accepted audit segment threshold
pub const MIN_AUDIT_SEGMENT_BYTES: u64 = 4096;

const ENV_PREFIX: &str = "AEGIS_";

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacyConfiguration {
    /// Cipher used for new envelopes
    pub default_algorithm: EncryptionAlgorithm,
    /// Baseline protection level; sets the default rotation interval
    pub default_encryption_level: EncryptionLevel,
    /// Record audit entries
    pub audit_enabled: bool,
    /// Audit segment rollover threshold in bytes
    pub audit_max_size: u64,
    /// Archived segments older than this are purged
    #[serde(with = "aegis_common::duration_secs")]
    pub audit_retention_period: Duration,
    /// Require authentication for protected reads
    pub biometric_enabled: bool,
    /// How long a successful authentication is reused
    #[serde(with = "aegis_common::duration_secs")]
    pub biometric_session_ttl: Duration,
    /// Stored items older than this are purged
    #[serde(with = "aegis_common::duration_secs")]
    pub data_retention_period: Duration,
    /// Scan plaintext for sensitive patterns before encryption
    pub sensitive_scan_enabled: bool,
    /// Strictness of compliance enforcement
    pub compliance_mode: ComplianceMode,
    /// Regulations evaluated by the compliance engine
    pub enabled_regulations: Vec<Regulation>,
    /// Overrides the level's rotation interval when set
    #[serde(with = "aegis_common::option_duration_secs")]
    pub key_rotation_interval: Option<Duration>,
    /// Retired keys still decrypt for this long
    #[serde(with = "aegis_common::duration_secs")]
    pub key_grace_period: Duration,
    /// Lifetime of reversible tokens
    #[serde(with = "aegis_common::duration_secs")]
    pub token_session_ttl: Duration,
    /// Permits on the request semaphore
    pub max_concurrent_requests: usize,
    /// Period of the background maintenance loop
    #[serde(with = "aegis_common::duration_secs")]
    pub maintenance_interval: Duration,
}

impl Default for PrivacyConfiguration {
    fn default() -> Self {
        Self {
            default_algorithm: EncryptionAlgorithm::Aes256Gcm,
            default_encryption_level: EncryptionLevel::Standard,
            audit_enabled: true,
            audit_max_size: 10 * 1024 * 1024,
            audit_retention_period: Duration::from_secs(6 * 365 * DAY),
            biometric_enabled: true,
            biometric_session_ttl: Duration::from_secs(5 * MINUTE),
            data_retention_period: Duration::from_secs(365 * DAY),
            sensitive_scan_enabled: true,
            compliance_mode: ComplianceMode::Standard,
            enabled_regulations: vec![Regulation::Gdpr],
            key_rotation_interval: None,
            key_grace_period: Duration::from_secs(7 * DAY),
            token_session_ttl: Duration::from_secs(30 * MINUTE),
            max_concurrent_requests: 64,
            maintenance_interval: Duration::from_secs(60 * MINUTE),
        }
    }
}

impl PrivacyConfiguration {
    /// Rotation interval in effect: the override, else the level's default
    pub fn rotation_interval(&self) -> Duration {
        self.key_rotation_interval
            .unwrap_or_else(|| self.default_encryption_level.rotation_interval())
    }

    /// Schedule built from the interval and grace period
    pub fn rotation_schedule(&self) -> RotationSchedule {
        RotationSchedule::new(self.rotation_interval(), self.key_grace_period)
    }

    /// Check every field, reporting the first failure
    pub fn validate(&self) -> Result<(), ConfigurationFailure> {
        if self.audit_max_size < MIN_AUDIT_SEGMENT_BYTES {
            return Err(ConfigurationFailure::rejected(
                "audit_max_size",
                format!("must be at least {MIN_AUDIT_SEGMENT_BYTES} bytes"),
            ));
        }
        if self.data_retention_period.is_zero() {
            return Err(ConfigurationFailure::rejected(
                "data_retention_period",
                "must be greater than zero",
            ));
        }
        if self.audit_retention_period.is_zero() {
            return Err(ConfigurationFailure::rejected(
                "audit_retention_period",
                "must be greater than zero",
            ));
        }
        if self.key_grace_period.is_zero() {
            return Err(ConfigurationFailure::rejected(
                "key_grace_period",
                "must be greater than zero",
            ));
        }
        if self.key_grace_period >= self.rotation_interval() {
            return Err(ConfigurationFailure::rejected(
                "key_grace_period",
                "must be shorter than the rotation interval",
            ));
        }
        if self.biometric_session_ttl.is_zero() {
            return Err(ConfigurationFailure::rejected(
                "biometric_session_ttl",
                "must be greater than zero",
            ));
        }
        if self.token_session_ttl.is_zero() {
            return Err(ConfigurationFailure::rejected(
                "token_session_ttl",
                "must be greater than zero",
            ));
        }
        if self.max_concurrent_requests == 0 {
            return Err(ConfigurationFailure::rejected(
                "max_concurrent_requests",
                "must be at least 1",
            ));
        }
        if self.maintenance_interval.is_zero() {
            return Err(ConfigurationFailure::rejected(
                "maintenance_interval",
                "must be greater than zero",
            ));
        }
        if self.compliance_mode >= ComplianceMode::Strict && !self.audit_enabled {
            return Err(ConfigurationFailure::rejected(
                "audit_enabled",
                format!("{} compliance mode requires audit logging", self.compliance_mode),
            ));
        }
        if self.compliance_mode == ComplianceMode::Enterprise
            && self.default_encryption_level < EncryptionLevel::High
        {
            return Err(ConfigurationFailure::rejected(
                "default_encryption_level",
                "enterprise compliance mode requires high or maximum",
            ));
        }
        Ok(())
    }

    /// Load and validate a TOML or JSON file
    pub fn from_file(path: impl AsRef<Path>) -> PrivacyResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration from file");
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ConfigurationFailure::Load(format!("failed to read {}: {e}", path.display()))
        })?;
        let config = Self::parse(&contents, path)?;
        config.validate()?;
        Ok(config)
    }

    fn parse(contents: &str, path: &Path) -> Result<Self, ConfigurationFailure> {
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
        match extension {
            "toml" => toml::from_str(contents)
                .map_err(|e| ConfigurationFailure::Load(format!("invalid TOML: {e}"))),
            "json" => serde_json::from_str(contents)
                .map_err(|e| ConfigurationFailure::Load(format!("invalid JSON: {e}"))),
            other => Err(ConfigurationFailure::Load(format!("unsupported config format: {other}"))),
        }
    }

    /// Defaults overlaid with `AEGIS_*` environment variables
    pub fn from_env() -> PrivacyResult<Self> {
        let mut config = Self::default();
        config.apply_overrides(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `AEGIS_*` key/value pairs; other keys are ignored
    ///
    /// Does not validate; callers validate the finished configuration.
    pub fn apply_overrides<I, K, V>(&mut self, vars: I) -> Result<(), ConfigurationFailure>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref().trim();
            match name {
                "DEFAULT_ALGORITHM" => self.default_algorithm = parse_enum(name, value)?,
                "DEFAULT_ENCRYPTION_LEVEL" => {
                    self.default_encryption_level = parse_enum(name, value)?;
                }
                "AUDIT_ENABLED" => self.audit_enabled = parse_bool(name, value)?,
                "AUDIT_MAX_SIZE" => self.audit_max_size = parse_num(name, value)?,
                "AUDIT_RETENTION_SECS" => self.audit_retention_period = parse_secs(name, value)?,
                "BIOMETRIC_ENABLED" => self.biometric_enabled = parse_bool(name, value)?,
                "BIOMETRIC_SESSION_TTL_SECS" => {
                    self.biometric_session_ttl = parse_secs(name, value)?;
                }
                "DATA_RETENTION_SECS" => self.data_retention_period = parse_secs(name, value)?,
                "SENSITIVE_SCAN_ENABLED" => self.sensitive_scan_enabled = parse_bool(name, value)?,
                "COMPLIANCE_MODE" => self.compliance_mode = parse_enum(name, value)?,
                "ENABLED_REGULATIONS" => {
                    self.enabled_regulations = value
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(|s| {
                            s.parse::<Regulation>()
                                .map_err(|e| ConfigurationFailure::rejected(env_name(name), e.to_string()))
                        })
                        .collect::<Result<_, _>>()?;
                }
                "KEY_ROTATION_INTERVAL_SECS" => {
                    self.key_rotation_interval = Some(parse_secs(name, value)?);
                }
                "KEY_GRACE_PERIOD_SECS" => self.key_grace_period = parse_secs(name, value)?,
                "TOKEN_SESSION_TTL_SECS" => self.token_session_ttl = parse_secs(name, value)?,
                "MAX_CONCURRENT_REQUESTS" => self.max_concurrent_requests = parse_num(name, value)?,
                "MAINTENANCE_INTERVAL_SECS" => self.maintenance_interval = parse_secs(name, value)?,
                _ => {
                    debug!(variable = %key.as_ref(), "Ignoring unknown configuration variable");
                }
            }
        }
        Ok(())
    }
}

fn env_name(name: &str) -> String {
    format!("{ENV_PREFIX}{name}")
}

fn parse_enum<T: FromStr<Err = String>>(name: &str, value: &str) -> Result<T, ConfigurationFailure> {
    value.parse().map_err(|e: String| ConfigurationFailure::rejected(env_name(name), e))
}

fn parse_num<T: FromStr>(name: &str, value: &str) -> Result<T, ConfigurationFailure>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| ConfigurationFailure::rejected(env_name(name), e.to_string()))
}

fn parse_secs(name: &str, value: &str) -> Result<Duration, ConfigurationFailure> {
    parse_num::<u64>(name, value).map(Duration::from_secs)
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigurationFailure> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigurationFailure::rejected(env_name(name), format!("not a boolean: {value}"))),
    }
}

/// Current configuration with atomic validated swaps
///
/// Readers get a cheap `Arc` snapshot; writers validate a candidate before
/// publishing it.
#[derive(Debug)]
pub struct ConfigStore {
    current: RwLock<Arc<PrivacyConfiguration>>,
}

impl ConfigStore {
    /// Store seeded with a validated configuration
    pub fn new(config: PrivacyConfiguration) -> Result<Self, ConfigurationFailure> {
        config.validate()?;
        Ok(Self { current: RwLock::new(Arc::new(config)) })
    }

    /// Snapshot of the configuration in effect
    pub fn current(&self) -> Arc<PrivacyConfiguration> {
        self.current.read().clone()
    }

    /// Replace the configuration if `candidate` validates
    pub fn replace(
        &self,
        candidate: PrivacyConfiguration,
    ) -> Result<Arc<PrivacyConfiguration>, ConfigurationFailure> {
        candidate.validate()?;
        let candidate = Arc::new(candidate);
        *self.current.write() = candidate.clone();
        Ok(candidate)
    }

    /// Edit a copy of the current configuration and publish it if it validates
    pub fn update(
        &self,
        edit: impl FnOnce(&mut PrivacyConfiguration),
    ) -> Result<Arc<PrivacyConfiguration>, ConfigurationFailure> {
        let mut guard = self.current.write();
        let mut candidate = PrivacyConfiguration::clone(&guard);
        edit(&mut candidate);
        candidate.validate()?;
        let candidate = Arc::new(candidate);
        *guard = candidate.clone();
        Ok(candidate)
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for config.
    use std::io::Write;

    use super::*;

    /// Validates `PrivacyConfiguration::default` behavior for the baseline
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms the default configuration validates.
    /// - Confirms the rotation schedule follows the default level.
    #[test]
    fn test_defaults_validate() {
        let config = PrivacyConfiguration::default();
        config.validate().unwrap();
        assert_eq!(config.rotation_interval(), EncryptionLevel::Standard.rotation_interval());
        assert_eq!(config.rotation_schedule().grace_period, Duration::from_secs(7 * DAY));
    }

    /// Validates `PrivacyConfiguration::validate` behavior for the rejection
    /// rules.
    ///
    /// Assertions:
    /// - Ensures a tiny audit segment is rejected.
    /// - Ensures strict mode without audit is rejected.
    /// - Ensures enterprise mode below high encryption is rejected.
    /// - Ensures a grace period longer than the rotation interval is rejected.
    #[test]
    fn test_validation_rules() {
        let field = |config: PrivacyConfiguration| match config.validate() {
            Err(ConfigurationFailure::Rejected { field, .. }) => Some(field),
            _ => None,
        };

        let config = PrivacyConfiguration { audit_max_size: 100, ..Default::default() };
        assert_eq!(field(config).as_deref(), Some("audit_max_size"));

        let config = PrivacyConfiguration {
            compliance_mode: ComplianceMode::Strict,
            audit_enabled: false,
            ..Default::default()
        };
        assert_eq!(field(config).as_deref(), Some("audit_enabled"));

        let config = PrivacyConfiguration {
            compliance_mode: ComplianceMode::Enterprise,
            ..Default::default()
        };
        assert_eq!(field(config).as_deref(), Some("default_encryption_level"));

        let config = PrivacyConfiguration {
            key_rotation_interval: Some(Duration::from_secs(DAY)),
            ..Default::default()
        };
        assert_eq!(field(config).as_deref(), Some("key_grace_period"));
    }

    /// Validates `PrivacyConfiguration::apply_overrides` behavior for the
    /// environment overlay scenario.
    ///
    /// Assertions:
    /// - Confirms recognised variables are applied.
    /// - Confirms unrelated variables are ignored.
    /// - Ensures a malformed value names the variable.
    #[test]
    fn test_env_overrides() {
        let mut config = PrivacyConfiguration::default();
        config
            .apply_overrides([
                ("AEGIS_DEFAULT_ENCRYPTION_LEVEL", "high"),
                ("AEGIS_COMPLIANCE_MODE", "enterprise"),
                ("AEGIS_ENABLED_REGULATIONS", "gdpr, hipaa"),
                ("AEGIS_TOKEN_SESSION_TTL_SECS", "600"),
                ("HOME", "/root"),
            ])
            .unwrap();
        config.validate().unwrap();
        assert_eq!(config.default_encryption_level, EncryptionLevel::High);
        assert_eq!(config.enabled_regulations, vec![Regulation::Gdpr, Regulation::Hipaa]);
        assert_eq!(config.token_session_ttl, Duration::from_secs(600));

        let err = config.apply_overrides([("AEGIS_AUDIT_ENABLED", "maybe")]).unwrap_err();
        assert!(matches!(err, ConfigurationFailure::Rejected { field, .. } if field == "AEGIS_AUDIT_ENABLED"));
    }

    /// Validates `PrivacyConfiguration::from_file` behavior for TOML and
    /// JSON files.
    ///
    /// Assertions:
    /// - Confirms both formats load, with missing fields defaulted.
    /// - Ensures an unknown extension is a load failure.
    #[test]
    fn test_from_file_formats() {
        let dir = tempfile::tempdir().unwrap();

        let toml_path = dir.path().join("aegis.toml");
        let mut file = std::fs::File::create(&toml_path).unwrap();
        writeln!(file, "default_encryption_level = \"high\"\nenabled_regulations = [\"hipaa\"]")
            .unwrap();
        let config = PrivacyConfiguration::from_file(&toml_path).unwrap();
        assert_eq!(config.default_encryption_level, EncryptionLevel::High);
        assert_eq!(config.enabled_regulations, vec![Regulation::Hipaa]);
        assert!(config.audit_enabled);

        let json_path = dir.path().join("aegis.json");
        std::fs::write(&json_path, r#"{"token_session_ttl": 120}"#).unwrap();
        let config = PrivacyConfiguration::from_file(&json_path).unwrap();
        assert_eq!(config.token_session_ttl, Duration::from_secs(120));

        let yaml_path = dir.path().join("aegis.yaml");
        std::fs::write(&yaml_path, "audit_enabled: true").unwrap();
        assert!(matches!(
            PrivacyConfiguration::from_file(&yaml_path),
            Err(crate::error::PrivacyError::Configuration(ConfigurationFailure::Load(_)))
        ));
    }

    /// Validates `ConfigStore::update` behavior for the rejected update
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures an invalid edit is rejected.
    /// - Confirms the previous configuration remains in effect.
    #[test]
    fn test_store_keeps_previous_on_rejection() {
        let store = ConfigStore::new(PrivacyConfiguration::default()).unwrap();
        store.update(|c| c.audit_max_size = 8192).unwrap();

        let result = store.update(|c| {
            c.audit_max_size = 1;
            c.biometric_enabled = false;
        });
        assert!(result.is_err());
        let current = store.current();
        assert_eq!(current.audit_max_size, 8192);
        assert!(current.biometric_enabled);
    }
}

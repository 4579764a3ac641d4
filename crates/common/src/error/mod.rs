//! Shared error vocabulary for the Aegis crates
//!
//! [`CommonError`] covers failures that are not specific to any one
//! subsystem: malformed configuration, I/O against a storage directory,
//! (de)serialization, platform keychain calls. Subsystem errors embed it
//! through a transparent `Common` variant rather than re-declaring the same
//! cases:
//!
//! ```rust,ignore
//! #[derive(Debug, thiserror::Error)]
//! pub enum KeyRingError {
//!     #[error("key ring for '{0}' is sealed")]
//!     Sealed(String),
//!
//!     #[error(transparent)]
//!     Common(#[from] CommonError),
//! }
//!
//! impl_error_conversion!(KeyRingError, Common);
//! impl_error_classification!(KeyRingError, Common,
//!     Self::Sealed(_) => {
//!         retryable: false,
//!         severity: ErrorSeverity::Error,
//!         critical: false,
//!     }
//! );
//! ```
//!
//! Every error type implements [`ErrorClassification`] so callers can decide
//! between retrying, surfacing to the user, or raising an alert without
//! matching on concrete variants.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Result alias for operations that fail with [`CommonError`]
pub type CommonResult<T> = Result<T, CommonError>;

/// Renders `" (label)"` for optional context, or nothing
fn scoped(label: &Option<String>) -> String {
    label.as_deref().map(|l| format!(" ({l})")).unwrap_or_default()
}

/// Cross-cutting failures shared by every subsystem
#[derive(Debug, Clone, Error)]
pub enum CommonError {
    /// Invalid or missing configuration value
    #[error("invalid configuration{}: {message}", scoped(.field))]
    Config { message: String, field: Option<String> },

    /// Lock acquisition failed or was poisoned
    #[error("lock contention{}: {message}", scoped(.resource))]
    Lock { message: String, resource: Option<String> },

    /// A value could not be encoded or decoded
    #[error("cannot (de)serialize{}: {message}", scoped(.format))]
    Serialization { message: String, format: Option<String> },

    /// File or database persistence failed
    #[error("persistence failed{}: {message}", scoped(.operation))]
    Persistence { message: String, operation: Option<String> },

    /// An operation ran past its deadline
    #[error("'{operation}' exceeded its {duration:?} deadline")]
    Timeout { operation: String, duration: Duration },

    /// Platform service failure (keychain, authenticator hardware)
    #[error("{service} backend failed: {message}")]
    Backend { service: String, message: String, is_retryable: bool },

    /// Input rejected by validation
    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String, value: Option<String> },

    /// A requested resource does not exist
    #[error("{resource_type} not found{}", scoped(.identifier))]
    NotFound { resource_type: String, identifier: Option<String> },

    /// The caller may not perform the operation
    #[error("'{operation}' is not permitted")]
    Unauthorized { operation: String, required_permission: Option<String> },

    /// Broken invariant; never expected in a healthy process
    #[error("internal error{}: {message}", scoped(.context))]
    Internal { message: String, context: Option<String> },

    /// Key-value storage backend failure
    #[error("storage backend failed{}: {message}", scoped(.operation))]
    Storage { message: String, operation: Option<String> },

    /// A background task was cancelled before completing
    #[error("task '{task_id}' cancelled{}", scoped(.reason))]
    TaskCancelled { task_id: String, reason: Option<String> },
}

impl CommonError {
    /// Configuration failure not tied to a single field
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into(), field: None }
    }

    /// Configuration failure for `field`
    pub fn config_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config { message: message.into(), field: Some(field.into()) }
    }

    /// Lock failure on `resource`
    pub fn lock(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Lock { message: message.into(), resource: Some(resource.into()) }
    }

    /// Encoding failure in `format` (JSON, base64, ...)
    pub fn serialization(format: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into(), format: Some(format.into()) }
    }

    /// Persistence failure with no operation label
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence { message: message.into(), operation: None }
    }

    /// Persistence failure during `operation`
    pub fn persistence_op(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Persistence { message: message.into(), operation: Some(operation.into()) }
    }

    /// `operation` exceeded `duration`
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout { operation: operation.into(), duration }
    }

    /// Failure of an external platform service
    pub fn backend(
        service: impl Into<String>,
        message: impl Into<String>,
        is_retryable: bool,
    ) -> Self {
        Self::Backend { service: service.into(), message: message.into(), is_retryable }
    }

    /// Validation failure without the rejected value
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation { field: field.into(), message: message.into(), value: None }
    }

    /// Validation failure that records the rejected value
    ///
    /// Only use this for values that are safe to log; never pass personal
    /// data or key material.
    pub fn validation_with_value(
        field: impl Into<String>,
        message: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::Validation { field: field.into(), message: message.into(), value: Some(value.into()) }
    }

    /// Missing resource of `resource_type`
    pub fn not_found(resource_type: impl Into<String>) -> Self {
        Self::NotFound { resource_type: resource_type.into(), identifier: None }
    }

    /// Missing resource identified by `identifier`
    pub fn not_found_with_id(resource_type: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self::NotFound { resource_type: resource_type.into(), identifier: Some(identifier.into()) }
    }

    /// Refused operation
    pub fn unauthorized(operation: impl Into<String>) -> Self {
        Self::Unauthorized { operation: operation.into(), required_permission: None }
    }

    /// Broken internal invariant
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), context: None }
    }

    /// Storage backend failure during `operation`
    pub fn storage_op(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage { message: message.into(), operation: Some(operation.into()) }
    }

    /// Cancellation of `task_id` with its reason
    pub fn task_cancelled(task_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TaskCancelled { task_id: task_id.into(), reason: Some(reason.into()) }
    }

    /// Stable snake_case name, used as the `error_type` tracing field
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Lock { .. } => "lock",
            Self::Serialization { .. } => "serialization",
            Self::Persistence { .. } => "persistence",
            Self::Timeout { .. } => "timeout",
            Self::Backend { .. } => "backend",
            Self::Validation { .. } => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Unauthorized { .. } => "unauthorized",
            Self::Internal { .. } => "internal",
            Self::Storage { .. } => "storage",
            Self::TaskCancelled { .. } => "task_cancelled",
        }
    }

    /// Key/value pairs for structured logging
    ///
    /// Validation values are left out so a rejected input never reaches the
    /// log pipeline.
    pub fn as_tracing_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![("error_type", self.kind().to_string())];
        let mut push = |key: &'static str, value: Option<&String>| {
            if let Some(value) = value {
                fields.push((key, value.clone()));
            }
        };

        match self {
            Self::Config { message, field } => {
                push("message", Some(message));
                push("field", field.as_ref());
            }
            Self::Lock { message, resource } => {
                push("message", Some(message));
                push("resource", resource.as_ref());
            }
            Self::Serialization { message, format } => {
                push("message", Some(message));
                push("format", format.as_ref());
            }
            Self::Persistence { message, operation } | Self::Storage { message, operation } => {
                push("message", Some(message));
                push("operation", operation.as_ref());
            }
            Self::Timeout { operation, duration } => {
                push("operation", Some(operation));
                push("duration_ms", Some(&duration.as_millis().to_string()));
            }
            Self::Backend { service, message, is_retryable } => {
                push("service", Some(service));
                push("message", Some(message));
                push("is_retryable", Some(&is_retryable.to_string()));
            }
            Self::Validation { field, message, .. } => {
                push("field", Some(field));
                push("message", Some(message));
            }
            Self::NotFound { resource_type, identifier } => {
                push("resource_type", Some(resource_type));
                push("identifier", identifier.as_ref());
            }
            Self::Unauthorized { operation, required_permission } => {
                push("operation", Some(operation));
                push("required_permission", required_permission.as_ref());
            }
            Self::Internal { message, context } => {
                push("message", Some(message));
                push("context", context.as_ref());
            }
            Self::TaskCancelled { task_id, reason } => {
                push("task_id", Some(task_id));
                push("reason", reason.as_ref());
            }
        }

        fields
    }
}

impl ErrorClassification for CommonError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Backend { is_retryable, .. } => *is_retryable,
            Self::Timeout { .. }
            | Self::Lock { .. }
            | Self::Storage { .. }
            | Self::Persistence { .. } => true,
            _ => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Internal { .. } => ErrorSeverity::Critical,
            Self::Lock { .. } | Self::Timeout { .. } | Self::Unauthorized { .. } => {
                ErrorSeverity::Warning
            }
            Self::NotFound { .. } | Self::TaskCancelled { .. } => ErrorSeverity::Info,
            _ => ErrorSeverity::Error,
        }
    }

    fn is_critical(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Uniform view over error types for retry and alerting decisions
pub trait ErrorClassification {
    /// Whether the same call may succeed if repeated
    ///
    /// True for transient conditions: timeouts, lock contention, storage
    /// hiccups, a biometric lockout once its cool-down has elapsed.
    fn is_retryable(&self) -> bool;

    /// How serious the failure is for monitoring and alerting
    fn severity(&self) -> ErrorSeverity;

    /// Tampering, corruption or a broken invariant
    fn is_critical(&self) -> bool;

    /// Minimum wait before a retry is worthwhile
    fn retry_after(&self) -> Option<Duration>;
}

/// Severity scale for classified errors, least to most serious
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    /// Expected condition, such as a missing item
    Info,
    /// Degraded but operational
    Warning,
    /// Failure that needs attention
    Error,
    /// Integrity or security at risk
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "INFO",
            Self::Warning => "WARN",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        })
    }
}

impl From<serde_json::Error> for CommonError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization("json", err.to_string())
    }
}

impl From<toml::de::Error> for CommonError {
    fn from(err: toml::de::Error) -> Self {
        Self::serialization("toml", err.to_string())
    }
}

impl From<toml::ser::Error> for CommonError {
    fn from(err: toml::ser::Error) -> Self {
        Self::serialization("toml", err.to_string())
    }
}

impl From<std::io::Error> for CommonError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence { message: err.to_string(), operation: Some(format!("{:?}", err.kind())) }
    }
}

/// `From<serde_json::Error>` and `From<std::io::Error>` for an error type
/// that wraps [`CommonError`] in `$variant`
#[macro_export]
macro_rules! impl_error_conversion {
    ($error_type:ty, $variant:ident) => {
        impl From<serde_json::Error> for $error_type {
            fn from(err: serde_json::Error) -> Self {
                Self::$variant($crate::error::CommonError::from(err))
            }
        }

        impl From<std::io::Error> for $error_type {
            fn from(err: std::io::Error) -> Self {
                Self::$variant($crate::error::CommonError::from(err))
            }
        }
    };
}

/// Implement [`ErrorClassification`] for an error type with a `CommonError`
/// variant
///
/// The common variant delegates; every other variant lists its own
/// classification. `retry_after` is optional per variant and defaults to
/// `None`.
#[macro_export]
macro_rules! impl_error_classification {
    (
        $error_type:ty,
        $common_variant:ident
        $(,
            $variant:pat => {
                retryable: $retryable:expr,
                severity: $severity:expr,
                critical: $critical:expr
                $(, retry_after: $retry_after:expr)?
                $(,)?
            }
        )*
        $(,)?
    ) => {
        impl $crate::error::ErrorClassification for $error_type {
            fn is_retryable(&self) -> bool {
                match self {
                    Self::$common_variant(inner) => {
                        $crate::error::ErrorClassification::is_retryable(inner)
                    }
                    $($variant => $retryable,)*
                }
            }

            fn severity(&self) -> $crate::error::ErrorSeverity {
                match self {
                    Self::$common_variant(inner) => $crate::error::ErrorClassification::severity(inner),
                    $($variant => $severity,)*
                }
            }

            fn is_critical(&self) -> bool {
                match self {
                    Self::$common_variant(inner) => {
                        $crate::error::ErrorClassification::is_critical(inner)
                    }
                    $($variant => $critical,)*
                }
            }

            fn retry_after(&self) -> Option<std::time::Duration> {
                match self {
                    Self::$common_variant(inner) => {
                        $crate::error::ErrorClassification::retry_after(inner)
                    }
                    $($($variant => $retry_after,)?)*
                    #[allow(unreachable_patterns)]
                    _ => None,
                }
            }
        }
    };
}

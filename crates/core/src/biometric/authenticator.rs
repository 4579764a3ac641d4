//! Biometric authentication with retry limits, lockout and session caching

use std::sync::Arc;
use std::time::Duration;

use aegis_common::time::add_saturating;
use aegis_common::{duration_millis, SharedClock};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::ports::{Availability, BiometricMethod, PlatformAuthenticator, PromptResult};
use crate::audit::{AuditEvent, AuditEventType, AuditLogger, AuditOutcome};
use crate::error::{AuthenticationFailure, PrivacyResult};

const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(5 * 60);

/// Limits for one authentication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationOptions {
    /// Upper bound for the whole authentication, all attempts included
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
    /// Consecutive failed matches before lockout
    pub max_retry_attempts: u32,
    /// Lockout length after too many failures
    #[serde(with = "duration_millis")]
    pub lockout_cooldown: Duration,
    /// Accept the device passcode in place of a biometric
    pub allow_fallback: bool,
}

impl Default for AuthenticationOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retry_attempts: 3,
            lockout_cooldown: Duration::from_secs(30),
            allow_fallback: true,
        }
    }
}

/// How an authentication ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationOutcome {
    /// A biometric matched
    Success(BiometricMethod),
    /// The user dismissed the prompt
    UserCancelled,
    /// Too many failures; try again later
    LockedOut { retry_after: Duration },
    /// No biometric identity enrolled
    NotEnrolled,
    /// No usable sensor
    HardwareUnavailable,
    /// The device passcode was accepted
    FallbackUsed,
    /// The timeout elapsed
    TimedOut,
}

impl AuthenticationOutcome {
    /// Whether access should be granted
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_) | Self::FallbackUsed)
    }

    /// Map non-success outcomes onto [`AuthenticationFailure`]
    pub fn into_result(self) -> Result<(), AuthenticationFailure> {
        match self {
            Self::Success(_) | Self::FallbackUsed => Ok(()),
            Self::UserCancelled => Err(AuthenticationFailure::Cancelled),
            Self::LockedOut { retry_after } => Err(AuthenticationFailure::LockedOut { retry_after }),
            Self::NotEnrolled => Err(AuthenticationFailure::NotEnrolled),
            Self::HardwareUnavailable => Err(AuthenticationFailure::HardwareUnavailable),
            Self::TimedOut => Err(AuthenticationFailure::Timeout),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::UserCancelled => "user_cancelled",
            Self::LockedOut { .. } => "locked_out",
            Self::NotEnrolled => "not_enrolled",
            Self::HardwareUnavailable => "hardware_unavailable",
            Self::FallbackUsed => "fallback_used",
            Self::TimedOut => "timed_out",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Session {
    method: BiometricMethod,
    expires_at: DateTime<Utc>,
}

#[derive(Debug)]
struct AuthState {
    consecutive_failures: u32,
    locked_until: Option<DateTime<Utc>>,
    session: Option<Session>,
    session_ttl: Duration,
}

/// Facade over a [`PlatformAuthenticator`]
///
/// Prompts are serialized; a second caller waits for the first prompt to
/// finish and can then reuse the session it established.
#[derive(Debug)]
pub struct BiometricAuthenticator {
    platform: Arc<dyn PlatformAuthenticator>,
    audit: Arc<AuditLogger>,
    clock: SharedClock,
    state: parking_lot::Mutex<AuthState>,
    prompt_lock: tokio::sync::Mutex<()>,
}

impl BiometricAuthenticator {
    /// Authenticator over `platform` with the default session lifetime
    pub fn new(
        platform: Arc<dyn PlatformAuthenticator>,
        audit: Arc<AuditLogger>,
        clock: SharedClock,
    ) -> Self {
        Self {
            platform,
            audit,
            clock,
            state: parking_lot::Mutex::new(AuthState {
                consecutive_failures: 0,
                locked_until: None,
                session: None,
                session_ttl: DEFAULT_SESSION_TTL,
            }),
            prompt_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Builder form of [`set_session_ttl`](Self::set_session_ttl)
    pub fn with_session_ttl(self, ttl: Duration) -> Self {
        self.set_session_ttl(ttl);
        self
    }

    /// How long a successful authentication is reused
    pub fn set_session_ttl(&self, ttl: Duration) {
        self.state.lock().session_ttl = ttl;
    }

    /// Platform capabilities
    pub async fn availability(&self) -> Availability {
        self.platform.availability().await
    }

    /// Whether a successful authentication is still cached
    pub fn has_valid_session(&self) -> bool {
        let now = self.clock.now();
        self.state.lock().session.is_some_and(|s| now < s.expires_at)
    }

    /// Method used by the cached session, if still valid
    pub fn session_method(&self) -> Option<BiometricMethod> {
        let now = self.clock.now();
        self.state.lock().session.filter(|s| now < s.expires_at).map(|s| s.method)
    }

    /// Drop the cached session
    pub fn invalidate_session(&self) {
        self.state.lock().session = None;
    }

    /// Remaining lockout, if any
    pub fn lockout_remaining(&self) -> Option<Duration> {
        let now = self.clock.now();
        let locked_until = self.state.lock().locked_until?;
        (locked_until - now).to_std().ok().filter(|d| !d.is_zero())
    }

    /// Prompt with no external cancellation
    pub async fn authenticate(
        &self,
        reason: &str,
        options: &AuthenticationOptions,
    ) -> PrivacyResult<AuthenticationOutcome> {
        self.authenticate_cancellable(reason, options, &CancellationToken::new()).await
    }

    /// Prompt the user, bounded by the options' timeout and retry limit
    ///
    /// Every call is audited; a cancellation produces only an
    /// `authentication_cancelled` entry.
    #[instrument(skip(self, options, cancel))]
    pub async fn authenticate_cancellable(
        &self,
        reason: &str,
        options: &AuthenticationOptions,
        cancel: &CancellationToken,
    ) -> PrivacyResult<AuthenticationOutcome> {
        let _prompt = self.prompt_lock.lock().await;
        let outcome = self.run(reason, options, cancel).await;

        if let AuthenticationOutcome::Success(method) = outcome {
            self.open_session(method);
        } else if outcome == AuthenticationOutcome::FallbackUsed {
            self.open_session(BiometricMethod::Passcode);
        }

        self.audit.append(audit_event(&outcome, reason)).await?;
        Ok(outcome)
    }

    async fn run(
        &self,
        reason: &str,
        options: &AuthenticationOptions,
        cancel: &CancellationToken,
    ) -> AuthenticationOutcome {
        if let Some(retry_after) = self.lockout_remaining() {
            return AuthenticationOutcome::LockedOut { retry_after };
        }

        let availability = self.platform.availability().await;
        if !availability.available {
            return AuthenticationOutcome::HardwareUnavailable;
        }
        if !availability.enrolled {
            return AuthenticationOutcome::NotEnrolled;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => AuthenticationOutcome::UserCancelled,
            result = tokio::time::timeout(options.timeout, self.prompt_until_settled(reason, options)) => {
                result.unwrap_or(AuthenticationOutcome::TimedOut)
            }
        }
    }

    async fn prompt_until_settled(
        &self,
        reason: &str,
        options: &AuthenticationOptions,
    ) -> AuthenticationOutcome {
        loop {
            match self.platform.prompt(reason).await {
                PromptResult::Authenticated(method) => {
                    self.state.lock().consecutive_failures = 0;
                    return AuthenticationOutcome::Success(method);
                }
                PromptResult::Fallback if options.allow_fallback => {
                    self.state.lock().consecutive_failures = 0;
                    return AuthenticationOutcome::FallbackUsed;
                }
                PromptResult::Fallback => {
                    debug!("Passcode fallback refused by options");
                }
                PromptResult::Failed(detail) => {
                    debug!(detail = %detail, "Biometric match failed");
                }
                PromptResult::Cancelled => return AuthenticationOutcome::UserCancelled,
                PromptResult::NotEnrolled => return AuthenticationOutcome::NotEnrolled,
                PromptResult::Unavailable => return AuthenticationOutcome::HardwareUnavailable,
            }

            if let Some(retry_after) = self.register_failure(options) {
                return AuthenticationOutcome::LockedOut { retry_after };
            }
        }
    }

    /// Count a failed attempt; starts the cool-down once the limit is hit
    fn register_failure(&self, options: &AuthenticationOptions) -> Option<Duration> {
        let mut state = self.state.lock();
        state.consecutive_failures += 1;
        if state.consecutive_failures < options.max_retry_attempts.max(1) {
            return None;
        }
        state.consecutive_failures = 0;
        state.session = None;
        state.locked_until = Some(add_saturating(self.clock.now(), options.lockout_cooldown));
        warn!(cooldown_ms = options.lockout_cooldown.as_millis() as u64, "Biometric locked out");
        Some(options.lockout_cooldown)
    }

    fn open_session(&self, method: BiometricMethod) {
        let mut state = self.state.lock();
        let expires_at = add_saturating(self.clock.now(), state.session_ttl);
        state.session = Some(Session { method, expires_at });
        state.locked_until = None;
        info!(method = %method, "Biometric session established");
    }
}

fn audit_event(outcome: &AuthenticationOutcome, reason: &str) -> AuditEvent {
    let event = match outcome {
        AuthenticationOutcome::Success(method) => {
            AuditEvent::new(AuditEventType::AuthenticationSucceeded).with("method", method.to_string())
        }
        AuthenticationOutcome::FallbackUsed => {
            AuditEvent::new(AuditEventType::AuthenticationSucceeded)
                .with("method", BiometricMethod::Passcode.to_string())
        }
        AuthenticationOutcome::UserCancelled => {
            AuditEvent::new(AuditEventType::AuthenticationCancelled).outcome(AuditOutcome::Cancelled)
        }
        AuthenticationOutcome::LockedOut { retry_after } => {
            AuditEvent::new(AuditEventType::AuthenticationFailed)
                .outcome(AuditOutcome::Denied)
                .with("retry_after_ms", retry_after.as_millis() as u64)
        }
        _ => AuditEvent::new(AuditEventType::AuthenticationFailed).outcome(AuditOutcome::Failure),
    };
    event.with("result", outcome.label()).with("reason", reason)
}

#[cfg(test)]
mod tests {
    //! Unit tests for biometric::authenticator.
    use aegis_common::MockClock;

    use super::*;
    use crate::audit::{AuditFilter, MemoryAuditStore};
    use crate::biometric::software::{NoHardwareAuthenticator, SoftwareAuthenticator};

    fn authenticator(
        platform: Arc<dyn PlatformAuthenticator>,
        clock: &MockClock,
    ) -> (BiometricAuthenticator, Arc<AuditLogger>) {
        let audit = Arc::new(AuditLogger::new(
            Arc::new(MemoryAuditStore::new()),
            clock.shared(),
            true,
            u64::MAX,
        ));
        (BiometricAuthenticator::new(platform, audit.clone(), clock.shared()), audit)
    }

    /// Validates `BiometricAuthenticator::authenticate` behavior for the
    /// session caching scenario.
    ///
    /// Assertions:
    /// - Confirms success opens a session that expires after its TTL.
    #[tokio::test]
    async fn test_success_caches_session() {
        let clock = MockClock::at_unix_secs(1_700_000_000);
        let (auth, _) = authenticator(Arc::new(SoftwareAuthenticator::new()), &clock);
        let auth = auth.with_session_ttl(Duration::from_secs(60));

        let outcome = auth.authenticate("unlock", &AuthenticationOptions::default()).await.unwrap();
        assert_eq!(outcome, AuthenticationOutcome::Success(BiometricMethod::Fingerprint));
        assert!(auth.has_valid_session());

        clock.advance(Duration::from_secs(61));
        assert!(!auth.has_valid_session());
    }

    /// Validates `BiometricAuthenticator::authenticate` behavior for the
    /// retry limit scenario.
    ///
    /// Assertions:
    /// - Confirms repeated failures end in `LockedOut` after the retry limit.
    /// - Confirms later calls stay locked out until the cool-down passes.
    #[tokio::test]
    async fn test_lockout_after_retries() {
        let clock = MockClock::at_unix_secs(1_700_000_000);
        let platform = Arc::new(SoftwareAuthenticator::new().with_script(vec![
            PromptResult::Failed("no match".into()),
            PromptResult::Failed("no match".into()),
            PromptResult::Failed("no match".into()),
        ]));
        let (auth, audit) = authenticator(platform.clone(), &clock);
        let options = AuthenticationOptions::default();

        let outcome = auth.authenticate("unlock", &options).await.unwrap();
        assert_eq!(outcome, AuthenticationOutcome::LockedOut { retry_after: options.lockout_cooldown });
        assert_eq!(platform.prompt_count(), 3);

        let again = auth.authenticate("unlock", &options).await.unwrap();
        assert!(matches!(again, AuthenticationOutcome::LockedOut { .. }));
        assert_eq!(platform.prompt_count(), 3);

        clock.advance(options.lockout_cooldown);
        assert!(auth.authenticate("unlock", &options).await.unwrap().is_success());

        let denied = audit
            .query(&AuditFilter::new().event_type(AuditEventType::AuthenticationFailed))
            .await
            .unwrap();
        assert_eq!(denied.len(), 2);
    }

    /// Validates `BiometricAuthenticator::authenticate_cancellable` behavior
    /// for the cancelled prompt scenario.
    ///
    /// Assertions:
    /// - Confirms cancellation yields `UserCancelled`.
    /// - Confirms only an `authentication_cancelled` entry is written.
    #[tokio::test]
    async fn test_cancellation() {
        let clock = MockClock::at_unix_secs(1_700_000_000);
        let platform =
            Arc::new(SoftwareAuthenticator::new().with_delay(Duration::from_secs(10)));
        let (auth, audit) = authenticator(platform, &clock);
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let outcome = auth
            .authenticate_cancellable("unlock", &AuthenticationOptions::default(), &token)
            .await
            .unwrap();
        assert_eq!(outcome, AuthenticationOutcome::UserCancelled);

        let entries = audit.query(&AuditFilter::new()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event.event_type, AuditEventType::AuthenticationCancelled);
    }

    /// Validates `BiometricAuthenticator::authenticate` behavior for the
    /// timeout and missing hardware scenarios.
    ///
    /// Assertions:
    /// - Confirms a slow prompt yields `TimedOut`.
    /// - Confirms a device without hardware yields `HardwareUnavailable`.
    #[tokio::test]
    async fn test_timeout_and_no_hardware() {
        let clock = MockClock::at_unix_secs(1_700_000_000);
        let slow = Arc::new(SoftwareAuthenticator::new().with_delay(Duration::from_millis(500)));
        let (auth, _) = authenticator(slow, &clock);
        let options =
            AuthenticationOptions { timeout: Duration::from_millis(20), ..AuthenticationOptions::default() };
        assert_eq!(auth.authenticate("unlock", &options).await.unwrap(), AuthenticationOutcome::TimedOut);

        let (none, _) = authenticator(Arc::new(NoHardwareAuthenticator), &clock);
        let outcome = none.authenticate("unlock", &options).await.unwrap();
        assert_eq!(outcome, AuthenticationOutcome::HardwareUnavailable);
        assert_eq!(outcome.into_result(), Err(AuthenticationFailure::HardwareUnavailable));
    }

    /// Validates `BiometricAuthenticator::authenticate` behavior for the
    /// passcode fallback scenario.
    ///
    /// Assertions:
    /// - Confirms fallback succeeds only when the options allow it.
    #[tokio::test]
    async fn test_fallback_respects_options() {
        let clock = MockClock::at_unix_secs(1_700_000_000);
        let (auth, _) = authenticator(Arc::new(SoftwareAuthenticator::always(PromptResult::Fallback)), &clock);

        let allowed = auth.authenticate("unlock", &AuthenticationOptions::default()).await.unwrap();
        assert_eq!(allowed, AuthenticationOutcome::FallbackUsed);
        assert_eq!(auth.session_method(), Some(BiometricMethod::Passcode));

        let strict = AuthenticationOptions { allow_fallback: false, ..AuthenticationOptions::default() };
        let refused = auth.authenticate("unlock", &strict).await.unwrap();
        assert!(matches!(refused, AuthenticationOutcome::LockedOut { .. }));
    }
}

//! Software authenticators for tests and headless deployments

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::ports::{Availability, BiometricMethod, PlatformAuthenticator, PromptResult};

/// Scripted authenticator
///
/// Prompts pop results from a queue; once it is empty every prompt returns
/// the fallback result (successful fingerprint by default).
#[derive(Debug)]
pub struct SoftwareAuthenticator {
    availability: Availability,
    script: Mutex<VecDeque<PromptResult>>,
    fallback: PromptResult,
    delay: Option<Duration>,
    prompts: AtomicUsize,
}

impl Default for SoftwareAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareAuthenticator {
    /// Enrolled fingerprint that always succeeds
    pub fn new() -> Self {
        Self {
            availability: Availability {
                available: true,
                enrolled: true,
                supported_methods: vec![BiometricMethod::Fingerprint],
            },
            script: Mutex::new(VecDeque::new()),
            fallback: PromptResult::Authenticated(BiometricMethod::Fingerprint),
            delay: None,
            prompts: AtomicUsize::new(0),
        }
    }

    /// Every prompt returns `result` once the script runs out
    pub fn always(result: PromptResult) -> Self {
        Self { fallback: result, ..Self::new() }
    }

    /// Queue results returned by the next prompts, in order
    pub fn with_script(self, results: impl IntoIterator<Item = PromptResult>) -> Self {
        self.script.lock().extend(results);
        self
    }

    /// Wait this long inside every prompt
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Report these capabilities
    pub fn with_availability(mut self, availability: Availability) -> Self {
        self.availability = availability;
        self
    }

    /// Append results at runtime
    pub fn push(&self, result: PromptResult) {
        self.script.lock().push_back(result);
    }

    /// Number of prompts shown so far
    pub fn prompt_count(&self) -> usize {
        self.prompts.load(Ordering::Acquire)
    }
}

#[async_trait]
impl PlatformAuthenticator for SoftwareAuthenticator {
    async fn availability(&self) -> Availability {
        self.availability.clone()
    }

    async fn prompt(&self, _reason: &str) -> PromptResult {
        self.prompts.fetch_add(1, Ordering::AcqRel);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.script.lock().pop_front().unwrap_or_else(|| self.fallback.clone())
    }
}

/// A device without biometric hardware
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHardwareAuthenticator;

#[async_trait]
impl PlatformAuthenticator for NoHardwareAuthenticator {
    async fn availability(&self) -> Availability {
        Availability::default()
    }

    async fn prompt(&self, _reason: &str) -> PromptResult {
        PromptResult::Unavailable
    }
}

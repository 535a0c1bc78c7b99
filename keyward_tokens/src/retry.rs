//! Bounded retry of transient failures
//!
//! Retries are tracked per logical request, identified by its method and
//! path, in a ledger owned by the [`RetryPolicy`]. A ledger entry exists only
//! while a request is failing: it is created on the first retryable failure
//! and removed on success or once the attempt budget is spent.

use std::{collections::HashMap, fmt, time::Duration};

use parking_lot::Mutex;

use crate::jitter::{JitterSource, NullJitter};

/// Configuration for how many times and how slowly to retry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryConfig {
    /// Default retry configuration
    ///
    /// Allows 3 attempts in total, with a base delay of 1 second. Delays are
    /// capped at 30 seconds.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Constructs a new retry configuration
    ///
    /// `max_attempts` counts every attempt of a request, including the first.
    /// After the `n`th failure the request is retried after
    /// `base_delay * 2^n`, stretched by jitter and capped at 30 seconds.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Self::default()
        }
    }

    /// Caps the delay between attempts
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// The total number of attempts allowed per request
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The base of the exponential backoff, doubled for the first retry
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// The delay to wait after the `failures`th failure, before jitter is applied
    pub fn delay_after(&self, failures: u32) -> Duration {
        let multiplier = 1u32.checked_shl(failures).unwrap_or(u32::MAX);
        self.base_delay
            .saturating_mul(multiplier)
            .min(self.max_delay)
    }
}

/// Identifies a logical request for retry bookkeeping
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RetryKey {
    method: String,
    path: String,
}

impl RetryKey {
    /// Constructs a key from a request method and path
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for RetryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// The kind of failure a request ran into
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureClass {
    /// No response was received
    Network,
    /// A response was received with the given status code
    Status(u16),
    /// Any other failure
    Other,
}

impl FailureClass {
    /// Whether failures of this class are worth retrying
    ///
    /// Only network failures and server errors (5xx) are retried.
    pub fn is_retryable(self) -> bool {
        match self {
            Self::Network => true,
            Self::Status(status) => (500..600).contains(&status),
            Self::Other => false,
        }
    }
}

/// Decides whether, and after how long, a failed request is attempted again
pub struct RetryPolicy {
    config: RetryConfig,
    jitter: Mutex<Box<dyn JitterSource + Send>>,
    ledger: Mutex<HashMap<RetryKey, u32>>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .field("ledger", &*self.ledger.lock())
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Constructs a new retry policy
    ///
    /// Delays are jittered by up to 30% when the `rand` feature is enabled.
    pub fn new(config: RetryConfig) -> Self {
        #[cfg(feature = "rand")]
        let jitter: Box<dyn JitterSource + Send> =
            Box::new(crate::jitter::RandomJitter::default());
        #[cfg(not(feature = "rand"))]
        let jitter: Box<dyn JitterSource + Send> = Box::new(NullJitter);

        Self {
            config,
            jitter: Mutex::new(jitter),
            ledger: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the jitter source
    pub fn with_jitter(self, jitter: impl JitterSource + Send + 'static) -> Self {
        Self {
            jitter: Mutex::new(Box::new(jitter)),
            ..self
        }
    }

    /// Disables jitter entirely
    pub fn without_jitter(self) -> Self {
        self.with_jitter(NullJitter)
    }

    /// The policy's configuration
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Reports a failure and decides whether to try again
    ///
    /// When another attempt is allowed, this waits out the backoff delay before
    /// returning `true`. When the attempt budget for `key` is exhausted the
    /// ledger entry is removed and `false` is returned immediately.
    pub async fn should_retry(&self, key: &RetryKey, failure: FailureClass) -> bool {
        if !failure.is_retryable() {
            tracing::trace!(%key, ?failure, "failure is not retryable");
            return false;
        }

        let (failures, delay) = {
            let mut ledger = self.ledger.lock();
            let failures = ledger.get(key).copied().unwrap_or(0) + 1;

            if failures >= self.config.max_attempts {
                ledger.remove(key);
                tracing::debug!(
                    %key,
                    ?failure,
                    attempts = failures,
                    "retry attempts exhausted"
                );
                return false;
            }

            ledger.insert(key.clone(), failures);
            let factor = self.jitter.lock().jitter_factor();
            (failures, self.config.delay_after(failures).mul_f64(1.0 + factor))
        };

        tracing::debug!(
            %key,
            ?failure,
            attempt = failures,
            delay_ms = delay.as_millis() as u64,
            "retrying after failure"
        );

        tokio::time::sleep(delay).await;
        true
    }

    /// Reports a success, forgetting any failures recorded for `key`
    pub fn record_success(&self, key: &RetryKey) {
        if self.ledger.lock().remove(key).is_some() {
            tracing::trace!(%key, "request recovered");
        }
    }

    /// The number of failures currently recorded for `key`
    pub fn failures(&self, key: &RetryKey) -> u32 {
        self.ledger.lock().get(key).copied().unwrap_or(0)
    }
}

//! Store and transport configuration.

use crate::error::{FaultError, FaultResult};
use faultline_store::Model;
use std::sync::Arc;
use std::time::Duration;

/// Construction-time parameters of an [`IncrementalStore`](crate::IncrementalStore).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Identifier of the store type, used in logs and diagnostics.
    pub store_type: String,
    /// Entity model.
    pub model: Arc<Model>,
}

impl StoreConfig {
    /// Creates a store configuration.
    pub fn new(store_type: impl Into<String>, model: impl Into<Arc<Model>>) -> Self {
        Self {
            store_type: store_type.into(),
            model: model.into(),
        }
    }

    /// Checks the configuration.
    ///
    /// An empty store type or a model that fails validation is a
    /// configuration error.
    pub fn validate(&self) -> FaultResult<()> {
        if self.store_type.trim().is_empty() {
            return Err(FaultError::configuration("store type must not be empty"));
        }
        self.model
            .validate()
            .map_err(|e| FaultError::configuration(e.to_string()))
    }
}

/// Configuration of the HTTP transport.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Base URL requests are resolved against.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// User agent sent with every request.
    pub user_agent: String,
    /// Headers sent with every request.
    pub headers: Vec<(String, String)>,
    /// Retry behavior for transient failures.
    pub retry: RetryConfig,
}

impl HttpConfig {
    /// Creates an HTTP configuration for a base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(30),
            user_agent: format!("faultline/{}", env!("CARGO_PKG_VERSION")),
            headers: Vec::new(),
            retry: RetryConfig::default(),
        }
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the user agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Adds a header sent with every request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Checks that the base URL is an absolute http(s) URL.
    pub fn validate(&self) -> FaultResult<()> {
        let url = self.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(FaultError::configuration(format!(
                "base URL must be http(s): {url:?}"
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(FaultError::configuration("retry.max_attempts must be at least 1"));
        }
        Ok(())
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a retry configuration with default backoff.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with a single attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Delay to wait before attempt `attempt` (0-indexed; attempt 0 is immediate).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        #[allow(clippy::cast_possible_wrap)]
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            Duration::from_secs_f64(delay_secs + delay_secs * 0.25 * jitter_fraction())
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Pseudo-random fraction in `[0, 1)` taken from the clock.
fn jitter_fraction() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos % 1000) / 1000.0
}

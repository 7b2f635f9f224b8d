use std::time::Duration;

use serde::Deserialize;

use crate::{providers::AuthScheme, AuthCredential, ProviderPreset};

/// Retry behaviour for a single logical request.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryOptions {
    /// Total attempts including the first one. Values below 1 are treated as 1.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for every further attempt.
    pub base_delay_ms: u64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
        }
    }
}

/// Admission policy: at most `max_requests` per trailing `window_ms`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct RateLimitOptions {
    pub max_requests: usize,
    pub window_ms: u64,
}

impl Default for RateLimitOptions {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window_ms: 60_000,
        }
    }
}

/// GET response caching policy.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    pub enabled: bool,
    pub ttl_ms: u64,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: 300_000,
        }
    }
}

/// Circuit breaker policy.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct CircuitOptions {
    /// Consecutive failed requests that open the circuit.
    pub failure_threshold: u32,
    /// Time an open circuit waits before allowing a trial request.
    pub cooldown_ms: u64,
}

impl Default for CircuitOptions {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_ms: 60_000,
        }
    }
}

/// Thresholds used by [`crate::ApiClient::health_check`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct HealthOptions {
    /// Cache sizes above this report `Degraded`.
    pub max_cache_entries: usize,
    /// More open circuits than this report `Unhealthy`.
    pub unhealthy_open_circuits: usize,
}

impl Default for HealthOptions {
    fn default() -> Self {
        Self {
            max_cache_entries: 1_000,
            unhealthy_open_circuits: 2,
        }
    }
}

/// Construction-time configuration of one [`crate::ApiClient`].
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    pub auth: Option<AuthCredential>,
    /// Per-request network budget in milliseconds.
    pub timeout_ms: u64,
    pub retry: RetryOptions,
    pub rate_limit: RateLimitOptions,
    pub cache: CacheOptions,
    pub circuit: CircuitOptions,
    pub health: HealthOptions,
    /// Value of the `User-Agent` header sent with every request.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            auth: None,
            timeout_ms: 10_000,
            retry: RetryOptions::default(),
            rate_limit: RateLimitOptions::default(),
            cache: CacheOptions::default(),
            circuit: CircuitOptions::default(),
            health: HealthOptions::default(),
            user_agent: default_user_agent(),
        }
    }
}

impl ClientConfig {
    /// Creates a configuration with default policies for `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Builds the configuration a provider preset prescribes, authenticated with `secret`.
    pub fn from_preset(preset: &ProviderPreset, secret: impl AsRef<str>) -> Self {
        let auth = match preset.auth {
            AuthScheme::Bearer => AuthCredential::bearer(secret),
            AuthScheme::Header(name) => AuthCredential::header(name, secret.as_ref().trim()),
        };
        Self {
            base_url: preset.base_url.to_owned(),
            auth: Some(auth),
            timeout_ms: preset.timeout_ms,
            retry: preset.retry,
            rate_limit: preset.rate_limit,
            cache: preset.cache,
            ..Self::default()
        }
    }

    /// Builds a provider configuration from environment variables.
    ///
    /// Reads:
    /// - `<PREFIX>_API_KEY` — provider credential (required)
    /// - `<PREFIX>_BASE_URL` — optional override of the preset's base URL
    ///
    /// Returns an error if the key is missing or empty.
    pub fn from_env(preset: &ProviderPreset) -> std::result::Result<Self, String> {
        let key_var = format!("{}_API_KEY", preset.env_prefix);
        let secret = std::env::var(&key_var)
            .map_err(|_| format!("missing {key_var} environment variable"))?;
        if secret.trim().is_empty() {
            return Err(format!("{key_var} is set but empty"));
        }

        let mut config = Self::from_preset(preset, secret);
        if let Ok(base_url) = std::env::var(format!("{}_BASE_URL", preset.env_prefix)) {
            if !base_url.trim().is_empty() {
                config.base_url = base_url.trim().to_owned();
            }
        }
        Ok(config)
    }

    pub fn with_auth(mut self, auth: AuthCredential) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, base_delay_ms: u64) -> Self {
        self.retry = RetryOptions {
            max_attempts,
            base_delay_ms,
        };
        self
    }

    pub fn with_rate_limit(mut self, max_requests: usize, window_ms: u64) -> Self {
        self.rate_limit = RateLimitOptions {
            max_requests,
            window_ms,
        };
        self
    }

    pub fn with_cache(mut self, enabled: bool, ttl_ms: u64) -> Self {
        self.cache = CacheOptions { enabled, ttl_ms };
        self
    }

    pub fn with_circuit(mut self, failure_threshold: u32, cooldown_ms: u64) -> Self {
        self.circuit = CircuitOptions {
            failure_threshold,
            cooldown_ms,
        };
        self
    }

    pub fn with_health(mut self, health: HealthOptions) -> Self {
        self.health = health;
        self
    }

    pub(crate) fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_user_agent() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

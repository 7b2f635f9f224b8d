//! Published quotas of the supported inverter cloud providers.
//!
//! Presets are plain data; [`crate::ClientConfig::from_preset`] turns one into
//! a client configuration.

use crate::options::{CacheOptions, RateLimitOptions, RetryOptions};

/// How a provider expects its credential to be presented.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AuthScheme {
    /// `Authorization: Bearer <token>`.
    Bearer,
    /// A provider-specific header carrying the raw key.
    Header(&'static str),
}

/// Connection profile of one monitoring provider.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProviderPreset {
    pub name: &'static str,
    /// Prefix of the environment variables read by [`crate::ClientConfig::from_env`].
    pub env_prefix: &'static str,
    pub base_url: &'static str,
    pub auth: AuthScheme,
    pub timeout_ms: u64,
    pub retry: RetryOptions,
    pub rate_limit: RateLimitOptions,
    pub cache: CacheOptions,
}

/// Sungrow iSolarCloud OpenAPI.
///
/// Responses are cached for ten minutes to line up with the session refresh cadence.
pub const SUNGROW: ProviderPreset = ProviderPreset {
    name: "sungrow",
    env_prefix: "SUNGROW",
    base_url: "https://gateway.isolarcloud.com.hk/openapi",
    auth: AuthScheme::Header("x-access-key"),
    timeout_ms: 30_000,
    retry: RetryOptions {
        max_attempts: 3,
        base_delay_ms: 1_000,
    },
    rate_limit: RateLimitOptions {
        max_requests: 10,
        window_ms: 60_000,
    },
    cache: CacheOptions {
        enabled: true,
        ttl_ms: 600_000,
    },
};

/// SolarEdge monitoring API. Its daily site quota is small, hence the tight window.
pub const SOLAREDGE: ProviderPreset = ProviderPreset {
    name: "solaredge",
    env_prefix: "SOLAREDGE",
    base_url: "https://monitoringapi.solaredge.com",
    auth: AuthScheme::Bearer,
    timeout_ms: 15_000,
    retry: RetryOptions {
        max_attempts: 3,
        base_delay_ms: 2_000,
    },
    rate_limit: RateLimitOptions {
        max_requests: 3,
        window_ms: 60_000,
    },
    cache: CacheOptions {
        enabled: true,
        ttl_ms: 300_000,
    },
};

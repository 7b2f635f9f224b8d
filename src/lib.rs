//! `solarmon-http` is a resilient async HTTP client for rate-limited solar
//! monitoring APIs.
//!
//! Every call made through [`ApiClient::request`] passes, in order:
//! - a per-endpoint [`CircuitBreaker`] that fails fast while a provider is down
//! - a TTL [`ResponseCache`] for GET responses
//! - a sliding-window [`RateLimiter`] that delays callers to stay within quota
//! - a retry loop with exponential backoff ([`run_with_retry`])
//!
//! Provider quotas for Sungrow and SolarEdge ship as [`ProviderPreset`] data.

mod cache;
mod circuit;
mod client;
mod error;
mod options;
mod providers;
mod rate_limit;
mod retry;
mod transport;
mod types;
mod util;

pub use cache::{cache_key, CachedResponse, ResponseCache};
pub use circuit::{CircuitBreaker, CircuitPhase, CircuitSnapshot};
pub use client::{join_url, ApiClient};
pub use error::ApiError;
pub use options::{
    CacheOptions, CircuitOptions, ClientConfig, HealthOptions, RateLimitOptions, RetryOptions,
};
pub use providers::{AuthScheme, ProviderPreset, SOLAREDGE, SUNGROW};
pub use rate_limit::RateLimiter;
pub use retry::{
    default_retry_predicate, is_transient, message_retry_predicate, retry_when, run_with_retry,
    RetryPolicy, RetryPredicate,
};
pub use transport::{AuthCredential, Transport, TransportRequest, TransportResponse};
pub use types::{ApiResponse, ClientStats, HealthReport, HealthStatus, RequestOptions};

/// Re-exported so callers can build [`RequestOptions`] without depending on `reqwest`.
pub use reqwest::{header, Method};

pub type Result<T> = std::result::Result<T, ApiError>;

use std::fmt;
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;

use crate::{CircuitSnapshot, RetryPredicate};

/// Result of [`crate::ApiClient::request`].
#[derive(Clone, Debug)]
pub struct ApiResponse<T> {
    pub data: T,
    pub status: u16,
    pub headers: HeaderMap,
    /// `true` when served from the response cache without a network call.
    pub cached: bool,
    /// Wall time of the request; zero for cache hits.
    pub duration: Duration,
}

/// Per-call request description and overrides.
#[derive(Clone, Default)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Value>,
    /// Replaces the configured network budget for this call.
    pub timeout_ms: Option<u64>,
    /// Skips the cache lookup; a fresh GET response is still stored.
    pub skip_cache: bool,
    pub skip_rate_limit: bool,
    /// Replaces the default retry predicate for this call.
    pub retry_condition: Option<RetryPredicate>,
    /// Replaces the configured cache TTL when this response is stored.
    pub cache_ttl_ms: Option<u64>,
    /// Gives up with `RateLimitTimeout` instead of waiting longer than this.
    pub rate_limit_deadline_ms: Option<u64>,
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("timeout_ms", &self.timeout_ms)
            .field("skip_cache", &self.skip_cache)
            .field("skip_rate_limit", &self.skip_rate_limit)
            .field("retry_condition", &self.retry_condition.as_ref().map(|_| "<fn>"))
            .field("cache_ttl_ms", &self.cache_ttl_ms)
            .field("rate_limit_deadline_ms", &self.rate_limit_deadline_ms)
            .finish()
    }
}

impl RequestOptions {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    pub fn post(body: Value) -> Self {
        Self::new(Method::POST).with_body(body)
    }

    pub fn put(body: Value) -> Self {
        Self::new(Method::PUT).with_body(body)
    }

    pub fn delete() -> Self {
        Self::new(Method::DELETE)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn skip_cache(mut self) -> Self {
        self.skip_cache = true;
        self
    }

    pub fn skip_rate_limit(mut self) -> Self {
        self.skip_rate_limit = true;
        self
    }

    pub fn with_retry_condition(mut self, predicate: RetryPredicate) -> Self {
        self.retry_condition = Some(predicate);
        self
    }

    pub fn with_cache_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.cache_ttl_ms = Some(ttl_ms);
        self
    }

    pub fn with_rate_limit_deadline_ms(mut self, deadline_ms: u64) -> Self {
        self.rate_limit_deadline_ms = Some(deadline_ms);
        self
    }
}

/// Aggregate state of one client.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ClientStats {
    pub cache_size: usize,
    pub circuits: Vec<CircuitSnapshot>,
    pub active_rate_limit_keys: usize,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub stats: ClientStats,
}

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use crate::{
    cache::{cache_key, CachedResponse, ResponseCache},
    circuit::{CircuitBreaker, CircuitPhase},
    rate_limit::RateLimiter,
    retry::{default_retry_predicate, run_with_retry, RetryPolicy, RetryPredicate},
    transport::{Transport, TransportRequest},
    ApiError, ApiResponse, ClientConfig, ClientStats, HealthReport, HealthStatus,
    ProviderPreset, RequestOptions, Result,
};

/// Joins a base URL and an endpoint path with exactly one `/` between them.
pub fn join_url(base_url: &str, endpoint: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let path = endpoint.trim_start_matches('/');
    if path.is_empty() {
        base.to_owned()
    } else {
        format!("{base}/{path}")
    }
}

#[derive(Clone)]
/// Rate-limited, circuit-broken, caching HTTP client for one remote service.
///
/// Clones are handles to the same cache, rate windows and circuits.
/// Clients constructed separately share nothing, including quota tracking.
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    transport: Transport,
    cache: ResponseCache,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
    default_retry: RetryPredicate,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("config", &self.inner.config)
            .finish()
    }
}

impl ApiClient {
    /// Creates a client owning fresh cache, rate-limit and circuit state.
    ///
    /// Fails only if the configured user agent or credential is not a valid header.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_retry_predicate(config, default_retry_predicate())
    }

    /// Like [`ApiClient::new`], but `predicate` decides retries for requests
    /// that carry no `retry_condition` of their own.
    pub fn with_retry_predicate(config: ClientConfig, predicate: RetryPredicate) -> Result<Self> {
        let transport = Transport::new(&config.user_agent, config.auth.as_ref())?;
        let inner = ClientInner {
            transport,
            cache: ResponseCache::new(Duration::from_millis(config.cache.ttl_ms)),
            limiter: RateLimiter::new(
                config.rate_limit.max_requests,
                Duration::from_millis(config.rate_limit.window_ms),
            ),
            breaker: CircuitBreaker::new(
                config.circuit.failure_threshold,
                Duration::from_millis(config.circuit.cooldown_ms),
            ),
            default_retry: predicate,
            config,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Creates a client for a provider preset, authenticated with `secret`.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use solarmon_http::{ApiClient, SOLAREDGE};
    ///
    /// let client = ApiClient::from_preset(&SOLAREDGE, "my-api-key").expect("valid key");
    /// ```
    pub fn from_preset(preset: &ProviderPreset, secret: impl AsRef<str>) -> Result<Self> {
        Self::new(ClientConfig::from_preset(preset, secret))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<ApiResponse<T>> {
        self.request(endpoint, RequestOptions::get()).await
    }

    pub async fn post<T, B>(&self, endpoint: &str, body: &B) -> Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(endpoint, RequestOptions::post(to_json(body)?))
            .await
    }

    pub async fn put<T, B>(&self, endpoint: &str, body: &B) -> Result<ApiResponse<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(endpoint, RequestOptions::put(to_json(body)?))
            .await
    }

    pub async fn delete<T: DeserializeOwned>(&self, endpoint: &str) -> Result<ApiResponse<T>> {
        self.request(endpoint, RequestOptions::delete()).await
    }

    /// Sends one logical request through the circuit breaker, cache, rate
    /// limiter and retry loop, in that order.
    ///
    /// Circuit failures are counted once per call, after retries are exhausted.
    pub async fn request<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse<T>> {
        let inner = &*self.inner;
        let config = &inner.config;
        let circuit_key = format!("{}:{}", config.base_url, endpoint);
        let started = Instant::now();

        let Some(trial) = inner.breaker.admit(&circuit_key) else {
            return Err(ApiError::CircuitOpen { key: circuit_key });
        };
        let admission = Admission {
            breaker: &inner.breaker,
            key: &circuit_key,
            trial,
            settled: false,
        };

        let url = join_url(&config.base_url, endpoint);
        let response_key = (config.cache.enabled && options.method == Method::GET)
            .then(|| cache_key(&options.method, &url, options.body.as_ref()));

        if let (Some(key), false) = (&response_key, options.skip_cache) {
            if let Some(hit) = inner.cache.lookup(key) {
                drop(admission);

                #[cfg(feature = "tracing")]
                tracing::trace!(key = %circuit_key, "cache hit");

                return Ok(ApiResponse {
                    data: decode_data(hit.data)?,
                    status: hit.status,
                    headers: hit.headers,
                    cached: true,
                    duration: Duration::ZERO,
                });
            }
        }

        if !options.skip_rate_limit {
            let deadline = options.rate_limit_deadline_ms.map(Duration::from_millis);
            inner
                .limiter
                .acquire_with_deadline(&circuit_key, deadline)
                .await?;
        }

        let transport_request = TransportRequest {
            method: options.method.clone(),
            url: &url,
            headers: &options.headers,
            body: options.body.as_ref(),
            timeout: options
                .timeout_ms
                .map_or_else(|| config.timeout(), Duration::from_millis),
        };
        let predicate = options
            .retry_condition
            .as_ref()
            .unwrap_or(&inner.default_retry);

        let transport = &inner.transport;
        let request = &transport_request;
        let result = run_with_retry(
            RetryPolicy::from(config.retry),
            &**predicate,
            move |_| transport.send(request),
        )
        .await;

        match result {
            Ok(response) => {
                admission.record(true);

                if let Some(key) = response_key {
                    if (200..300).contains(&response.status) {
                        inner.cache.store(
                            key,
                            CachedResponse {
                                data: response.data.clone(),
                                status: response.status,
                                headers: response.headers.clone(),
                            },
                            options.cache_ttl_ms.map(Duration::from_millis),
                        );
                    }
                }

                Ok(ApiResponse {
                    data: decode_data(response.data)?,
                    status: response.status,
                    headers: response.headers,
                    cached: false,
                    duration: started.elapsed(),
                })
            }
            Err(err) => {
                if !err.is_local() {
                    admission.record(false);
                }
                Err(err)
            }
        }
    }

    /// Drops cached responses whose key contains `pattern`, or all of them.
    ///
    /// Returns the number of removed entries.
    pub fn clear_cache(&self, pattern: Option<&str>) -> usize {
        self.inner.cache.invalidate(pattern)
    }

    pub fn stats(&self) -> ClientStats {
        ClientStats {
            cache_size: self.inner.cache.len(),
            circuits: self.inner.breaker.snapshot(),
            active_rate_limit_keys: self.inner.limiter.active_keys(),
        }
    }

    /// Summarizes client health without touching any state.
    ///
    /// Any open circuit or an oversized cache degrades the client; more open
    /// circuits than the configured ceiling make it unhealthy.
    pub fn health_check(&self) -> HealthReport {
        let stats = self.stats();
        let health = &self.inner.config.health;
        let open_circuits = stats
            .circuits
            .iter()
            .filter(|circuit| circuit.phase == CircuitPhase::Open)
            .count();

        let status = if open_circuits > health.unhealthy_open_circuits {
            HealthStatus::Unhealthy
        } else if open_circuits > 0 || stats.cache_size > health.max_cache_entries {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        HealthReport { status, stats }
    }
}

/// A request admitted by the circuit breaker.
///
/// Dropping it without [`Admission::record`], including when the request
/// future is cancelled, hands a claimed half-open trial back.
struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    key: &'a str,
    trial: bool,
    settled: bool,
}

impl Admission<'_> {
    fn record(mut self, success: bool) {
        self.settled = true;
        self.breaker.record_outcome(self.key, success);
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.breaker.release_trial(self.key);
        }
    }
}

fn to_json<B: Serialize + ?Sized>(body: &B) -> Result<Value> {
    serde_json::to_value(body)
        .map_err(|err| ApiError::InvalidRequest(format!("request body is not JSON: {err}")))
}

fn decode_data<T: DeserializeOwned>(data: Value) -> Result<T> {
    serde_json::from_value(data)
        .map_err(|err| ApiError::Parse(format!("unexpected response shape: {err}")))
}

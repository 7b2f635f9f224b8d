/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The circuit for this endpoint is open; no request was sent.
    #[error("circuit open for {key}")]
    CircuitOpen { key: String },
    /// The transport did not produce a full response within its budget.
    #[error("request timeout after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
    /// Non-success HTTP status code with raw response body.
    #[error("http error {status}: {body}")]
    Http { status: u16, body: String },
    /// Connection-level failure from `reqwest` (reset, DNS, refused).
    #[error("network error: {0}")]
    Network(reqwest::Error),
    /// Response body was not valid JSON or did not match the expected shape.
    #[error("parse error: {0}")]
    Parse(String),
    /// Waiting for a rate-limit slot would exceed the caller's deadline.
    #[error("rate limit wait of {wait_ms} ms for {key} exceeds deadline")]
    RateLimitTimeout { key: String, wait_ms: u64 },
    /// Request could not be built (bad URL, header name or header value).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Network(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }

    /// Returns `true` for errors raised before any request left the client.
    pub(crate) fn is_local(&self) -> bool {
        matches!(
            self,
            Self::CircuitOpen { .. } | Self::RateLimitTimeout { .. } | Self::InvalidRequest(_)
        )
    }
}

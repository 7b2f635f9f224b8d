use std::fmt;
use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;

use crate::util::millis;
use crate::{ApiError, Result};

/// Credential header injected into every outbound request.
#[derive(Clone, Eq, PartialEq, Deserialize)]
pub struct AuthCredential {
    pub header_name: String,
    pub value: String,
}

impl fmt::Debug for AuthCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthCredential")
            .field("header_name", &self.header_name)
            .field("value", &"<redacted>")
            .finish()
    }
}

impl AuthCredential {
    /// `Authorization: Bearer <token>`.
    ///
    /// If the token is missing the `Bearer ` prefix, it is added automatically.
    pub fn bearer(token: impl AsRef<str>) -> Self {
        Self {
            header_name: header::AUTHORIZATION.as_str().to_owned(),
            value: normalize_bearer_authorization(token.as_ref()),
        }
    }

    /// A custom access-key header, e.g. `x-access-key: <key>`.
    pub fn header(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            header_name: name.into(),
            value: value.into(),
        }
    }

    fn to_header(&self) -> Result<(HeaderName, HeaderValue)> {
        let name = HeaderName::try_from(self.header_name.as_str()).map_err(|err| {
            ApiError::InvalidRequest(format!("auth header name '{}': {err}", self.header_name))
        })?;
        let mut value = HeaderValue::try_from(self.value.as_str())
            .map_err(|err| ApiError::InvalidRequest(format!("auth header value: {err}")))?;
        value.set_sensitive(true);
        Ok((name, value))
    }
}

/// One network exchange.
#[derive(Debug)]
pub struct TransportRequest<'a> {
    pub method: Method,
    pub url: &'a str,
    /// Applied after the default headers, replacing same-named ones.
    pub headers: &'a HeaderMap,
    pub body: Option<&'a Value>,
    pub timeout: Duration,
}

/// Decoded 2xx response.
#[derive(Clone, Debug)]
pub struct TransportResponse {
    pub data: Value,
    pub status: u16,
    pub headers: HeaderMap,
}

/// JSON-over-HTTP transport with default and credential headers.
#[derive(Clone)]
pub struct Transport {
    http: reqwest::Client,
    default_headers: HeaderMap,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("default_headers", &self.default_headers.len())
            .finish()
    }
}

impl Transport {
    /// Creates a transport sending `Content-Type: application/json`,
    /// `User-Agent: <user_agent>` and the credential header, if any.
    pub fn new(user_agent: &str, auth: Option<&AuthCredential>) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        let user_agent = HeaderValue::try_from(user_agent)
            .map_err(|err| ApiError::InvalidRequest(format!("user agent: {err}")))?;
        default_headers.insert(header::USER_AGENT, user_agent);

        if let Some(auth) = auth {
            let (name, value) = auth.to_header()?;
            default_headers.insert(name, value);
        }

        Ok(Self {
            http: reqwest::Client::new(),
            default_headers,
        })
    }

    /// Sends `request` and decodes the JSON body.
    ///
    /// The whole exchange, including reading the body, must finish within
    /// `request.timeout`, otherwise [`ApiError::Timeout`] is returned.
    pub async fn send(&self, request: &TransportRequest<'_>) -> Result<TransportResponse> {
        let timeout_ms = millis(request.timeout);
        match tokio::time::timeout(request.timeout, self.exchange(request, timeout_ms)).await {
            Ok(result) => result,
            Err(_) => Err(ApiError::Timeout { timeout_ms }),
        }
    }

    async fn exchange(
        &self,
        request: &TransportRequest<'_>,
        timeout_ms: u64,
    ) -> Result<TransportResponse> {
        let mut builder = self
            .http
            .request(request.method.clone(), request.url)
            .headers(self.default_headers.clone())
            .headers(request.headers.clone())
            .timeout(request.timeout);
        if let Some(body) = request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| classify_reqwest_error(err, timeout_ms))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|err| classify_reqwest_error(err, timeout_ms))?;

        if !status.is_success() {
            return Err(ApiError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let data = if body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&body).map_err(|err| {
                ApiError::Parse(format!("invalid response JSON: {err}; body: {body}"))
            })?
        };

        Ok(TransportResponse {
            data,
            status: status.as_u16(),
            headers,
        })
    }
}

fn classify_reqwest_error(err: reqwest::Error, timeout_ms: u64) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout { timeout_ms }
    } else if err.is_builder() {
        ApiError::InvalidRequest(err.to_string())
    } else if err.is_decode() {
        ApiError::Parse(format!("response body could not be decoded: {err}"))
    } else {
        ApiError::Network(err)
    }
}

fn normalize_bearer_authorization(token: &str) -> String {
    let trimmed = token.trim();
    let prefix = trimmed.get(..7);
    if prefix.is_some_and(|value| value.eq_ignore_ascii_case("bearer ")) {
        trimmed.to_owned()
    } else {
        format!("Bearer {trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use reqwest::header;

    use super::{normalize_bearer_authorization, AuthCredential, Transport};
    use crate::ApiError;

    #[test]
    fn normalize_bearer_adds_prefix_when_missing() {
        assert_eq!(
            normalize_bearer_authorization("abc123"),
            "Bearer abc123".to_owned()
        );
    }

    #[test]
    fn normalize_bearer_keeps_existing_prefix() {
        assert_eq!(
            normalize_bearer_authorization("bEaReR abc123"),
            "bEaReR abc123".to_owned()
        );
    }

    #[test]
    fn debug_redacts_credential_value() {
        let auth = AuthCredential::header("x-access-key", "secret-key");
        let debug = format!("{auth:?}");
        assert!(debug.contains("<redacted>"));
        assert!(debug.contains("x-access-key"));
        assert!(!debug.contains("secret-key"));
    }

    #[test]
    fn default_headers_carry_credential() {
        let auth = AuthCredential::header("X-Access-Key", "k-1");
        let transport = Transport::new("solarmon-http/test", Some(&auth)).expect("transport");

        assert_eq!(
            transport.default_headers.get("x-access-key").map(|v| v.is_sensitive()),
            Some(true)
        );
        assert_eq!(
            transport.default_headers[header::CONTENT_TYPE],
            "application/json"
        );
        assert_eq!(
            transport.default_headers[header::USER_AGENT],
            "solarmon-http/test"
        );
    }

    #[test]
    fn invalid_header_name_is_rejected() {
        let auth = AuthCredential::header("bad header", "v");
        let err = Transport::new("ua", Some(&auth)).expect_err("space is not allowed");
        assert!(matches!(err, ApiError::InvalidRequest(_)));
    }
}

//! Transport: the one external collaborator the coordinator calls.
//!
//! A transport turns a [`RequestDescriptor`] into an [`Outcome`]. It never
//! returns an error; anything that goes wrong becomes a failure outcome.
//! [`HttpTransport`] speaks the trading backend's AJAX conventions over
//! reqwest.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use opentelemetry::KeyValue;
use opentelemetry_semantic_conventions::attribute::{
    ERROR_TYPE, HTTP_REQUEST_METHOD, HTTP_RESPONSE_STATUS_CODE,
};
use reqwest::header::{self, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{Failure, FailureKind, Method, Outcome, RequestDescriptor};
use crate::telemetry::metrics;

const REQUESTED_WITH: &str = "x-requested-with";
const CSRF_HEADER: &str = "x-csrftoken";

#[async_trait]
pub trait Transport: Send + Sync {
    async fn perform(&self, request: &RequestDescriptor) -> Outcome;
}

/// HTTP transport for the trading backend.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: reqwest::Url,
    csrf_token: Option<SecretString>,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url.as_str())
            .field("csrf_token", &self.csrf_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl HttpTransport {
    /// Build a transport from loaded configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::builder(&config.base_url)?
            .timeout(config.timeout)
            .session(config.session_id.clone())
            .csrf_token(config.csrf_token.clone())
            .build()
    }

    pub fn builder(base_url: &str) -> Result<HttpTransportBuilder> {
        // Paths are joined relative to the base, so it must end in '/'.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base_url = reqwest::Url::parse(&normalized)
            .map_err(|e| Error::Config(format!("invalid base url {base_url:?}: {e}")))?;
        Ok(HttpTransportBuilder {
            base_url,
            timeout: Duration::from_secs(10),
            session_id: None,
            csrf_token: None,
        })
    }

    /// Perform the exchange. The status is `None` when no response arrived.
    async fn send(&self, request: &RequestDescriptor) -> (Option<u16>, Outcome) {
        let url = match self.base_url.join(request.path.trim_start_matches('/')) {
            Ok(url) => url,
            Err(e) => {
                let message = format!("bad path {:?}: {e}", request.path);
                return (None, Outcome::transport_failure(message));
            }
        };

        let builder = match request.method {
            Method::Get => self.client.get(url).query(&request.params),
            Method::Post => {
                let mut builder = self.client.post(url).json(&request.params);
                if let Some(ref token) = self.csrf_token {
                    builder = builder.header(CSRF_HEADER, token.expose_secret());
                }
                builder
            }
        };

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(action = %request.action, "request failed: {e}");
                return (None, Outcome::transport_failure(describe_reqwest_error(&e)));
            }
        };

        let status = response.status().as_u16();
        let success = response.status().is_success();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                let failure = Failure {
                    kind: FailureKind::TransportFailure,
                    message: describe_reqwest_error(&e),
                    status: Some(status),
                };
                return (Some(status), Outcome::Failure(failure));
            }
        };

        (Some(status), classify(status, success, &body))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn perform(&self, request: &RequestDescriptor) -> Outcome {
        let started = Instant::now();
        let (status, outcome) = self.send(request).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        metrics::transport_duration_ms().record(
            elapsed_ms,
            &duration_attributes(request, status, &outcome),
        );
        debug!(
            action = %request.action,
            method = %request.method,
            path = %request.path,
            result = outcome.label(),
            elapsed_ms,
            "transport finished"
        );
        outcome
    }
}

/// Attributes for the duration histogram. The status code is only present
/// when the server answered; failed exchanges also carry `error.type`.
fn duration_attributes(
    request: &RequestDescriptor,
    status: Option<u16>,
    outcome: &Outcome,
) -> Vec<KeyValue> {
    let mut attributes = vec![
        KeyValue::new(HTTP_REQUEST_METHOD, request.method.to_string()),
        KeyValue::new("action", request.action.clone()),
    ];
    if let Some(status) = status {
        attributes.push(KeyValue::new(HTTP_RESPONSE_STATUS_CODE, i64::from(status)));
    }
    if let Some(failure) = outcome.failure() {
        let error_type = match status {
            Some(status) => status.to_string(),
            None => failure.kind.as_str().to_string(),
        };
        attributes.push(KeyValue::new(ERROR_TYPE, error_type));
    }
    attributes
}

/// Map a finished HTTP exchange to an outcome.
fn classify(status: u16, success: bool, body: &[u8]) -> Outcome {
    let parsed: Option<serde_json::Value> = serde_json::from_slice(body).ok();

    if success {
        return match parsed {
            Some(payload) => Outcome::success(payload),
            None => Outcome::Failure(Failure {
                kind: FailureKind::TransportFailure,
                message: "response body is not valid JSON".to_string(),
                status: Some(status),
            }),
        };
    }

    // The backend explains refusals (e.g. "Insufficient balance") in an
    // `error` field; surface that text, the kind stays the same.
    let message = parsed
        .as_ref()
        .and_then(|v| v.get("error").or_else(|| v.get("message")))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP error! Status: {status}"));

    Outcome::Failure(Failure {
        kind: FailureKind::TransportFailure,
        message,
        status: Some(status),
    })
}

fn describe_reqwest_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "request timed out".to_string()
    } else if e.is_connect() {
        format!("connection failed: {e}")
    } else {
        e.to_string()
    }
}

pub struct HttpTransportBuilder {
    base_url: reqwest::Url,
    timeout: Duration,
    session_id: Option<SecretString>,
    csrf_token: Option<SecretString>,
}

impl HttpTransportBuilder {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn session(mut self, session_id: Option<SecretString>) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn csrf_token(mut self, token: Option<SecretString>) -> Self {
        self.csrf_token = token;
        self
    }

    pub fn build(self) -> Result<HttpTransport> {
        let mut headers = HeaderMap::new();
        headers.insert(REQUESTED_WITH, HeaderValue::from_static("XMLHttpRequest"));

        let mut cookies = Vec::new();
        if let Some(ref session) = self.session_id {
            cookies.push(format!("sessionid={}", session.expose_secret()));
        }
        if let Some(ref token) = self.csrf_token {
            cookies.push(format!("csrftoken={}", token.expose_secret()));
        }
        if !cookies.is_empty() {
            let mut value = HeaderValue::from_str(&cookies.join("; "))
                .map_err(|e| Error::Config(format!("session credentials are not header-safe: {e}")))?;
            value.set_sensitive(true);
            headers.insert(header::COOKIE, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(self.timeout)
            .build()?;

        Ok(HttpTransport {
            client,
            base_url: self.base_url,
            csrf_token: self.csrf_token,
        })
    }
}

//! Transport boundary: the one place a real network call happens.
//!
//! The rest of the crate only ever sees the [`Transport`] trait, so the
//! breaker, retry strategy, queue, and recovery pipeline can be exercised
//! against scripted transports in tests. [`HttpTransport`] is the production
//! implementation over `reqwest`.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// HTTP-style verbs supported by the client façade and the offline queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single outbound call, fully described.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub endpoint: String,
    pub method: Method,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
    pub timeout: Duration,
}

impl TransportRequest {
    pub fn new(endpoint: impl Into<String>, method: Method) -> Self {
        Self {
            endpoint: endpoint.into(),
            method,
            headers: HashMap::new(),
            body: None,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Successful response from a transport call.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Value,
}

/// Failure raised by a transport call.
///
/// Carries exactly what the classifier needs: an optional status code and a
/// message. `Cancelled` is reserved for caller-initiated aborts so the
/// circuit breaker can tell them apart from service faults.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The service answered with a non-success status.
    #[error("service responded with status {status}: {message}")]
    Status { status: u16, message: String },

    /// The call never produced a response (DNS, reset, refused, ...).
    #[error("connection failed: {message}")]
    Connection { message: String },

    /// The call exceeded its deadline.
    #[error("request timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// The caller abandoned the request. Not a service fault.
    #[error("request cancelled by caller")]
    Cancelled,
}

impl TransportError {
    /// Status code, when the failure carries one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        TransportError::Connection { message: message.into() }
    }
}

/// Abstraction over the mechanism that actually performs a call.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// Production transport over `reqwest`.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Build a transport rooted at `base_url`. Relative endpoints are joined
    /// onto it; absolute URLs pass through untouched.
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::connection(e.to_string()))?;
        Ok(Self { client, base_url: base_url.into() })
    }

    fn url_for(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_string();
        }
        format!("{}/{}", self.base_url.trim_end_matches('/'), endpoint.trim_start_matches('/'))
    }
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport").field("base_url", &self.base_url).finish()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };

        let url = self.url_for(&request.endpoint);
        debug!(%url, method = %request.method, "dispatching request");

        let mut builder = self.client.request(method, &url).timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout { timeout: request.timeout }
            } else {
                TransportError::connection(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| TransportError::connection(e.to_string()))?;

        if !(200..300).contains(&status) {
            return Err(TransportError::Status { status, message: text });
        }

        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        Ok(TransportResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_round_trips_through_serde() {
        let json = serde_json::to_string(&Method::Patch).unwrap();
        assert_eq!(json, "\"PATCH\"");
        let back: Method = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Method::Patch);
    }

    #[test]
    fn request_builder_sets_fields() {
        let request = TransportRequest::new("/pets", Method::Post)
            .with_body(serde_json::json!({ "name": "Rex" }))
            .with_header("x-trace", "abc")
            .with_timeout(Duration::from_secs(5));

        assert_eq!(request.endpoint, "/pets");
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.headers.get("x-trace").map(String::as_str), Some("abc"));
        assert_eq!(request.timeout, Duration::from_secs(5));
        assert!(request.body.is_some());
    }

    #[test]
    fn status_code_only_present_for_status_errors() {
        let err = TransportError::Status { status: 503, message: "unavailable".into() };
        assert_eq!(err.status_code(), Some(503));

        assert_eq!(TransportError::connection("reset").status_code(), None);
        assert_eq!(TransportError::Cancelled.status_code(), None);
    }

    #[test]
    fn url_join_handles_slashes() {
        let transport = HttpTransport::new("https://api.example.test/v1/").unwrap();
        assert_eq!(transport.url_for("/pets"), "https://api.example.test/v1/pets");
        assert_eq!(transport.url_for("pets"), "https://api.example.test/v1/pets");
        assert_eq!(transport.url_for("https://other.test/x"), "https://other.test/x");
    }
}

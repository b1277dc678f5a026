//! Failure classification.
//!
//! One pure function turns a raw [`TransportError`] into an
//! [`ErrorClassification`]: a tagged value carrying retryability, severity,
//! and a display-ready message. The classification is computed once per
//! failure and threaded through the recovery pipeline instead of each layer
//! re-inspecting the error.

use serde::Serialize;

use crate::transport::TransportError;

/// Failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Network,
    Timeout,
    Authentication,
    Authorization,
    Validation,
    Server,
    Client,
    RateLimit,
    /// Synthetic: the circuit breaker rejected the call without attempting it.
    BreakerOpen,
    /// The caller abandoned the request; never a service fault.
    Cancelled,
    Unknown,
}

/// How serious a failure is for monitoring and display purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Derived, transient description of one failure. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorClassification {
    pub kind: ErrorKind,
    pub retryable: bool,
    pub severity: Severity,
    /// Stable, display-ready message for this kind of failure.
    pub user_message: &'static str,
    pub status_code: Option<u16>,
}

impl ErrorClassification {
    pub(crate) fn new(kind: ErrorKind, retryable: bool, severity: Severity) -> Self {
        Self { kind, retryable, severity, user_message: message_for(kind), status_code: None }
    }

    fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    /// Synthetic classification for a call rejected by an open breaker.
    pub fn breaker_open() -> Self {
        Self::new(ErrorKind::BreakerOpen, false, Severity::High)
    }

    /// Whether the recovery pipeline should run for this failure.
    ///
    /// Validation, client, authorization, and cancellation outcomes are
    /// surfaced directly; retryable kinds and authentication (which gets one
    /// token-refresh attempt) go through recovery.
    pub fn recoverable(&self) -> bool {
        self.retryable || self.kind == ErrorKind::Authentication
    }
}

const NETWORK_KEYWORDS: &[&str] =
    &["network", "econnreset", "econnrefused", "enotfound", "connection", "socket", "offline", "dns"];
const TIMEOUT_KEYWORDS: &[&str] = &["timeout", "timed out", "etimedout", "deadline"];
const AUTH_KEYWORDS: &[&str] = &["unauthorized", "authentication", "token expired", "credential"];

fn message_for(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Network => "Connection problem. Check your network and try again.",
        ErrorKind::Timeout => "The request took too long. Please try again.",
        ErrorKind::Authentication => "Your session has expired. Please sign in again.",
        ErrorKind::Authorization => "You don't have permission to do that.",
        ErrorKind::Validation => "The request couldn't be processed. Check your input.",
        ErrorKind::Server => "The service is having trouble. Please try again shortly.",
        ErrorKind::Client => "The requested resource was not found.",
        ErrorKind::RateLimit => "Too many requests. Please wait a moment and retry.",
        ErrorKind::BreakerOpen => "The service is temporarily unavailable. Please try again soon.",
        ErrorKind::Cancelled => "The request was cancelled.",
        ErrorKind::Unknown => "Something went wrong. Please try again.",
    }
}

/// Classify a transport failure. Pure; never panics.
pub fn classify(failure: &TransportError) -> ErrorClassification {
    match failure {
        TransportError::Status { status, .. } => classify_status(*status),
        TransportError::Timeout { .. } => {
            ErrorClassification::new(ErrorKind::Timeout, true, Severity::Medium)
        }
        TransportError::Cancelled => {
            ErrorClassification::new(ErrorKind::Cancelled, false, Severity::Low)
        }
        TransportError::Connection { message } => classify_message(message),
    }
}

fn classify_status(status: u16) -> ErrorClassification {
    let classification = match status {
        s if s >= 500 => ErrorClassification::new(ErrorKind::Server, true, Severity::High),
        401 => ErrorClassification::new(ErrorKind::Authentication, false, Severity::High),
        403 => ErrorClassification::new(ErrorKind::Authorization, false, Severity::Medium),
        404 => ErrorClassification::new(ErrorKind::Client, false, Severity::Low),
        408 => ErrorClassification::new(ErrorKind::Timeout, true, Severity::Medium),
        429 => ErrorClassification::new(ErrorKind::RateLimit, true, Severity::Medium),
        s if (400..500).contains(&s) => {
            ErrorClassification::new(ErrorKind::Validation, false, Severity::Medium)
        }
        _ => ErrorClassification::new(ErrorKind::Unknown, false, Severity::Low),
    };
    classification.with_status(status)
}

fn classify_message(message: &str) -> ErrorClassification {
    let lowered = message.to_lowercase();
    let matches = |keywords: &[&str]| keywords.iter().any(|k| lowered.contains(k));

    if matches(TIMEOUT_KEYWORDS) {
        ErrorClassification::new(ErrorKind::Timeout, true, Severity::Medium)
    } else if matches(NETWORK_KEYWORDS) {
        ErrorClassification::new(ErrorKind::Network, true, Severity::Medium)
    } else if matches(AUTH_KEYWORDS) {
        ErrorClassification::new(ErrorKind::Authentication, false, Severity::High)
    } else {
        ErrorClassification::new(ErrorKind::Unknown, false, Severity::Low)
    }
}

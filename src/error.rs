//! Error types shared across the proxy.
//!
//! `ProxyError` covers everything that ends a client exchange with an error
//! page or rejects a control-plane call. `ForwardError` is what the forwarding
//! layer reports for a single attempt against a backend.

use axum::http::StatusCode;
use thiserror::Error;

use crate::health::passive::ErrorClass;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProxyError {
    #[error("Cannot read host header.")]
    MissingHostHeader,

    #[error("Cannot read connection.")]
    UnknownConnection,

    #[error("No route. ({0})")]
    NoRoute(String),

    #[error("bad gateway. ({0})")]
    QueueFull(String),

    #[error("No host. ({0})")]
    NoHost(String),

    #[error("Backend down. ({0})")]
    BackendDown(String),

    #[error("Under maintenance. ({0})")]
    Maintenance(String),

    #[error("Cannot retry on error")]
    ClientGone,

    #[error("Reached max retries limit")]
    RetriesExhausted,

    #[error("Retry on error is disabled")]
    RetryDisabled,

    #[error("Gateway timeout")]
    Timeout,

    #[error("Request body too large")]
    PayloadTooLarge,

    #[error("No host. ({0})")]
    UnknownHost(String),

    #[error("Invalid host: {0}")]
    InvalidHost(String),

    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("Invalid certificate: {0}")]
    InvalidCertificate(String),
}

impl ProxyError {
    /// Status code used for the error page or the admin API response.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MissingHostHeader
            | ProxyError::UnknownHost(_)
            | ProxyError::InvalidHost(_)
            | ProxyError::UnknownStrategy(_)
            | ProxyError::InvalidCertificate(_) => StatusCode::BAD_REQUEST,
            ProxyError::UnknownConnection => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::NoRoute(_)
            | ProxyError::QueueFull(_)
            | ProxyError::NoHost(_)
            | ProxyError::BackendDown(_)
            | ProxyError::ClientGone
            | ProxyError::RetriesExhausted
            | ProxyError::RetryDisabled => StatusCode::BAD_GATEWAY,
            ProxyError::Maintenance(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }
}

/// A failed forwarding attempt, classified for the health state machine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{} ({message})", class.code())]
pub struct ForwardError {
    pub class: ErrorClass,
    pub message: String,
}

impl ForwardError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }

    pub fn refused(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Refused, message)
    }

    pub fn timed_out(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::TimedOut, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Other, message)
    }

    /// The error code recorded in the tracker's error histogram.
    pub fn code(&self) -> &'static str {
        self.class.code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_failures_map_to_gateway_codes() {
        assert_eq!(ProxyError::MissingHostHeader.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ProxyError::NoRoute("a.com".into()).status(), StatusCode::BAD_GATEWAY);
        assert_eq!(ProxyError::QueueFull("a.com".into()).status(), StatusCode::BAD_GATEWAY);
        assert_eq!(ProxyError::Timeout.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_messages_carry_vhost() {
        assert_eq!(ProxyError::NoRoute("a.com".into()).to_string(), "No route. (a.com)");
        assert_eq!(ProxyError::QueueFull("a.com".into()).to_string(), "bad gateway. (a.com)");
        assert_eq!(ProxyError::RetriesExhausted.to_string(), "Reached max retries limit");
    }

    #[test]
    fn test_forward_error_display() {
        let err = ForwardError::refused("tcp connect error");
        assert_eq!(err.code(), "ECONNREFUSED");
        assert_eq!(err.to_string(), "ECONNREFUSED (tcp connect error)");
    }
}

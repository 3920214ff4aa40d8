//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses, capacities and timeouts
//! - Detect duplicate vhosts and duplicate host ids within a route
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::config::schema::{ProxyConfig, RouteConfig};
use crate::routing::vhost::is_valid_vhost;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address {value:?}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    Zero { field: String },

    #[error("invalid log level {0:?}")]
    InvalidLogLevel(String),

    #[error("admin api is enabled with an empty api_key")]
    EmptyApiKey,

    #[error("tls default certificate needs both cert and key paths")]
    IncompleteDefaultCert,

    #[error("route {0}: tls needs both cert and key paths")]
    IncompleteRouteCert(String),

    #[error("invalid vhost {0:?}")]
    InvalidVhost(String),

    #[error("duplicate vhost {0:?}")]
    DuplicateVhost(String),

    #[error("route {vhost}: duplicate host id {id:?}")]
    DuplicateHost { vhost: String, id: String },

    #[error("route {vhost}: host {id} {reason}")]
    InvalidHost {
        vhost: String,
        id: String,
        reason: String,
    },
}

fn check_address(field: &'static str, value: &str, errors: &mut Vec<ValidationError>) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}

fn check_positive(field: &str, value: u64, errors: &mut Vec<ValidationError>) {
    if value == 0 {
        errors.push(ValidationError::Zero {
            field: field.to_string(),
        });
    }
}

fn check_route(route: &RouteConfig, errors: &mut Vec<ValidationError>) {
    if !is_valid_vhost(&route.vhost) {
        errors.push(ValidationError::InvalidVhost(route.vhost.clone()));
    }
    if let Some(len) = route.queue_length {
        check_positive(&format!("routes[{}].queue_length", route.vhost), len as u64, errors);
    }
    if let Some(len) = route.active_length {
        check_positive(&format!("routes[{}].active_length", route.vhost), len as u64, errors);
    }
    if let Some(tls) = &route.tls {
        if tls.cert_path.trim().is_empty() || tls.key_path.trim().is_empty() {
            errors.push(ValidationError::IncompleteRouteCert(route.vhost.clone()));
        }
    }

    let mut ids = HashSet::new();
    for host in &route.hosts {
        if !ids.insert(host.id.as_str()) {
            errors.push(ValidationError::DuplicateHost {
                vhost: route.vhost.clone(),
                id: host.id.clone(),
            });
        }
        let invalid = |reason: &str| ValidationError::InvalidHost {
            vhost: route.vhost.clone(),
            id: host.id.clone(),
            reason: reason.to_string(),
        };
        if host.hostname.trim().is_empty() {
            errors.push(invalid("has an empty hostname"));
        }
        if host.port == 0 {
            errors.push(invalid("has port 0"));
        }
        if let Some(protocol) = &host.protocol {
            if !matches!(protocol.as_str(), "http:" | "https:") {
                errors.push(invalid("has an unsupported protocol"));
            }
        }
    }
}

/// Check every semantic rule, collecting all failures.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address("listener.bind_address", &config.listener.bind_address, &mut errors);
    check_positive(
        "listener.max_connections",
        config.listener.max_connections as u64,
        &mut errors,
    );
    if let Some(tls) = &config.listener.tls {
        check_address("listener.tls.bind_address", &tls.bind_address, &mut errors);
        if tls.default_cert_path.is_some() != tls.default_key_path.is_some() {
            errors.push(ValidationError::IncompleteDefaultCert);
        }
    }

    let proxy = &config.proxy;
    check_positive("proxy.queue_length", proxy.queue_length as u64, &mut errors);
    check_positive("proxy.active_length", proxy.active_length as u64, &mut errors);
    check_positive("proxy.request_timeout_secs", proxy.request_timeout_secs, &mut errors);
    check_positive("proxy.forward_timeout_secs", proxy.forward_timeout_secs, &mut errors);
    check_positive("proxy.connect_timeout_secs", proxy.connect_timeout_secs, &mut errors);

    check_positive("tracker.latency_samples", config.tracker.latency_samples as u64, &mut errors);
    check_positive("tracker.reset_interval_secs", config.tracker.reset_interval_secs, &mut errors);
    check_positive("auth.cache_capacity", config.auth.cache_capacity, &mut errors);

    if EnvFilter::try_new(&config.observability.log_level).is_err() {
        errors.push(ValidationError::InvalidLogLevel(
            config.observability.log_level.clone(),
        ));
    }
    if config.observability.metrics_enabled {
        check_address(
            "observability.metrics_address",
            &config.observability.metrics_address,
            &mut errors,
        );
    }

    if config.admin.enabled {
        check_address("admin.bind_address", &config.admin.bind_address, &mut errors);
        if config.admin.api_key.trim().is_empty() {
            errors.push(ValidationError::EmptyApiKey);
        }
    }

    let mut vhosts = HashSet::new();
    for route in &config.routes {
        if !vhosts.insert(route.vhost.to_ascii_lowercase()) {
            errors.push(ValidationError::DuplicateVhost(route.vhost.clone()));
        }
        check_route(route, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

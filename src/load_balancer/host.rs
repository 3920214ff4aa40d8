//! Backend host abstraction.
//!
//! # Responsibilities
//! - Represent a single backend server registered on a route
//! - Carry its cluster label for candidate filtering
//! - Own its dead/alive health state

use serde::Serialize;
use url::Url;

use crate::config::HostConfig;
use crate::error::ProxyError;
use crate::health::{Claim, DeadTransition, HealthState};

pub const DEFAULT_CLUSTER: &str = "default";
pub const DEFAULT_PROTOCOL: &str = "http:";

/// A single backend server.
#[derive(Debug)]
pub struct Host {
    /// Control-plane identity.
    pub id: String,
    pub hostname: String,
    pub port: u16,
    /// Scheme with trailing colon, e.g. `http:`.
    pub protocol: String,
    pub cluster: String,
    /// Pre-calculated base URL for forwarding.
    pub base_url: Url,
    health: HealthState,
}

impl Host {
    /// Build a host from its registration record.
    pub fn new(config: &HostConfig) -> Result<Self, ProxyError> {
        let protocol = config
            .protocol
            .clone()
            .unwrap_or_else(|| DEFAULT_PROTOCOL.to_string());
        let scheme = protocol.trim_end_matches(':');
        if scheme != "http" && scheme != "https" {
            return Err(ProxyError::InvalidHost(format!(
                "unsupported protocol {} for {}",
                protocol, config.id
            )));
        }
        let base_url = Url::parse(&format!("{}://{}:{}", scheme, config.hostname, config.port))
            .map_err(|e| ProxyError::InvalidHost(format!("{}: {}", config.id, e)))?;

        Ok(Self {
            id: config.id.clone(),
            hostname: config.hostname.clone(),
            port: config.port,
            protocol,
            cluster: config
                .cluster
                .clone()
                .unwrap_or_else(|| DEFAULT_CLUSTER.to_string()),
            base_url,
            health: HealthState::new(),
        })
    }

    /// `hostname:port`, the address handed to the forwarder.
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }

    pub fn is_dead(&self) -> bool {
        self.health.is_dead()
    }

    pub fn is_retrying(&self) -> bool {
        self.health.is_retrying()
    }

    pub fn mark_dead(&self) -> DeadTransition {
        self.health.mark_dead()
    }

    pub fn clear_dead(&self) -> bool {
        self.health.clear_dead()
    }

    /// Candidate filter used by route selection. No side effects.
    pub fn admits_traffic(&self) -> bool {
        self.health.admits_traffic()
    }

    /// Take the host for one request; see [`HealthState::claim`].
    pub fn claim(&self) -> Claim {
        self.health.claim()
    }

    pub fn release_probe(&self) -> bool {
        self.health.release_probe()
    }

    /// True if this host serves the given cluster.
    pub fn serves_cluster(&self, cluster: &str) -> bool {
        self.cluster == cluster || self.cluster == DEFAULT_CLUSTER
    }

    pub fn status(&self) -> HostStatus {
        let health = self.health.snapshot();
        HostStatus {
            id: self.id.clone(),
            hostname: self.hostname.clone(),
            port: self.port,
            protocol: self.protocol.clone(),
            cluster: self.cluster.clone(),
            dead: health.dead,
            retry: health.retry,
            dead_for_ms: health.dead_for.map(|d| d.as_millis() as u64),
        }
    }
}

/// Serializable view of a host for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct HostStatus {
    pub id: String,
    pub hostname: String,
    pub port: u16,
    pub protocol: String,
    pub cluster: String,
    pub dead: bool,
    pub retry: bool,
    pub dead_for_ms: Option<u64>,
}

#[cfg(test)]
pub(crate) fn test_host(id: &str, port: u16) -> std::sync::Arc<Host> {
    std::sync::Arc::new(
        Host::new(&HostConfig {
            id: id.to_string(),
            hostname: "127.0.0.1".to_string(),
            port,
            protocol: None,
            cluster: None,
        })
        .expect("valid test host"),
    )
}

//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::load_balancer::StrategyKind;

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Request handling defaults shared by every route.
    pub proxy: ProxySettings,

    /// Statistics aggregation.
    pub tracker: TrackerConfig,

    /// Basic auth caller settings.
    pub auth: AuthConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,

    /// Virtual hosts to create at startup and on every file reload.
    pub routes: Vec<RouteConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Plain HTTP bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections per listener (backpressure).
    pub max_connections: usize,

    /// Keep client connections open between requests.
    pub keep_alive: bool,

    /// Optional TLS listener.
    pub tls: Option<TlsListenerConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
            keep_alive: true,
            tls: None,
        }
    }
}

/// TLS listener. Certificates come from routes via SNI; the default pair is
/// served to clients whose server name matches no route certificate.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsListenerConfig {
    pub bind_address: String,

    /// Fallback certificate chain (PEM).
    pub default_cert_path: Option<String>,

    /// Fallback private key (PEM).
    pub default_key_path: Option<String>,
}

impl Default for TlsListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8443".to_string(),
            default_cert_path: None,
            default_key_path: None,
        }
    }
}

/// Request handling defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxySettings {
    /// Cluster label this proxy serves; hosts in other clusters are skipped.
    pub cluster: String,

    /// Forwarding attempts per request (0 disables retry).
    pub retry_on_error: u32,

    /// Default waiting-list bound for new routes.
    pub queue_length: usize,

    /// Default concurrent-request bound for new routes.
    pub active_length: usize,

    /// Whole-request deadline in seconds, queue wait included.
    pub request_timeout_secs: u64,

    /// Deadline for one forwarding attempt to produce response headers.
    pub forward_timeout_secs: u64,

    /// TCP connect timeout towards backends.
    pub connect_timeout_secs: u64,

    /// Largest request body buffered for retries, in bytes.
    pub max_body_size: usize,

    /// Emit `x-debug-*` response headers.
    pub debug_headers: bool,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            cluster: "default".to_string(),
            retry_on_error: 3,
            queue_length: 100,
            active_length: 50,
            request_timeout_secs: 30,
            forward_timeout_secs: 30,
            connect_timeout_secs: 5,
            max_body_size: 2 * 1024 * 1024, // 2MB
            debug_headers: true,
        }
    }
}

/// Statistics aggregation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Latency ring size per record.
    pub latency_samples: usize,

    /// Records untouched for this long are swept.
    pub idle_expiry_secs: u64,

    /// Interval of the stats log / reset / sweep cycle.
    pub reset_interval_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            latency_samples: 50,
            idle_expiry_secs: 15 * 60,
            reset_interval_secs: 60,
        }
    }
}

/// Basic auth caller settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    pub cache_capacity: u64,
    pub cache_ttl_secs: u64,
    pub caller_timeout_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 500,
            cache_ttl_secs: 60 * 60,
            caller_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level or filter directive (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// One virtual host.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Host name to match; leading labels may be `*`.
    pub vhost: String,

    #[serde(default)]
    pub strategy: StrategyKind,

    /// URL of the Basic auth caller.
    #[serde(default)]
    pub auth: Option<String>,

    #[serde(default)]
    pub headers: Vec<HeaderRule>,

    /// Overrides `proxy.queue_length`.
    #[serde(default)]
    pub queue_length: Option<usize>,

    /// Overrides `proxy.active_length`.
    #[serde(default)]
    pub active_length: Option<usize>,

    /// Redirect plain HTTP to HTTPS when the route has a certificate.
    #[serde(default = "default_true")]
    pub auto_https: bool,

    #[serde(default)]
    pub maintenance: bool,

    /// Certificate served for this vhost on the TLS listener.
    #[serde(default)]
    pub tls: Option<RouteTlsConfig>,

    #[serde(default)]
    pub hosts: Vec<HostConfig>,
}

impl RouteConfig {
    pub fn new(vhost: impl Into<String>) -> Self {
        Self {
            vhost: vhost.into(),
            strategy: StrategyKind::default(),
            auth: None,
            headers: Vec::new(),
            queue_length: None,
            active_length: None,
            auto_https: true,
            maintenance: false,
            tls: None,
            hosts: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// PEM files of a route certificate.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RouteTlsConfig {
    pub cert_path: String,
    pub key_path: String,
}

/// Backend registration record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HostConfig {
    pub id: String,
    pub hostname: String,
    pub port: u16,

    /// Scheme with trailing colon; `http:` when absent.
    #[serde(default)]
    pub protocol: Option<String>,

    /// Cluster label; `default` when absent.
    #[serde(default)]
    pub cluster: Option<String>,
}

/// Where a header rule applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderTarget {
    /// Forwarded request only.
    Req,
    /// Client response only.
    Res,
    /// Both directions.
    Any,
}

impl HeaderTarget {
    pub fn applies_to_request(&self) -> bool {
        matches!(self, HeaderTarget::Req | HeaderTarget::Any)
    }

    pub fn applies_to_response(&self) -> bool {
        matches!(self, HeaderTarget::Res | HeaderTarget::Any)
    }
}

/// Header injected by a route.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HeaderRule {
    pub key: String,
    pub value: String,
    #[serde(rename = "type")]
    pub target: HeaderTarget,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: ProxyConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert_eq!(config.proxy.retry_on_error, 3);
        assert_eq!(config.proxy.queue_length, 100);
        assert_eq!(config.proxy.active_length, 50);
        assert_eq!(config.tracker.latency_samples, 50);
        assert_eq!(config.auth.cache_capacity, 500);
        assert!(config.routes.is_empty());
    }

    #[test]
    fn test_routes_parse() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [proxy]
            cluster = "eu-west"

            [[routes]]
            vhost = "api.example.com"
            strategy = "LatencyStrategy"
            auth = "http://auth.internal/check"
            active_length = 1
            headers = [
                { key = "x-served-by", value = "edge", type = "res" },
            ]

            [[routes.hosts]]
            id = "h1"
            hostname = "10.0.0.1"
            port = 3000

            [[routes.hosts]]
            id = "h2"
            hostname = "10.0.0.2"
            port = 3000
            cluster = "eu-west"
            "#,
        )
        .unwrap();

        assert_eq!(config.proxy.cluster, "eu-west");
        let route = &config.routes[0];
        assert_eq!(route.strategy, StrategyKind::Latency);
        assert_eq!(route.active_length, Some(1));
        assert_eq!(route.queue_length, None);
        assert_eq!(route.headers[0].target, HeaderTarget::Res);
        assert_eq!(route.hosts.len(), 2);
        assert_eq!(route.hosts[1].cluster.as_deref(), Some("eu-west"));
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let result: Result<ProxyConfig, _> = toml::from_str(
            r#"
            [[routes]]
            vhost = "a.com"
            strategy = "WeightedStrategy"
            "#,
        );
        assert!(result.is_err());
    }
}

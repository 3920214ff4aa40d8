//! Proxy engine.
//!
//! # Responsibilities
//! - Own the route table, the connection registry and the tracker
//! - Dispatch client requests through route → queue → strategy → forward
//! - Handle forwarding errors (health marking, retry, error pages)
//! - Expose the control-plane operations the admin API and config sync use
//!
//! # Data Flow
//! ```text
//! HttpServer (per connection)
//!     → open_connection → Connection registered
//!     → dispatch.rs: Request → route lookup → checks → queue → forward loop
//!     → Response streamed back; terminal event runs completion callbacks
//!     → close_connection when the socket goes away
//!
//! Admin API / config watcher
//!     → control.rs (routes, hosts, strategy, certificates, sync)
//! ```
//!
//! # Design Decisions
//! - One engine per process, shared as `Arc<ProxyEngine>`
//! - The forwarding primitive is a trait object so tests can stub backends
//! - Health changes are broadcast to any interested subscriber

mod control;
mod dispatch;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::config::{ProxyConfig, ProxySettings, TrackerConfig};
use crate::http::forward::{Forwarder, HyperForwarder};
use crate::net::connection::{Connection, ConnectionId};
use crate::observability::{metrics, Tracker};
use crate::routing::RouteTable;
use crate::security::AuthGate;

pub use control::SyncReport;

const HEALTH_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("backend client: {0}")]
    Tls(#[from] rustls::Error),

    #[error("auth client: {0}")]
    Auth(#[from] reqwest::Error),
}

/// A host changed between dead and alive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthEvent {
    pub vhost: String,
    pub host_id: String,
    pub alive: bool,
}

pub struct ProxyEngine {
    settings: ProxySettings,
    tracker_config: TrackerConfig,
    routes: Arc<RouteTable>,
    connections: DashMap<ConnectionId, Arc<Connection>>,
    tracker: Arc<Tracker>,
    forwarder: Arc<dyn Forwarder>,
    auth: AuthGate,
    health_tx: broadcast::Sender<HealthEvent>,
}

impl std::fmt::Debug for ProxyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyEngine")
            .field("routes", &self.routes)
            .field("connections", &self.connections.len())
            .finish_non_exhaustive()
    }
}

impl ProxyEngine {
    /// Engine forwarding through the pooled hyper client.
    pub fn new(config: &ProxyConfig) -> Result<Arc<Self>, EngineError> {
        let forwarder = Arc::new(HyperForwarder::new(&config.proxy)?);
        Self::with_forwarder(config, forwarder)
    }

    /// Engine with a custom forwarding primitive.
    pub fn with_forwarder(
        config: &ProxyConfig,
        forwarder: Arc<dyn Forwarder>,
    ) -> Result<Arc<Self>, EngineError> {
        let (health_tx, _) = broadcast::channel(HEALTH_EVENT_CAPACITY);
        Ok(Arc::new(Self {
            settings: config.proxy.clone(),
            tracker_config: config.tracker.clone(),
            routes: Arc::new(RouteTable::new()),
            connections: DashMap::new(),
            tracker: Arc::new(Tracker::new(&config.tracker)),
            forwarder,
            auth: AuthGate::new(&config.auth)?,
            health_tx,
        }))
    }

    pub fn settings(&self) -> &ProxySettings {
        &self.settings
    }

    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.routes
    }

    pub fn tracker(&self) -> &Arc<Tracker> {
        &self.tracker
    }

    pub fn subscribe_health(&self) -> broadcast::Receiver<HealthEvent> {
        self.health_tx.subscribe()
    }

    fn notify_health(&self, vhost: &str, host_id: &str, alive: bool) {
        metrics::set_backend_health(host_id, alive);
        // no subscribers is fine
        let _ = self.health_tx.send(HealthEvent {
            vhost: vhost.to_string(),
            host_id: host_id.to_string(),
            alive,
        });
    }

    // ---- connections -------------------------------------------------------

    /// Register an accepted client connection.
    pub fn open_connection(&self, connection: Arc<Connection>) {
        tracing::debug!(
            connection_id = %connection.id,
            remote_addr = %connection.remote_addr,
            secure = connection.secure,
            "connection opened"
        );
        metrics::connection_opened();
        self.connections.insert(connection.id, connection);
    }

    /// The client socket is gone. In-flight requests finish on their own.
    pub fn close_connection(&self, id: ConnectionId) {
        if let Some((_, connection)) = self.connections.remove(&id) {
            connection.mark_closed();
            metrics::connection_closed();
            tracing::debug!(
                connection_id = %id,
                in_flight = connection.request_count(),
                "connection closed"
            );
        }
    }

    pub fn connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(&id).map(|c| c.value().clone())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    // ---- periodic stats ----------------------------------------------------

    /// Log a stats snapshot, roll the tracker window and drop idle records,
    /// every `reset_interval_secs`, until `shutdown` fires.
    pub async fn run_stats_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let period = Duration::from_secs(self.tracker_config.reset_interval_secs.max(1));
        let mut interval = tokio::time::interval(period);
        // first tick completes immediately
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => self.roll_stats(),
                _ = shutdown.recv() => break,
            }
        }
    }

    fn roll_stats(&self) {
        let snapshot = self.tracker.snapshot(None);
        match serde_json::to_string(&snapshot) {
            Ok(json) => tracing::info!(
                routes = snapshot.routes.len(),
                hosts = snapshot.hosts.len(),
                connections = self.connections.len(),
                stats = %json,
                "traffic stats"
            ),
            Err(e) => tracing::warn!(error = %e, "failed to encode stats"),
        }
        self.tracker.reset();
        let expired = self.tracker.sweep();
        if expired > 0 {
            tracing::debug!(expired, "idle stat records dropped");
        }
    }
}

#[cfg(test)]
pub(crate) use test_support::{test_engine, StubForwarder};

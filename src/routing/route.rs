//! A virtual host with its backends.
//!
//! # Responsibilities
//! - Own the registered hosts (insertion order) and the selection strategy
//! - Gate requests through the admission queue
//! - Hold the mutable per-route settings (auth, headers, certificate, flags)
//!
//! # Design Decisions
//! - Lock order is queue → hosts → strategy; nothing takes them the other way
//! - Backend selection for a queued request happens while the queue lock is
//!   held, so grants leave in FIFO order
//! - Settings that are swapped wholesale live in `ArcSwap` cells

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use arc_swap::{ArcSwap, ArcSwapOption};
use rustls::sign::CertifiedKey;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::config::{HeaderRule, HostConfig, ProxySettings, RouteConfig};
use crate::error::ProxyError;
use crate::health::{Claim, DeadTransition};
use crate::http::request::{Request, Terminal};
use crate::load_balancer::{Host, HostStatus, SelectionContext, Strategy, StrategyKind};
use crate::observability::{metrics, Tracker};
use crate::routing::queue::{Grant, Queue};

pub struct Route {
    pub vhost: String,
    /// Cluster label requests of this proxy are served from.
    pub cluster: String,
    queue_length: usize,
    active_length: usize,
    queue: Mutex<Queue>,
    hosts: RwLock<Vec<Arc<Host>>>,
    strategy: RwLock<Arc<Strategy>>,
    auth: ArcSwapOption<String>,
    headers: ArcSwap<Vec<HeaderRule>>,
    tls: ArcSwapOption<CertifiedKey>,
    auto_https: AtomicBool,
    maintenance: AtomicBool,
    tracker: Arc<Tracker>,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("vhost", &self.vhost)
            .field("cluster", &self.cluster)
            .field("queue_length", &self.queue_length)
            .field("active_length", &self.active_length)
            .finish_non_exhaustive()
    }
}

/// Admin view of a route.
#[derive(Debug, Clone, Serialize)]
pub struct RouteInfo {
    pub vhost: String,
    pub queue_length: usize,
    pub queue_length_max: usize,
    pub active_length: usize,
    pub active_length_max: usize,
    pub host_count: usize,
    pub strategy: StrategyKind,
    pub cluster: String,
    pub maintenance: bool,
    pub auto_https: bool,
    pub tls: bool,
    pub auth: Option<String>,
    pub headers: Vec<HeaderRule>,
    pub hosts: BTreeMap<String, HostStatus>,
}

impl Route {
    /// Build a route and register its configured hosts. Certificates are
    /// attached separately by the engine.
    pub fn new(
        config: &RouteConfig,
        settings: &ProxySettings,
        tracker: Arc<Tracker>,
    ) -> Result<Arc<Self>, ProxyError> {
        let route = Arc::new(Self {
            vhost: config.vhost.clone(),
            cluster: settings.cluster.clone(),
            queue_length: config.queue_length.unwrap_or(settings.queue_length),
            active_length: config.active_length.unwrap_or(settings.active_length),
            queue: Mutex::new(Queue::new()),
            hosts: RwLock::new(Vec::new()),
            strategy: RwLock::new(Arc::new(Strategy::new(config.strategy))),
            auth: ArcSwapOption::from(config.auth.clone().map(Arc::new)),
            headers: ArcSwap::from_pointee(config.headers.clone()),
            tls: ArcSwapOption::empty(),
            auto_https: AtomicBool::new(config.auto_https),
            maintenance: AtomicBool::new(config.maintenance),
            tracker,
        });
        for host in &config.hosts {
            route.add_host(host)?;
        }
        Ok(route)
    }

    fn queue(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().expect("route queue mutex poisoned")
    }

    // ---- admission ---------------------------------------------------------

    /// Put a request in line. The receiver yields the selected host once the
    /// request is admitted to the active set.
    pub fn queue_request(
        self: &Arc<Self>,
        request: &Arc<Request>,
    ) -> Result<oneshot::Receiver<Grant>, ProxyError> {
        let grant = {
            let mut queue = self.queue();
            let Some(grant) = queue.admit(request.clone(), self.queue_length) else {
                drop(queue);
                tracing::warn!(vhost = %self.vhost, request_id = %request.id, "queue full");
                self.tracker.missed(&self.vhost);
                metrics::record_queue_rejection(&self.vhost);
                return Err(ProxyError::QueueFull(self.vhost.clone()));
            };
            request.checkpoint("queue:add");
            self.advance(&mut queue);
            grant
        };

        let route = Arc::downgrade(self);
        request.on_terminal(move |request, terminal| {
            if let Some(route) = route.upgrade() {
                route.dequeue(request, terminal);
            }
        });
        Ok(grant)
    }

    /// Admit waiting requests while the active set has room.
    fn advance(&self, queue: &mut Queue) {
        while let Some((request, grant)) = queue.next_ready(self.active_length) {
            request.checkpoint("queue:remove");
            let selected = self.select(&request);
            // receiver gone means the request already ended; its callback
            // removes it from the active set
            let _ = grant.send(selected);
        }
    }

    fn dequeue(&self, request: &Arc<Request>, terminal: Terminal) {
        {
            let mut queue = self.queue();
            queue.remove(&request.id);
            self.advance(&mut queue);
        }
        tracing::debug!(
            vhost = %self.vhost,
            request_id = %request.id,
            status = request.status(),
            retries = request.retries(),
            %terminal,
            timeline = %request.checkpoints().timeline().join(" "),
            "request done"
        );
    }

    /// (waiting, active)
    pub fn queue_depth(&self) -> (usize, usize) {
        let queue = self.queue();
        (queue.waiting_len(), queue.active_len())
    }

    pub fn queue_limits(&self) -> (usize, usize) {
        (self.queue_length, self.active_length)
    }

    // ---- selection ---------------------------------------------------------

    /// Pick a backend for `request`.
    ///
    /// Candidates are the hosts serving this proxy's cluster that admit
    /// traffic. The strategy's pick is then claimed; a dead host that lost
    /// its probe to a concurrent request is dropped and the strategy asked
    /// again. When every such host is dead the whole cluster list is used
    /// instead, so a route never refuses outright while it has hosts.
    pub fn select(&self, request: &Request) -> Result<Arc<Host>, ProxyError> {
        let (registered, cluster) = {
            let hosts = self.hosts.read().expect("route hosts lock poisoned");
            let cluster: Vec<Arc<Host>> = hosts
                .iter()
                .filter(|h| h.serves_cluster(&self.cluster))
                .cloned()
                .collect();
            (hosts.len(), cluster)
        };
        let mut candidates: Vec<Arc<Host>> =
            cluster.iter().filter(|h| h.admits_traffic()).cloned().collect();

        let strategy = self.strategy();
        let ctx = SelectionContext::new(Some(request.client_ip), &self.tracker);
        while !candidates.is_empty() {
            let Some(host) = strategy.select(&candidates, &ctx) else {
                break;
            };
            match host.claim() {
                Claim::Alive => return Ok(host),
                Claim::Probe => {
                    tracing::info!(
                        vhost = %self.vhost,
                        host_id = %host.id,
                        request_id = %request.id,
                        "probing dead host"
                    );
                    request.set_probe(host.clone());
                    return Ok(host);
                }
                Claim::Denied => candidates.retain(|h| !Arc::ptr_eq(h, &host)),
            }
        }

        match strategy.select(&cluster, &ctx) {
            Some(host) => Ok(host),
            None if registered > 0 => Err(ProxyError::BackendDown(self.vhost.clone())),
            None => Err(ProxyError::NoHost(self.vhost.clone())),
        }
    }

    fn strategy(&self) -> Arc<Strategy> {
        self.strategy
            .read()
            .expect("route strategy lock poisoned")
            .clone()
    }

    pub fn strategy_kind(&self) -> StrategyKind {
        self.strategy().kind()
    }

    /// Replace the selection algorithm. Hosts are re-registered on the new
    /// strategy; per-strategy state starts fresh.
    pub fn set_strategy(&self, kind: StrategyKind) {
        let hosts = self.hosts.read().expect("route hosts lock poisoned");
        let strategy = Strategy::new(kind);
        for host in hosts.iter() {
            strategy.add_host(host);
        }
        *self.strategy.write().expect("route strategy lock poisoned") = Arc::new(strategy);
    }

    // ---- hosts -------------------------------------------------------------

    /// Register a backend. Returns the existing host when the id is taken.
    pub fn add_host(&self, config: &HostConfig) -> Result<Arc<Host>, ProxyError> {
        let mut hosts = self.hosts.write().expect("route hosts lock poisoned");
        if let Some(existing) = hosts.iter().find(|h| h.id == config.id) {
            return Ok(existing.clone());
        }
        let host = Arc::new(Host::new(config)?);
        self.strategy().add_host(&host);
        hosts.push(host.clone());
        tracing::info!(vhost = %self.vhost, host_id = %host.id, address = %host.address(), "host added");
        Ok(host)
    }

    pub fn remove_host(&self, id: &str) -> Option<Arc<Host>> {
        let mut hosts = self.hosts.write().expect("route hosts lock poisoned");
        let pos = hosts.iter().position(|h| h.id == id)?;
        let host = hosts.remove(pos);
        self.strategy().remove_host(id);
        tracing::info!(vhost = %self.vhost, host_id = %id, "host removed");
        Some(host)
    }

    pub fn host(&self, id: &str) -> Option<Arc<Host>> {
        self.hosts
            .read()
            .expect("route hosts lock poisoned")
            .iter()
            .find(|h| h.id == id)
            .cloned()
    }

    pub fn hosts(&self) -> Vec<Arc<Host>> {
        self.hosts.read().expect("route hosts lock poisoned").clone()
    }

    pub fn host_count(&self) -> usize {
        self.hosts.read().expect("route hosts lock poisoned").len()
    }

    /// Mark a registered host dead. `None` if the id is not on this route.
    pub fn mark_host_dead(&self, id: &str) -> Option<DeadTransition> {
        let host = self.host(id)?;
        Some(host.mark_dead())
    }

    /// Clear a registered host's dead flag. True if it was dead.
    pub fn mark_host_alive(&self, id: &str) -> bool {
        self.host(id).map(|h| h.clear_dead()).unwrap_or(false)
    }

    // ---- settings ----------------------------------------------------------

    pub fn auth(&self) -> Option<Arc<String>> {
        self.auth.load_full()
    }

    pub fn set_auth(&self, caller: Option<String>) {
        self.auth.store(caller.map(Arc::new));
    }

    pub fn headers(&self) -> Arc<Vec<HeaderRule>> {
        self.headers.load_full()
    }

    pub fn set_headers(&self, headers: Vec<HeaderRule>) {
        self.headers.store(Arc::new(headers));
    }

    pub fn certificate(&self) -> Option<Arc<CertifiedKey>> {
        self.tls.load_full()
    }

    pub fn has_certificate(&self) -> bool {
        self.tls.load().is_some()
    }

    pub fn set_certificate(&self, key: Option<Arc<CertifiedKey>>) {
        self.tls.store(key);
    }

    pub fn auto_https(&self) -> bool {
        self.auto_https.load(Ordering::Relaxed)
    }

    pub fn set_auto_https(&self, enabled: bool) {
        self.auto_https.store(enabled, Ordering::Relaxed);
    }

    pub fn maintenance(&self) -> bool {
        self.maintenance.load(Ordering::Relaxed)
    }

    pub fn set_maintenance(&self, enabled: bool) {
        self.maintenance.store(enabled, Ordering::Relaxed);
    }

    pub fn info(&self) -> RouteInfo {
        let (waiting, active) = self.queue_depth();
        let hosts = self.hosts();
        RouteInfo {
            vhost: self.vhost.clone(),
            queue_length: waiting,
            queue_length_max: self.queue_length,
            active_length: active,
            active_length_max: self.active_length,
            host_count: hosts.len(),
            strategy: self.strategy_kind(),
            cluster: self.cluster.clone(),
            maintenance: self.maintenance(),
            auto_https: self.auto_https(),
            tls: self.has_certificate(),
            auth: self.auth().map(|a| a.as_str().to_string()),
            headers: self.headers().as_ref().clone(),
            hosts: hosts.iter().map(|h| (h.id.clone(), h.status())).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::connection::Connection;
    use std::time::Duration;

    fn host_config(id: &str, port: u16) -> HostConfig {
        HostConfig {
            id: id.to_string(),
            hostname: "127.0.0.1".to_string(),
            port,
            protocol: None,
            cluster: None,
        }
    }

    fn route_with(hosts: &[(&str, u16)], queue: usize, active: usize) -> Arc<Route> {
        let mut config = RouteConfig::new("api.example.com");
        config.queue_length = Some(queue);
        config.active_length = Some(active);
        config.hosts = hosts.iter().map(|(id, port)| host_config(id, *port)).collect();
        Route::new(&config, &ProxySettings::default(), Arc::new(Tracker::default())).unwrap()
    }

    fn connection() -> Arc<Connection> {
        Arc::new(Connection::new("127.0.0.1:40000".parse().unwrap(), false))
    }

    #[tokio::test]
    async fn test_queue_serializes_and_round_robins() {
        let route = route_with(&[("h1", 3001), ("h2", 3002)], 10, 1);
        let conn = connection();
        let reqs: Vec<_> = (0..3)
            .map(|_| Request::test_request(&conn, "api.example.com"))
            .collect();

        let mut grants: Vec<_> = reqs
            .iter()
            .map(|r| route.queue_request(r).unwrap())
            .collect();
        assert_eq!(route.queue_depth(), (2, 1));

        let first = grants.remove(0).await.unwrap().unwrap();
        assert_eq!(first.id, "h1");
        reqs[0].finish(Terminal::End);

        let second = grants.remove(0).await.unwrap().unwrap();
        assert_eq!(second.id, "h2");
        reqs[1].finish(Terminal::End);

        let third = grants.remove(0).await.unwrap().unwrap();
        assert_eq!(third.id, "h1");
        reqs[2].finish(Terminal::End);

        assert_eq!(route.queue_depth(), (0, 0));
    }

    #[tokio::test]
    async fn test_full_queue_rejects() {
        let route = route_with(&[("h1", 3001)], 1, 1);
        let conn = connection();
        let a = Request::test_request(&conn, "api.example.com");
        let b = Request::test_request(&conn, "api.example.com");
        let c = Request::test_request(&conn, "api.example.com");

        let _active = route.queue_request(&a).unwrap();
        let _waiting = route.queue_request(&b).unwrap();
        let err = route.queue_request(&c).unwrap_err();
        assert_eq!(err, ProxyError::QueueFull("api.example.com".into()));
        assert_eq!(route.queue_depth(), (1, 1));
    }

    #[tokio::test]
    async fn test_closed_waiting_request_leaves_queue() {
        let route = route_with(&[("h1", 3001)], 10, 1);
        let conn = connection();
        let a = Request::test_request(&conn, "api.example.com");
        let b = Request::test_request(&conn, "api.example.com");
        let _ga = route.queue_request(&a).unwrap();
        let _gb = route.queue_request(&b).unwrap();

        b.finish(Terminal::Close);
        assert_eq!(route.queue_depth(), (0, 1));
        a.finish(Terminal::End);
        assert_eq!(route.queue_depth(), (0, 0));
    }

    #[test]
    fn test_select_falls_back_when_all_dead() {
        let route = route_with(&[("h1", 3001)], 10, 1);
        let conn = connection();
        let request = Request::test_request(&conn, "api.example.com");

        assert_eq!(route.mark_host_dead("h1"), Some(DeadTransition::Died));
        let host = route.select(&request).unwrap();
        assert_eq!(host.id, "h1");
    }

    #[test]
    fn test_select_skips_dead_host() {
        let route = route_with(&[("h1", 3001), ("h2", 3002)], 10, 1);
        let conn = connection();
        let request = Request::test_request(&conn, "api.example.com");
        route.mark_host_dead("h1");

        for _ in 0..4 {
            assert_eq!(route.select(&request).unwrap().id, "h2");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_host_probed_once_after_probation() {
        let route = route_with(&[("h1", 3001), ("h2", 3002)], 10, 1);
        let conn = connection();
        route.mark_host_dead("h1");

        let picks = |n: usize| -> Vec<(String, bool)> {
            (0..n)
                .map(|_| {
                    let request = Request::test_request(&conn, "api.example.com");
                    let host = route.select(&request).unwrap();
                    (host.id.clone(), request.probe().is_some())
                })
                .collect()
        };

        assert!(picks(5).iter().all(|(id, _)| id == "h2"));

        tokio::time::advance(Duration::from_secs(61)).await;
        // eligible without side effects until the strategy actually picks it
        assert!(!route.host("h1").unwrap().is_retrying());

        let after = picks(6);
        let probes: Vec<_> = after.iter().filter(|(id, _)| id == "h1").collect();
        assert_eq!(probes.len(), 1, "{:?}", after);
        assert!(probes[0].1, "the probing request holds the probe");
        assert!(after.iter().filter(|(id, _)| id == "h2").all(|(_, probe)| !probe));
        assert!(route.host("h1").unwrap().is_retrying());
    }

    #[tokio::test(start_paused = true)]
    async fn test_released_probe_lets_host_be_probed_again() {
        let route = route_with(&[("h1", 3001), ("h2", 3002)], 10, 1);
        let conn = connection();
        route.mark_host_dead("h1");
        tokio::time::advance(Duration::from_secs(61)).await;

        let mut probe = None;
        for _ in 0..4 {
            let request = Request::test_request(&conn, "api.example.com");
            route.select(&request).unwrap();
            if let Some(host) = request.probe() {
                probe = Some(host);
                break;
            }
        }
        let probe = probe.expect("h1 was probed");
        assert_eq!(probe.id, "h1");

        assert!(probe.release_probe());
        let mut seen = false;
        for _ in 0..4 {
            let request = Request::test_request(&conn, "api.example.com");
            if route.select(&request).unwrap().id == "h1" {
                seen = true;
                break;
            }
        }
        assert!(seen, "released probe is handed out again");
    }

    #[test]
    fn test_select_without_hosts() {
        let route = route_with(&[], 10, 1);
        let conn = connection();
        let request = Request::test_request(&conn, "api.example.com");
        assert_eq!(
            route.select(&request).unwrap_err(),
            ProxyError::NoHost("api.example.com".into())
        );
    }

    #[test]
    fn test_select_with_only_foreign_cluster() {
        let mut config = RouteConfig::new("api.example.com");
        let mut foreign = host_config("h1", 3001);
        foreign.cluster = Some("us-east".into());
        config.hosts = vec![foreign];
        let settings = ProxySettings {
            cluster: "eu-west".into(),
            ..ProxySettings::default()
        };
        let route = Route::new(&config, &settings, Arc::new(Tracker::default())).unwrap();
        let conn = connection();
        let request = Request::test_request(&conn, "api.example.com");
        assert_eq!(
            route.select(&request).unwrap_err(),
            ProxyError::BackendDown("api.example.com".into())
        );
    }

    #[test]
    fn test_add_host_is_idempotent() {
        let route = route_with(&[("h1", 3001)], 10, 1);
        let again = route.add_host(&host_config("h1", 9999)).unwrap();
        assert_eq!(again.port, 3001);
        assert_eq!(route.host_count(), 1);

        assert!(route.remove_host("h1").is_some());
        assert!(route.remove_host("h1").is_none());
        assert_eq!(route.host_count(), 0);
    }

    #[test]
    fn test_info_reports_state() {
        let route = route_with(&[("h1", 3001), ("h2", 3002)], 10, 4);
        route.set_strategy(StrategyKind::Random);
        route.set_maintenance(true);
        let info = route.info();
        assert_eq!(info.host_count, 2);
        assert_eq!(info.queue_length_max, 10);
        assert_eq!(info.active_length_max, 4);
        assert_eq!(info.strategy, StrategyKind::Random);
        assert!(info.maintenance);
        assert!(!info.tls);
        assert!(info.hosts.contains_key("h2"));
    }
}

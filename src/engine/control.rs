//! Control-plane operations on the live route table.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::config::{HostConfig, RouteConfig};
use crate::error::ProxyError;
use crate::health::DeadTransition;
use crate::load_balancer::{Host, StrategyKind};
use crate::net::tls::{load_certified_key, load_certified_key_files};
use crate::observability::TrackerSnapshot;
use crate::routing::vhost::is_valid_vhost;
use crate::routing::{Route, RouteInfo};

use super::ProxyEngine;

/// What a bulk sync changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
}

impl ProxyEngine {
    /// Register a route. An existing route for the vhost is returned as-is.
    pub fn create_route(&self, config: &RouteConfig) -> Result<Arc<Route>, ProxyError> {
        if let Some(existing) = self.routes.get(&config.vhost) {
            return Ok(existing);
        }
        let route = self.build_route(config)?;
        let route = self.routes.insert(route);
        tracing::info!(
            vhost = %route.vhost,
            strategy = %route.strategy_kind(),
            hosts = route.host_count(),
            "route created"
        );
        Ok(route)
    }

    fn build_route(&self, config: &RouteConfig) -> Result<Arc<Route>, ProxyError> {
        if !is_valid_vhost(&config.vhost) {
            return Err(ProxyError::InvalidHost(config.vhost.clone()));
        }
        let route = Route::new(config, &self.settings, self.tracker.clone())?;
        if let Some(tls) = &config.tls {
            let key = load_certified_key_files(Path::new(&tls.cert_path), Path::new(&tls.key_path))?;
            route.set_certificate(Some(key));
        }
        Ok(route)
    }

    pub fn remove_route(&self, vhost: &str) -> Result<Arc<Route>, ProxyError> {
        let route = self
            .routes
            .remove(vhost)
            .ok_or_else(|| ProxyError::NoRoute(vhost.to_string()))?;
        tracing::info!(vhost, "route removed");
        Ok(route)
    }

    fn route(&self, vhost: &str) -> Result<Arc<Route>, ProxyError> {
        self.routes
            .get(vhost)
            .ok_or_else(|| ProxyError::NoRoute(vhost.to_string()))
    }

    /// Route serving `vhost`, following wildcard fallback.
    pub fn resolve_route(&self, vhost: &str) -> Result<Arc<Route>, ProxyError> {
        self.routes
            .resolve(vhost)
            .ok_or_else(|| ProxyError::NoRoute(vhost.to_string()))
    }

    // ---- hosts -------------------------------------------------------------

    pub fn add_host(&self, vhost: &str, config: &HostConfig) -> Result<Arc<Host>, ProxyError> {
        self.route(vhost)?.add_host(config)
    }

    pub fn remove_host(&self, vhost: &str, host_id: &str) -> Result<Arc<Host>, ProxyError> {
        self.route(vhost)?
            .remove_host(host_id)
            .ok_or_else(|| ProxyError::UnknownHost(host_id.to_string()))
    }

    /// External dead report for a host.
    pub fn mark_host_dead(&self, vhost: &str, host_id: &str) -> Result<DeadTransition, ProxyError> {
        let route = self.resolve_route(vhost)?;
        let transition = route
            .mark_host_dead(host_id)
            .ok_or_else(|| ProxyError::UnknownHost(host_id.to_string()))?;
        if transition == DeadTransition::Died {
            tracing::warn!(vhost = %route.vhost, host_id, "host reported dead");
            self.notify_health(&route.vhost, host_id, false);
        }
        Ok(transition)
    }

    /// Clear a host's dead flag. True if it was dead.
    pub fn mark_host_alive(&self, vhost: &str, host_id: &str) -> Result<bool, ProxyError> {
        let route = self.resolve_route(vhost)?;
        let host = route
            .host(host_id)
            .ok_or_else(|| ProxyError::UnknownHost(host_id.to_string()))?;
        let revived = host.clear_dead();
        if revived {
            tracing::info!(vhost = %route.vhost, host_id, "host reported alive");
            self.notify_health(&route.vhost, host_id, true);
        }
        Ok(revived)
    }

    // ---- route settings ----------------------------------------------------

    pub fn set_strategy(&self, vhost: &str, strategy: &str) -> Result<StrategyKind, ProxyError> {
        let kind: StrategyKind = strategy
            .parse()
            .map_err(|_| ProxyError::UnknownStrategy(strategy.to_string()))?;
        let route = self.route(vhost)?;
        route.set_strategy(kind);
        tracing::info!(vhost, strategy = %kind, "strategy changed");
        Ok(kind)
    }

    pub fn set_maintenance(&self, vhost: &str, enabled: bool) -> Result<(), ProxyError> {
        self.route(vhost)?.set_maintenance(enabled);
        tracing::info!(vhost, enabled, "maintenance toggled");
        Ok(())
    }

    /// Install a PEM certificate for the route serving `domain`.
    pub fn update_certificate(
        &self,
        domain: &str,
        privkey: &str,
        cert: &str,
    ) -> Result<(), ProxyError> {
        let route = self.resolve_route(domain)?;
        let key = load_certified_key(cert.as_bytes(), privkey.as_bytes())?;
        route.set_certificate(Some(key));
        tracing::info!(domain, vhost = %route.vhost, "certificate updated");
        Ok(())
    }

    // ---- bulk sync ---------------------------------------------------------

    /// Make the route table match `configs`. Routes whose capacities are
    /// unchanged are updated in place so their queues survive; the rest are
    /// rebuilt. Vhosts missing from `configs` are dropped.
    pub fn sync(&self, configs: &[RouteConfig]) -> Result<SyncReport, ProxyError> {
        let mut report = SyncReport::default();
        let mut keep = HashSet::new();

        for config in configs {
            keep.insert(config.vhost.clone());
            match self.routes.get(&config.vhost) {
                Some(route) if self.same_capacity(&route, config) => {
                    self.update_route(&route, config)?;
                    report.updated.push(config.vhost.clone());
                }
                Some(_) => {
                    let route = self.build_route(config)?;
                    self.routes.remove(&config.vhost);
                    self.routes.insert(route);
                    report.updated.push(config.vhost.clone());
                }
                None => {
                    self.create_route(config)?;
                    report.created.push(config.vhost.clone());
                }
            }
        }

        for vhost in self.routes.vhosts() {
            if !keep.contains(&vhost) {
                self.routes.remove(&vhost);
                report.removed.push(vhost);
            }
        }

        tracing::info!(
            created = report.created.len(),
            updated = report.updated.len(),
            removed = report.removed.len(),
            "routes synced"
        );
        Ok(report)
    }

    fn same_capacity(&self, route: &Route, config: &RouteConfig) -> bool {
        let wanted = (
            config.queue_length.unwrap_or(self.settings.queue_length),
            config.active_length.unwrap_or(self.settings.active_length),
        );
        route.queue_limits() == wanted
    }

    fn update_route(&self, route: &Route, config: &RouteConfig) -> Result<(), ProxyError> {
        let certificate = match &config.tls {
            Some(tls) => Some(load_certified_key_files(
                Path::new(&tls.cert_path),
                Path::new(&tls.key_path),
            )?),
            None => None,
        };

        if route.strategy_kind() != config.strategy {
            route.set_strategy(config.strategy);
        }
        route.set_auth(config.auth.clone());
        route.set_headers(config.headers.clone());
        route.set_auto_https(config.auto_https);
        route.set_maintenance(config.maintenance);
        if certificate.is_some() || !route.has_certificate() {
            route.set_certificate(certificate);
        }

        for host in route.hosts() {
            let stale = match config.hosts.iter().find(|h| h.id == host.id) {
                Some(wanted) => !same_host(&host, wanted),
                None => true,
            };
            if stale {
                route.remove_host(&host.id);
            }
        }
        for host in &config.hosts {
            route.add_host(host)?;
        }
        Ok(())
    }

    // ---- views -------------------------------------------------------------

    /// Route snapshots, optionally for a single vhost.
    pub fn info(&self, vhost: Option<&str>) -> BTreeMap<String, RouteInfo> {
        self.routes
            .routes()
            .into_iter()
            .filter(|route| vhost.map_or(true, |v| route.vhost == v))
            .map(|route| (route.vhost.clone(), route.info()))
            .collect()
    }

    /// Tracker snapshot, optionally for a single vhost.
    pub fn stats(&self, vhost: Option<&str>) -> TrackerSnapshot {
        self.tracker.snapshot(vhost)
    }
}

fn same_host(host: &Host, config: &HostConfig) -> bool {
    host.hostname == config.hostname
        && host.port == config.port
        && config.protocol.as_deref().map_or(true, |p| p == host.protocol)
        && config.cluster.as_deref().map_or(true, |c| c == host.cluster)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyConfig;
    use crate::engine::test_engine;

    fn host(id: &str, port: u16) -> HostConfig {
        HostConfig {
            id: id.to_string(),
            hostname: "127.0.0.1".to_string(),
            port,
            protocol: None,
            cluster: None,
        }
    }

    fn route_with_hosts(vhost: &str, hosts: &[(&str, u16)]) -> RouteConfig {
        let mut config = RouteConfig::new(vhost);
        config.hosts = hosts.iter().map(|(id, port)| host(id, *port)).collect();
        config
    }

    #[test]
    fn test_create_route_is_idempotent() {
        let engine = test_engine(&ProxyConfig::default());
        let first = engine.create_route(&RouteConfig::new("api.example.com")).unwrap();
        let second = engine
            .create_route(&route_with_hosts("api.example.com", &[("h1", 3000)]))
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.host_count(), 0);
    }

    #[test]
    fn test_create_route_rejects_bad_vhost() {
        let engine = test_engine(&ProxyConfig::default());
        let err = engine.create_route(&RouteConfig::new("bad host")).unwrap_err();
        assert!(matches!(err, ProxyError::InvalidHost(_)));
    }

    #[test]
    fn test_host_operations() {
        let engine = test_engine(&ProxyConfig::default());
        engine.create_route(&RouteConfig::new("*.example.com")).unwrap();
        engine.add_host("*.example.com", &host("h1", 3000)).unwrap();

        assert!(matches!(
            engine.add_host("other.org", &host("h1", 3000)),
            Err(ProxyError::NoRoute(_))
        ));

        // dead reports resolve wildcards
        let mut health = engine.subscribe_health();
        assert_eq!(
            engine.mark_host_dead("shop.example.com", "h1").unwrap(),
            DeadTransition::Died
        );
        let event = health.try_recv().unwrap();
        assert_eq!(event.host_id, "h1");
        assert!(!event.alive);

        assert!(engine.mark_host_alive("shop.example.com", "h1").unwrap());
        assert!(health.try_recv().unwrap().alive);

        assert!(matches!(
            engine.mark_host_dead("shop.example.com", "h9"),
            Err(ProxyError::UnknownHost(_))
        ));
        engine.remove_host("*.example.com", "h1").unwrap();
        assert!(matches!(
            engine.remove_host("*.example.com", "h1"),
            Err(ProxyError::UnknownHost(_))
        ));
    }

    #[test]
    fn test_set_strategy() {
        let engine = test_engine(&ProxyConfig::default());
        engine.create_route(&RouteConfig::new("api.example.com")).unwrap();
        assert_eq!(
            engine.set_strategy("api.example.com", "ip-hash").unwrap(),
            StrategyKind::IpHash
        );
        assert!(matches!(
            engine.set_strategy("api.example.com", "fastest"),
            Err(ProxyError::UnknownStrategy(_))
        ));
        assert!(matches!(
            engine.set_strategy("nope.example.com", "random"),
            Err(ProxyError::NoRoute(_))
        ));
    }

    #[test]
    fn test_update_certificate() {
        let engine = test_engine(&ProxyConfig::default());
        let route = engine.create_route(&RouteConfig::new("*.example.com")).unwrap();
        let cert = rcgen::generate_simple_self_signed(vec!["a.example.com".to_string()]).unwrap();

        engine
            .update_certificate("a.example.com", &cert.key_pair.serialize_pem(), &cert.cert.pem())
            .unwrap();
        assert!(route.has_certificate());

        let err = engine
            .update_certificate("a.example.com", "garbage", "garbage")
            .unwrap_err();
        assert!(matches!(err, ProxyError::InvalidCertificate(_)));
    }

    #[test]
    fn test_sync_reconciles_routes() {
        let engine = test_engine(&ProxyConfig::default());
        let kept = engine
            .create_route(&route_with_hosts("a.example.com", &[("h1", 3000), ("h2", 3001)]))
            .unwrap();
        engine.create_route(&RouteConfig::new("b.example.com")).unwrap();

        let mut a = route_with_hosts("a.example.com", &[("h2", 3001), ("h3", 3002)]);
        a.maintenance = true;
        let report = engine
            .sync(&[a, RouteConfig::new("c.example.com")])
            .unwrap();

        assert_eq!(report.created, vec!["c.example.com"]);
        assert_eq!(report.updated, vec!["a.example.com"]);
        assert_eq!(report.removed, vec!["b.example.com"]);

        // same capacities: updated in place
        let current = engine.routes().get("a.example.com").unwrap();
        assert!(Arc::ptr_eq(&kept, &current));
        assert!(current.maintenance());
        let ids: Vec<String> = current.hosts().iter().map(|h| h.id.clone()).collect();
        assert_eq!(ids, vec!["h2", "h3"]);
    }

    #[test]
    fn test_sync_rebuilds_on_capacity_change() {
        let engine = test_engine(&ProxyConfig::default());
        let old = engine.create_route(&RouteConfig::new("a.example.com")).unwrap();

        let mut config = RouteConfig::new("a.example.com");
        config.active_length = Some(1);
        engine.sync(&[config]).unwrap();

        let current = engine.routes().get("a.example.com").unwrap();
        assert!(!Arc::ptr_eq(&old, &current));
        assert_eq!(current.queue_limits().1, 1);
    }

    #[test]
    fn test_info_filter() {
        let engine = test_engine(&ProxyConfig::default());
        engine.create_route(&RouteConfig::new("a.example.com")).unwrap();
        engine.create_route(&RouteConfig::new("b.example.com")).unwrap();
        assert_eq!(engine.info(None).len(), 2);
        let one = engine.info(Some("b.example.com"));
        assert_eq!(one.keys().collect::<Vec<_>>(), vec!["b.example.com"]);
    }
}

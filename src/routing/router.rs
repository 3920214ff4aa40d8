//! Route table and vhost lookup.
//!
//! # Responsibilities
//! - Store routes by their vhost pattern
//! - Resolve a request vhost to a route, falling back through wildcards
//!
//! # Design Decisions
//! - Concurrent map; lookups never block on control-plane writes
//! - Exact match first, then `*.suffix` patterns most specific first, then `*`
//! - Explicit `None` on no match rather than a silent default

use std::sync::Arc;

use dashmap::DashMap;

use crate::routing::route::Route;
use crate::routing::vhost::vhost_parts;

#[derive(Default)]
pub struct RouteTable {
    routes: DashMap<String, Arc<Route>>,
}

impl std::fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteTable")
            .field("vhosts", &self.vhosts())
            .finish()
    }
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route registered under exactly this pattern.
    pub fn get(&self, vhost: &str) -> Option<Arc<Route>> {
        self.routes.get(vhost).map(|r| r.value().clone())
    }

    /// Route serving a request vhost, wildcards included.
    pub fn resolve(&self, vhost: &str) -> Option<Arc<Route>> {
        if let Some(route) = self.get(vhost) {
            return Some(route);
        }
        vhost_parts(vhost)
            .iter()
            .skip(1)
            .find_map(|pattern| self.get(pattern))
    }

    /// Insert unless the vhost is taken; returns the route now registered.
    pub fn insert(&self, route: Arc<Route>) -> Arc<Route> {
        self.routes
            .entry(route.vhost.clone())
            .or_insert(route)
            .value()
            .clone()
    }

    pub fn remove(&self, vhost: &str) -> Option<Arc<Route>> {
        self.routes.remove(vhost).map(|(_, route)| route)
    }

    pub fn vhosts(&self) -> Vec<String> {
        let mut vhosts: Vec<String> = self.routes.iter().map(|r| r.key().clone()).collect();
        vhosts.sort();
        vhosts
    }

    pub fn routes(&self) -> Vec<Arc<Route>> {
        self.routes.iter().map(|r| r.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProxySettings, RouteConfig};
    use crate::observability::Tracker;

    fn route(vhost: &str) -> Arc<Route> {
        Route::new(
            &RouteConfig::new(vhost),
            &ProxySettings::default(),
            Arc::new(Tracker::default()),
        )
        .unwrap()
    }

    #[test]
    fn test_exact_before_wildcard() {
        let table = RouteTable::new();
        table.insert(route("*.example.com"));
        table.insert(route("api.example.com"));

        assert_eq!(table.resolve("api.example.com").unwrap().vhost, "api.example.com");
        assert_eq!(table.resolve("www.example.com").unwrap().vhost, "*.example.com");
        assert!(table.resolve("example.org").is_none());
    }

    #[test]
    fn test_most_specific_wildcard_wins() {
        let table = RouteTable::new();
        table.insert(route("*.com"));
        table.insert(route("*.example.com"));
        table.insert(route("*"));

        assert_eq!(table.resolve("a.b.example.com").unwrap().vhost, "*.example.com");
        assert_eq!(table.resolve("other.com").unwrap().vhost, "*.com");
        assert_eq!(table.resolve("localhost").unwrap().vhost, "*");
        assert_eq!(table.resolve("10.0.0.1").unwrap().vhost, "*");
    }

    #[test]
    fn test_insert_keeps_existing() {
        let table = RouteTable::new();
        let first = table.insert(route("api.example.com"));
        let second = table.insert(route("api.example.com"));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(table.len(), 1);
    }
}

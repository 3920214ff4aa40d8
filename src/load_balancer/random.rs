//! Uniform random load balancing strategy.

use std::sync::Arc;

use rand::seq::SliceRandom;

use crate::load_balancer::{host::Host, LoadBalancer, SelectionContext};

#[derive(Debug, Default)]
pub struct Random;

impl Random {
    pub fn new() -> Self {
        Self
    }
}

/// Uniform pick, shared with the latency strategy's fallback paths.
pub(crate) fn pick(hosts: &[Arc<Host>]) -> Option<Arc<Host>> {
    hosts.choose(&mut rand::thread_rng()).cloned()
}

impl LoadBalancer for Random {
    fn next_server(&self, hosts: &[Arc<Host>], _ctx: &SelectionContext<'_>) -> Option<Arc<Host>> {
        pick(hosts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::host::test_host;
    use crate::observability::tracker::Tracker;
    use std::collections::HashSet;

    #[test]
    fn test_random_covers_all_hosts() {
        let tracker = Tracker::default();
        let ctx = SelectionContext::new(None, &tracker);
        let hosts = vec![test_host("h1", 8080), test_host("h2", 8081)];
        let lb = Random::new();

        let seen: HashSet<String> = (0..200)
            .map(|_| lb.next_server(&hosts, &ctx).unwrap().id.clone())
            .collect();
        assert_eq!(seen.len(), 2);
        assert!(lb.next_server(&[], &ctx).is_none());
    }
}

//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::{host::Host, LoadBalancer, SelectionContext};

/// Round-robin selector.
/// Stores a cursor that persists across calls and wraps when the list shrinks.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn next_server(&self, hosts: &[Arc<Host>], _ctx: &SelectionContext<'_>) -> Option<Arc<Host>> {
        if hosts.is_empty() {
            return None;
        }

        let len = hosts.len();
        let previous = self
            .counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                Some(if c >= len { 1 } else { c + 1 })
            })
            .unwrap_or(0);
        let index = if previous >= len { 0 } else { previous };
        Some(hosts[index].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::host::test_host;
    use crate::observability::tracker::Tracker;

    #[test]
    fn test_round_robin() {
        let tracker = Tracker::default();
        let ctx = SelectionContext::new(None, &tracker);
        let lb = RoundRobin::new();
        let hosts = vec![test_host("h1", 8080), test_host("h2", 8081), test_host("h3", 8082)];

        let picks: Vec<String> = (0..4)
            .map(|_| lb.next_server(&hosts, &ctx).unwrap().id.clone())
            .collect();
        assert_eq!(picks, vec!["h1", "h2", "h3", "h1"]);
    }

    #[test]
    fn test_cursor_resets_when_list_shrinks() {
        let tracker = Tracker::default();
        let ctx = SelectionContext::new(None, &tracker);
        let lb = RoundRobin::new();
        let hosts = vec![test_host("h1", 8080), test_host("h2", 8081), test_host("h3", 8082)];

        lb.next_server(&hosts, &ctx);
        lb.next_server(&hosts, &ctx);
        lb.next_server(&hosts, &ctx);

        let shrunk = vec![hosts[0].clone(), hosts[1].clone()];
        assert_eq!(lb.next_server(&shrunk, &ctx).unwrap().id, "h1");
        assert_eq!(lb.next_server(&shrunk, &ctx).unwrap().id, "h2");
    }

    #[test]
    fn test_empty_list() {
        let tracker = Tracker::default();
        let ctx = SelectionContext::new(None, &tracker);
        assert!(RoundRobin::new().next_server(&[], &ctx).is_none());
    }
}

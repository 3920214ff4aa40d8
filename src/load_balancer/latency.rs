//! Lowest-latency load balancing strategy.
//!
//! Starts out random while the tracker collects samples, then samples a few
//! candidates and prefers the one with the lowest rolling latency. Every
//! `random_interval` calls it drops back to random for a call so slow hosts
//! that recovered get measured again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::Rng;

use crate::load_balancer::{host::Host, random, LoadBalancer, SelectionContext};

#[derive(Debug, Clone, Copy)]
pub struct LatencyOptions {
    /// How many hosts to inspect per call (0 = all).
    pub sample_count: usize,
    /// Latency in milliseconds below which a host is taken immediately.
    pub low_latency_ms: f64,
    /// Calls served randomly before latency data is trusted.
    pub collect_count: u64,
    /// Call count at which the counter resets.
    pub random_interval: u64,
}

impl Default for LatencyOptions {
    fn default() -> Self {
        Self {
            sample_count: 5,
            low_latency_ms: 10.0,
            collect_count: 150,
            random_interval: 1000,
        }
    }
}

#[derive(Debug, Default)]
pub struct Latency {
    opts: LatencyOptions,
    count: AtomicU64,
}

impl Latency {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(opts: LatencyOptions) -> Self {
        Self {
            opts,
            count: AtomicU64::new(0),
        }
    }
}

impl LoadBalancer for Latency {
    fn next_server(&self, hosts: &[Arc<Host>], ctx: &SelectionContext<'_>) -> Option<Arc<Host>> {
        if hosts.is_empty() {
            return None;
        }

        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        if count < self.opts.collect_count {
            return random::pick(hosts);
        }
        if count > self.opts.random_interval {
            self.count.store(0, Ordering::Relaxed);
            tracing::debug!(count, "Latency strategy resetting to random");
            return random::pick(hosts);
        }

        let sample = if self.opts.sample_count == 0 || self.opts.sample_count > hosts.len() {
            hosts.len()
        } else {
            self.opts.sample_count
        };

        let mut rng = rand::thread_rng();
        let mut best: Option<(&Arc<Host>, f64)> = None;
        for i in 0..sample {
            let host = if sample == hosts.len() {
                &hosts[i]
            } else {
                &hosts[rng.gen_range(0..hosts.len())]
            };
            let Some(latency) = ctx.tracker.host_latency(&host.id) else {
                continue;
            };
            if latency < self.opts.low_latency_ms {
                return Some(host.clone());
            }
            if best.map_or(true, |(_, min)| latency < min) {
                best = Some((host, latency));
            }
        }

        match best {
            Some((host, _)) => Some(host.clone()),
            None => random::pick(hosts),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::host::test_host;
    use crate::observability::tracker::{StatKind, Tracker};

    fn warmed() -> Latency {
        let lb = Latency::new();
        lb.count.store(200, Ordering::Relaxed);
        lb
    }

    #[test]
    fn test_prefers_lowest_latency() {
        let tracker = Tracker::default();
        tracker.record_latency(StatKind::Host, "h1", 80);
        tracker.record_latency(StatKind::Host, "h2", 30);
        tracker.record_latency(StatKind::Host, "h3", 55);
        let ctx = SelectionContext::new(None, &tracker);
        let hosts = vec![test_host("h1", 1), test_host("h2", 2), test_host("h3", 3)];

        let lb = warmed();
        for _ in 0..10 {
            assert_eq!(lb.next_server(&hosts, &ctx).unwrap().id, "h2");
        }
    }

    #[test]
    fn test_low_latency_short_circuits() {
        let tracker = Tracker::default();
        tracker.record_latency(StatKind::Host, "h1", 4);
        tracker.record_latency(StatKind::Host, "h2", 2);
        let ctx = SelectionContext::new(None, &tracker);
        let hosts = vec![test_host("h1", 1), test_host("h2", 2)];

        // h1 is inspected first and is already under the cutoff
        assert_eq!(warmed().next_server(&hosts, &ctx).unwrap().id, "h1");
    }

    #[test]
    fn test_unknown_latency_is_skipped() {
        let tracker = Tracker::default();
        tracker.record_latency(StatKind::Host, "h3", 500);
        let ctx = SelectionContext::new(None, &tracker);
        let hosts = vec![test_host("h1", 1), test_host("h2", 2), test_host("h3", 3)];

        assert_eq!(warmed().next_server(&hosts, &ctx).unwrap().id, "h3");
    }

    #[test]
    fn test_counter_resets_after_interval() {
        let tracker = Tracker::default();
        let ctx = SelectionContext::new(None, &tracker);
        let hosts = vec![test_host("h1", 1)];
        let lb = Latency::new();
        lb.count.store(1000, Ordering::Relaxed);

        assert!(lb.next_server(&hosts, &ctx).is_some());
        assert_eq!(lb.count.load(Ordering::Relaxed), 0);
    }
}

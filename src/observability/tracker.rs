//! Traffic statistics aggregator.
//!
//! # Responsibilities
//! - Keep per-route and per-host hit/miss/status/error counters
//! - Keep a bounded ring of recent latencies with a rolling average
//! - Feed the latency strategy with per-host averages
//! - Forget records that have been idle for too long
//!
//! # Design Decisions
//! - Pure observer: nothing in here influences a request's outcome
//! - One sweep pass removes idle records instead of per-record timers
//! - Window counters roll into lifetime totals on `reset`

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::TrackerConfig;

/// Which family a stat record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatKind {
    Route,
    Host,
}

/// Everything the tracker needs to know about one finished forwarding attempt.
#[derive(Debug, Clone, Default)]
pub struct TrafficReport {
    pub vhost: String,
    /// Host of the latest attempt, if one was made.
    pub host_id: Option<String>,
    /// Duration of the latest attempt (target start → end).
    pub attempt_ms: Option<u64>,
    pub status: u16,
    /// Error code of the request, if it carries one.
    pub error: Option<&'static str>,
    /// Whole request duration, set once the request has ended.
    pub total_ms: Option<u64>,
}

#[derive(Debug)]
struct StatRecord {
    hits: u64,
    hits_total: u64,
    misses: u64,
    misses_total: u64,
    errors_count: u64,
    errors: BTreeMap<String, u64>,
    codes: BTreeMap<u16, u64>,
    latency: VecDeque<u64>,
    latency_avg: f64,
    touched: Instant,
}

impl StatRecord {
    fn new() -> Self {
        Self {
            hits: 0,
            hits_total: 0,
            misses: 0,
            misses_total: 0,
            errors_count: 0,
            errors: BTreeMap::new(),
            codes: BTreeMap::new(),
            latency: VecDeque::new(),
            latency_avg: 0.0,
            touched: Instant::now(),
        }
    }

    fn push_latency(&mut self, ms: u64, capacity: usize) {
        self.latency.push_back(ms);
        while self.latency.len() > capacity {
            self.latency.pop_front();
        }
        let sum: u64 = self.latency.iter().sum();
        self.latency_avg = sum as f64 / self.latency.len() as f64;
    }

    fn record_outcome(&mut self, status: u16, error: Option<&str>) {
        *self.codes.entry(status).or_default() += 1;
        match error {
            Some(code) => {
                *self.errors.entry(code.to_string()).or_default() += 1;
                self.errors_count += 1;
            }
            None => self.hits += 1,
        }
    }

    fn roll_window(&mut self) {
        self.hits_total += self.hits;
        self.misses_total += self.misses;
        self.hits = 0;
        self.misses = 0;
        self.errors_count = 0;
        self.errors.clear();
        self.codes.clear();
    }

    fn snapshot(&self) -> StatSnapshot {
        StatSnapshot {
            hits: self.hits,
            hits_total: self.hits_total,
            misses: self.misses,
            misses_total: self.misses_total,
            errors_count: self.errors_count,
            errors: self.errors.clone(),
            codes: self.codes.clone(),
            latency_avg: self.latency_avg,
            latency: self.latency.iter().copied().collect(),
        }
    }
}

/// Serializable copy of one stat record.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatSnapshot {
    pub hits: u64,
    pub hits_total: u64,
    pub misses: u64,
    pub misses_total: u64,
    pub errors_count: u64,
    pub errors: BTreeMap<String, u64>,
    pub codes: BTreeMap<u16, u64>,
    pub latency_avg: f64,
    pub latency: Vec<u64>,
}

/// All stat records, grouped by kind.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrackerSnapshot {
    pub routes: BTreeMap<String, StatSnapshot>,
    pub hosts: BTreeMap<String, StatSnapshot>,
}

/// Cross-route statistics aggregator.
#[derive(Debug)]
pub struct Tracker {
    stats: DashMap<(StatKind, String), StatRecord>,
    latency_samples: usize,
    idle_expiry: Duration,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new(&TrackerConfig::default())
    }
}

impl Tracker {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            stats: DashMap::new(),
            latency_samples: config.latency_samples.max(1),
            idle_expiry: Duration::from_secs(config.idle_expiry_secs),
        }
    }

    fn with_record<R>(&self, kind: StatKind, key: &str, f: impl FnOnce(&mut StatRecord) -> R) -> R {
        let mut entry = self
            .stats
            .entry((kind, key.to_string()))
            .or_insert_with(StatRecord::new);
        f(entry.value_mut())
    }

    /// Record a finished attempt against its host, and against its route once
    /// the request has ended.
    pub fn track_target(&self, report: &TrafficReport) {
        let capacity = self.latency_samples;

        if let Some(host_id) = &report.host_id {
            self.with_record(StatKind::Host, host_id, |stat| {
                stat.touched = Instant::now();
                if let Some(ms) = report.attempt_ms {
                    stat.push_latency(ms, capacity);
                }
                stat.record_outcome(report.status, report.error);
            });
        }

        if let Some(total) = report.total_ms {
            self.with_record(StatKind::Route, &report.vhost, |stat| {
                stat.touched = Instant::now();
                stat.push_latency(total, capacity);
                stat.record_outcome(report.status, report.error);
            });
        }
    }

    /// Count a request that never got a queue slot.
    pub fn missed(&self, vhost: &str) {
        self.with_record(StatKind::Route, vhost, |stat| {
            stat.touched = Instant::now();
            stat.misses += 1;
        });
    }

    /// Push one latency sample without touching any counter.
    pub fn record_latency(&self, kind: StatKind, key: &str, ms: u64) {
        let capacity = self.latency_samples;
        self.with_record(kind, key, |stat| {
            stat.touched = Instant::now();
            stat.push_latency(ms, capacity);
        });
    }

    /// Rolling latency average of a host, if it has any samples.
    pub fn host_latency(&self, id: &str) -> Option<f64> {
        self.stats
            .get(&(StatKind::Host, id.to_string()))
            .filter(|stat| !stat.latency.is_empty())
            .map(|stat| stat.latency_avg)
    }

    /// Roll window counters into lifetime totals. Latency history is kept.
    pub fn reset(&self) {
        for mut entry in self.stats.iter_mut() {
            entry.value_mut().roll_window();
        }
    }

    /// Drop records idle for longer than the expiry. Returns how many went.
    pub fn sweep(&self) -> usize {
        let before = self.stats.len();
        let expiry = self.idle_expiry;
        self.stats.retain(|_, stat| stat.touched.elapsed() <= expiry);
        before - self.stats.len()
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    pub fn get(&self, kind: StatKind, key: &str) -> Option<StatSnapshot> {
        self.stats
            .get(&(kind, key.to_string()))
            .map(|stat| stat.snapshot())
    }

    /// Snapshot of every record, or just one route's record when `vhost` is set.
    pub fn snapshot(&self, vhost: Option<&str>) -> TrackerSnapshot {
        let mut out = TrackerSnapshot::default();
        if let Some(vhost) = vhost {
            if let Some(stat) = self.get(StatKind::Route, vhost) {
                out.routes.insert(vhost.to_string(), stat);
            }
            return out;
        }

        for entry in self.stats.iter() {
            let (kind, key) = entry.key();
            let target = match kind {
                StatKind::Route => &mut out.routes,
                StatKind::Host => &mut out.hosts,
            };
            target.insert(key.clone(), entry.value().snapshot());
        }
        out
    }
}

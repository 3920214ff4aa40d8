//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Route grants a queue slot
//!     → route filters its hosts (cluster + health)
//!     → Strategy picks one:
//!         - round_robin.rs (rotate through hosts)
//!         - random.rs (uniform pick)
//!         - latency.rs (lowest rolling latency from the tracker)
//!         - ip_hash.rs (consistent hash on client address)
//!     → Host handed back to the engine as the next Target
//! ```
//!
//! # Design Decisions
//! - Strategies are a closed set chosen by name at route creation
//! - Each variant carries only its own state (cursor, counter, ring)
//! - Strategies never look at health; the route filters before calling

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::observability::tracker::Tracker;

pub mod host;
pub mod ip_hash;
pub mod latency;
pub mod random;
pub mod round_robin;

pub use host::{Host, HostStatus};

use ip_hash::IpHash;
use latency::Latency;
use random::Random;
use round_robin::RoundRobin;

/// Per-call inputs a strategy may consult.
#[derive(Clone, Copy)]
pub struct SelectionContext<'a> {
    pub client_ip: Option<IpAddr>,
    pub tracker: &'a Tracker,
}

impl<'a> SelectionContext<'a> {
    pub fn new(client_ip: Option<IpAddr>, tracker: &'a Tracker) -> Self {
        Self { client_ip, tracker }
    }
}

/// A host selection algorithm.
pub trait LoadBalancer: Send + Sync + fmt::Debug {
    /// Pick one host out of the (already filtered) candidates.
    fn next_server(&self, hosts: &[Arc<Host>], ctx: &SelectionContext<'_>) -> Option<Arc<Host>>;

    /// Called when a host is registered on the route.
    fn add_host(&self, _host: &Arc<Host>) {}

    /// Called when a host is removed from the route.
    fn remove_host(&self, _id: &str) {}
}

/// Strategy names accepted from the control plane and config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StrategyKind {
    #[default]
    RoundRobin,
    Random,
    Latency,
    IpHash,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::RoundRobin => "RoundRobinStrategy",
            StrategyKind::Random => "RandomStrategy",
            StrategyKind::Latency => "LatencyStrategy",
            StrategyKind::IpHash => "IPHashStrategy",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace(['-', '_'], "");
        match normalized.trim_end_matches("strategy") {
            "roundrobin" | "rr" => Ok(StrategyKind::RoundRobin),
            "random" => Ok(StrategyKind::Random),
            "latency" => Ok(StrategyKind::Latency),
            "iphash" => Ok(StrategyKind::IpHash),
            _ => Err(format!("unsupported strategy: {}", value)),
        }
    }
}

impl TryFrom<String> for StrategyKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StrategyKind> for String {
    fn from(kind: StrategyKind) -> Self {
        kind.as_str().to_string()
    }
}

/// The configured selection algorithm of a route.
#[derive(Debug)]
pub enum Strategy {
    RoundRobin(RoundRobin),
    Random(Random),
    Latency(Latency),
    IpHash(IpHash),
}

impl Strategy {
    pub fn new(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::RoundRobin => Strategy::RoundRobin(RoundRobin::new()),
            StrategyKind::Random => Strategy::Random(Random::new()),
            StrategyKind::Latency => Strategy::Latency(Latency::new()),
            StrategyKind::IpHash => Strategy::IpHash(IpHash::new()),
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            Strategy::RoundRobin(_) => StrategyKind::RoundRobin,
            Strategy::Random(_) => StrategyKind::Random,
            Strategy::Latency(_) => StrategyKind::Latency,
            Strategy::IpHash(_) => StrategyKind::IpHash,
        }
    }

    fn balancer(&self) -> &dyn LoadBalancer {
        match self {
            Strategy::RoundRobin(lb) => lb,
            Strategy::Random(lb) => lb,
            Strategy::Latency(lb) => lb,
            Strategy::IpHash(lb) => lb,
        }
    }

    pub fn select(&self, hosts: &[Arc<Host>], ctx: &SelectionContext<'_>) -> Option<Arc<Host>> {
        self.balancer().next_server(hosts, ctx)
    }

    pub fn add_host(&self, host: &Arc<Host>) {
        self.balancer().add_host(host)
    }

    pub fn remove_host(&self, id: &str) {
        self.balancer().remove_host(id)
    }
}

//! Client-IP consistent hashing strategy.
//!
//! Hosts are placed on a hash ring at `POINTS_PER_HOST` positions derived from
//! their id. A client address hashes to a position and is served by the next
//! host clockwise, so adding or removing one host only moves the clients that
//! landed on its arcs.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};

use crate::load_balancer::{host::Host, random, LoadBalancer, SelectionContext};

const POINTS_PER_HOST: u32 = 160;

fn ring_point(key: &str) -> u64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Sorted ring of (point → host id).
#[derive(Debug, Default)]
struct HashRing {
    points: BTreeMap<u64, String>,
}

impl HashRing {
    fn add(&mut self, id: &str) {
        for replica in 0..POINTS_PER_HOST {
            self.points.insert(ring_point(&format!("{}-{}", id, replica)), id.to_string());
        }
    }

    fn remove(&mut self, id: &str) {
        self.points.retain(|_, owner| owner != id);
    }

    /// Walk clockwise from the key's position, yielding host ids.
    fn walk(&self, key: &str) -> impl Iterator<Item = &String> {
        let start = ring_point(key);
        self.points
            .range(start..)
            .chain(self.points.range(..start))
            .map(|(_, id)| id)
    }
}

#[derive(Debug, Default)]
pub struct IpHash {
    ring: Mutex<HashRing>,
}

impl IpHash {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host id the ring assigns to this address, ignoring health.
    pub fn owner(&self, ip: IpAddr) -> Option<String> {
        let ring = self.ring.lock().expect("hash ring mutex poisoned");
        let owner = ring.walk(&ip.to_string()).next().cloned();
        owner
    }
}

impl LoadBalancer for IpHash {
    fn next_server(&self, hosts: &[Arc<Host>], ctx: &SelectionContext<'_>) -> Option<Arc<Host>> {
        if hosts.is_empty() {
            return None;
        }
        let Some(ip) = ctx.client_ip else {
            return random::pick(hosts);
        };

        let ring = self.ring.lock().expect("hash ring mutex poisoned");
        let owner = ring
            .walk(&ip.to_string())
            .find_map(|id| hosts.iter().find(|h| &h.id == id))
            .cloned();
        owner.or_else(|| random::pick(hosts))
    }

    fn add_host(&self, host: &Arc<Host>) {
        self.ring.lock().expect("hash ring mutex poisoned").add(&host.id);
    }

    fn remove_host(&self, id: &str) {
        self.ring.lock().expect("hash ring mutex poisoned").remove(id);
    }
}

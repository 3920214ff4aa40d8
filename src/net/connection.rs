//! Client connection records.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Record peer address and whether the transport is TLS
//! - Index the connection's in-flight requests by request id
//!
//! # Design Decisions
//! - Requests reference their connection weakly; the engine owns the record
//! - Closing a connection never cancels its requests, they finish on their own

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::time::Instant;
use uuid::Uuid;

use crate::http::request::Request;

/// Global atomic counter for connection IDs.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Peer address with IPv4-mapped IPv6 unwrapped (`::ffff:1.2.3.4` → `1.2.3.4`).
pub fn normalize_addr(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map(IpAddr::V4)
            .unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    }
}

/// One accepted client transport connection.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub remote_addr: IpAddr,
    pub remote_port: u16,
    pub secure: bool,
    pub opened_at: Instant,
    requests: Mutex<HashMap<Uuid, Arc<Request>>>,
    closed: AtomicBool,
}

impl Connection {
    pub fn new(peer: SocketAddr, secure: bool) -> Self {
        Self {
            id: ConnectionId::new(),
            remote_addr: normalize_addr(peer.ip()),
            remote_port: peer.port(),
            secure,
            opened_at: Instant::now(),
            requests: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn add_request(&self, request: Arc<Request>) {
        self.requests
            .lock()
            .expect("connection requests mutex poisoned")
            .insert(request.id, request);
    }

    pub fn remove_request(&self, id: &Uuid) -> Option<Arc<Request>> {
        self.requests
            .lock()
            .expect("connection requests mutex poisoned")
            .remove(id)
    }

    pub fn request(&self, id: &Uuid) -> Option<Arc<Request>> {
        self.requests
            .lock()
            .expect("connection requests mutex poisoned")
            .get(id)
            .cloned()
    }

    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .expect("connection requests mutex poisoned")
            .len()
    }

    /// The client transport is gone.
    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

//! Per-request lifecycle state.
//!
//! # Responsibilities
//! - Assign a request ID (UUID v4) and bind the request to its connection
//! - Record the route, the chosen host and the current forwarding target
//! - Keep the checkpoint timeline, status, retry count and last error
//! - Run completion callbacks exactly once on the first terminal event
//!
//! # Design Decisions
//! - Immutable identity lives on the struct, everything mutable behind one lock
//! - Callbacks run outside the lock, in registration order
//! - A request that already ended accepts no further state changes

use std::fmt;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use axum::http::Method;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::ForwardError;
use crate::http::target::Target;
use crate::load_balancer::Host;
use crate::net::connection::{Connection, ConnectionId};
use crate::observability::TrafficReport;
use crate::routing::Route;

/// The event that ended a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    /// A response (proxied or error page) was fully handed to the client.
    End,
    /// The client went away first.
    Close,
    /// The request deadline fired first.
    Timeout,
}

impl fmt::Display for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Terminal::End => "end",
            Terminal::Close => "close",
            Terminal::Timeout => "timeout",
        })
    }
}

/// Last forwarding error recorded on a request.
#[derive(Debug, Clone)]
pub struct RequestError {
    pub code: &'static str,
    pub message: String,
    pub at: Instant,
}

/// Ordered, timestamped checkpoints.
#[derive(Debug, Clone, Default)]
pub struct Checkpoints {
    events: Vec<(&'static str, Instant)>,
}

impl Checkpoints {
    pub fn trigger(&mut self, name: &'static str) {
        self.events.push((name, Instant::now()));
    }

    pub fn has(&self, name: &str) -> bool {
        self.events.iter().any(|(n, _)| *n == name)
    }

    /// Time between two checkpoints. A missing start falls back to the first
    /// checkpoint, a missing end to the last one.
    pub fn time(&self, start: &str, end: &str) -> Duration {
        let (Some(first), Some(last)) = (self.events.first(), self.events.last()) else {
            return Duration::ZERO;
        };
        let from = self
            .events
            .iter()
            .find(|(n, _)| *n == start)
            .unwrap_or(first)
            .1;
        let to = self.events.iter().find(|(n, _)| *n == end).unwrap_or(last).1;
        to.saturating_duration_since(from)
    }

    /// `name:offset_ms` for every checkpoint after the first.
    pub fn timeline(&self) -> Vec<String> {
        let Some((_, origin)) = self.events.first() else {
            return Vec::new();
        };
        self.events
            .iter()
            .skip(1)
            .map(|(name, at)| format!("{}:{}", name, at.saturating_duration_since(*origin).as_millis()))
            .collect()
    }

    pub fn since_first(&self) -> Duration {
        self.events
            .first()
            .map(|(_, at)| at.elapsed())
            .unwrap_or_default()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events.iter().map(|(n, _)| *n).collect()
    }
}

type Callback = Box<dyn FnOnce(&Arc<Request>, Terminal) + Send>;

#[derive(Default)]
struct Sent {
    headers: bool,
    ended: bool,
}

struct RequestState {
    route: Option<Arc<Route>>,
    target: Option<Target>,
    /// Dead host this request was let through to as its probe.
    probe: Option<Arc<Host>>,
    status: u16,
    retries: u32,
    error: Option<RequestError>,
    sent: Sent,
    checkpoints: Checkpoints,
    terminal: Option<Terminal>,
    callbacks: Vec<Callback>,
}

/// One client HTTP or WebSocket exchange.
pub struct Request {
    pub id: Uuid,
    pub connection_id: ConnectionId,
    pub client_ip: IpAddr,
    pub secure: bool,
    /// Host header without port; `None` when the header is missing.
    pub vhost: Option<String>,
    pub method: Method,
    /// Path and query as received.
    pub url: String,
    pub is_websocket: bool,
    connection: Weak<Connection>,
    state: Mutex<RequestState>,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("connection_id", &self.connection_id)
            .field("vhost", &self.vhost)
            .field("method", &self.method)
            .field("url", &self.url)
            .finish()
    }
}

impl Request {
    pub fn new(
        connection: &Arc<Connection>,
        vhost: Option<String>,
        method: Method,
        url: String,
        is_websocket: bool,
    ) -> Arc<Self> {
        let mut checkpoints = Checkpoints::default();
        checkpoints.trigger("start");
        Arc::new(Self {
            id: Uuid::new_v4(),
            connection_id: connection.id,
            client_ip: connection.remote_addr,
            secure: connection.secure,
            vhost,
            method,
            url,
            is_websocket,
            connection: Arc::downgrade(connection),
            state: Mutex::new(RequestState {
                route: None,
                target: None,
                probe: None,
                status: 502,
                retries: 0,
                error: None,
                sent: Sent::default(),
                checkpoints,
                terminal: None,
                callbacks: Vec::new(),
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, RequestState> {
        self.state.lock().expect("request state mutex poisoned")
    }

    /// vhost for logs and stats; empty when the host header was missing.
    pub fn vhost_str(&self) -> &str {
        self.vhost.as_deref().unwrap_or("")
    }

    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.connection.upgrade()
    }

    pub fn set_route(&self, route: Arc<Route>) {
        let mut state = self.state();
        if state.terminal.is_none() {
            state.route = Some(route);
        }
    }

    pub fn route(&self) -> Option<Arc<Route>> {
        self.state().route.clone()
    }

    /// Start a new attempt against `host`. Clears the previous error.
    pub fn set_host(&self, host: Arc<Host>) -> Target {
        let mut state = self.state();
        let target = Target::new(host);
        if state.terminal.is_none() {
            state.target = Some(target.clone());
            state.error = None;
        }
        target
    }

    pub fn host(&self) -> Option<Arc<Host>> {
        self.state().target.as_ref().map(|t| t.host.clone())
    }

    pub fn target(&self) -> Option<Target> {
        self.state().target.clone()
    }

    pub fn set_probe(&self, host: Arc<Host>) {
        let mut state = self.state();
        if state.terminal.is_none() {
            state.probe = Some(host);
        }
    }

    pub fn probe(&self) -> Option<Arc<Host>> {
        self.state().probe.clone()
    }

    /// Close the current attempt.
    pub fn finish_target(&self) {
        if let Some(target) = self.state().target.as_mut() {
            target.finish();
        }
    }

    pub fn set_error(&self, err: &ForwardError) {
        let mut state = self.state();
        if state.terminal.is_none() {
            state.error = Some(RequestError {
                code: err.code(),
                message: err.message.clone(),
                at: Instant::now(),
            });
        }
    }

    pub fn has_error(&self) -> bool {
        self.state().error.is_some()
    }

    pub fn error(&self) -> Option<RequestError> {
        self.state().error.clone()
    }

    pub fn status(&self) -> u16 {
        self.state().status
    }

    pub fn retries(&self) -> u32 {
        self.state().retries
    }

    /// Count one failed attempt; returns the new total.
    pub fn increment_retries(&self) -> u32 {
        let mut state = self.state();
        state.retries += 1;
        state.retries
    }

    pub fn checkpoint(&self, name: &'static str) {
        let mut state = self.state();
        if state.terminal.is_none() {
            state.checkpoints.trigger(name);
        }
    }

    pub fn checkpoints(&self) -> Checkpoints {
        self.state().checkpoints.clone()
    }

    /// Claim the response head. Returns false if it was already sent.
    pub fn send_headers(&self, status: u16) -> bool {
        let mut state = self.state();
        if state.sent.headers {
            return false;
        }
        state.sent.headers = true;
        state.status = status;
        state.checkpoints.trigger("response");
        true
    }

    pub fn headers_sent(&self) -> bool {
        self.state().sent.headers
    }

    /// Mark the response body as fully written.
    pub fn mark_ended(&self) {
        self.state().sent.ended = true;
    }

    pub fn has_ended(&self) -> bool {
        self.state().sent.ended
    }

    pub fn terminal(&self) -> Option<Terminal> {
        self.state().terminal
    }

    pub fn is_finished(&self) -> bool {
        self.state().terminal.is_some()
    }

    /// Register a completion callback. If the request already finished the
    /// callback runs immediately with the terminal event that won.
    pub fn on_terminal<F>(self: &Arc<Self>, callback: F)
    where
        F: FnOnce(&Arc<Request>, Terminal) + Send + 'static,
    {
        let mut state = self.state();
        match state.terminal {
            Some(terminal) => {
                drop(state);
                callback(self, terminal);
            }
            None => state.callbacks.push(Box::new(callback)),
        }
    }

    /// Fire a terminal event. Only the first call has any effect.
    pub fn finish(self: &Arc<Self>, terminal: Terminal) -> bool {
        let callbacks = {
            let mut state = self.state();
            if state.terminal.is_some() {
                return false;
            }
            state.terminal = Some(terminal);
            state.checkpoints.trigger("end");
            std::mem::take(&mut state.callbacks)
        };
        for callback in callbacks {
            callback(self, terminal);
        }
        true
    }

    /// Time since `start`, up to `end` once finished.
    pub fn elapsed(&self) -> Duration {
        let state = self.state();
        if state.terminal.is_some() {
            return state.checkpoints.time("start", "end");
        }
        state.checkpoints.since_first()
    }

    /// Stats view of the latest attempt (and the whole request once finished).
    pub fn report(&self) -> TrafficReport {
        let state = self.state();
        TrafficReport {
            vhost: self.vhost_str().to_string(),
            host_id: state.target.as_ref().map(|t| t.host.id.clone()),
            attempt_ms: state.target.as_ref().map(|t| t.elapsed().as_millis() as u64),
            status: state.status,
            error: state.error.as_ref().map(|e| e.code),
            total_ms: state
                .terminal
                .map(|_| state.checkpoints.time("start", "end").as_millis() as u64),
        }
    }

    #[cfg(test)]
    pub(crate) fn test_request(connection: &Arc<Connection>, vhost: &str) -> Arc<Self> {
        Self::new(
            connection,
            Some(vhost.to_string()),
            Method::GET,
            "/".to_string(),
            false,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::host::test_host;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn connection() -> Arc<Connection> {
        Arc::new(Connection::new("127.0.0.1:40000".parse().unwrap(), false))
    }

    #[test]
    fn test_defaults() {
        let conn = connection();
        let request = Request::test_request(&conn, "api.example.com");
        assert_eq!(request.status(), 502);
        assert_eq!(request.retries(), 0);
        assert!(!request.has_error());
        assert_eq!(request.connection_id, conn.id);
        assert_eq!(request.checkpoints().names(), vec!["start"]);
    }

    #[test]
    fn test_first_terminal_wins_and_callbacks_run_once_in_order() {
        let conn = connection();
        let request = Request::test_request(&conn, "api.example.com");
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["queue", "tracker"] {
            let order = order.clone();
            request.on_terminal(move |_, terminal| {
                order.lock().unwrap().push((tag, terminal));
            });
        }

        assert!(request.finish(Terminal::Close));
        assert!(!request.finish(Terminal::End));
        assert!(!request.finish(Terminal::Timeout));

        assert_eq!(
            *order.lock().unwrap(),
            vec![("queue", Terminal::Close), ("tracker", Terminal::Close)]
        );
        assert_eq!(request.terminal(), Some(Terminal::Close));
    }

    #[test]
    fn test_late_callback_runs_immediately() {
        let conn = connection();
        let request = Request::test_request(&conn, "api.example.com");
        request.finish(Terminal::Timeout);

        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        request.on_terminal(move |_, terminal| {
            assert_eq!(terminal, Terminal::Timeout);
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_set_host_clears_error() {
        let conn = connection();
        let request = Request::test_request(&conn, "api.example.com");
        request.set_host(test_host("h1", 3000));
        request.set_error(&ForwardError::refused("connection refused"));
        assert_eq!(request.error().unwrap().code, "ECONNREFUSED");

        request.set_host(test_host("h2", 3001));
        assert!(!request.has_error());
        assert_eq!(request.host().unwrap().id, "h2");
    }

    #[test]
    fn test_headers_sent_once() {
        let conn = connection();
        let request = Request::test_request(&conn, "api.example.com");
        assert!(request.send_headers(200));
        assert!(!request.send_headers(502));
        assert_eq!(request.status(), 200);
    }

    #[test]
    fn test_no_mutation_after_finish() {
        let conn = connection();
        let request = Request::test_request(&conn, "api.example.com");
        request.finish(Terminal::End);
        request.set_host(test_host("h1", 3000));
        request.checkpoint("proxy");
        assert!(request.host().is_none());
        assert!(!request.checkpoints().has("proxy"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_carries_attempt_and_total_time() {
        let conn = connection();
        let request = Request::test_request(&conn, "api.example.com");
        tokio::time::advance(Duration::from_millis(5)).await;
        request.set_host(test_host("h1", 3000));
        tokio::time::advance(Duration::from_millis(20)).await;
        request.finish_target();
        request.send_headers(200);

        let open = request.report();
        assert_eq!(open.host_id.as_deref(), Some("h1"));
        assert_eq!(open.attempt_ms, Some(20));
        assert_eq!(open.total_ms, None);

        tokio::time::advance(Duration::from_millis(10)).await;
        request.finish(Terminal::End);
        let done = request.report();
        assert_eq!(done.total_ms, Some(35));
        assert_eq!(done.status, 200);
    }

    #[test]
    fn test_timeline_format() {
        let mut checkpoints = Checkpoints::default();
        checkpoints.trigger("start");
        checkpoints.trigger("queue:add");
        let timeline = checkpoints.timeline();
        assert_eq!(timeline.len(), 1);
        assert!(timeline[0].starts_with("queue:add:"));
    }
}

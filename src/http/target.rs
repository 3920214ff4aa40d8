//! One forwarding attempt.

use std::sync::Arc;
use std::time::Duration;

use axum::http::Uri;
use tokio::time::Instant;

use crate::load_balancer::Host;

/// A (host, request) pairing for a single attempt. A request that is retried
/// gets a fresh target per attempt; only the latest one is kept.
#[derive(Debug, Clone)]
pub struct Target {
    pub host: Arc<Host>,
    pub start: Instant,
    pub end: Option<Instant>,
}

impl Target {
    pub fn new(host: Arc<Host>) -> Self {
        Self {
            host,
            start: Instant::now(),
            end: None,
        }
    }

    pub fn host_id(&self) -> &str {
        &self.host.id
    }

    /// Stamp the end of the attempt. Later calls move the stamp forward.
    pub fn finish(&mut self) {
        self.end = Some(Instant::now());
    }

    /// Attempt duration; measured up to now while the attempt is open.
    pub fn elapsed(&self) -> Duration {
        self.end.unwrap_or_else(Instant::now) - self.start
    }

    /// Backend URI for a client path-and-query.
    pub fn uri(&self, path_and_query: &str) -> Result<Uri, axum::http::Error> {
        let base = self.host.base_url.as_str().trim_end_matches('/');
        let path = if path_and_query.starts_with('/') {
            path_and_query.to_string()
        } else {
            format!("/{}", path_and_query)
        };
        Ok(format!("{}{}", base, path).parse::<Uri>()?)
    }
}

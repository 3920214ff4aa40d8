//! WebSocket (and other upgrade) relaying.
//!
//! # Responsibilities
//! - Wait for both sides of an upgrade to complete
//! - Splice the two upgraded streams together
//! - End the request when either side closes
//!
//! # Data Flow
//! ```text
//! Client ←──── upgraded stream ────→ Proxy ←──── upgraded stream ────→ Backend
//! ```
//!
//! # Design Decisions
//! - The handshake goes through the normal forward path; the backend's 101
//!   is returned to the client as-is
//! - Byte-level copy after the handshake (no frame parsing)
//! - A clean close ends the request, a broken stream counts as a client close

use std::io;
use std::sync::Arc;

use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;

use crate::http::request::{Request, Terminal};

/// Spawn the relay between the client and backend upgrades.
pub fn spawn_relay(request: Arc<Request>, client: OnUpgrade, backend: OnUpgrade) {
    tokio::spawn(async move {
        match relay(client, backend).await {
            Ok((client_to_backend, backend_to_client)) => {
                tracing::debug!(
                    request_id = %request.id,
                    vhost = request.vhost_str(),
                    client_to_backend,
                    backend_to_client,
                    "upgraded connection closed"
                );
                request.mark_ended();
                request.finish(Terminal::End);
            }
            Err(e) => {
                tracing::debug!(
                    request_id = %request.id,
                    vhost = request.vhost_str(),
                    error = %e,
                    "upgraded connection closed with error"
                );
                request.finish(Terminal::Close);
            }
        }
    });
}

async fn relay(client: OnUpgrade, backend: OnUpgrade) -> io::Result<(u64, u64)> {
    let (client, backend) = tokio::try_join!(client, backend).map_err(io::Error::other)?;
    let mut client = TokioIo::new(client);
    let mut backend = TokioIo::new(backend);
    tokio::io::copy_bidirectional(&mut client, &mut backend).await
}

//! HTTP server setup and connection handling.
//!
//! # Responsibilities
//! - Create the Axum Router that hands every request to the engine
//! - Run the plain and TLS accept loops
//! - Serve each connection with hyper (HTTP/1.1 keep-alive, upgrades)
//! - Register and unregister connections with the engine
//! - Drain connections on shutdown
//!
//! # Design Decisions
//! - One router for both listeners; the connection record travels in the
//!   request extensions so the engine knows the peer and the transport
//! - Connections are served manually (not `axum::serve`) so TLS, permits and
//!   upgrades share one code path

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{Response, StatusCode},
    Router,
};
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;
use tower::Service;
use tower_http::trace::TraceLayer;

use crate::engine::ProxyEngine;
use crate::error::ProxyError;
use crate::http::response;
use crate::net::listener::ConnectionPermit;
use crate::net::{Connection, Listener, ListenerError};

/// HTTP server for the reverse proxy.
#[derive(Clone)]
pub struct HttpServer {
    engine: Arc<ProxyEngine>,
    router: Router,
    keep_alive: bool,
}

impl HttpServer {
    pub fn new(engine: Arc<ProxyEngine>, keep_alive: bool) -> Self {
        let router = Self::build_router(engine.clone());
        Self {
            engine,
            router,
            keep_alive,
        }
    }

    /// Every path and method goes to the proxy handler.
    fn build_router(engine: Arc<ProxyEngine>) -> Router {
        Router::new()
            .fallback(proxy_handler)
            .with_state(engine)
            .layer(TraceLayer::new_for_http())
    }

    /// Accept plain HTTP connections until `shutdown` fires.
    pub async fn run(
        self,
        listener: Listener,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        self.accept_loop(listener, None, shutdown).await
    }

    /// Accept TLS connections until `shutdown` fires.
    pub async fn run_tls(
        self,
        listener: Listener,
        acceptor: TlsAcceptor,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        self.accept_loop(listener, Some(acceptor), shutdown).await
    }

    async fn accept_loop(
        self,
        listener: Listener,
        acceptor: Option<TlsAcceptor>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        let secure = acceptor.is_some();
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(address = %addr, secure, "HTTP server starting");
        }

        loop {
            let (stream, peer, permit) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(ListenerError::Accept(e)) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                    Err(e) => return Err(e),
                },
                _ = shutdown.recv() => break,
            };

            let server = self.clone();
            let conn_shutdown = shutdown.resubscribe();
            match acceptor.clone() {
                None => {
                    tokio::spawn(server.serve_connection(stream, peer, false, permit, conn_shutdown));
                }
                Some(acceptor) => {
                    tokio::spawn(async move {
                        match acceptor.accept(stream).await {
                            Ok(tls) => {
                                server
                                    .serve_connection(tls, peer, true, permit, conn_shutdown)
                                    .await
                            }
                            Err(e) => {
                                tracing::debug!(peer_addr = %peer, error = %e, "TLS handshake failed")
                            }
                        }
                    });
                }
            }
        }

        tracing::info!(secure, "HTTP server stopped");
        Ok(())
    }

    async fn serve_connection<I>(
        self,
        io: I,
        peer: SocketAddr,
        secure: bool,
        _permit: ConnectionPermit,
        mut shutdown: broadcast::Receiver<()>,
    ) where
        I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let connection = Arc::new(Connection::new(peer, secure));
        self.engine.open_connection(connection.clone());

        let router = self.router.clone();
        let record = connection.clone();
        let service = hyper::service::service_fn(move |mut request: hyper::Request<Incoming>| {
            request.extensions_mut().insert(record.clone());
            router.clone().call(request)
        });

        let mut builder = auto::Builder::new(TokioExecutor::new());
        builder.http1().keep_alive(self.keep_alive);
        let conn = builder.serve_connection_with_upgrades(TokioIo::new(io), service);
        tokio::pin!(conn);

        let result = tokio::select! {
            result = conn.as_mut() => result,
            _ = shutdown.recv() => {
                conn.as_mut().graceful_shutdown();
                conn.await
            }
        };
        if let Err(e) = result {
            tracing::debug!(connection_id = %connection.id, error = %e, "connection error");
        }

        self.engine.close_connection(connection.id);
    }
}

/// Hands the request to the engine together with its connection record.
async fn proxy_handler(State(engine): State<Arc<ProxyEngine>>, request: Request) -> Response<Body> {
    let Some(connection) = request.extensions().get::<Arc<Connection>>().cloned() else {
        let err = ProxyError::UnknownConnection;
        return response::error_page(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string());
    };
    engine.handle(connection, request).await
}

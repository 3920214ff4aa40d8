//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the engine and register the configured routes
//! - Bind the plain, TLS and admin listeners
//! - Start background tasks (stats roll-up, route reload)
//! - Stop everything in order on shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Routes are registered before the listeners bind (traffic only when ready)
//! - Reloads only re-sync routes; a bad file keeps the current table

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::RecommendedWatcher;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

use crate::admin;
use crate::config::{load_config, ProxyConfig, RouteWatcher};
use crate::engine::{EngineError, ProxyEngine};
use crate::error::ProxyError;
use crate::http::HttpServer;
use crate::lifecycle::{signals, Shutdown};
use crate::net::tls::{load_certified_key_files, server_config};
use crate::net::{Listener, ListenerError, SniResolver};

/// In-flight connections get this long to finish after shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Route setup failed: {0}")]
    Routes(#[from] ProxyError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("TLS setup failed: {0}")]
    Tls(#[from] rustls::Error),

    #[error("Admin listener failed: {0}")]
    Admin(#[source] std::io::Error),

    #[error("Config watcher failed: {0}")]
    Watch(#[from] notify::Error),
}

/// A started proxy: listeners bound, tasks running.
pub struct RunningProxy {
    engine: Arc<ProxyEngine>,
    shutdown: Shutdown,
    tasks: Vec<JoinHandle<()>>,
    http_addr: SocketAddr,
    tls_addr: Option<SocketAddr>,
    admin_addr: Option<SocketAddr>,
    _watcher: Option<RecommendedWatcher>,
}

impl RunningProxy {
    pub fn engine(&self) -> &Arc<ProxyEngine> {
        &self.engine
    }

    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    pub fn tls_addr(&self) -> Option<SocketAddr> {
        self.tls_addr
    }

    pub fn admin_addr(&self) -> Option<SocketAddr> {
        self.admin_addr
    }

    /// Stop accepting, let open connections drain, then return.
    pub async fn shutdown(self) {
        tracing::info!("Shutting down");
        self.shutdown.trigger();
        let drained = tokio::time::timeout(
            DRAIN_TIMEOUT,
            futures_util::future::join_all(self.tasks),
        )
        .await;
        if drained.is_err() {
            tracing::warn!(
                timeout_secs = DRAIN_TIMEOUT.as_secs(),
                connections = self.engine.connection_count(),
                "Drain timed out"
            );
        }
        tracing::info!("Shutdown complete");
    }
}

/// Start the proxy. With `config_path` set, route changes in the file (and
/// SIGHUP) re-sync the route table.
pub async fn start(
    config: ProxyConfig,
    config_path: Option<PathBuf>,
) -> Result<RunningProxy, StartupError> {
    let shutdown = Shutdown::new();
    let engine = ProxyEngine::new(&config)?;
    let report = engine.sync(&config.routes)?;
    tracing::info!(routes = report.created.len(), "Routes registered");

    let mut tasks = Vec::new();
    let server = HttpServer::new(engine.clone(), config.listener.keep_alive);

    let listener = Listener::bind(&config.listener.bind_address, config.listener.max_connections).await?;
    let http_addr = local_addr(&listener, &config.listener.bind_address)?;
    tasks.push(spawn_listener(
        "http",
        server.clone().run(listener, shutdown.subscribe()),
    ));

    let mut tls_addr = None;
    if let Some(tls) = &config.listener.tls {
        let default = match (&tls.default_cert_path, &tls.default_key_path) {
            (Some(cert), Some(key)) => Some(load_certified_key_files(Path::new(cert), Path::new(key))?),
            _ => None,
        };
        let resolver = Arc::new(SniResolver::new(engine.routes().clone(), default));
        let acceptor = TlsAcceptor::from(server_config(resolver)?);
        let listener = Listener::bind(&tls.bind_address, config.listener.max_connections).await?;
        tls_addr = Some(local_addr(&listener, &tls.bind_address)?);
        tasks.push(spawn_listener(
            "https",
            server.clone().run_tls(listener, acceptor, shutdown.subscribe()),
        ));
    }

    let mut admin_addr = None;
    if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address)
            .await
            .map_err(StartupError::Admin)?;
        admin_addr = Some(listener.local_addr().map_err(StartupError::Admin)?);
        let router = admin::setup_admin_router(engine.clone(), &config.admin.api_key);
        let rx = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = admin::serve(listener, router, rx).await {
                tracing::error!(error = %e, "Admin API stopped");
            }
        }));
    }

    tasks.push(tokio::spawn(engine.clone().run_stats_loop(shutdown.subscribe())));

    let watcher = match config_path {
        Some(path) => {
            let (watcher, updates) = RouteWatcher::new(&path);
            let handle = watcher.run()?;
            let (reload_tx, reloads) = mpsc::unbounded_channel();
            signals::spawn_reload_listener(reload_tx);
            tasks.push(tokio::spawn(reload_loop(
                engine.clone(),
                path,
                updates,
                reloads,
                shutdown.subscribe(),
            )));
            Some(handle)
        }
        None => None,
    };

    tracing::info!(
        http = %http_addr,
        https = ?tls_addr,
        admin = ?admin_addr,
        "Proxy started"
    );

    Ok(RunningProxy {
        engine,
        shutdown,
        tasks,
        http_addr,
        tls_addr,
        admin_addr,
        _watcher: watcher,
    })
}

fn local_addr(listener: &Listener, address: &str) -> Result<SocketAddr, ListenerError> {
    listener.local_addr().map_err(|source| ListenerError::Bind {
        address: address.to_string(),
        source,
    })
}

fn spawn_listener<F>(name: &'static str, run: F) -> JoinHandle<()>
where
    F: std::future::Future<Output = Result<(), ListenerError>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = run.await {
            tracing::error!(listener = name, error = %e, "Listener stopped");
        }
    })
}

/// Re-sync routes on every file change or SIGHUP.
async fn reload_loop(
    engine: Arc<ProxyEngine>,
    path: PathBuf,
    mut updates: mpsc::UnboundedReceiver<ProxyConfig>,
    mut reloads: mpsc::UnboundedReceiver<()>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let config = tokio::select! {
            Some(config) = updates.recv() => config,
            Some(()) = reloads.recv() => match load_config(&path) {
                Ok(config) => config,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to reload config, keeping current routes");
                    continue;
                }
            },
            _ = shutdown.recv() => break,
            else => break,
        };
        match engine.sync(&config.routes) {
            Ok(report) => tracing::info!(
                created = ?report.created,
                updated = report.updated.len(),
                removed = ?report.removed,
                "Routes reloaded"
            ),
            Err(e) => tracing::error!(error = %e, "Route reload failed"),
        }
    }
}

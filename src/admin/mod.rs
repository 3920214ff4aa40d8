//! Admin API.
//!
//! # Responsibilities
//! - Expose the control plane over HTTP/JSON (routes, hosts, strategy,
//!   maintenance, certificates, sync)
//! - Expose status, route info and tracker stats
//! - Guard every endpoint with a bearer API key
//!
//! # Design Decisions
//! - Served on its own listener, never on the proxy ports
//! - Unknown vhosts and host ids answer 404; other control errors keep the
//!   status of their `ProxyError`

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::engine::ProxyEngine;

#[derive(Clone)]
pub struct AdminState {
    pub engine: Arc<ProxyEngine>,
    pub api_key: Arc<str>,
}

pub fn setup_admin_router(engine: Arc<ProxyEngine>, api_key: &str) -> Router {
    let state = AdminState {
        engine,
        api_key: Arc::from(api_key),
    };
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/routes", get(list_routes).post(create_route))
        .route("/admin/routes/{vhost}", get(get_route).delete(delete_route))
        .route("/admin/routes/{vhost}/hosts", post(add_host))
        .route(
            "/admin/routes/{vhost}/hosts/{host_id}",
            axum::routing::delete(remove_host),
        )
        .route("/admin/routes/{vhost}/hosts/{host_id}/dead", post(mark_host_dead))
        .route("/admin/routes/{vhost}/hosts/{host_id}/alive", post(mark_host_alive))
        .route("/admin/routes/{vhost}/strategy", put(set_strategy))
        .route("/admin/routes/{vhost}/maintenance", put(set_maintenance))
        .route("/admin/certificates", post(update_certificate))
        .route("/admin/stats", get(get_stats))
        .route("/admin/sync", post(sync_routes))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(address = %addr, "Admin API listening");
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
}

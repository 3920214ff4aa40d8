use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use super::AdminState;
use crate::config::{HostConfig, RouteConfig};
use crate::engine::SyncReport;
use crate::error::ProxyError;
use crate::load_balancer::HostStatus;
use crate::observability::TrackerSnapshot;
use crate::routing::RouteInfo;

/// Control-plane failure rendered as JSON.
#[derive(Debug)]
pub struct AdminError(pub ProxyError);

impl From<ProxyError> for AdminError {
    fn from(err: ProxyError) -> Self {
        Self(err)
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ProxyError::NoRoute(_) | ProxyError::UnknownHost(_) => StatusCode::NOT_FOUND,
            err => err.status(),
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

type AdminResult<T> = Result<T, AdminError>;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub routes: usize,
    pub connections: usize,
}

#[derive(Debug, Deserialize)]
pub struct StrategyUpdate {
    pub strategy: String,
}

#[derive(Debug, Serialize)]
pub struct StrategyChanged {
    pub vhost: String,
    pub strategy: String,
}

#[derive(Debug, Deserialize)]
pub struct MaintenanceUpdate {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct CertificateUpdate {
    pub domain: String,
    pub privkey: String,
    pub cert: String,
}

#[derive(Debug, Serialize)]
pub struct HostHealth {
    pub vhost: String,
    pub host_id: String,
    pub dead: bool,
    pub changed: bool,
}

#[derive(Debug, Deserialize)]
pub struct VhostFilter {
    pub vhost: Option<String>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        routes: state.engine.routes().len(),
        connections: state.engine.connection_count(),
    })
}

pub async fn list_routes(
    State(state): State<AdminState>,
    Query(filter): Query<VhostFilter>,
) -> Json<BTreeMap<String, RouteInfo>> {
    Json(state.engine.info(filter.vhost.as_deref()))
}

pub async fn get_route(
    State(state): State<AdminState>,
    Path(vhost): Path<String>,
) -> AdminResult<Json<RouteInfo>> {
    let route = state
        .engine
        .routes()
        .get(&vhost)
        .ok_or(ProxyError::NoRoute(vhost))?;
    Ok(Json(route.info()))
}

pub async fn create_route(
    State(state): State<AdminState>,
    Json(config): Json<RouteConfig>,
) -> AdminResult<(StatusCode, Json<RouteInfo>)> {
    let route = state.engine.create_route(&config)?;
    Ok((StatusCode::CREATED, Json(route.info())))
}

pub async fn delete_route(
    State(state): State<AdminState>,
    Path(vhost): Path<String>,
) -> AdminResult<StatusCode> {
    state.engine.remove_route(&vhost)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_host(
    State(state): State<AdminState>,
    Path(vhost): Path<String>,
    Json(config): Json<HostConfig>,
) -> AdminResult<(StatusCode, Json<HostStatus>)> {
    let host = state.engine.add_host(&vhost, &config)?;
    Ok((StatusCode::CREATED, Json(host.status())))
}

pub async fn remove_host(
    State(state): State<AdminState>,
    Path((vhost, host_id)): Path<(String, String)>,
) -> AdminResult<StatusCode> {
    state.engine.remove_host(&vhost, &host_id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn mark_host_dead(
    State(state): State<AdminState>,
    Path((vhost, host_id)): Path<(String, String)>,
) -> AdminResult<Json<HostHealth>> {
    let transition = state.engine.mark_host_dead(&vhost, &host_id)?;
    Ok(Json(HostHealth {
        vhost,
        host_id,
        dead: true,
        changed: transition == crate::health::DeadTransition::Died,
    }))
}

pub async fn mark_host_alive(
    State(state): State<AdminState>,
    Path((vhost, host_id)): Path<(String, String)>,
) -> AdminResult<Json<HostHealth>> {
    let changed = state.engine.mark_host_alive(&vhost, &host_id)?;
    Ok(Json(HostHealth {
        vhost,
        host_id,
        dead: false,
        changed,
    }))
}

pub async fn set_strategy(
    State(state): State<AdminState>,
    Path(vhost): Path<String>,
    Json(update): Json<StrategyUpdate>,
) -> AdminResult<Json<StrategyChanged>> {
    let kind = state.engine.set_strategy(&vhost, &update.strategy)?;
    Ok(Json(StrategyChanged {
        vhost,
        strategy: kind.to_string(),
    }))
}

pub async fn set_maintenance(
    State(state): State<AdminState>,
    Path(vhost): Path<String>,
    Json(update): Json<MaintenanceUpdate>,
) -> AdminResult<StatusCode> {
    state.engine.set_maintenance(&vhost, update.enabled)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn update_certificate(
    State(state): State<AdminState>,
    Json(update): Json<CertificateUpdate>,
) -> AdminResult<StatusCode> {
    state
        .engine
        .update_certificate(&update.domain, &update.privkey, &update.cert)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_stats(
    State(state): State<AdminState>,
    Query(filter): Query<VhostFilter>,
) -> Json<TrackerSnapshot> {
    Json(state.engine.stats(filter.vhost.as_deref()))
}

pub async fn sync_routes(
    State(state): State<AdminState>,
    Json(routes): Json<Vec<RouteConfig>>,
) -> AdminResult<Json<SyncReport>> {
    Ok(Json(state.engine.sync(&routes)?))
}

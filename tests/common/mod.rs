//! Shared utilities for integration tests: loopback backends and a proxy
//! started on ephemeral ports.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    body::Body,
    extract::Request,
    http::{HeaderValue, Response, StatusCode},
    routing::post,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;

use vhost_balancer::config::{HostConfig, ProxyConfig, RouteConfig};
use vhost_balancer::lifecycle::{self, RunningProxy};

/// Serve `router` on an ephemeral loopback port.
pub async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

/// Backend answering `"{name} {path}"`, after `delay`, with the headers it
/// saw echoed back as `x-seen-*`.
pub async fn start_backend(name: &'static str, delay: Duration) -> SocketAddr {
    let router = Router::new().fallback(move |request: Request| async move {
        tokio::time::sleep(delay).await;
        let path = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_default();
        let mut response = Response::new(Body::from(format!("{} {}", name, path)));
        response
            .headers_mut()
            .insert("x-backend", HeaderValue::from_static(name));
        for seen in ["x-forwarded-for", "x-forwarded-proto", "x-env"] {
            if let Some(value) = request.headers().get(seen) {
                let echoed = format!("x-seen-{}", seen.trim_start_matches("x-"));
                response
                    .headers_mut()
                    .insert(axum::http::HeaderName::try_from(echoed).unwrap(), value.clone());
            }
        }
        response
    });
    serve(router).await
}

/// WebSocket echo server.
pub async fn start_ws_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(message)) = ws.next().await {
                    if message.is_close() {
                        break;
                    }
                    if ws.send(message).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    addr
}

/// Auth caller accepting only `alice:secret`.
pub async fn start_auth_caller() -> SocketAddr {
    let router = Router::new().route(
        "/check",
        post(|Json(credentials): Json<serde_json::Value>| async move {
            if credentials["username"] == "alice" && credentials["password"] == "secret" {
                StatusCode::OK
            } else {
                StatusCode::FORBIDDEN
            }
        }),
    );
    serve(router).await
}

/// A loopback port nothing listens on.
pub async fn refused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

pub fn host(id: &str, addr: SocketAddr) -> HostConfig {
    HostConfig {
        id: id.to_string(),
        hostname: addr.ip().to_string(),
        port: addr.port(),
        protocol: None,
        cluster: None,
    }
}

pub fn route(vhost: &str, hosts: Vec<HostConfig>) -> RouteConfig {
    let mut route = RouteConfig::new(vhost);
    route.hosts = hosts;
    route
}

/// Proxy config bound to ephemeral loopback ports.
pub fn proxy_config(routes: Vec<RouteConfig>) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.routes = routes;
    config
}

pub async fn start_proxy(config: ProxyConfig) -> RunningProxy {
    lifecycle::start(config, None).await.unwrap()
}

/// Client that never pools, so every request gets its own connection.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

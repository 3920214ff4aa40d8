//! Request dispatch: from an accepted HTTP request to a response.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, HeaderValue, Method, Response, StatusCode};
use futures_util::StreamExt;
use hyper::upgrade::OnUpgrade;

use crate::error::{ForwardError, ProxyError};
use crate::health::DeadTransition;
use crate::http::forward::ForwardRequest;
use crate::http::request::{Request, Terminal};
use crate::http::response;
use crate::http::target::Target;
use crate::http::websocket;
use crate::load_balancer::Host;
use crate::net::connection::Connection;
use crate::observability::metrics;
use crate::resilience::{with_deadline, RetryDecision};
use crate::routing::vhost::vhost_from_header;
use crate::routing::Route;
use crate::security::headers::{
    add_forwarded_headers, apply_cors, apply_rules, is_upgrade_request, request_rule,
    response_rule, strip_hop_by_hop,
};

use super::ProxyEngine;

/// Why a forwarding error ended the request.
enum Failure {
    /// Request state is gone; drop the exchange without an error page.
    Abort,
    Error(ProxyError),
}

/// Fires `Close` if the exchange is dropped before a response is produced.
struct CloseOnDrop(Option<Arc<Request>>);

impl CloseOnDrop {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        if let Some(request) = self.0.take() {
            request.finish(Terminal::Close);
        }
    }
}

/// Tracks the proxied response body: first byte, completion, or early drop.
struct BodyGuard {
    request: Arc<Request>,
    first_byte: bool,
    done: bool,
}

impl BodyGuard {
    fn data(&mut self) {
        if !self.first_byte {
            self.first_byte = true;
            self.request.checkpoint("first-byte");
        }
    }

    fn complete(&mut self) {
        self.done = true;
        self.request.mark_ended();
        self.request.finish(Terminal::End);
    }
}

impl Drop for BodyGuard {
    fn drop(&mut self) {
        if !self.done {
            self.request.finish(Terminal::Close);
        }
    }
}

/// Stream `body` to the client, ending the request when it is fully written.
fn guard_body(body: Body, request: Arc<Request>) -> Body {
    let guard = BodyGuard {
        request,
        first_byte: false,
        done: false,
    };
    let stream = futures_util::stream::unfold(
        Some((body.into_data_stream(), guard)),
        |state| async move {
            let (mut stream, mut guard) = state?;
            match stream.next().await {
                Some(Ok(chunk)) => {
                    guard.data();
                    Some((Ok::<Bytes, axum::Error>(chunk), Some((stream, guard))))
                }
                Some(Err(e)) => {
                    tracing::debug!(request_id = %guard.request.id, error = %e, "backend body failed");
                    // dropping the guard here records a close
                    Some((Err(e), None))
                }
                None => {
                    guard.complete();
                    None
                }
            }
        },
    );
    Body::from_stream(stream)
}

impl ProxyEngine {
    /// Serve one client request arriving on `connection`.
    pub async fn handle(
        self: &Arc<Self>,
        connection: Arc<Connection>,
        req: axum::extract::Request,
    ) -> Response<Body> {
        if req.method() == Method::OPTIONS {
            return response::preflight(req.headers());
        }

        let host_header = req
            .headers()
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| req.uri().authority().map(|a| a.as_str()));
        let vhost = vhost_from_header(host_header);
        let url = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        let is_websocket = is_upgrade_request(req.headers());

        let request = Request::new(&connection, vhost, req.method().clone(), url, is_websocket);
        connection.add_request(request.clone());
        self.register_completion(&request);

        tracing::debug!(
            request_id = %request.id,
            connection_id = %connection.id,
            vhost = request.vhost_str(),
            method = %request.method,
            url = %request.url,
            "request received"
        );

        let guard = CloseOnDrop(Some(request.clone()));
        let deadline = std::time::Duration::from_secs(self.settings.request_timeout_secs);
        let response = match with_deadline(deadline, self.dispatch(&request, req)).await {
            Ok(response) => response,
            Err(err) => self.fail(&request, err, Terminal::Timeout),
        };
        guard.disarm();
        response
    }

    /// Completion callbacks every request gets, before any route ones.
    fn register_completion(self: &Arc<Self>, request: &Arc<Request>) {
        let engine = Arc::downgrade(self);
        request.on_terminal(move |request, terminal| {
            if let Some(connection) = request.connection() {
                connection.remove_request(&request.id);
            }
            let Some(engine) = engine.upgrade() else {
                return;
            };
            // attempts were recorded against their hosts as they ended
            let mut report = request.report();
            report.host_id = None;
            engine.tracker.track_target(&report);
            metrics::record_request(request.vhost_str(), request.status(), request.elapsed());

            if terminal == Terminal::End && !request.has_error() {
                if let Some(host) = request.host() {
                    if host.clear_dead() {
                        tracing::info!(
                            vhost = request.vhost_str(),
                            host_id = %host.id,
                            "host alive again"
                        );
                        engine.notify_health(request.vhost_str(), &host.id, true);
                    }
                }
            }
            // a probe that ended without reviving or failing the host
            if let Some(probe) = request.probe() {
                if probe.release_probe() {
                    tracing::debug!(
                        vhost = request.vhost_str(),
                        host_id = %probe.id,
                        terminal = %terminal,
                        "probe released"
                    );
                }
            }
        });
    }

    async fn dispatch(
        self: &Arc<Self>,
        request: &Arc<Request>,
        mut req: axum::extract::Request,
    ) -> Response<Body> {
        let Some(vhost) = request.vhost.clone() else {
            return self.fail(request, ProxyError::MissingHostHeader, Terminal::End);
        };
        let Some(route) = self.routes.resolve(&vhost) else {
            return self.fail(request, ProxyError::NoRoute(vhost), Terminal::End);
        };
        tracing::debug!(request_id = %request.id, route = %route.vhost, "route picked");
        request.set_route(route.clone());

        if route.has_certificate() && route.auto_https() && !request.secure {
            return self.finish_with(request, response::redirect_https(&vhost, &request.url));
        }

        if route.maintenance() {
            return self.fail(request, ProxyError::Maintenance(vhost), Terminal::End);
        }

        if let Some(caller) = route.auth() {
            let authorization = req
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok());
            if !self.auth.authorize(&caller, authorization).await {
                tracing::debug!(request_id = %request.id, "unauthorized");
                return self.finish_with(request, response::unauthorized());
            }
        }

        let client_upgrade = if request.is_websocket {
            Some(hyper::upgrade::on(&mut req))
        } else {
            None
        };
        let (parts, body) = req.into_parts();
        let body = match axum::body::to_bytes(body, self.settings.max_body_size).await {
            Ok(body) => body,
            Err(_) => return self.fail(request, ProxyError::PayloadTooLarge, Terminal::End),
        };

        let grant = match route.queue_request(request) {
            Ok(grant) => grant,
            Err(err) => return self.fail(request, err, Terminal::End),
        };
        let mut host = match grant.await {
            Ok(Ok(host)) => host,
            Ok(Err(err)) => return self.fail(request, err, Terminal::End),
            Err(_) => return self.fail(request, ProxyError::ClientGone, Terminal::End),
        };

        loop {
            let target = request.set_host(host.clone());
            request.checkpoint("proxy");
            tracing::debug!(
                request_id = %request.id,
                host_id = %host.id,
                attempt = request.retries() + 1,
                "forwarding"
            );

            let forward = match self.prepare(request, &route, &target, &parts, body.clone()) {
                Ok(forward) => forward,
                Err(err) => return self.fail(request, err, Terminal::End),
            };

            match self.forwarder.forward(forward).await {
                Ok(backend) => {
                    return self.respond(request, &route, &parts.headers, backend, client_upgrade)
                }
                Err(err) => match self.handle_forward_error(request, &route, err) {
                    Ok(next) => host = next,
                    Err(Failure::Abort) => {
                        request.finish(Terminal::Close);
                        return response::abort();
                    }
                    Err(Failure::Error(err)) => return self.fail(request, err, Terminal::End),
                },
            }
        }
    }

    fn prepare(
        &self,
        request: &Request,
        route: &Route,
        target: &Target,
        parts: &Parts,
        body: Bytes,
    ) -> Result<ForwardRequest, ProxyError> {
        let uri = target
            .uri(&request.url)
            .map_err(|e| ProxyError::InvalidHost(format!("{}: {}", target.host_id(), e)))?;

        let mut headers = parts.headers.clone();
        strip_hop_by_hop(&mut headers, request.is_websocket);
        add_forwarded_headers(&mut headers, request.client_ip, request.secure);
        apply_rules(&mut headers, &route.headers(), request_rule);

        Ok(ForwardRequest {
            method: parts.method.clone(),
            uri,
            headers,
            body,
        })
    }

    /// Decide what happens after a failed attempt: a host to retry on, or
    /// the failure that ends the request.
    fn handle_forward_error(
        &self,
        request: &Arc<Request>,
        route: &Route,
        err: ForwardError,
    ) -> Result<Arc<Host>, Failure> {
        let Some(connection) = request.connection() else {
            tracing::warn!(request_id = %request.id, error = %err, "forward error without connection");
            return Err(Failure::Abort);
        };
        if connection.request(&request.id).is_none() {
            tracing::warn!(request_id = %request.id, error = %err, "forward error for unknown request");
            return Err(Failure::Abort);
        }

        request.set_error(&err);
        let host = request.host();

        if err.class.degrades_host() {
            if let Some(host) = &host {
                self.degrade_host(route, host, &err);
            }
        } else {
            tracing::debug!(
                request_id = %request.id,
                host_id = host.as_ref().map(|h| h.id.as_str()).unwrap_or(""),
                error = %err,
                "forward failed"
            );
        }

        request.finish_target();
        self.tracker.track_target(&request.report());

        let failed = request.increment_retries();
        request.checkpoint("retry");
        metrics::record_retry(&route.vhost, err.code());

        let decision = RetryDecision::decide(failed, self.settings.retry_on_error, connection.is_closed());
        if let Some(err) = decision.into_error() {
            tracing::debug!(request_id = %request.id, retries = failed, error = %err, "giving up");
            return Err(Failure::Error(err));
        }
        route.select(request).map_err(Failure::Error)
    }

    fn degrade_host(&self, route: &Route, host: &Host, err: &ForwardError) {
        match host.mark_dead() {
            DeadTransition::Died => {
                tracing::warn!(
                    vhost = %route.vhost,
                    host_id = %host.id,
                    address = %host.address(),
                    error = %err,
                    "host marked dead"
                );
                self.notify_health(&route.vhost, &host.id, false);
            }
            DeadTransition::ProbeFailed => {
                tracing::warn!(
                    vhost = %route.vhost,
                    host_id = %host.id,
                    error = %err,
                    "probe failed, host stays dead"
                );
            }
            DeadTransition::Unchanged => {}
        }
    }

    /// Hand the backend response to the client.
    fn respond(
        &self,
        request: &Arc<Request>,
        route: &Route,
        client_headers: &HeaderMap,
        mut backend: Response<Body>,
        client_upgrade: Option<OnUpgrade>,
    ) -> Response<Body> {
        let status = backend.status();
        request.finish_target();
        request.send_headers(status.as_u16());
        // this attempt succeeded even if an earlier one failed
        let mut report = request.report();
        report.error = None;
        self.tracker.track_target(&report);

        let upgrade = if status == StatusCode::SWITCHING_PROTOCOLS {
            client_upgrade.map(|client| (client, hyper::upgrade::on(&mut backend)))
        } else {
            None
        };

        let headers = backend.headers_mut();
        if upgrade.is_none() {
            strip_hop_by_hop(headers, false);
        }
        if self.settings.debug_headers {
            write_debug_headers(headers, request, route);
        }
        apply_rules(headers, &route.headers(), response_rule);
        apply_cors(client_headers, headers);

        if let Some((client, backend_upgrade)) = upgrade {
            websocket::spawn_relay(request.clone(), client, backend_upgrade);
            return backend;
        }

        let bodiless = request.method == Method::HEAD
            || status == StatusCode::NO_CONTENT
            || status == StatusCode::NOT_MODIFIED
            || status.is_informational();
        if bodiless {
            request.mark_ended();
            request.finish(Terminal::End);
            return backend;
        }

        let (parts, body) = backend.into_parts();
        Response::from_parts(parts, guard_body(body, request.clone()))
    }

    /// Write a response the proxy produced itself and end the request.
    fn finish_with(&self, request: &Arc<Request>, response: Response<Body>) -> Response<Body> {
        if !request.send_headers(response.status().as_u16()) {
            return response::abort();
        }
        request.mark_ended();
        request.finish(Terminal::End);
        response
    }

    /// Terminal failure path: one error page, at most once per request.
    fn fail(&self, request: &Arc<Request>, err: ProxyError, terminal: Terminal) -> Response<Body> {
        let status = err.status();
        if !request.send_headers(status.as_u16()) {
            tracing::warn!(request_id = %request.id, error = %err, "response already started");
            request.finish(terminal);
            return response::abort();
        }
        tracing::debug!(
            request_id = %request.id,
            vhost = request.vhost_str(),
            status = status.as_u16(),
            error = %err,
            "request failed"
        );
        request.mark_ended();
        request.finish(terminal);
        response::error_page(status, &err.to_string())
    }
}

fn write_debug_headers(headers: &mut HeaderMap, request: &Request, route: &Route) {
    let mut set = |name: &'static str, value: String| {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    };
    if let Some(host) = request.host() {
        set("x-debug-backend-id", host.id.clone());
    }
    set("x-debug-vhost", request.vhost_str().to_string());
    set("x-debug-route", route.vhost.clone());
    set("x-proxy-id", request.id.to_string());
    set("x-connection-id", request.connection_id.to_string());
}

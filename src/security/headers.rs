//! Header manipulation.
//!
//! # Responsibilities
//! - Add X-Forwarded-For, X-Real-IP, X-Forwarded-Proto(col), X-Forwarded-Port
//! - Apply route header rules in either direction
//! - Mirror CORS request headers onto responses
//! - Strip hop-by-hop headers
//!
//! # Design Decisions
//! - Forwarded headers already present on the request are left alone
//! - Rules with an invalid name or value are skipped and logged

use std::net::IpAddr;

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};

use crate::config::HeaderRule;

/// Headers that describe a single transport hop.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Set the forwarding headers unless the client already sent them.
pub fn add_forwarded_headers(headers: &mut HeaderMap, client_ip: IpAddr, secure: bool) {
    let proto = if secure { "https" } else { "http" };
    let port = if secure { "443" } else { "80" };
    let ip = client_ip.to_string();

    let mut set_if_absent = |name: &'static str, value: &str| {
        if headers.contains_key(name) {
            return;
        }
        if let Ok(value) = HeaderValue::from_str(value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    };
    set_if_absent("x-forwarded-for", &ip);
    set_if_absent("x-real-ip", &ip);
    set_if_absent("x-forwarded-protocol", proto);
    set_if_absent("x-forwarded-proto", proto);
    set_if_absent("x-forwarded-port", port);
}

/// Apply the rules selected by `applies`, overwriting existing values.
pub fn apply_rules(headers: &mut HeaderMap, rules: &[HeaderRule], applies: fn(&HeaderRule) -> bool) {
    for rule in rules.iter().filter(|r| applies(r)) {
        match (
            HeaderName::from_bytes(rule.key.as_bytes()),
            HeaderValue::from_str(&rule.value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!(key = %rule.key, "skipping invalid header rule"),
        }
    }
}

pub fn request_rule(rule: &HeaderRule) -> bool {
    rule.target.applies_to_request()
}

pub fn response_rule(rule: &HeaderRule) -> bool {
    rule.target.applies_to_response()
}

/// Mirror the CORS request headers into `response`.
pub fn apply_cors(request: &HeaderMap, response: &mut HeaderMap) {
    if let Some(method) = request.get(header::ACCESS_CONTROL_REQUEST_METHOD) {
        response.insert(header::ACCESS_CONTROL_ALLOW_METHODS, method.clone());
    }
    if let Some(headers) = request.get(header::ACCESS_CONTROL_REQUEST_HEADERS) {
        response.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, headers.clone());
    }
    if let Some(origin) = request.get(header::ORIGIN) {
        response.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
        response.insert(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
    }
}

/// Remove hop-by-hop headers, plus any listed in `Connection`. An upgrade
/// keeps `Connection` and `Upgrade` so the backend sees the handshake.
pub fn strip_hop_by_hop(headers: &mut HeaderMap, keep_upgrade: bool) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .filter(|name| !(keep_upgrade && *name == header::UPGRADE))
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        if keep_upgrade && (name == "connection" || name == "upgrade") {
            continue;
        }
        headers.remove(name);
    }
}

/// True for a WebSocket (or other protocol) upgrade handshake.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    let connection_upgrade = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("upgrade")));
    connection_upgrade && headers.contains_key(header::UPGRADE)
}

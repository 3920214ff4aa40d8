//! Virtual host name handling.
//!
//! # Responsibilities
//! - Extract the vhost from a `Host` header (port stripped, lowercased)
//! - Expand a vhost into its wildcard lookup chain
//! - Validate vhost patterns accepted from config and the admin API

use std::net::IpAddr;

/// Deepest name considered for wildcard expansion.
const MAX_LABELS: usize = 6;

/// Strip the port from a `Host` header value. Bracketed IPv6 literals keep
/// their address without brackets.
pub fn strip_port(host: &str) -> &str {
    let host = host.trim();
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    if host.matches(':').count() > 1 {
        // bare IPv6 literal
        return host;
    }
    host.split(':').next().unwrap_or(host)
}

/// vhost of a request from its `Host` header; `None` when absent or empty.
pub fn vhost_from_header(host: Option<&str>) -> Option<String> {
    let vhost = strip_port(host?).trim_end_matches('.').to_ascii_lowercase();
    if vhost.is_empty() {
        None
    } else {
        Some(vhost)
    }
}

/// Lookup chain for a vhost, most specific first.
///
/// `a.b.c` yields `a.b.c`, `*.b.c`, `*.c`, `*`. Names deeper than six labels
/// are cut from the left before wildcards are generated. IP literals only
/// fall back to `*`.
pub fn vhost_parts(vhost: &str) -> Vec<String> {
    if vhost.parse::<IpAddr>().is_ok() {
        return vec![vhost.to_string(), "*".to_string()];
    }

    let mut labels: Vec<&str> = vhost.split('.').collect();
    let mut parts = vec![vhost.to_string()];
    if labels.len() > MAX_LABELS {
        labels.drain(..labels.len() - MAX_LABELS);
    }
    while labels.len() > 1 {
        labels.remove(0);
        parts.push(format!("*.{}", labels.join(".")));
    }
    parts.push("*".to_string());
    parts
}

/// A vhost pattern: dot-separated labels of `[a-z0-9-_]`, or `*`; only the
/// leftmost label may be a wildcard.
pub fn is_valid_vhost(vhost: &str) -> bool {
    if vhost == "*" {
        return true;
    }
    if vhost.parse::<IpAddr>().is_ok() {
        return true;
    }
    if vhost.is_empty() || vhost.len() > 253 {
        return false;
    }
    vhost.split('.').enumerate().all(|(i, label)| {
        (i == 0 && label == "*")
            || (!label.is_empty()
                && label.len() <= 63
                && label
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'))
    })
}

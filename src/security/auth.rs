//! Per-route Basic authentication.
//!
//! # Responsibilities
//! - Decode `Authorization: Basic ...` credentials
//! - Ask the route's auth caller whether they are valid
//! - Cache positive decisions per (caller, authorization header)
//!
//! # Design Decisions
//! - Only successes are cached; a failure is re-checked on the next request
//! - Caller errors and timeouts deny access
//! - Bounded, max-age cache so revoked credentials expire on their own

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use moka::future::Cache;
use serde::Serialize;

use crate::config::AuthConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Decode a Basic authorization header. Missing or malformed input yields
/// empty credentials; the caller decides what they are worth.
pub fn decode_basic(authorization: Option<&str>) -> Credentials {
    let decoded = authorization
        .and_then(|value| value.split(' ').nth(1))
        .and_then(|token| STANDARD.decode(token.trim()).ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default();
    let mut parts = decoded.splitn(2, ':');
    Credentials {
        username: parts.next().unwrap_or_default().to_string(),
        password: parts.next().unwrap_or_default().to_string(),
    }
}

pub struct AuthGate {
    cache: Cache<String, ()>,
    client: reqwest::Client,
}

impl AuthGate {
    pub fn new(config: &AuthConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.caller_timeout_secs))
            .build()?;
        let cache = Cache::builder()
            .max_capacity(config.cache_capacity)
            .time_to_live(Duration::from_secs(config.cache_ttl_secs))
            .build();
        Ok(Self { cache, client })
    }

    /// True if `caller` accepts the request's credentials.
    pub async fn authorize(&self, caller: &str, authorization: Option<&str>) -> bool {
        let key = format!("{}.{}", caller, authorization.unwrap_or_default());
        if self.cache.contains_key(&key) {
            return true;
        }

        let credentials = decode_basic(authorization);
        match self.client.post(caller).json(&credentials).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(caller, username = %credentials.username, "authorized");
                self.cache.insert(key, ()).await;
                true
            }
            Ok(response) => {
                tracing::debug!(caller, status = %response.status(), "authorization denied");
                false
            }
            Err(e) => {
                tracing::warn!(caller, error = %e, "auth caller failed");
                false
            }
        }
    }

    pub fn cached_entries(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate")
            .field("cached", &self.cache.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_basic() {
        // "alice:s3cret:x"
        let creds = decode_basic(Some("Basic YWxpY2U6czNjcmV0Ong="));
        assert_eq!(creds.username, "alice");
        assert_eq!(creds.password, "s3cret:x");
    }

    #[test]
    fn test_decode_missing_or_garbage() {
        assert_eq!(decode_basic(None).username, "");
        let creds = decode_basic(Some("Basic !!!"));
        assert_eq!(creds.username, "");
        assert_eq!(creds.password, "");
    }

    #[tokio::test]
    async fn test_unreachable_caller_denies() {
        let gate = AuthGate::new(&AuthConfig {
            caller_timeout_secs: 1,
            ..AuthConfig::default()
        })
        .unwrap();
        assert!(!gate.authorize("http://127.0.0.1:1/auth", Some("Basic YTpi")).await);
        assert_eq!(gate.cached_entries(), 0);
    }
}

//! TLS termination with per-vhost certificates.
//!
//! # Responsibilities
//! - Parse PEM certificate chains and private keys into signing keys
//! - Resolve the certificate for a handshake from its SNI name
//! - Build the rustls server configuration for the TLS listener
//!
//! # Design Decisions
//! - Certificates live on routes; SNI uses the same wildcard lookup as requests
//! - Unknown names and routes without a certificate get the default
//!   certificate when one is configured, otherwise the handshake fails

use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::crypto::ring::{default_provider, sign::any_supported_type};
use rustls::pki_types::CertificateDer;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;

use crate::error::ProxyError;
use crate::routing::vhost::vhost_from_header;
use crate::routing::RouteTable;

/// Build a signing key from PEM text.
pub fn load_certified_key(cert_pem: &[u8], key_pem: &[u8]) -> Result<Arc<CertifiedKey>, ProxyError> {
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut BufReader::new(cert_pem))
        .collect::<Result<_, _>>()
        .map_err(|e| ProxyError::InvalidCertificate(format!("certificate: {}", e)))?;
    if certs.is_empty() {
        return Err(ProxyError::InvalidCertificate(
            "no certificate in PEM input".to_string(),
        ));
    }

    let key = rustls_pemfile::private_key(&mut BufReader::new(key_pem))
        .map_err(|e| ProxyError::InvalidCertificate(format!("private key: {}", e)))?
        .ok_or_else(|| ProxyError::InvalidCertificate("no private key in PEM input".to_string()))?;

    let signing_key = any_supported_type(&key)
        .map_err(|e| ProxyError::InvalidCertificate(format!("signing key: {}", e)))?;

    Ok(Arc::new(CertifiedKey::new(certs, signing_key)))
}

/// Read a certificate and key pair from disk.
pub fn load_certified_key_files(
    cert_path: &Path,
    key_path: &Path,
) -> Result<Arc<CertifiedKey>, ProxyError> {
    let read = |path: &Path| {
        std::fs::read(path).map_err(|e| {
            ProxyError::InvalidCertificate(format!("{}: {}", path.display(), e))
        })
    };
    load_certified_key(&read(cert_path)?, &read(key_path)?)
}

/// SNI certificate lookup against the route table.
pub struct SniResolver {
    routes: Arc<RouteTable>,
    default: Option<Arc<CertifiedKey>>,
}

impl std::fmt::Debug for SniResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SniResolver")
            .field("routes", &self.routes.len())
            .field("default", &self.default.is_some())
            .finish()
    }
}

impl SniResolver {
    pub fn new(routes: Arc<RouteTable>, default: Option<Arc<CertifiedKey>>) -> Self {
        Self { routes, default }
    }

    /// Certificate for a server name.
    pub fn lookup(&self, server_name: Option<&str>) -> Option<Arc<CertifiedKey>> {
        let from_route = vhost_from_header(server_name)
            .and_then(|vhost| self.routes.resolve(&vhost))
            .and_then(|route| route.certificate());
        if from_route.is_none() {
            tracing::debug!(server_name = ?server_name, "no route certificate, using default");
        }
        from_route.or_else(|| self.default.clone())
    }
}

impl ResolvesServerCert for SniResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        self.lookup(client_hello.server_name())
    }
}

/// rustls configuration for the TLS listener. HTTP/1.1 only, which keeps
/// WebSocket upgrades on the same path as plain HTTP.
pub fn server_config(resolver: Arc<SniResolver>) -> Result<Arc<ServerConfig>, rustls::Error> {
    let mut config = ServerConfig::builder_with_provider(Arc::new(default_provider()))
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_cert_resolver(resolver);
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

//! Backend forwarding.
//!
//! # Responsibilities
//! - Send one prepared request to one backend and return its response head
//! - Bound the attempt by the forward timeout
//! - Classify failures for the health state machine
//!
//! # Design Decisions
//! - The body is buffered by the caller so an attempt can be replayed
//! - The response body streams back untouched; only the head is awaited here
//! - Upgrade responses (101) keep their `OnUpgrade` extension for the relay

use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Method, Request, Response, Uri};
use futures_util::future::BoxFuture;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::config::ProxySettings;
use crate::error::ForwardError;
use crate::health::ErrorClass;

/// A request ready to go to a backend.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ForwardRequest {
    fn into_http(self) -> Result<Request<Body>, ForwardError> {
        let mut request = Request::builder()
            .method(self.method)
            .uri(self.uri)
            .body(Body::from(self.body))
            .map_err(|e| ForwardError::other(e.to_string()))?;
        *request.headers_mut() = self.headers;
        Ok(request)
    }
}

/// Sends a request to a backend.
pub trait Forwarder: Send + Sync {
    fn forward(
        &self,
        request: ForwardRequest,
    ) -> BoxFuture<'static, Result<Response<Body>, ForwardError>>;
}

/// Pooled HTTP/1.1 client over plain TCP or TLS.
#[derive(Clone)]
pub struct HyperForwarder {
    client: Client<HttpsConnector<HttpConnector>, Body>,
    timeout: Duration,
}

impl HyperForwarder {
    pub fn new(settings: &ProxySettings) -> Result<Self, rustls::Error> {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(Some(Duration::from_secs(settings.connect_timeout_secs)));
        http.set_nodelay(true);

        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(rustls::crypto::ring::default_provider())?
            .https_or_http()
            .enable_http1()
            .wrap_connector(http);

        let client = Client::builder(TokioExecutor::new()).build(https);
        Ok(Self {
            client,
            timeout: Duration::from_secs(settings.forward_timeout_secs),
        })
    }
}

impl Forwarder for HyperForwarder {
    fn forward(
        &self,
        request: ForwardRequest,
    ) -> BoxFuture<'static, Result<Response<Body>, ForwardError>> {
        let client = self.client.clone();
        let timeout = self.timeout;
        Box::pin(async move {
            let request = request.into_http()?;
            match tokio::time::timeout(timeout, client.request(request)).await {
                Ok(Ok(response)) => Ok(response.map(Body::new)),
                Ok(Err(e)) => {
                    let class = ErrorClass::classify(&e);
                    Err(ForwardError::new(class, error_chain(&e)))
                }
                Err(_) => Err(ForwardError::timed_out(format!(
                    "no response within {}s",
                    timeout.as_secs()
                ))),
            }
        })
    }
}

fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(e) = source {
        message.push_str(": ");
        message.push_str(&e.to_string());
        source = e.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn request_to(port: u16) -> ForwardRequest {
        ForwardRequest {
            method: Method::GET,
            uri: format!("http://127.0.0.1:{}/", port).parse().unwrap(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    #[tokio::test]
    async fn test_refused_connection_is_classified() {
        // grab a free port and close it again
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let forwarder = HyperForwarder::new(&ProxySettings::default()).unwrap();
        let err = forwarder.forward(request_to(port)).await.unwrap_err();
        assert_eq!(err.class, ErrorClass::Refused);
        assert_eq!(err.code(), "ECONNREFUSED");
    }

    #[tokio::test]
    async fn test_silent_backend_times_out() {
        // accepts but never answers
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _hold = tokio::spawn(async move {
            let mut sockets = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                sockets.push(socket);
            }
        });

        let settings = ProxySettings {
            forward_timeout_secs: 1,
            ..ProxySettings::default()
        };
        let forwarder = HyperForwarder::new(&settings).unwrap();
        let err = forwarder.forward(request_to(port)).await.unwrap_err();
        assert_eq!(err.class, ErrorClass::TimedOut);
        assert!(err.class.degrades_host());
    }

    #[test]
    fn test_error_chain_joins_sources() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(error_chain(&io), "refused");
    }
}

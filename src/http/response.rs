//! Responses the proxy writes itself.
//!
//! # Responsibilities
//! - Render the HTML error page for terminal failures
//! - Build redirects, auth challenges, CORS preflight answers
//!
//! # Design Decisions
//! - One static template compiled into the binary
//! - Error pages are never cached by clients
//! - The message is HTML-escaped; it can carry a client-supplied vhost

use axum::body::Body;
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::{Response, StatusCode};

use crate::security::headers::apply_cors;

const ERROR_PAGE: &str = include_str!("../../static/error_page.html");

pub const UNAUTHORIZED_BODY: &str = "HTTP Error 401 Unauthorized: Access is denied";

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Fill the error template.
pub fn render_error_page(code: u16, message: &str) -> String {
    ERROR_PAGE
        .replace("{{CODE}}", &code.to_string())
        .replace("{{MESSAGE}}", &escape_html(message))
}

/// HTML error page with no-cache headers and an explicit length.
pub fn error_page(status: StatusCode, message: &str) -> Response<Body> {
    let page = render_error_page(status.as_u16(), message);
    let mut response = Response::new(Body::from(page.clone()));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(page.len()));
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("-1"));
    response
}

/// 302 to the HTTPS origin of the same URL.
pub fn redirect_https(vhost: &str, url: &str) -> Response<Body> {
    let location = format!("https://{}{}", vhost, url);
    match HeaderValue::from_str(&location) {
        Ok(value) => {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::FOUND;
            response.headers_mut().insert(header::LOCATION, value);
            response
        }
        Err(_) => error_page(StatusCode::BAD_REQUEST, "Invalid redirect location."),
    }
}

/// Basic auth challenge.
pub fn unauthorized() -> Response<Body> {
    let mut response = Response::new(Body::from(UNAUTHORIZED_BODY));
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        HeaderValue::from_static("Basic realm=\"nope\""),
    );
    response
}

/// Answer to an `OPTIONS` request.
pub fn preflight(request_headers: &HeaderMap) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    apply_cors(request_headers, response.headers_mut());
    response
}

/// Bare 502 that asks the client to drop the connection. Used when the
/// request state needed for an error page is gone.
pub fn abort() -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::BAD_GATEWAY;
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_page_headers() {
        let response = error_page(StatusCode::BAD_GATEWAY, "No route. (api.example.com)");
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let headers = response.headers();
        assert_eq!(headers["content-type"], "text/html");
        assert_eq!(headers["cache-control"], "no-cache");
        assert_eq!(headers["pragma"], "no-cache");
        assert_eq!(headers["expires"], "-1");
        let expected = render_error_page(502, "No route. (api.example.com)").len();
        assert_eq!(headers["content-length"], expected.to_string().as_str());
    }

    #[test]
    fn test_template_substitution() {
        let page = render_error_page(503, "Under maintenance. (shop.example.com)");
        assert!(page.contains("503"));
        assert!(page.contains("Under maintenance. (shop.example.com)"));
        assert!(!page.contains("{{CODE}}"));
        assert!(!page.contains("{{MESSAGE}}"));
    }

    #[test]
    fn test_message_is_escaped() {
        let page = render_error_page(502, "No route. (<script>)");
        assert!(page.contains("&lt;script&gt;"));
        assert!(!page.contains("<script>"));
    }

    #[test]
    fn test_redirect_and_challenge() {
        let response = redirect_https("shop.example.com", "/cart?id=1");
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()["location"], "https://shop.example.com/cart?id=1");

        let response = unauthorized();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()["www-authenticate"], "Basic realm=\"nope\"");
    }

    #[test]
    fn test_preflight_mirrors_origin() {
        let mut request = HeaderMap::new();
        request.insert("origin", HeaderValue::from_static("https://app.example.com"));
        let response = preflight(&request);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "https://app.example.com"
        );
        assert_eq!(response.headers()["access-control-allow-credentials"], "true");
    }
}

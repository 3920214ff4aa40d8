//! End-to-end request flow through a running proxy.

use std::time::Duration;

use reqwest::StatusCode;

mod common;

use common::{client, host, proxy_config, refused_addr, route, start_backend, start_proxy};

#[tokio::test]
async fn test_proxies_with_forwarded_headers() {
    let backend = start_backend("h1", Duration::ZERO).await;
    let mut api = route("api.example.com", vec![host("h1", backend)]);
    api.headers = vec![vhost_balancer::config::HeaderRule {
        key: "x-env".to_string(),
        value: "staging".to_string(),
        target: vhost_balancer::config::HeaderTarget::Req,
    }];
    let proxy = start_proxy(proxy_config(vec![api])).await;

    let response = client()
        .get(format!("http://{}/v1/items?page=2", proxy.http_addr()))
        .header("host", "api.example.com")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-backend"], "h1");
    assert_eq!(response.headers()["x-seen-forwarded-for"], "127.0.0.1");
    assert_eq!(response.headers()["x-seen-forwarded-proto"], "http");
    assert_eq!(response.headers()["x-seen-env"], "staging");
    assert_eq!(response.headers()["x-debug-backend-id"], "h1");
    assert_eq!(response.text().await.unwrap(), "h1 /v1/items?page=2");

    proxy.shutdown().await;
}

#[tokio::test]
async fn test_wildcard_and_missing_routes() {
    let backend = start_backend("wild", Duration::ZERO).await;
    let proxy = start_proxy(proxy_config(vec![route("*.example.com", vec![host("w1", backend)])])).await;
    let base = format!("http://{}/", proxy.http_addr());

    let response = client()
        .get(&base)
        .header("host", "shop.example.com:8080")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-debug-vhost"], "shop.example.com");

    let response = client().get(&base).header("host", "other.org").send().await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(response.headers()["content-type"], "text/html");
    assert!(response.text().await.unwrap().contains("No route. (other.org)"));

    proxy.shutdown().await;
}

#[tokio::test]
async fn test_refused_backend_is_marked_dead_and_retries_exhaust() {
    let dead = refused_addr().await;
    let proxy = start_proxy(proxy_config(vec![route("api.example.com", vec![host("h1", dead)])])).await;

    let response = client()
        .get(format!("http://{}/", proxy.http_addr()))
        .header("host", "api.example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(response.text().await.unwrap().contains("Reached max retries limit"));

    let info = proxy.engine().info(Some("api.example.com"));
    assert!(info["api.example.com"].hosts["h1"].dead);

    let stats = proxy.engine().stats(None);
    assert_eq!(stats.hosts["h1"].errors.get("ECONNREFUSED"), Some(&3));
    assert_eq!(stats.routes["api.example.com"].errors_count, 1);

    proxy.shutdown().await;
}

#[tokio::test]
async fn test_fails_over_to_live_host() {
    let dead = refused_addr().await;
    let live = start_backend("h2", Duration::ZERO).await;
    let proxy = start_proxy(proxy_config(vec![route(
        "api.example.com",
        vec![host("h1", dead), host("h2", live)],
    )]))
    .await;

    for _ in 0..3 {
        let response = client()
            .get(format!("http://{}/", proxy.http_addr()))
            .header("host", "api.example.com")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-backend"], "h2");
    }

    proxy.shutdown().await;
}

#[tokio::test]
async fn test_queue_admits_in_order_with_round_robin() {
    let h1 = start_backend("h1", Duration::from_millis(150)).await;
    let h2 = start_backend("h2", Duration::from_millis(150)).await;
    let mut api = route("api.example.com", vec![host("h1", h1), host("h2", h2)]);
    api.active_length = Some(1);
    let proxy = start_proxy(proxy_config(vec![api])).await;
    let url = format!("http://{}/", proxy.http_addr());

    let mut pending = Vec::new();
    for _ in 0..3 {
        let request = client().get(&url).header("host", "api.example.com").send();
        pending.push(tokio::spawn(async move {
            let response = request.await.unwrap();
            let backend = response.headers()["x-backend"].to_str().unwrap().to_string();
            response.text().await.unwrap();
            backend
        }));
        // keep arrival order deterministic
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    let mut order = Vec::new();
    for task in pending {
        order.push(task.await.unwrap());
    }
    assert_eq!(order, vec!["h1", "h2", "h1"]);

    proxy.shutdown().await;
}

#[tokio::test]
async fn test_full_queue_rejects() {
    let slow = start_backend("slow", Duration::from_millis(500)).await;
    let mut api = route("api.example.com", vec![host("s1", slow)]);
    api.active_length = Some(1);
    api.queue_length = Some(0);
    let proxy = start_proxy(proxy_config(vec![api])).await;

    // queue_length 0 admits nothing
    let response = client()
        .get(format!("http://{}/", proxy.http_addr()))
        .header("host", "api.example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(response.text().await.unwrap().contains("bad gateway. (api.example.com)"));
    assert_eq!(proxy.engine().stats(None).routes["api.example.com"].misses, 1);

    proxy.shutdown().await;
}

#[tokio::test]
async fn test_maintenance_and_preflight() {
    let backend = start_backend("h1", Duration::ZERO).await;
    let mut api = route("api.example.com", vec![host("h1", backend)]);
    api.maintenance = true;
    let proxy = start_proxy(proxy_config(vec![api])).await;
    let url = format!("http://{}/", proxy.http_addr());

    let response = client().get(&url).header("host", "api.example.com").send().await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.headers()["cache-control"], "no-cache");

    let response = client()
        .request(reqwest::Method::OPTIONS, &url)
        .header("host", "api.example.com")
        .header("origin", "https://app.example.com")
        .header("access-control-request-headers", "x-token")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "https://app.example.com"
    );
    assert_eq!(response.headers()["access-control-allow-headers"], "x-token");

    proxy.shutdown().await;
}

#[tokio::test]
async fn test_basic_auth_route() {
    let backend = start_backend("h1", Duration::ZERO).await;
    let caller = common::start_auth_caller().await;
    let mut api = route("private.example.com", vec![host("h1", backend)]);
    api.auth = Some(format!("http://{}/check", caller));
    let proxy = start_proxy(proxy_config(vec![api])).await;
    let url = format!("http://{}/", proxy.http_addr());

    let response = client().get(&url).header("host", "private.example.com").send().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()["www-authenticate"], "Basic realm=\"nope\"");

    let response = client()
        .get(&url)
        .header("host", "private.example.com")
        .basic_auth("alice", Some("wrong"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = client()
        .get(&url)
        .header("host", "private.example.com")
        .basic_auth("alice", Some("secret"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "h1 /");

    proxy.shutdown().await;
}

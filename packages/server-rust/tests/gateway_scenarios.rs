//! End-to-end scenarios driven purely over HTTP: a real gateway listener in
//! front of an in-process echo backend.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::Request;
use axum::Router;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use tollgate_server::engine::{GatewayBuilder, GatewayConfig};
use tollgate_server::network::{NetworkConfig, NetworkModule};

struct Harness {
    client: reqwest::Client,
    gateway: String,
    backend: String,
    hits: Arc<AtomicUsize>,
    _stop: oneshot::Sender<()>,
}

impl Harness {
    async fn start() -> Self {
        let (backend, hits) = spawn_echo_backend().await;

        let gateway = GatewayBuilder::new(GatewayConfig::default()).build().unwrap();
        let mut module = NetworkModule::new(
            NetworkConfig {
                host: "127.0.0.1".to_string(),
                ..NetworkConfig::default()
            },
            Arc::new(gateway),
        );
        let port = module.start().await.unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        tokio::spawn(module.serve(async {
            let _ = stopped.await;
        }));

        Self {
            client: reqwest::Client::new(),
            gateway: format!("http://127.0.0.1:{port}"),
            backend: format!("http://{backend}"),
            hits,
            _stop: stop,
        }
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    async fn put(&self, path: &str, body: Value) -> reqwest::Response {
        self.client
            .put(format!("{}/_gateway{path}", self.gateway))
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    /// Sends `target` byte for byte, bypassing client-side URL normalisation.
    async fn raw_get(&self, target: &str) -> String {
        let mut stream = TcpStream::connect(self.gateway.trim_start_matches("http://"))
            .await
            .unwrap();
        let request = format!("GET {target} HTTP/1.1\r\nHost: gateway\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    async fn get(&self, path: &str, api_key: Option<&str>) -> reqwest::Response {
        let mut request = self.client.get(format!("{}{path}", self.gateway));
        if let Some(key) = api_key {
            request = request.header("X-API-Key", key);
        }
        request.send().await.unwrap()
    }

    fn echo_service(&self, version: &str, policies: Value) -> Value {
        json!({
            "organizationId": "acme",
            "serviceId": "echo",
            "version": version,
            "route": { "path": "/echo" },
            "endpoint": { "endpointType": "http", "url": self.backend },
            "policies": policies,
        })
    }
}

/// Answers every request with `"METHOD /path?query"`, plus ` key=...` if an
/// `X-API-Key` header reached it.
async fn spawn_echo_backend() -> (SocketAddr, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let app = Router::new().fallback(move |req: Request| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let target = req.uri().path_and_query().map_or("/", |pq| pq.as_str()).to_string();
            match req.headers().get("x-api-key").and_then(|v| v.to_str().ok()) {
                Some(key) => format!("{} {target} key={key}", req.method()),
                None => format!("{} {target}", req.method()),
            }
        }
    });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, hits)
}

fn app1() -> Value {
    json!({
        "organizationId": "acme",
        "applicationId": "app1",
        "version": "1",
        "contracts": [
            { "apiKey": "app1-key", "service": { "organizationId": "acme", "serviceId": "echo" }, "plan": "gold" }
        ],
    })
}

#[tokio::test]
async fn contract_holder_reaches_the_backend() {
    let h = Harness::start().await;
    assert_eq!(h.put("/services", h.echo_service("1", json!([]))).await.status(), StatusCode::OK);
    assert_eq!(h.put("/applications", app1()).await.status(), StatusCode::OK);

    let response = h.get("/echo/hello", Some("app1-key")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(response.text().await.unwrap(), "GET /hello");
    assert_eq!(h.hits(), 1);
}

#[tokio::test]
async fn caller_without_contract_never_reaches_the_backend() {
    let h = Harness::start().await;
    h.put("/services", h.echo_service("1", json!([]))).await;

    let response = h.get("/echo/hello", None).await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(response.headers()["x-policy-failure-type"], "Forbidden");
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["type"], "Forbidden");
    assert_eq!(h.hits(), 0);
}

#[tokio::test]
async fn republished_rate_limit_rejects_the_second_call() {
    let h = Harness::start().await;
    h.put("/services", h.echo_service("1", json!([]))).await;
    h.put("/applications", app1()).await;
    let limited = h.echo_service(
        "2",
        json!([{
            "policyType": "rate-limiting",
            "configuration": r#"{"limit":1,"period":"minute","granularity":"application","failMode":"closed"}"#,
        }]),
    );
    assert_eq!(h.put("/services", limited).await.status(), StatusCode::OK);

    let first = h.get("/echo/hello", Some("app1-key")).await;
    let second = h.get("/echo/hello", Some("app1-key")).await;

    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers()["x-ratelimit-limit"], "1");
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(second.headers().contains_key("retry-after"));
    assert_eq!(h.hits(), 1);
}

#[tokio::test]
async fn api_key_query_parameter_is_not_forwarded() {
    let h = Harness::start().await;
    h.put("/services", h.echo_service("1", json!([]))).await;
    h.put("/applications", app1()).await;

    let response = h.get("/echo/hello?apikey=app1-key&x=1", None).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "GET /hello?x=1");
}

#[tokio::test]
async fn management_errors_map_to_http_statuses() {
    let h = Harness::start().await;
    h.put("/services", h.echo_service("1", json!([]))).await;

    let duplicate = h.put("/services", h.echo_service("1", json!([]))).await;
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    let bad_policy = h
        .put(
            "/services",
            h.echo_service("2", json!([{ "policyType": "teleport", "configuration": "{}" }])),
        )
        .await;
    assert_eq!(bad_policy.status(), StatusCode::BAD_REQUEST);

    let retired = h
        .client
        .delete(format!("{}/_gateway/services/acme/echo", h.gateway))
        .send()
        .await
        .unwrap();
    assert_eq!(retired.status(), StatusCode::NO_CONTENT);
    assert_eq!(h.get("/echo", None).await.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unreachable_backend_is_a_bad_gateway() {
    let h = Harness::start().await;
    let dead = json!({
        "organizationId": "acme",
        "serviceId": "dead",
        "version": "1",
        "route": { "path": "/dead" },
        "endpoint": { "endpointType": "http", "url": "http://127.0.0.1:1" },
        "public": true,
    });
    h.put("/services", dead).await;

    let response = h.get("/dead", None).await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(response.headers()["x-policy-failure-type"], "ConnectError");
}

#[tokio::test]
async fn status_endpoint_reports_counts() {
    let h = Harness::start().await;
    h.put("/services", h.echo_service("1", json!([]))).await;
    h.put("/applications", app1()).await;

    let status: Value = h
        .get("/_gateway/system/status", None)
        .await
        .json()
        .await
        .unwrap();

    assert_eq!(status["up"], true);
    assert_eq!(status["services"], 1);
    assert_eq!(status["applications"], 1);
    assert_eq!(status["contracts"], 1);
}

#[tokio::test]
async fn dot_segments_cannot_reach_another_backend_path() {
    let h = Harness::start().await;
    let public = json!({
        "organizationId": "acme",
        "serviceId": "pub",
        "version": "1",
        "route": { "path": "/pub" },
        "endpoint": { "endpointType": "http", "url": format!("{}/public", h.backend) },
        "public": true,
    });
    assert_eq!(h.put("/services", public).await.status(), StatusCode::OK);

    for target in ["/pub/../private/secret", "/pub/%2e%2e/private/secret"] {
        let response = h.raw_get(target).await;
        assert!(response.starts_with("HTTP/1.1 400"), "{target}: {response}");
        assert!(response.contains("x-policy-failure-code: 10004"), "{response}");
    }
    assert_eq!(h.hits(), 0);

    let response = h.raw_get("/pub/inside").await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.contains("GET /public/inside"), "{response}");
}

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    routing::any,
};
use herobox::{
    api::{self, AppState},
    constants::LISTEN_ADDR_SETTING,
    logs::LogBuffer,
    plugin::{EndpointOverrides, PluginClient, PluginEndpoint},
    service::ServiceSpec,
    store::{FileStore, StateStore},
    supervisor::Supervisor,
    version::VersionTracker,
};
use serde_json::{Value, json};
use tokio::net::TcpListener;

type Calls = Arc<Mutex<Vec<String>>>;

/// Stand-in for the DNS daemon's plugin API. Records `<METHOD> <path> <body>` per call.
async fn fake_plugin(
    State(calls): State<Calls>,
    Path((tag, op)): Path<(String, String)>,
    method: axum::http::Method,
    body: Bytes,
) -> (StatusCode, String) {
    calls.lock().unwrap().push(
        format!("{method} /plugins/{tag}/{op} {}", String::from_utf8_lossy(&body))
            .trim_end()
            .to_string(),
    );
    match (tag.as_str(), op.as_str()) {
        ("greylist", "show") => (StatusCode::INTERNAL_SERVER_ERROR, " boom \n".into()),
        ("blocklist", "post") => (StatusCode::BAD_GATEWAY, String::new()),
        (tag, "show") if tag.starts_with("switch") => (StatusCode::OK, " on \n".into()),
        (_, "show") => (StatusCode::OK, "a.com\nb.com\n".into()),
        _ => (StatusCode::OK, "ok".into()),
    }
}

struct Harness {
    base: String,
    http: reqwest::Client,
    calls: Calls,
    store: Arc<dyn StateStore>,
    logs: Arc<LogBuffer>,
    _plugin_dir: tempfile::TempDir,
}

impl Harness {
    async fn start() -> Self {
        let calls: Calls = Arc::default();
        let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream_addr = upstream.local_addr().unwrap();
        let plugin_app = Router::new()
            .route("/plugins/{tag}/{op}", any(fake_plugin))
            .with_state(calls.clone());
        tokio::spawn(async move { axum::serve(upstream, plugin_app).await });

        let plugin_dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn StateStore> = Arc::new(FileStore::in_memory());
        let endpoint = PluginEndpoint::new(
            EndpointOverrides {
                base: Some(format!("http://{upstream_addr}")),
                ..Default::default()
            },
            store.clone(),
        );
        let supervisor = Arc::new(Supervisor::dry_run(vec![
            ServiceSpec::new("sing-box", "sing-box.service", Vec::new()),
            ServiceSpec::new(
                "mihomo",
                "mihomo.service",
                vec![plugin_dir.path().join("absent-mihomo")],
            ),
        ]));
        let logs = Arc::new(LogBuffer::new(16));
        let state = Arc::new(AppState {
            supervisor,
            store: store.clone(),
            versions: Arc::new(VersionTracker::new("mosdns", Vec::new(), store.clone())),
            logs: logs.clone(),
            plugin: PluginClient::new(endpoint).unwrap(),
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(api::serve(listener, state, std::future::pending()));

        Self {
            base: format!("http://{addr}"),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap(),
            calls,
            store,
            logs,
            _plugin_dir: plugin_dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let response = self.http.get(self.url(path)).send().await.unwrap();
        let status = StatusCode::from_u16(response.status().as_u16()).unwrap();
        (status, response.json().await.unwrap())
    }

    async fn send_json(&self, method: reqwest::Method, path: &str, body: Value) -> (StatusCode, Value) {
        let response = self
            .http
            .request(method, self.url(path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = StatusCode::from_u16(response.status().as_u16()).unwrap();
        (status, response.json().await.unwrap())
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn services_report_and_transition() {
    let harness = Harness::start().await;

    let (status, body) = harness.get("/api/services").await;
    assert_eq!(status, StatusCode::OK);
    let listed = body.as_array().unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0]["name"], "sing-box");
    assert_eq!(listed[0]["status"], "unknown");
    assert_eq!(listed[1]["status"], "missing");

    let (status, body) = harness
        .send_json(reqwest::Method::POST, "/api/services/sing-box/start", json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "running");
    assert!(body["lastUpdated"].is_string());

    let (status, body) = harness.get("/api/services/SING-BOX").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "running");

    // A missing binary is reported as a snapshot, not an error.
    let (status, body) = harness.get("/api/services/mihomo").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "missing");
}

#[tokio::test(flavor = "multi_thread")]
async fn service_errors_map_to_statuses() {
    let harness = Harness::start().await;

    let (status, body) = harness.get("/api/services/nginx").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("nginx"));

    let (status, body) = harness
        .send_json(reqwest::Method::POST, "/api/services/sing-box/reload", json!({}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "unsupported action 'reload'");

    let (status, body) = harness
        .send_json(reqwest::Method::POST, "/api/services/mihomo/start", json!({}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("not installed"));
}

#[tokio::test(flavor = "multi_thread")]
async fn config_path_and_settings_persist() {
    let harness = Harness::start().await;

    let (status, _) = harness
        .send_json(reqwest::Method::PUT, "/api/mosdns/config", json!({ "path": "  " }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = harness
        .send_json(
            reqwest::Method::PUT,
            "/api/mosdns/config",
            json!({ "path": "/nonexistent/mosdns/config.yaml" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["path"], "/nonexistent/mosdns/config.yaml");
    assert_eq!(body["exists"], false);
    assert_eq!(body["dir"], "/nonexistent/mosdns");
    assert_eq!(harness.store.config_path(), "/nonexistent/mosdns/config.yaml");

    let (status, body) = harness
        .send_json(
            reqwest::Method::PUT,
            "/api/settings",
            json!({ LISTEN_ADDR_SETTING: "0.0.0.0:9000", "theme": "dark" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["settings"]["theme"], "dark");

    let (_, body) = harness
        .send_json(reqwest::Method::PUT, "/api/settings", json!({ "theme": "" }))
        .await;
    assert!(body["settings"].get("theme").is_none());
    assert_eq!(body["settings"][LISTEN_ADDR_SETTING], "0.0.0.0:9000");

    let (status, _) = harness
        .send_json(reqwest::Method::PUT, "/api/settings", json!(["not", "a", "map"]))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test(flavor = "multi_thread")]
async fn logs_expose_buffered_entries() {
    let harness = Harness::start().await;
    harness.logs.push("INFO", "first");
    harness.logs.push("warn", "second");

    let (status, body) = harness.get("/api/logs").await;
    assert_eq!(status, StatusCode::OK);
    let entries = body["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["level"], "info");
    assert_eq!(entries[1]["message"], "second");
}

#[tokio::test(flavor = "multi_thread")]
async fn lists_are_proxied_and_saved() {
    let harness = Harness::start().await;

    let response = harness
        .http
        .get(harness.url("/api/mosdns/lists/whitelist"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert!(
        response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/plain")
    );
    assert_eq!(response.text().await.unwrap(), "a.com\nb.com\n");

    let response = harness
        .http
        .post(harness.url("/api/mosdns/lists/ddnslist"))
        .header("content-type", "text/plain")
        .body("example.org\n")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let calls = harness.calls();
    assert_eq!(
        calls,
        [
            "GET /plugins/whitelist/show",
            "POST /plugins/ddnslist/post example.org",
            "GET /plugins/ddnslist/save",
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn list_errors_surface_upstream_messages() {
    let harness = Harness::start().await;

    let (status, body) = harness.get("/api/mosdns/lists/greylist").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "boom");

    // An empty upstream error body falls back to the status line.
    let response = harness
        .http
        .post(harness.url("/api/mosdns/lists/blocklist"))
        .body("bad.example\n")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "502 Bad Gateway");
    assert!(
        !harness
            .calls()
            .iter()
            .any(|call| call.starts_with("GET /plugins/blocklist/save")),
        "a failed post must not be saved"
    );

    let (status, _) = harness.get("/api/mosdns/lists/passwords").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let response = harness
        .http
        .post(harness.url("/api/mosdns/lists/whitelist"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test(flavor = "multi_thread")]
async fn switches_are_trimmed_and_posted_as_json() {
    let harness = Harness::start().await;

    let (status, body) = harness.get("/api/mosdns/switches/switch3").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"], "on");

    let (status, body) = harness
        .send_json(
            reqwest::Method::POST,
            "/api/mosdns/switches/switch3",
            json!({ "value": " off " }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"], "off");

    let calls = harness.calls();
    assert_eq!(calls[1], r#"POST /plugins/switch3/post {"value":"off"}"#);
    assert_eq!(calls[2], "GET /plugins/switch3/save");

    let (status, _) = harness
        .send_json(
            reqwest::Method::POST,
            "/api/mosdns/switches/switch3",
            json!({ "value": "" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = harness.get("/api/mosdns/switches/switch0").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread")]
async fn responses_carry_cors_headers() {
    let harness = Harness::start().await;

    let response = harness
        .http
        .request(reqwest::Method::OPTIONS, harness.url("/api/services"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 204);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");

    let response = harness
        .http
        .get(harness.url("/api/services/nginx"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
    assert!(
        response.headers()["access-control-allow-methods"]
            .to_str()
            .unwrap()
            .contains("PUT")
    );
}

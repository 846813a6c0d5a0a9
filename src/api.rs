//! HTTP API.
//!
//! Supervisor calls block, so every handler runs them on the blocking pool with an
//! [`OpContext`] bounded by the route's budget. Dropping the request future cancels that
//! context, which aborts any init-system command still running for it.
use std::{
    collections::BTreeMap,
    future::{Future, IntoFuture},
    io,
    path::Path as FsPath,
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Request, State, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::{net::TcpListener, sync::Notify};
use tracing::{info, warn};

use crate::{
    constants::{SERVICE_ACTION_TIMEOUT, SERVICE_QUERY_TIMEOUT, SHUTDOWN_GRACE},
    context::OpContext,
    error::{PluginError, StoreError, SupervisorError},
    logs::LogBuffer,
    plugin::PluginClient,
    service::{Action, Snapshot},
    store::StateStore,
    supervisor::Supervisor,
    version::VersionTracker,
};

/// Shared handler state.
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
    pub store: Arc<dyn StateStore>,
    pub versions: Arc<VersionTracker>,
    pub logs: Arc<LogBuffer>,
    pub plugin: PluginClient,
}

/// Errors surfaced to HTTP clients as `{"error": "<message>"}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error("unsupported action '{0}'")]
    UnsupportedAction(String),

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("worker failed: {0}")]
    Worker(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(format!("invalid request body: {}", rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Supervisor(SupervisorError::UnregisteredService(_))
            | ApiError::Plugin(PluginError::UnknownTag(_)) => StatusCode::NOT_FOUND,
            ApiError::Supervisor(err) if err.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Worker(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        };
        warn!("Request failed with {status}: {self}");
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Builds the API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/services", get(list_services))
        .route("/api/services/{name}", get(get_service))
        .route("/api/services/{name}/{action}", post(service_action))
        .route("/api/mosdns/config", get(get_config_path).put(put_config_path))
        .route("/api/settings", get(get_settings).put(put_settings))
        .route("/api/logs", get(get_logs))
        .route("/api/mosdns/lists/{tag}", get(show_list).post(update_list))
        .route(
            "/api/mosdns/switches/{name}",
            get(show_switch).post(update_switch),
        )
        .layer(middleware::from_fn(cors))
        .with_state(state)
}

/// Serves `router(state)` on `listener` until `shutdown` resolves, then drains in-flight
/// requests for at most [`SHUTDOWN_GRACE`].
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> io::Result<()> {
    serve_with_grace(listener, state, shutdown, SHUTDOWN_GRACE).await
}

/// [`serve`] with an explicit drain period.
pub async fn serve_with_grace(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
    grace: Duration,
) -> io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Serving HTTP API on {addr}");
    }

    let requested = Arc::new(Notify::new());
    let signal = {
        let requested = Arc::clone(&requested);
        async move {
            shutdown.await;
            requested.notify_one();
        }
    };
    let server = axum::serve(listener, router(state))
        .with_graceful_shutdown(signal)
        .into_future();

    tokio::select! {
        result = server => result,
        _ = async {
            requested.notified().await;
            tokio::time::sleep(grace).await;
        } => {
            warn!("In-flight requests still running after {grace:?}; abandoning them");
            Ok(())
        }
    }
}

async fn cors(req: Request, next: Next) -> Response {
    let mut response = if req.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(req).await
    };
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET,POST,PUT,OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    response
}

/// Runs `work` on the blocking pool under a context expiring after `budget`.
async fn run_blocking<T, F>(budget: Duration, work: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&OpContext) -> Result<T, ApiError> + Send + 'static,
{
    let ctx = OpContext::with_timeout(budget);
    let _cancel = ctx.cancel_on_drop();
    let worker_ctx = ctx.clone();
    tokio::task::spawn_blocking(move || work(&worker_ctx))
        .await
        .map_err(|err| ApiError::Worker(err.to_string()))?
}

/// Enriched status of `name`. A missing binary is reported as a snapshot rather than an
/// error.
pub fn observe(
    supervisor: &Supervisor,
    versions: &VersionTracker,
    ctx: &OpContext,
    name: &str,
) -> Result<Snapshot, SupervisorError> {
    let snapshot = match supervisor.status(ctx, name) {
        Ok(snapshot) => snapshot,
        Err(SupervisorError::NotInstalled { snapshot, .. }) => snapshot,
        Err(err) => return Err(err),
    };
    let mut snapshots = [snapshot];
    versions.enrich(&mut snapshots);
    let [snapshot] = snapshots;
    Ok(snapshot)
}

/// Runs `action` on `name`, then reports its status afresh through [`observe`].
pub fn act(
    supervisor: &Supervisor,
    versions: &VersionTracker,
    ctx: &OpContext,
    name: &str,
    action: Action,
) -> Result<Snapshot, SupervisorError> {
    supervisor.perform(ctx, name, action)?;
    observe(supervisor, versions, ctx, name)
}

async fn list_services(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Snapshot>>, ApiError> {
    let snapshots = run_blocking(SERVICE_QUERY_TIMEOUT, move |ctx| {
        let mut snapshots = state.supervisor.list(ctx)?;
        state.versions.enrich(&mut snapshots);
        Ok(snapshots)
    })
    .await?;
    Ok(Json(snapshots))
}

async fn get_service(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Snapshot>, ApiError> {
    let snapshot = run_blocking(SERVICE_QUERY_TIMEOUT, move |ctx| {
        Ok(observe(&state.supervisor, &state.versions, ctx, &name)?)
    })
    .await?;
    Ok(Json(snapshot))
}

async fn service_action(
    State(state): State<Arc<AppState>>,
    Path((name, action)): Path<(String, String)>,
) -> Result<Json<Snapshot>, ApiError> {
    let action =
        Action::from_str(&action).map_err(|_| ApiError::UnsupportedAction(action.clone()))?;
    let snapshot = run_blocking(SERVICE_ACTION_TIMEOUT, move |ctx| {
        Ok(act(&state.supervisor, &state.versions, ctx, &name, action)?)
    })
    .await?;
    Ok(Json(snapshot))
}

#[derive(Debug, Deserialize)]
struct ConfigPathPayload {
    path: String,
}

fn config_path_view(store: &dyn StateStore) -> serde_json::Value {
    let path = store.config_path();
    let exists = !path.is_empty() && FsPath::new(&path).exists();
    let dir = FsPath::new(&path)
        .parent()
        .map(|dir| dir.display().to_string())
        .unwrap_or_default();
    json!({ "path": path, "exists": exists, "dir": dir })
}

async fn get_config_path(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let view = run_blocking(SERVICE_QUERY_TIMEOUT, move |_| {
        Ok(config_path_view(state.store.as_ref()))
    })
    .await?;
    Ok(Json(view))
}

async fn put_config_path(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ConfigPathPayload>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(payload) = payload?;
    let path = payload.path.trim().to_string();
    if path.is_empty() {
        return Err(ApiError::BadRequest("path must not be empty".into()));
    }
    let view = run_blocking(SERVICE_QUERY_TIMEOUT, move |_| {
        state.store.set_config_path(&path)?;
        info!("DNS daemon config path set to {path}");
        Ok(config_path_view(state.store.as_ref()))
    })
    .await?;
    Ok(Json(view))
}

async fn get_settings(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({ "settings": state.store.settings() }))
}

async fn put_settings(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<BTreeMap<String, String>>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(updates) = payload?;
    let settings = run_blocking(SERVICE_QUERY_TIMEOUT, move |_| {
        state.store.update_settings(updates)?;
        Ok(state.store.settings())
    })
    .await?;
    Ok(Json(json!({ "settings": settings })))
}

async fn get_logs(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({ "entries": state.logs.entries() }))
}

async fn show_list(
    State(state): State<Arc<AppState>>,
    Path(tag): Path<String>,
) -> Result<Response, ApiError> {
    let data = state.plugin.show_list(&tag).await?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        data,
    )
        .into_response())
}

async fn update_list(
    State(state): State<Arc<AppState>>,
    Path(tag): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !crate::plugin::is_list_tag(&tag) {
        return Err(PluginError::UnknownTag(tag).into());
    }
    if body.is_empty() {
        return Err(ApiError::BadRequest("request body must not be empty".into()));
    }
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());
    state.plugin.update_list(&tag, content_type, body).await?;
    info!("Saved DNS list '{tag}'");
    Ok(Json(json!({ "saved": true })))
}

#[derive(Debug, Deserialize)]
struct SwitchPayload {
    #[serde(default)]
    value: String,
}

async fn show_switch(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let value = state.plugin.switch_value(&name).await?;
    Ok(Json(json!({ "value": value })))
}

async fn update_switch(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    payload: Result<Json<SwitchPayload>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !crate::plugin::is_switch_tag(&name) {
        return Err(PluginError::UnknownTag(name).into());
    }
    let Json(payload) = payload?;
    let value = payload.value.trim();
    if value.is_empty() {
        return Err(ApiError::BadRequest("missing value".into()));
    }
    state.plugin.set_switch(&name, value).await?;
    info!("Switch '{name}' set to {value}");
    Ok(Json(json!({ "value": value })))
}

//! HTTP surface of the gateway.
//!
//! JSON in, JSON out, UTF-8. Admin paths (`/api/v1/admin/*`) sit behind the
//! CIDR allow-list; the client address is the leftmost `X-Forwarded-For`
//! entry when present, else the transport peer. Trailing slashes are
//! significant and match the published endpoint table exactly.

use crate::config::GatewayConfig;
use crate::error::{ErrorCode, GatewayError};
use crate::ipguard::{client_ip, IpGuard};
use crate::languages::LanguageRegistry;
use crate::model_host::ModelHost;
use crate::monitor::{self, Monitor};
use crate::provider::QualityMode;
use crate::queue::TranslationQueue;
use crate::service::{TranslationRequest, TranslationService, TranslationStatus};
use crate::shutdown::ShutdownCoordinator;
use crate::stats::StatsWindow;
use crate::{catalog, shutdown};
use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, Path, Request, State};
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post, put};
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Session cookie carrying the per-session model selection.
const SELECTION_COOKIE: &str = "selected_model_id";

/// Memory utilisation above which the process reports degraded health.
const MEMORY_DEGRADED_PERCENT: f64 = 90.0;

/// Memory utilisation above which liveness fails.
const MEMORY_LIVENESS_PERCENT: f64 = 95.0;

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

/// Everything the handlers need, constructed once at startup.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<TranslationService>,
    pub registry: Arc<LanguageRegistry>,
    pub host: Arc<ModelHost>,
    pub queue: Arc<TranslationQueue>,
    pub stats: Arc<StatsWindow>,
    pub monitor: Arc<Monitor>,
    pub shutdown: Arc<ShutdownCoordinator>,
    pub ip_guard: Arc<IpGuard>,
}

impl AppState {
    /// Wire up the real component graph from configuration.
    pub fn from_config(config: &GatewayConfig) -> Self {
        let registry = Arc::new(LanguageRegistry::from_config(&config.languages));
        let host = Arc::new(ModelHost::from_config(
            &config.model,
            &config.app.paths.models_dir,
        ));
        let queue = Arc::new(TranslationQueue::new(
            config.app.concurrency.max_concurrent,
            config.app.concurrency.max_queue_size,
        ));
        let stats = Arc::new(StatsWindow::new());
        let shutdown = ShutdownCoordinator::new(shutdown::DEFAULT_GRACE_SECS);
        let service = Arc::new(TranslationService::new(
            config,
            Arc::clone(&registry),
            Arc::clone(&host),
            Arc::clone(&queue),
            Arc::clone(&stats),
            Arc::clone(&shutdown),
        ));

        Self {
            service,
            registry,
            host,
            queue,
            stats,
            monitor: Arc::new(Monitor::new()),
            shutdown,
            ip_guard: Arc::new(IpGuard::from_blocks(&config.app.admin_access.allowed_ips)),
        }
    }
}

/// Build the full route table.
pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route(
            "/api/v1/admin/model/load-progress/",
            get(handle_load_progress).post(handle_admin_trigger_load),
        )
        .route("/api/v1/admin/model/unload/", post(handle_admin_unload))
        .route("/api/v1/admin/status/", get(handle_admin_status))
        .route("/api/v1/admin/statistics/", get(handle_statistics))
        .layer(middleware::from_fn_with_state(state.clone(), admin_ip_gate));

    Router::new()
        .route("/api/v1/translate/", post(handle_translate))
        .route("/api/v1/translate/{id}/status/", get(handle_translate_status))
        .route("/api/v1/languages/", get(handle_languages))
        .route("/api/v1/models/", get(handle_models))
        .route("/api/v1/models/selection/", put(handle_model_selection))
        .route("/api/v1/models/switch/", post(handle_model_switch))
        .route("/api/v1/status/", get(handle_public_status))
        .route("/api/v1/statistics/", get(handle_statistics))
        .route("/api/v1/model/load-progress/", get(handle_load_progress))
        .route("/api/health/", get(handle_health))
        .route("/api/ready/", get(handle_ready))
        .route("/api/live/", get(handle_live))
        .merge(admin)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Server handle
// ---------------------------------------------------------------------------

/// Running HTTP server.
///
/// Binds, serves in a background task and stops accepting once the shutdown
/// coordinator's token fires.
pub struct GatewayServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl GatewayServer {
    /// Bind `host:port` (port `0` auto-assigns) and start serving.
    pub async fn start(
        state: AppState,
        host: &str,
        port: u16,
    ) -> crate::error::Result<Self> {
        let shutdown = Arc::clone(&state.shutdown);
        let app = router(state);

        let bind_addr = format!("{host}:{port}");
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            GatewayError::with_message(
                ErrorCode::InternalError,
                format!("server bind failed on {bind_addr}: {e}"),
            )
        })?;
        let addr = listener.local_addr().map_err(|e| {
            GatewayError::with_message(ErrorCode::InternalError, format!("local addr: {e}"))
        })?;

        info!("translation gateway listening on http://{addr}/api/v1");

        let token = shutdown.cancellation_token();
        let handle = tokio::spawn(async move {
            let server = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = server.await {
                tracing::error!("server error: {e}");
            }
        });

        Ok(Self { addr, handle })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Wait for the serve task to finish (after graceful shutdown fired).
    pub async fn wait(self) {
        let _ = self.handle.await;
    }
}

// ---------------------------------------------------------------------------
// Error rendering
// ---------------------------------------------------------------------------

fn error_response(error: &GatewayError, request_id: Option<&str>) -> Response {
    let mut body = json!({
        "error": {
            "code": error.code.as_str(),
            "message": error.message,
        }
    });
    if let Some(request_id) = request_id {
        body["request_id"] = json!(request_id);
    }
    let status =
        StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(body)).into_response()
}

fn code_response(code: ErrorCode) -> Response {
    error_response(&GatewayError::new(code), None)
}

// ---------------------------------------------------------------------------
// Admin IP gate
// ---------------------------------------------------------------------------

async fn admin_ip_gate(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok());
    let ip = client_ip(forwarded, peer.ip());

    if !state.ip_guard.is_allowed(ip) {
        warn!("admin access denied for {ip} on {}", request.uri().path());
        return code_response(ErrorCode::AccessDenied);
    }
    next.run(request).await
}

// ---------------------------------------------------------------------------
// Translation endpoints
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TranslateBody {
    #[serde(default)]
    text: String,
    #[serde(default)]
    source_language: Option<String>,
    target_language: Option<String>,
    #[serde(default)]
    quality: Option<String>,
    #[serde(default)]
    model_id: Option<String>,
}

async fn handle_translate(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Result<Json<TranslateBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return error_response(
                &GatewayError::with_message(
                    ErrorCode::InvalidJson,
                    format!("{}（{rejection}）", ErrorCode::InvalidJson.message()),
                ),
                None,
            );
        }
    };

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok());
    let ip = client_ip(forwarded, peer.ip());

    let request = TranslationRequest::new(
        body.text,
        body.source_language
            .unwrap_or_else(|| state.registry.default_source().to_owned()),
        body.target_language.unwrap_or_default(),
        QualityMode::from_wire(body.quality.as_deref()),
        body.model_id,
        ip.to_string(),
    );
    let request_id = request.request_id.clone();

    let response = state.service.translate(request).await;
    match response.status {
        TranslationStatus::Completed => {
            let mut body = json!({
                "request_id": response.request_id,
                "status": "completed",
                "translated_text": response.translated_text,
                "processing_time_ms": response.processing_time_ms,
                "execution_mode": response.execution_mode.as_str(),
            });
            if let Some(detected) = &response.detected_language {
                body["detected_language"] = json!(detected);
            }
            if let Some(confidence) = response.confidence_score {
                body["confidence_score"] = json!(confidence);
            }
            (StatusCode::OK, Json(body)).into_response()
        }
        TranslationStatus::Pending => (
            StatusCode::ACCEPTED,
            Json(json!({
                "request_id": response.request_id,
                "status": "pending",
                "queue_position": response.queue_position,
                "estimated_wait_seconds": response.estimated_wait_seconds,
            })),
        )
            .into_response(),
        TranslationStatus::Failed | TranslationStatus::Rejected => {
            let error = response
                .error
                .unwrap_or_else(|| GatewayError::new(ErrorCode::InternalError));
            error_response(&error, Some(&request_id))
        }
    }
}

async fn handle_translate_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.queue.snapshot(&id) {
        Some(snapshot) => (StatusCode::OK, Json(json!(snapshot))).into_response(),
        None => code_response(ErrorCode::RequestNotFound),
    }
}

// ---------------------------------------------------------------------------
// Language and model endpoints
// ---------------------------------------------------------------------------

async fn handle_languages(State(state): State<AppState>) -> Response {
    let languages: Vec<_> = state.registry.enabled().collect();
    (
        StatusCode::OK,
        Json(json!({
            "languages": languages,
            "default_source_language": state.registry.default_source(),
            "default_target_language": state.registry.default_target(),
        })),
    )
        .into_response()
}

fn selection_from_cookies(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SELECTION_COOKIE).then(|| value.trim().to_owned())
    })
}

async fn handle_models(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let models = catalog::list_models(state.host.models_dir());
    (
        StatusCode::OK,
        Json(json!({
            "models": models,
            "active_model_id": state.host.active_model_id(),
            "selected_model_id": selection_from_cookies(&headers),
        })),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct SelectionBody {
    model_id: String,
}

async fn handle_model_selection(
    State(state): State<AppState>,
    body: Result<Json<SelectionBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(_) => return code_response(ErrorCode::InvalidJson),
    };

    let entry = match catalog::find_model(state.host.models_dir(), &body.model_id) {
        Ok(entry) => entry,
        Err(e) => return error_response(&e, None),
    };

    let mut response = (
        StatusCode::OK,
        Json(json!({
            "selected_model_id": entry.model_id,
        })),
    )
        .into_response();
    let cookie = format!(
        "{SELECTION_COOKIE}={}; Path=/; SameSite=Lax",
        entry.model_id
    );
    if let Ok(value) = cookie.parse() {
        response.headers_mut().insert(SET_COOKIE, value);
    }
    response
}

#[derive(Debug, Deserialize)]
struct SwitchBody {
    model_id: String,
    #[serde(default)]
    force: bool,
}

async fn handle_model_switch(
    State(state): State<AppState>,
    body: Result<Json<SwitchBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(_) => return code_response(ErrorCode::InvalidJson),
    };

    match state
        .host
        .switch_model(&body.model_id, body.force, &state.queue)
        .await
    {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "active_model_id": state.host.active_model_id(),
            })),
        )
            .into_response(),
        Err(e) => error_response(&e, None),
    }
}

// ---------------------------------------------------------------------------
// Status, statistics, progress
// ---------------------------------------------------------------------------

async fn handle_public_status(State(state): State<AppState>) -> Response {
    let queue = state.queue.stats();
    (
        StatusCode::OK,
        Json(json!({
            "system": {
                "is_running": !state.shutdown.is_shutting_down(),
                "phase": state.shutdown.phase(),
                "uptime": state.monitor.uptime().uptime,
                "uptime_seconds": state.monitor.uptime().uptime_seconds,
                "last_updated": Utc::now(),
            },
            "model": {
                "status": state.host.status(),
                "active_model_id": state.host.active_model_id(),
                "execution_mode": state.host.execution_mode().as_str(),
            },
            "queue": queue,
        })),
    )
        .into_response()
}

async fn handle_statistics(State(state): State<AppState>) -> Response {
    let summary = state.stats.summary();
    (
        StatusCode::OK,
        Json(json!({
            "period": {
                "start": summary.period_start,
                "end": summary.period_end,
            },
            "summary": {
                "total_requests": summary.total_requests,
                "successful_requests": summary.successful_requests,
                "failed_requests": summary.failed_requests,
                "success_rate": summary.success_rate,
                "average_processing_time_ms": summary.average_processing_time_ms,
            },
            "hourly_breakdown": state.stats.hourly_breakdown(),
        })),
    )
        .into_response()
}

async fn handle_load_progress(State(state): State<AppState>) -> Response {
    let mut body = json!({
        "status": state.host.status(),
        "progress": state.host.loading_progress(),
        "execution_mode": state.host.execution_mode().as_str(),
    });
    if let Some(message) = state.host.error_message() {
        body["error_message"] = json!(message);
    }
    (StatusCode::OK, Json(body)).into_response()
}

/// `POST /api/v1/admin/model/load-progress/` — kick off a load in the
/// background and report progress from then on.
async fn handle_admin_trigger_load(State(state): State<AppState>) -> Response {
    if state.host.is_loaded() {
        return (
            StatusCode::OK,
            Json(json!({
                "status": state.host.status(),
                "progress": state.host.loading_progress(),
            })),
        )
            .into_response();
    }

    let host = Arc::clone(&state.host);
    tokio::spawn(async move {
        if let Err(e) = host.ensure_loaded().await {
            warn!("background model load failed: {e}");
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "loading",
            "progress": state.host.loading_progress(),
        })),
    )
        .into_response()
}

async fn handle_admin_unload(State(state): State<AppState>) -> Response {
    state.host.unload().await;
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "model_status": state.host.status(),
        })),
    )
        .into_response()
}

async fn handle_admin_status(State(state): State<AppState>) -> Response {
    (
        StatusCode::OK,
        Json(json!({
            "system": state.monitor.snapshot(),
            "model": {
                "status": state.host.status(),
                "active_model_id": state.host.active_model_id(),
                "execution_mode": state.host.execution_mode().as_str(),
                "loading_progress": state.host.loading_progress(),
                "error_message": state.host.error_message(),
            },
            "queue": state.queue.stats(),
            "shutdown": {
                "phase": state.shutdown.phase(),
                "is_shutting_down": state.shutdown.is_shutting_down(),
            },
        })),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Health, readiness, liveness
// ---------------------------------------------------------------------------

async fn handle_health(State(state): State<AppState>) -> Response {
    let queue = state.queue.stats();
    let memory = monitor::memory_percent();

    let api_ok = true;
    let model_ok = state.host.is_loaded();
    let queue_ok = queue.queued_requests < queue.max_queue_size;
    let memory_ok = memory.is_none_or(|p| p < MEMORY_DEGRADED_PERCENT);
    let memory_alive = memory.is_none_or(|p| p < MEMORY_LIVENESS_PERCENT);

    let (status, http_status) = if !memory_alive {
        ("unhealthy", StatusCode::SERVICE_UNAVAILABLE)
    } else if model_ok && queue_ok && memory_ok {
        ("healthy", StatusCode::OK)
    } else {
        ("degraded", StatusCode::OK)
    };

    (
        http_status,
        Json(json!({
            "status": status,
            "checks": {
                "api": api_ok,
                "model": model_ok,
                "queue": queue_ok,
                "memory": memory_ok,
            },
            "timestamp": Utc::now(),
        })),
    )
        .into_response()
}

async fn handle_ready(State(state): State<AppState>) -> Response {
    let queue = state.queue.stats();
    let ready = state.host.is_loaded()
        && queue.queued_requests < queue.max_queue_size
        && !state.shutdown.is_shutting_down();

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(json!({ "ready": ready }))).into_response()
}

async fn handle_live(State(_state): State<AppState>) -> Response {
    let alive = monitor::memory_percent().is_none_or(|p| p < MEMORY_LIVENESS_PERCENT);
    let status = if alive {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(json!({ "alive": alive }))).into_response()
}

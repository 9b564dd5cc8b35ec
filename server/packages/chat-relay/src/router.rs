//! HTTP surface of the relay.

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chat_relay_error::{ErrorType, ProblemDetails, RelayError};
use futures::StreamExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tower_http::trace::TraceLayer;
use tracing::Span;
use utoipa::{OpenApi, ToSchema};

use crate::abort::AbortRegistry;
use crate::engine::{self, TurnInvocation};
use crate::events::{ChatRequest, PermissionMode, StreamResponse};
use crate::executable::ResolvedExecutable;
use crate::executor;
use crate::rules::RulesCache;
use crate::tools;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Project directory advertised to clients on `/api/config`. Turns
    /// that do not name a working directory run wherever the server
    /// process runs.
    pub default_project_dir: PathBuf,
}

#[derive(Debug)]
pub struct AppState {
    config: RelayConfig,
    executable: ResolvedExecutable,
    rules: RulesCache,
    registry: Arc<AbortRegistry>,
}

impl AppState {
    pub fn new(config: RelayConfig, executable: ResolvedExecutable, rules: RulesCache) -> Self {
        Self {
            config,
            executable,
            rules,
            registry: Arc::new(AbortRegistry::new()),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let shared = Arc::new(state);
    let mut router = Router::new()
        .route("/api/health", get(get_health))
        .route("/api/chat", post(post_chat))
        .route("/api/abort/:request_id", post(post_abort))
        .route("/api/rules", get(get_rules))
        .route("/api/rules/reload", post(reload_rules))
        .route("/api/config", get(get_config))
        .with_state(shared);

    let http_logging = match std::env::var("CHAT_RELAY_LOG_HTTP") {
        Ok(value) if value == "0" || value.eq_ignore_ascii_case("false") => false,
        _ => true,
    };
    if http_logging {
        let trace_layer = TraceLayer::new_for_http()
            .make_span_with(|req: &Request<_>| {
                tracing::info_span!(
                    "http.request",
                    method = %req.method(),
                    uri = %req.uri()
                )
            })
            .on_response(|res: &Response, latency: Duration, span: &Span| {
                tracing::info!(
                    parent: span,
                    status = %res.status(),
                    latency_ms = latency.as_millis()
                );
            });
        router = router.layer(trace_layer);
    }

    router
}

#[derive(OpenApi)]
#[openapi(
    paths(get_health, post_chat, post_abort, get_rules, reload_rules, get_config),
    components(schemas(
        ChatRequest,
        PermissionMode,
        StreamResponse,
        HealthResponse,
        AbortResponse,
        RulesResponse,
        ConfigResponse,
        ProblemDetails,
        ErrorType
    )),
    tags(
        (name = "meta", description = "Service metadata"),
        (name = "chat", description = "Chat turns and cancellation"),
        (name = "rules", description = "Rules document")
    )
)]
pub struct ApiDoc;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Relay(#[from] RelayError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let problem: ProblemDetails = match &self {
            ApiError::Relay(err) => err.to_problem_details(),
        };
        let status =
            StatusCode::from_u16(problem.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(problem)).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct AbortResponse {
    pub success: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, JsonSchema)]
pub struct RulesResponse {
    pub success: bool,
    pub rules: String,
    pub length: usize,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigResponse {
    pub default_project_path: String,
    pub executable: String,
    pub version: String,
}

#[utoipa::path(
    get,
    path = "/api/health",
    responses((status = 200, body = HealthResponse)),
    tag = "meta"
)]
async fn get_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

#[utoipa::path(
    post,
    path = "/api/chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "NDJSON stream of StreamResponse lines"),
        (status = 409, body = ProblemDetails),
        (status = 502, body = ProblemDetails)
    ),
    tag = "chat"
)]
async fn post_chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let message = executor::strip_command_marker(&request.message);
    let prompt = state
        .rules
        .prepare(message, request.session_id.as_deref())
        .await;
    let allowed_tools =
        tools::compute_allowed_tools(request.allowed_tools.as_deref().unwrap_or(&[]));

    let invocation = TurnInvocation {
        prompt,
        allowed_tools,
        resume_session_id: request.session_id.clone(),
        working_directory: request.working_directory.as_ref().map(PathBuf::from),
        permission_mode: request.permission_mode,
    };
    let command = engine::build_turn_command(&state.executable, &invocation);
    let events = executor::spawn_turn(state.registry.clone(), request.request_id.clone(), command)?;

    let stream =
        ReceiverStream::new(events).map(|event| Ok::<_, Infallible>(ndjson_line(&event)));
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(stream))
        .map_err(|err| RelayError::StreamError {
            message: err.to_string(),
        })?;
    Ok(response)
}

/// Serializes one event as an NDJSON line. Serialization of these
/// variants cannot realistically fail; if it ever does, the line is
/// replaced with an error event so the framing stays parseable.
fn ndjson_line(event: &StreamResponse) -> Bytes {
    let mut line = serde_json::to_vec(event).unwrap_or_else(|err| {
        tracing::error!(error = %err, "failed to serialize stream event");
        br#"{"type":"error","error":"event serialization failed"}"#.to_vec()
    });
    line.push(b'\n');
    Bytes::from(line)
}

#[utoipa::path(
    post,
    path = "/api/abort/{request_id}",
    responses((status = 200, body = AbortResponse)),
    params(("request_id" = String, Path, description = "Id of the in-flight request")),
    tag = "chat"
)]
async fn post_abort(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> Json<AbortResponse> {
    let success = state.registry.trigger(&request_id);
    if success {
        tracing::info!(request_id = %request_id, "abort signalled");
    } else {
        tracing::debug!(request_id = %request_id, "abort for unknown or finished request");
    }
    Json(AbortResponse { success })
}

#[utoipa::path(
    get,
    path = "/api/rules",
    responses((status = 200, body = RulesResponse)),
    tag = "rules"
)]
async fn get_rules(State(state): State<Arc<AppState>>) -> Json<RulesResponse> {
    let rules = state.rules.current().await;
    Json(RulesResponse {
        success: true,
        length: rules.len(),
        rules: rules.to_string(),
    })
}

#[utoipa::path(
    post,
    path = "/api/rules/reload",
    responses((status = 200, body = RulesResponse)),
    tag = "rules"
)]
async fn reload_rules(State(state): State<Arc<AppState>>) -> Json<RulesResponse> {
    let rules = state.rules.reload().await;
    Json(RulesResponse {
        success: true,
        length: rules.len(),
        rules: rules.to_string(),
    })
}

#[utoipa::path(
    get,
    path = "/api/config",
    responses((status = 200, body = ConfigResponse)),
    tag = "meta"
)]
async fn get_config(State(state): State<Arc<AppState>>) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        default_project_path: state.config.default_project_dir.display().to_string(),
        executable: state.executable.display_command(),
        version: state.executable.version.clone(),
    })
}

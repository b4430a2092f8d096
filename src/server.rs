//! REST API over the client registry, the offer cache, and the scan engine.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Status, client count, last scan, engine state |
//! | `GET`  | `/clients` | All client profiles |
//! | `POST` | `/clients` | Create or partially update a profile (`chat_id` required) |
//! | `GET`  | `/clients/{chat_id}` | One profile |
//! | `PUT`  | `/clients/{chat_id}` | Merge an update into a profile, creating it if missing |
//! | `DELETE` | `/clients/{chat_id}` | Remove a profile |
//! | `POST` | `/clients/{chat_id}/pause` | Stop scanning for a client |
//! | `POST` | `/clients/{chat_id}/resume` | Resume scanning for a client |
//! | `POST` | `/parse` | Run the request parser on free text |
//! | `GET`  | `/offers?chat_id=` | Cached listings for one client or all |
//! | `POST` | `/engine/start` | Start the scan loop unless one is alive |
//! | `POST` | `/engine/stop` | Ask the scan loop to stop after its cycle |
//! | `GET`/`POST` | `/api/preferences` | Profiles in the historical shape |
//! | `PUT`/`DELETE` | `/api/preferences/{index}` | Same, by registry position |
//!
//! # Authentication
//!
//! When `api.key` is set, every request must carry it in `x-api-key`.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "client not found: 42" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `not_found` (404),
//! `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use prospector_core::ClientConfig;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::engine::ScanEngine;
use crate::legacy::{client_to_preference, preference_to_update};
use crate::parser::{ParseOutcome, RequestParser};
use crate::state::{RegistryError, SharedState};

/// Shared handler state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub state: SharedState,
    pub parser: Arc<dyn RequestParser>,
    pub engine: Arc<ScanEngine>,
    /// Required `x-api-key` value, if any.
    pub api_key: Option<Arc<str>>,
}

impl AppState {
    pub fn new(
        engine: Arc<ScanEngine>,
        parser: Arc<dyn RequestParser>,
        api_key: &str,
    ) -> Self {
        let api_key = Some(api_key.trim())
            .filter(|k| !k.is_empty())
            .map(Arc::from);
        Self {
            state: engine.state().clone(),
            parser,
            engine,
            api_key,
        }
    }
}

/// Build the router with authentication, CORS, and request tracing.
pub fn router(app: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/clients", get(handle_list_clients).post(handle_upsert_client))
        .route(
            "/clients/{chat_id}",
            get(handle_get_client)
                .put(handle_update_client)
                .delete(handle_delete_client),
        )
        .route("/clients/{chat_id}/pause", post(handle_pause))
        .route("/clients/{chat_id}/resume", post(handle_resume))
        .route("/parse", post(handle_parse))
        .route("/offers", get(handle_offers))
        .route("/engine/start", post(handle_engine_start))
        .route("/engine/stop", post(handle_engine_stop))
        .route(
            "/api/preferences",
            get(handle_list_preferences).post(handle_create_preference),
        )
        .route(
            "/api/preferences/{index}",
            put(handle_update_preference).delete(handle_delete_preference),
        )
        .layer(middleware::from_fn_with_state(app.clone(), require_api_key))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app)
}

/// Bind `bind_addr` and serve until the process stops.
pub async fn run_server(app: AppState, bind_addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "REST API listening");
    axum::serve(listener, router(app)).await?;
    Ok(())
}

async fn require_api_key(
    State(app): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(expected) = &app.api_key {
        let supplied = request
            .headers()
            .get("x-api-key")
            .and_then(|v| v.to_str().ok());
        if supplied != Some(expected.as_ref()) {
            return Err(unauthorized("invalid api key"));
        }
    }
    Ok(next.run(request).await)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn app_error(status: StatusCode, code: &str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code: code.to_string(),
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn unauthorized(message: impl Into<String>) -> AppError {
    app_error(StatusCode::UNAUTHORIZED, "unauthorized", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    app_error(StatusCode::NOT_FOUND, "not_found", message)
}

fn internal(message: impl Into<String>) -> AppError {
    app_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::MissingChatId => bad_request(err.to_string()),
            RegistryError::ClientNotFound(_) | RegistryError::IndexOutOfRange(_) => {
                not_found(err.to_string())
            }
            RegistryError::Persist(ref source) => {
                error!(error = %source, "registry write failed");
                internal(err.to_string())
            }
        }
    }
}

fn require_object(body: &Value) -> Result<(), AppError> {
    if body.is_object() {
        Ok(())
    } else {
        Err(bad_request("request body must be a JSON object"))
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    clients: usize,
    last_scan_at: Option<DateTime<Utc>>,
    engine_running: bool,
}

async fn handle_health(State(app): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        clients: app.state.client_count(),
        last_scan_at: app.state.last_scan_at(),
        engine_running: app.state.is_running() && app.state.engine_alive(),
    })
}

// ============ /clients ============

async fn handle_list_clients(State(app): State<AppState>) -> Json<Vec<ClientConfig>> {
    Json(app.state.clients())
}

async fn handle_get_client(
    State(app): State<AppState>,
    Path(chat_id): Path<String>,
) -> Result<Json<ClientConfig>, AppError> {
    app.state
        .find_client(&chat_id)
        .map(Json)
        .ok_or_else(|| not_found(format!("client not found: {chat_id}")))
}

async fn handle_upsert_client(
    State(app): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<ClientConfig>, AppError> {
    require_object(&body)?;
    let saved = app.state.upsert_payload(&body)?;
    info!(chat_id = %saved.chat_id, "client saved via API");
    Ok(Json(saved))
}

async fn handle_update_client(
    State(app): State<AppState>,
    Path(chat_id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<ClientConfig>, AppError> {
    require_object(&body)?;
    let saved = if app.state.find_client(&chat_id).is_some() {
        app.state.update_client(&chat_id, &body)?
    } else {
        let mut payload = body.as_object().cloned().unwrap_or_default();
        payload.insert("chat_id".into(), Value::String(chat_id));
        app.state.upsert_payload(&Value::Object(payload))?
    };
    Ok(Json(saved))
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
}

async fn handle_delete_client(
    State(app): State<AppState>,
    Path(chat_id): Path<String>,
) -> Result<Json<StatusResponse>, AppError> {
    app.state.delete_client(&chat_id)?;
    info!(chat_id = %chat_id, "client deleted via API");
    Ok(Json(StatusResponse { status: "deleted" }))
}

#[derive(Serialize)]
struct ActiveResponse {
    status: &'static str,
    active: bool,
}

fn set_active(app: &AppState, chat_id: &str, active: bool) -> Result<Json<ActiveResponse>, AppError> {
    let client = app.state.set_active(chat_id, active)?;
    Ok(Json(ActiveResponse {
        status: "ok",
        active: client.active,
    }))
}

async fn handle_pause(
    State(app): State<AppState>,
    Path(chat_id): Path<String>,
) -> Result<Json<ActiveResponse>, AppError> {
    set_active(&app, &chat_id, false)
}

async fn handle_resume(
    State(app): State<AppState>,
    Path(chat_id): Path<String>,
) -> Result<Json<ActiveResponse>, AppError> {
    set_active(&app, &chat_id, true)
}

// ============ POST /parse ============

#[derive(Deserialize)]
struct ParseRequest {
    #[serde(alias = "text")]
    message: String,
    #[serde(default)]
    locale: Option<String>,
}

async fn handle_parse(
    State(app): State<AppState>,
    Json(req): Json<ParseRequest>,
) -> Result<Json<ParseOutcome>, AppError> {
    if req.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }
    let outcome = app.parser.parse(&req.message, req.locale.as_deref()).await;
    Ok(Json(outcome))
}

// ============ GET /offers ============

#[derive(Deserialize)]
struct OffersQuery {
    chat_id: Option<String>,
}

async fn handle_offers(
    State(app): State<AppState>,
    Query(query): Query<OffersQuery>,
) -> Json<Value> {
    let offers = match query.chat_id.as_deref().filter(|id| !id.is_empty()) {
        Some(chat_id) => json!(app.state.offers_for(chat_id)),
        None => json!(app.state.all_offers()),
    };
    Json(json!({ "offers": offers }))
}

// ============ /engine ============

async fn handle_engine_start(State(app): State<AppState>) -> Json<StatusResponse> {
    let status = if app.engine.spawn() {
        info!("scan engine started via API");
        "started"
    } else {
        "already_running"
    };
    Json(StatusResponse { status })
}

async fn handle_engine_stop(State(app): State<AppState>) -> Json<StatusResponse> {
    app.state.set_running(false);
    info!("scan engine stop requested via API");
    Json(StatusResponse { status: "stopping" })
}

// ============ /api/preferences ============

#[derive(Serialize)]
struct LegacyResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl LegacyResponse {
    fn ok(data: Option<Value>) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}

async fn handle_list_preferences(State(app): State<AppState>) -> Json<LegacyResponse> {
    let data: Vec<Value> = app.state.clients().iter().map(client_to_preference).collect();
    LegacyResponse::ok(Some(Value::Array(data)))
}

async fn handle_create_preference(
    State(app): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<LegacyResponse>, AppError> {
    require_object(&body)?;
    let probe = preference_to_update(&body, None);
    let chat_id = probe
        .get("chat_id")
        .map(|v| match v {
            Value::String(s) => s.trim().to_string(),
            other => other.to_string(),
        })
        .filter(|id| !id.is_empty())
        .ok_or(RegistryError::MissingChatId)?;

    let existing = app.state.find_client(&chat_id);
    let update = preference_to_update(&body, existing.as_ref());
    let saved = app.state.upsert_payload(&update)?;
    Ok(LegacyResponse::ok(Some(client_to_preference(&saved))))
}

async fn handle_update_preference(
    State(app): State<AppState>,
    Path(index): Path<usize>,
    Json(body): Json<Value>,
) -> Result<Json<LegacyResponse>, AppError> {
    require_object(&body)?;
    let existing = app
        .state
        .clients()
        .into_iter()
        .nth(index)
        .ok_or(RegistryError::IndexOutOfRange(index))?;
    let mut update = preference_to_update(&body, Some(&existing));
    if let Some(map) = update.as_object_mut() {
        // Position addresses the profile; its chat id stays put.
        map.remove("chat_id");
    }
    let saved = app.state.update_at(index, &update)?;
    Ok(LegacyResponse::ok(Some(client_to_preference(&saved))))
}

async fn handle_delete_preference(
    State(app): State<AppState>,
    Path(index): Path<usize>,
) -> Result<Json<LegacyResponse>, AppError> {
    app.state.delete_at(index)?;
    Ok(LegacyResponse::ok(None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_errors_map_to_status() {
        let cases = [
            (RegistryError::MissingChatId, StatusCode::BAD_REQUEST),
            (RegistryError::ClientNotFound("1".into()), StatusCode::NOT_FOUND),
            (RegistryError::IndexOutOfRange(3), StatusCode::NOT_FOUND),
            (
                RegistryError::Persist(anyhow::anyhow!("disk full")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            let app_err = AppError::from(err);
            assert_eq!(app_err.status, status);
        }
    }

    #[test]
    fn test_require_object() {
        assert!(require_object(&json!({})).is_ok());
        let err = require_object(&json!([1])).unwrap_err();
        assert_eq!(err.code, "bad_request");
    }

    #[test]
    fn test_legacy_response_omits_missing_data() {
        let body = serde_json::to_value(LegacyResponse {
            success: true,
            data: None,
        })
        .unwrap();
        assert_eq!(body, json!({ "success": true }));
    }
}

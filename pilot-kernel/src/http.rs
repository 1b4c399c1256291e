/**
 * API REST PILOT - Serveur HTTP du kernel
 *
 * RÔLE :
 * Expose le registre d'interfaces et le coordinateur de cycle de vie aux
 * clients (console d'admin, scripts, supervision).
 *
 * FONCTIONNEMENT :
 * - Routes : /health, /system, /interfaces, /batch, /servers, /config
 * - Opérations unitaires : l'erreur métier devient un code HTTP
 *   (404 inconnue, 409 doublon ou transition interdite, 502 activation)
 * - Opérations batch : toujours 200, le détail est dans le rapport
 * - Chaque requête reçoit un token enfant du token d'arrêt du kernel
 *
 * SÉCURITÉ :
 * - Header x-api-key obligatoire sur toutes routes sauf /health
 * - Pas de clé configurée = tout refusé
 */

use crate::config::KernelConfig;
use crate::document::{interfaces_from_csv, interfaces_to_csv, ConfigurationDocument, DocumentError, DocumentFormat};
use crate::health::{HealthTracker, KernelHealth};
use crate::lifecycle::{BatchReport, LifecycleCoordinator};
use crate::models::{Interface, StatusTransition};
use crate::network::{check_server, PiServerConf, Reachability};
use crate::registry::{InterfaceError, InterfaceRegistry};
use axum::extract::{Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<InterfaceRegistry>,
    pub coordinator: Arc<LifecycleCoordinator>,
    pub health: HealthTracker,
    pub config: Arc<KernelConfig>,
    pub document: Arc<Mutex<ConfigurationDocument>>,
    pub api_key: Option<String>,
    pub shutdown: CancellationToken,
}

/// Erreur renvoyée au client sous la forme {"ok": false, "error": "..."}
#[derive(Debug)]
pub enum ApiError {
    Interface(InterfaceError),
    Document(DocumentError),
    BadRequest(String),
}

impl From<InterfaceError> for ApiError {
    fn from(e: InterfaceError) -> Self {
        ApiError::Interface(e)
    }
}

impl From<DocumentError> for ApiError {
    fn from(e: DocumentError) -> Self {
        ApiError::Document(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Interface(e) => match e {
                InterfaceError::NotFound(_) => StatusCode::NOT_FOUND,
                InterfaceError::DuplicateName(_) | InterfaceError::InvalidTransition { .. } => StatusCode::CONFLICT,
                InterfaceError::InvalidName(_) => StatusCode::BAD_REQUEST,
                InterfaceError::ActivationFailure { .. } => StatusCode::BAD_GATEWAY,
                InterfaceError::Cancelled(_) => StatusCode::SERVICE_UNAVAILABLE,
            },
            ApiError::Document(DocumentError::Io(_) | DocumentError::CsvWrite(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Document(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.status();
        let msg = match &self {
            ApiError::Interface(e) => e.to_string(),
            ApiError::Document(e) => e.to_string(),
            ApiError::BadRequest(m) => m.clone(),
        };
        (code, Json(json!({ "ok": false, "error": msg }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

async fn require_api_key(State(app): State<AppState>, req: Request, next: Next) -> Result<Response, StatusCode> {
    // Health check toujours accessible
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    let Some(expected) = app.api_key.as_deref().filter(|k| !k.is_empty()) else {
        warn!("PILOT_API_KEY not set - API access denied");
        return Err(StatusCode::UNAUTHORIZED);
    };

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected);

    if !ok {
        warn!(path = %req.uri().path(), "rejected request without valid api key");
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/interfaces", get(list_interfaces).post(create_interface))
        .route(
            "/interfaces/{name}",
            get(get_interface).put(update_interface).delete(delete_interface),
        )
        .route("/interfaces/{name}/start", post(start_interface))
        .route("/interfaces/{name}/stop", post(stop_interface))
        .route("/interfaces/{name}/restart", post(restart_interface))
        .route("/interfaces/{name}/refresh", post(refresh_interface))
        .route("/batch/start-all", post(start_all))
        .route("/batch/stop-all", post(stop_all))
        .route("/batch/refresh-all", post(refresh_all))
        .route("/servers/reachable", get(server_reachable))
        .route("/config/export", get(export_config))
        .route("/config/import", post(import_config))
        .route("/config/save", post(save_config))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_api_key))
        .with_state(app_state)
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.health.get_health(&app.registry))
}

// GET /interfaces
async fn list_interfaces(State(app): State<AppState>) -> Json<Vec<Interface>> {
    Json(app.registry.list())
}

// POST /interfaces
async fn create_interface(
    State(app): State<AppState>,
    Json(mut iface): Json<Interface>,
) -> ApiResult<(StatusCode, Json<Interface>)> {
    if iface.service_name.trim().is_empty() {
        iface.service_name = iface.name.clone();
    }
    let name = iface.name.clone();
    app.registry.register(iface)?;
    let created = app
        .registry
        .find(&name)
        .ok_or_else(|| InterfaceError::NotFound(name.clone()))?;
    Ok((StatusCode::CREATED, Json(created)))
}

// GET /interfaces/{name}
async fn get_interface(State(app): State<AppState>, Path(name): Path<String>) -> ApiResult<Json<Interface>> {
    let iface = app.registry.find(&name).ok_or(InterfaceError::NotFound(name))?;
    Ok(Json(iface))
}

// PUT /interfaces/{name} : le nom de l'URL fait foi
async fn update_interface(
    State(app): State<AppState>,
    Path(name): Path<String>,
    Json(mut iface): Json<Interface>,
) -> ApiResult<Json<Interface>> {
    if iface.name != name {
        return Err(ApiError::BadRequest(format!(
            "body name '{}' does not match '{}'",
            iface.name, name
        )));
    }
    if iface.service_name.trim().is_empty() {
        iface.service_name = iface.name.clone();
    }
    Ok(Json(app.registry.update(iface)?))
}

// DELETE /interfaces/{name}
async fn delete_interface(State(app): State<AppState>, Path(name): Path<String>) -> ApiResult<Json<Interface>> {
    let removed = app.registry.deregister(&name).ok_or(InterfaceError::NotFound(name))?;
    Ok(Json(removed))
}

// POST /interfaces/{name}/start
async fn start_interface(State(app): State<AppState>, Path(name): Path<String>) -> ApiResult<Json<StatusTransition>> {
    let cancel = app.shutdown.child_token();
    Ok(Json(app.coordinator.start(&name, &cancel).await?))
}

// POST /interfaces/{name}/stop
async fn stop_interface(State(app): State<AppState>, Path(name): Path<String>) -> ApiResult<Json<StatusTransition>> {
    let cancel = app.shutdown.child_token();
    Ok(Json(app.coordinator.stop(&name, &cancel).await?))
}

// POST /interfaces/{name}/restart
async fn restart_interface(
    State(app): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<StatusTransition>> {
    let cancel = app.shutdown.child_token();
    Ok(Json(app.coordinator.restart(&name, &cancel).await?))
}

// POST /interfaces/{name}/refresh
async fn refresh_interface(
    State(app): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let cancel = app.shutdown.child_token();
    let transition = app.coordinator.refresh_status(&name, &cancel).await?;
    let status = app.registry.find(&name).map(|i| i.status);
    Ok(Json(json!({ "ok": true, "status": status, "transition": transition })))
}

// POST /batch/start-all
async fn start_all(State(app): State<AppState>) -> Json<BatchReport> {
    let cancel = app.shutdown.child_token();
    Json(app.coordinator.start_all(&cancel).await)
}

// POST /batch/stop-all
async fn stop_all(State(app): State<AppState>) -> Json<BatchReport> {
    let cancel = app.shutdown.child_token();
    Json(app.coordinator.stop_all(&cancel).await)
}

// POST /batch/refresh-all
async fn refresh_all(State(app): State<AppState>) -> Json<serde_json::Value> {
    let cancel = app.shutdown.child_token();
    let changed = app.coordinator.refresh_all_statuses(&cancel).await;
    Json(json!({ "ok": true, "changed": changed }))
}

#[derive(Debug, Deserialize)]
struct ReachParams {
    host: Option<String>,
    port: Option<u16>,
}

// GET /servers/reachable?host=&port=  (défaut : serveur PI de kernel.yaml)
async fn server_reachable(State(app): State<AppState>, Query(params): Query<ReachParams>) -> Json<Reachability> {
    let defaults = &app.config.pi_server;
    let target = PiServerConf {
        host: params.host.unwrap_or_else(|| defaults.host.clone()),
        port: params.port.unwrap_or(defaults.port),
        timeout_ms: defaults.timeout_ms,
    };
    Json(check_server(&target).await)
}

#[derive(Debug, Deserialize)]
struct FormatParams {
    format: Option<String>,
}

impl FormatParams {
    fn format(&self) -> ApiResult<DocumentFormat> {
        match &self.format {
            Some(f) => Ok(f.parse()?),
            None => Ok(DocumentFormat::Json),
        }
    }
}

// GET /config/export?format=json|csv|xml
async fn export_config(State(app): State<AppState>, Query(params): Query<FormatParams>) -> ApiResult<Response> {
    let format = params.format()?;
    let body = match format {
        DocumentFormat::Json => app.document.lock().snapshot(&app.registry).to_json()?,
        DocumentFormat::Xml => app.document.lock().snapshot(&app.registry).to_xml()?,
        DocumentFormat::Csv => interfaces_to_csv(&app.registry.list())?,
    };
    Ok(([(header::CONTENT_TYPE, format.content_type())], body).into_response())
}

// POST /config/import?format=json|csv|xml : remplace la liste des interfaces
async fn import_config(
    State(app): State<AppState>,
    Query(params): Query<FormatParams>,
    body: String,
) -> ApiResult<Json<serde_json::Value>> {
    let format = params.format()?;
    let interfaces = match format {
        DocumentFormat::Json | DocumentFormat::Xml => {
            let doc = if format == DocumentFormat::Xml {
                ConfigurationDocument::from_xml(&body)?
            } else {
                ConfigurationDocument::from_json(&body)?
            };
            let count = app.registry.replace_all(doc.interfaces.clone())?;
            *app.document.lock() = doc;
            count
        }
        DocumentFormat::Csv => app.registry.replace_all(interfaces_from_csv(&body)?)?,
    };

    // les états importés ne sont qu'indicatifs : on relit les services
    let cancel = app.shutdown.child_token();
    let changed = app.coordinator.refresh_all_statuses(&cancel).await;
    info!(%format, interfaces, changed, "configuration imported");
    Ok(Json(json!({ "ok": true, "imported": interfaces, "changed": changed })))
}

// POST /config/save
async fn save_config(State(app): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let doc = app.document.lock().snapshot(&app.registry);
    doc.save(&app.config.data_file).await?;
    Ok(Json(json!({
        "ok": true,
        "path": app.config.data_file.display().to_string(),
        "interfaces": doc.interfaces.len(),
    })))
}

//! REST API Handlers
//!
//! Implements the REST endpoints for LUN provisioning, volume group and
//! logical volume management, and initiator ACLs.

use crate::controlplane::Orchestrator;
use crate::domain::ports::{
    AclEntry, BackendInfo, DeviceCandidate, LogicalVolume, LogicalVolumeCreateRequest, Lun,
    LunCreateRequest, VolumeGroup, VolumeGroupCreateRequest, VolumeGroupRegistry,
};
use crate::error::{Error, ErrorClass};
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

// =============================================================================
// Request/Response Types
// =============================================================================

/// LUN resize request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResizeRequest {
    pub size_gb: f64,
}

/// Map a LUN into an ACL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapLunRequest {
    pub lun: u32,
    /// Number the initiator sees, defaults to `lun`
    #[serde(default)]
    pub mapped_lun: Option<u32>,
}

/// ACL creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AclCreateRequest {
    pub initiator: String,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Orchestrator error rendered as an HTTP response
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

/// HTTP status for an error class
pub fn status_for(class: ErrorClass) -> StatusCode {
    match class {
        ErrorClass::Validation => StatusCode::BAD_REQUEST,
        ErrorClass::NotFound => StatusCode::NOT_FOUND,
        ErrorClass::ResourceExhausted => StatusCode::INSUFFICIENT_STORAGE,
        ErrorClass::External => StatusCode::BAD_GATEWAY,
        ErrorClass::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let class = self.0.class();
        let status = status_for(class);
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            warn!("Request rejected: {}", self.0);
        }

        let details = match &self.0 {
            Error::CommandFailed { output, .. } if !output.is_empty() => Some(output.clone()),
            _ => None,
        };
        (
            status,
            Json(ApiErrorResponse {
                error: class.as_str().to_string(),
                message: self.0.to_string(),
                details,
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

fn lun_not_found(number: u32) -> ApiError {
    ApiError(Error::not_found("Lun", number.to_string()))
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    orchestrator: Arc<Orchestrator>,
}

impl RestRouter {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            orchestrator: self.orchestrator,
        };

        Router::new()
            // Backends
            .route("/v1/backends", get(list_backends))
            // LUNs
            .route("/v1/luns", get(list_luns).post(create_lun))
            .route("/v1/luns/:number", get(get_lun).delete(delete_lun))
            .route("/v1/luns/:number/resize", post(resize_lun))
            .route("/v1/luns/:number/acls", get(lun_acls))
            // Volume groups
            .route(
                "/v1/volume-groups",
                get(list_volume_groups).post(create_volume_group),
            )
            .route(
                "/v1/volume-groups/:name",
                get(get_volume_group).delete(delete_volume_group),
            )
            .route("/v1/devices/available", get(available_devices))
            // Logical volumes
            .route(
                "/v1/logical-volumes",
                get(list_logical_volumes).post(create_logical_volume),
            )
            .route(
                "/v1/logical-volumes/:vg/:name",
                delete(delete_logical_volume),
            )
            // ACLs
            .route("/v1/acls", get(list_acls).post(create_acl))
            .route("/v1/acls/:initiator", get(get_acl).delete(delete_acl))
            .route("/v1/acls/:initiator/luns", post(map_lun))
            .route("/v1/acls/:initiator/luns/:mapped_lun", delete(unmap_lun))
            // Status
            .route("/v1/status", get(status))
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
}

// =============================================================================
// LUN Handlers
// =============================================================================

async fn list_backends(State(state): State<AppState>) -> Json<Vec<BackendInfo>> {
    Json(state.orchestrator.list_backends().await)
}

async fn list_luns(State(state): State<AppState>) -> ApiResult<Json<Vec<Lun>>> {
    Ok(Json(state.orchestrator.list_luns().await?))
}

async fn create_lun(
    State(state): State<AppState>,
    Json(request): Json<LunCreateRequest>,
) -> ApiResult<(StatusCode, Json<Lun>)> {
    info!("REST create LUN '{}'", request.name);
    let lun = state.orchestrator.create_lun(request).await?;
    Ok((StatusCode::CREATED, Json(lun)))
}

async fn get_lun(
    State(state): State<AppState>,
    Path(number): Path<u32>,
) -> ApiResult<Json<Lun>> {
    state
        .orchestrator
        .get_lun(number)
        .await?
        .map(Json)
        .ok_or_else(|| lun_not_found(number))
}

async fn delete_lun(
    State(state): State<AppState>,
    Path(number): Path<u32>,
) -> ApiResult<StatusCode> {
    state.orchestrator.delete_lun(number).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn resize_lun(
    State(state): State<AppState>,
    Path(number): Path<u32>,
    Json(request): Json<ResizeRequest>,
) -> ApiResult<Json<Lun>> {
    Ok(Json(
        state.orchestrator.resize_lun(number, request.size_gb).await?,
    ))
}

async fn lun_acls(
    State(state): State<AppState>,
    Path(number): Path<u32>,
) -> ApiResult<Json<Vec<AclEntry>>> {
    Ok(Json(state.orchestrator.acls().acls_for_lun(number).await?))
}

// =============================================================================
// Volume Handlers
// =============================================================================

async fn list_volume_groups(State(state): State<AppState>) -> ApiResult<Json<Vec<VolumeGroup>>> {
    Ok(Json(state.orchestrator.lvm().list_volume_groups().await?))
}

async fn create_volume_group(
    State(state): State<AppState>,
    Json(request): Json<VolumeGroupCreateRequest>,
) -> ApiResult<(StatusCode, Json<VolumeGroup>)> {
    let vg = state.orchestrator.lvm().create_volume_group(&request).await?;
    Ok((StatusCode::CREATED, Json(vg)))
}

async fn get_volume_group(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<VolumeGroup>> {
    let lvm = state.orchestrator.lvm();
    let visible = lvm
        .list_volume_groups()
        .await?
        .into_iter()
        .find(|vg| vg.name == name);
    visible
        .map(Json)
        .ok_or_else(|| ApiError(Error::not_found("VolumeGroup", name)))
}

async fn delete_volume_group(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    state.orchestrator.lvm().delete_volume_group(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn available_devices(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<DeviceCandidate>>> {
    Ok(Json(state.orchestrator.lvm().available_devices().await?))
}

async fn list_logical_volumes(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<LogicalVolume>>> {
    Ok(Json(state.orchestrator.lvm().list_logical_volumes().await?))
}

async fn create_logical_volume(
    State(state): State<AppState>,
    Json(request): Json<LogicalVolumeCreateRequest>,
) -> ApiResult<(StatusCode, Json<LogicalVolume>)> {
    let lv = state
        .orchestrator
        .lvm()
        .create_logical_volume(&request)
        .await?;
    Ok((StatusCode::CREATED, Json(lv)))
}

async fn delete_logical_volume(
    State(state): State<AppState>,
    Path((vg, name)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    state
        .orchestrator
        .lvm()
        .delete_logical_volume(&vg, &name)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// ACL Handlers
// =============================================================================

async fn list_acls(State(state): State<AppState>) -> ApiResult<Json<Vec<AclEntry>>> {
    Ok(Json(state.orchestrator.acls().list_acls().await?))
}

async fn create_acl(
    State(state): State<AppState>,
    Json(request): Json<AclCreateRequest>,
) -> ApiResult<(StatusCode, Json<AclEntry>)> {
    let acl = state.orchestrator.acls().create_acl(&request.initiator).await?;
    Ok((StatusCode::CREATED, Json(acl)))
}

async fn get_acl(
    State(state): State<AppState>,
    Path(initiator): Path<String>,
) -> ApiResult<Json<AclEntry>> {
    state
        .orchestrator
        .acls()
        .acl(&initiator)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError(Error::not_found("Acl", initiator)))
}

async fn delete_acl(
    State(state): State<AppState>,
    Path(initiator): Path<String>,
) -> ApiResult<StatusCode> {
    state.orchestrator.acls().delete_acl(&initiator).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn map_lun(
    State(state): State<AppState>,
    Path(initiator): Path<String>,
    Json(request): Json<MapLunRequest>,
) -> ApiResult<StatusCode> {
    state
        .orchestrator
        .acls()
        .map_lun(&initiator, request.lun, request.mapped_lun)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unmap_lun(
    State(state): State<AppState>,
    Path((initiator, mapped_lun)): Path<(String, u32)>,
) -> ApiResult<StatusCode> {
    state
        .orchestrator
        .acls()
        .unmap_lun(&initiator, mapped_lun)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Health
// =============================================================================

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.status().await)
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Ready once the target exists
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.orchestrator.status().await.target_ready {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "target not configured")
    }
}

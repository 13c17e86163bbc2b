// src/server/mod.rs

//! The monitor's HTTP surface: a thin `axum` JSON layer over `MonitorApi`,
//! in the same spirit as the teacher's Prometheus endpoint in
//! `metrics_server.rs` — one small `Router`, handlers that borrow shared
//! state via `Arc`, errors mapped to HTTP status codes at the boundary.

use crate::core::api::MonitorApi;
use crate::core::errors::MonitorError;
use crate::core::model::{Health, Node, ReplicationState, SyncState};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

/// Shared application state handed to every handler.
pub type AppState = Arc<MonitorApi>;

/// Maps `MonitorError` onto the external interface's status-code table:
/// `not_found -> 404`, `conflict -> 409`, `invalid_state -> 409`,
/// `bad_request -> 400`, `internal -> 500`.
struct ApiError(MonitorError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            MonitorError::NotFound(_) => StatusCode::NOT_FOUND,
            MonitorError::Conflict(_) => StatusCode::CONFLICT,
            MonitorError::InvalidState(_) => StatusCode::CONFLICT,
            MonitorError::BadRequest(_) => StatusCode::BAD_REQUEST,
            MonitorError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(ErrorBody {
            code: self.0.code(),
            message: self.0.to_string(),
        });
        (status, body).into_response()
    }
}

impl From<MonitorError> for ApiError {
    fn from(e: MonitorError) -> Self {
        ApiError(e)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

/// The wire shape of a `Node`. `Node` itself carries `Instant` fields for
/// internal bookkeeping, which have no meaningful JSON representation, so
/// responses go through this view instead of deriving `Serialize` on
/// `Node` directly.
#[derive(Serialize)]
struct NodeResponse {
    node_id: i64,
    node_name: String,
    node_host: String,
    node_port: u16,
    formation_id: String,
    group_id: i32,
    reported_state: ReplicationState,
    goal_state: ReplicationState,
    reported_lsn: u64,
    pgsr_sync_state: SyncState,
    candidate_priority: u8,
    replication_quorum: bool,
    health: Health,
    pg_is_running: bool,
    has_converged: bool,
}

impl From<Node> for NodeResponse {
    fn from(n: Node) -> Self {
        NodeResponse {
            node_id: n.node_id,
            node_name: n.node_name,
            node_host: n.node_host,
            node_port: n.node_port,
            formation_id: n.formation_id,
            group_id: n.group_id,
            reported_state: n.reported_state,
            goal_state: n.goal_state,
            reported_lsn: n.reported_lsn,
            pgsr_sync_state: n.pgsr_sync_state,
            candidate_priority: n.candidate_priority,
            replication_quorum: n.replication_quorum,
            health: n.health,
            pg_is_running: n.pg_is_running,
            has_converged: n.has_converged(),
        }
    }
}

#[derive(Deserialize)]
struct RegisterNodeRequest {
    group_id: i32,
    node_name: String,
    node_host: String,
    node_port: u16,
    #[serde(default = "default_candidate_priority")]
    candidate_priority: u8,
    #[serde(default = "default_true")]
    replication_quorum: bool,
}

fn default_candidate_priority() -> u8 {
    100
}
fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
struct NodeActiveRequest {
    reported_state: ReplicationState,
    reported_lsn: u64,
    #[serde(default)]
    pgsr_sync_state: SyncState,
    #[serde(default)]
    health: Health,
    pg_is_running: bool,
}

#[derive(Deserialize)]
struct ReplicationSettingsRequest {
    number_sync_standbys: u32,
}

#[derive(Deserialize)]
struct CandidatePriorityRequest {
    candidate_priority: u8,
}

#[derive(Deserialize)]
struct ReplicationQuorumRequest {
    replication_quorum: bool,
}

async fn register_node(
    State(api): State<AppState>,
    Path(formation_id): Path<String>,
    Json(req): Json<RegisterNodeRequest>,
) -> Result<(StatusCode, Json<NodeResponse>), ApiError> {
    let node = api.register_node(
        &formation_id,
        req.group_id,
        &req.node_name,
        &req.node_host,
        req.node_port,
        req.candidate_priority,
        req.replication_quorum,
    )?;
    Ok((StatusCode::CREATED, Json(node.into())))
}

async fn node_active(
    State(api): State<AppState>,
    Path(node_id): Path<i64>,
    Json(req): Json<NodeActiveRequest>,
) -> Result<Json<NodeResponse>, ApiError> {
    let node = api.node_active(
        node_id,
        req.reported_state,
        req.reported_lsn,
        req.pgsr_sync_state,
        req.health,
        req.pg_is_running,
    )?;
    Ok(Json(node.into()))
}

async fn remove_node(State(api): State<AppState>, Path(node_id): Path<i64>) -> Result<StatusCode, ApiError> {
    api.remove_node(node_id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_replication_settings(
    State(api): State<AppState>,
    Path(formation_id): Path<String>,
    Json(req): Json<ReplicationSettingsRequest>,
) -> Result<Json<crate::core::model::Formation>, ApiError> {
    let formation = api.set_replication_settings(&formation_id, req.number_sync_standbys)?;
    Ok(Json(formation))
}

async fn set_node_candidate_priority(
    State(api): State<AppState>,
    Path(node_id): Path<i64>,
    Json(req): Json<CandidatePriorityRequest>,
) -> Result<Json<NodeResponse>, ApiError> {
    let node = api.set_node_candidate_priority(node_id, req.candidate_priority)?;
    Ok(Json(node.into()))
}

async fn set_node_replication_quorum(
    State(api): State<AppState>,
    Path(node_id): Path<i64>,
    Json(req): Json<ReplicationQuorumRequest>,
) -> Result<Json<NodeResponse>, ApiError> {
    let node = api.set_node_replication_quorum(node_id, req.replication_quorum)?;
    Ok(Json(node.into()))
}

async fn perform_failover(
    State(api): State<AppState>,
    Path((formation_id, group_id)): Path<(String, i32)>,
) -> Result<Json<NodeResponse>, ApiError> {
    let node = api.perform_failover(&formation_id, group_id)?;
    Ok(Json(node.into()))
}

async fn get_node_state(State(api): State<AppState>, Path(node_id): Path<i64>) -> Result<Json<NodeResponse>, ApiError> {
    let node = api.get_node_state(node_id)?;
    Ok(Json(node.into()))
}

async fn get_nodes(
    State(api): State<AppState>,
    Path((formation_id, group_id)): Path<(String, i32)>,
) -> Result<Json<Vec<NodeResponse>>, ApiError> {
    let nodes = api.get_nodes(&formation_id, group_id)?;
    Ok(Json(nodes.into_iter().map(NodeResponse::from).collect()))
}

/// Builds the router exposing the nine agent-facing endpoints.
pub fn router(api: AppState) -> Router {
    Router::new()
        .route("/formations/{formation_id}/nodes", post(register_node))
        .route("/nodes/{node_id}/active", post(node_active))
        .route("/nodes/{node_id}", get(get_node_state).delete(remove_node))
        .route(
            "/formations/{formation_id}/replication-settings",
            put(set_replication_settings),
        )
        .route("/nodes/{node_id}/candidate-priority", put(set_node_candidate_priority))
        .route("/nodes/{node_id}/replication-quorum", put(set_node_replication_quorum))
        .route(
            "/formations/{formation_id}/groups/{group_id}/failover",
            post(perform_failover),
        )
        .route("/formations/{formation_id}/groups/{group_id}/nodes", get(get_nodes))
        .with_state(api)
}

/// Binds and serves the HTTP API until the process is killed.
pub async fn run(host: &str, port: u16, api: AppState) -> anyhow::Result<()> {
    let app = router(api);
    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    info!("monitor HTTP API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await.map_err(|e| {
        error!("monitor HTTP server error: {e}");
        anyhow::anyhow!(e)
    })
}

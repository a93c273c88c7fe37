use super::protocol::*;
use super::service::Peer;

use axum::{
    Extension, Json, Router,
    http::StatusCode,
    routing::{get, post},
};
use std::path::Path;
use std::sync::Arc;

/// Routes of the administrative surface, bound to one peer.
pub fn admin_router(peer: Arc<Peer>) -> Router {
    Router::new()
        .route(ENDPOINT_BACKUP, post(handle_backup))
        .route(ENDPOINT_RESTORE, post(handle_restore))
        .route(ENDPOINT_DELETE, post(handle_delete))
        .route(ENDPOINT_RECLAIM, post(handle_reclaim))
        .route(ENDPOINT_STATE, get(handle_state))
        .layer(Extension(peer))
}

pub async fn handle_backup(
    Extension(peer): Extension<Arc<Peer>>,
    Json(req): Json<BackupRequest>,
) -> (StatusCode, Json<CommandResponse>) {
    match peer
        .backup(Path::new(&req.path), req.replication_degree)
        .await
    {
        Ok(true) => (StatusCode::OK, Json(CommandResponse::ok(None))),
        Ok(false) => (
            StatusCode::OK,
            Json(CommandResponse::failed("replication degree not reached")),
        ),
        Err(e) => {
            tracing::error!("Backup of {} failed: {}", req.path, e);
            (StatusCode::INTERNAL_SERVER_ERROR, Json(CommandResponse::failed(e)))
        }
    }
}

pub async fn handle_restore(
    Extension(peer): Extension<Arc<Peer>>,
    Json(req): Json<PathRequest>,
) -> (StatusCode, Json<CommandResponse>) {
    match peer.restore(Path::new(&req.path)).await {
        Ok(restored) => (
            StatusCode::OK,
            Json(CommandResponse::ok(Some(restored.display().to_string()))),
        ),
        Err(e) => {
            tracing::error!("Restore of {} failed: {}", req.path, e);
            (StatusCode::INTERNAL_SERVER_ERROR, Json(CommandResponse::failed(e)))
        }
    }
}

pub async fn handle_delete(
    Extension(peer): Extension<Arc<Peer>>,
    Json(req): Json<PathRequest>,
) -> (StatusCode, Json<CommandResponse>) {
    match peer.delete(Path::new(&req.path)).await {
        Ok(()) => (StatusCode::OK, Json(CommandResponse::ok(None))),
        Err(e) => {
            tracing::error!("Delete of {} failed: {}", req.path, e);
            (StatusCode::INTERNAL_SERVER_ERROR, Json(CommandResponse::failed(e)))
        }
    }
}

pub async fn handle_reclaim(
    Extension(peer): Extension<Arc<Peer>>,
    Json(req): Json<ReclaimRequest>,
) -> (StatusCode, Json<CommandResponse>) {
    match peer.reclaim(req.max_bytes).await {
        Ok(evicted) => (
            StatusCode::OK,
            Json(CommandResponse::ok(Some(format!("{} chunks evicted", evicted.len())))),
        ),
        Err(e) => {
            tracing::error!("Reclaim failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, Json(CommandResponse::failed(e)))
        }
    }
}

pub async fn handle_state(Extension(peer): Extension<Arc<Peer>>) -> (StatusCode, Json<StateResponse>) {
    let state = peer.state().await;
    (StatusCode::OK, Json(StateResponse { state }))
}

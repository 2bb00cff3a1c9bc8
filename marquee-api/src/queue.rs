use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use marquee_core::TokenStatus;
use marquee_queue::QueueStatus;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/queue", post(join_queue))
        .route("/queue/{token_id}", get(queue_status))
}

// ===== Request/Response Types =====

#[derive(Debug, Deserialize)]
pub struct JoinQueueRequest {
    pub user_id: String,
    pub event_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct QueueStatusResponse {
    pub token_id: Uuid,
    pub status: TokenStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<i64>,
    pub expires_at: DateTime<Utc>,
}

impl From<QueueStatus> for QueueStatusResponse {
    fn from(status: QueueStatus) -> Self {
        match status {
            QueueStatus::Active { token } => Self {
                token_id: token.token_id,
                status: token.status,
                position: None,
                eta_seconds: None,
                expires_at: token.expires_at,
            },
            QueueStatus::Waiting {
                token,
                position,
                eta,
            } => Self {
                token_id: token.token_id,
                status: token.status,
                position: Some(position),
                eta_seconds: Some(eta.num_seconds()),
                expires_at: token.expires_at,
            },
        }
    }
}

// ===== Handlers =====

/// POST /queue
async fn join_queue(
    State(state): State<AppState>,
    Json(req): Json<JoinQueueRequest>,
) -> ApiResult<Json<QueueStatusResponse>> {
    if req.user_id.trim().is_empty() {
        return Err(ApiError::Validation("user_id must not be empty".into()));
    }

    let status = state.queue.enqueue(&req.user_id, req.event_id).await?;
    state.metrics.queue_joins.inc();
    Ok(Json(status.into()))
}

/// GET /queue/{token_id}
async fn queue_status(
    State(state): State<AppState>,
    Path(token_id): Path<Uuid>,
) -> ApiResult<Json<QueueStatusResponse>> {
    let status = state.queue.status(token_id).await?;
    Ok(Json(status.into()))
}

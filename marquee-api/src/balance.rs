use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use marquee_core::Balance;

use crate::error::ApiResult;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/balance/{user_id}", get(get_balance))
        .route("/balance/{user_id}/charge", post(charge_balance))
}

// ===== Request/Response Types =====

#[derive(Debug, Deserialize)]
pub struct ChargeRequest {
    pub amount: i64,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub user_id: String,
    pub amount: i64,
    pub version: u64,
}

impl From<Balance> for BalanceResponse {
    fn from(b: Balance) -> Self {
        Self {
            user_id: b.user_id,
            amount: b.amount,
            version: b.version,
        }
    }
}

// ===== Handlers =====

/// GET /balance/{user_id}
async fn get_balance(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<BalanceResponse>> {
    let balance = state.payments.balance_of(&user_id).await?;
    Ok(Json(balance.into()))
}

/// POST /balance/{user_id}/charge
async fn charge_balance(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(req): Json<ChargeRequest>,
) -> ApiResult<Json<BalanceResponse>> {
    let balance = state.payments.charge(&user_id, req.amount).await?;
    Ok(Json(balance.into()))
}

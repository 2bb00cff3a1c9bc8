use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use marquee_booking::SettleResult;
use marquee_core::{BookingError, Receipt, SeatEvent, SeatEventKind};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/payments", post(settle_payment))
        .route("/payments/{reservation_id}", get(get_receipt))
}

// ===== Request/Response Types =====

#[derive(Debug, Deserialize)]
pub struct SettlePaymentRequest {
    pub reservation_id: Uuid,
    pub user_id: String,
    pub amount: i64,
}

#[derive(Debug, Deserialize)]
pub struct PayerQuery {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct ReceiptResponse {
    pub receipt_id: Uuid,
    pub reservation_id: Uuid,
    pub user_id: String,
    pub amount: i64,
    pub balance_after: i64,
    pub settled_at: DateTime<Utc>,
    pub duplicate: bool,
}

impl ReceiptResponse {
    fn from_receipt(receipt: Receipt, duplicate: bool) -> Self {
        Self {
            receipt_id: receipt.receipt_id,
            reservation_id: receipt.reservation_id,
            user_id: receipt.user_id,
            amount: receipt.amount,
            balance_after: receipt.balance_after,
            settled_at: receipt.settled_at,
            duplicate,
        }
    }
}

// ===== Handlers =====

/// POST /payments
async fn settle_payment(
    State(state): State<AppState>,
    Json(req): Json<SettlePaymentRequest>,
) -> ApiResult<Json<ReceiptResponse>> {
    if req.user_id.trim().is_empty() {
        return Err(ApiError::Validation("user_id must not be empty".into()));
    }

    match state
        .payments
        .settle(req.reservation_id, &req.user_id, req.amount)
        .await
    {
        Ok(SettleResult::Settled(receipt)) => {
            state.metrics.payments_settled.inc();
            // The settle destroyed the hold's claim ticket; the seat event
            // needs the seat number, so read the confirmed reservation back.
            if let Ok(Some(reservation)) = state.store.get_reservation(req.reservation_id).await {
                let _ = state.seat_tx.send(SeatEvent::new(
                    reservation.event_id,
                    reservation.seat_number,
                    SeatEventKind::Sold,
                    reservation.reservation_id,
                ));
            }
            Ok(Json(ReceiptResponse::from_receipt(receipt, false)))
        }
        Ok(SettleResult::Duplicate(receipt)) => {
            Ok(Json(ReceiptResponse::from_receipt(receipt, true)))
        }
        Err(e) => {
            if matches!(e, BookingError::InsufficientBalance { .. }) {
                state.metrics.payments_rejected.inc();
            }
            Err(e.into())
        }
    }
}

/// GET /payments/{reservation_id}?user_id=...
async fn get_receipt(
    State(state): State<AppState>,
    Path(reservation_id): Path<Uuid>,
    Query(payer): Query<PayerQuery>,
) -> ApiResult<Json<ReceiptResponse>> {
    let receipt = state
        .payments
        .receipt_of(reservation_id, &payer.user_id)
        .await?;
    Ok(Json(ReceiptResponse::from_receipt(receipt, false)))
}

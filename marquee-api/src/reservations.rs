use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use marquee_core::{BookingError, Reservation, ReservationStatus, SeatEvent, SeatEventKind};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/reservations", post(create_reservation))
        .route("/reservations/{reservation_id}", get(get_reservation))
        .route(
            "/reservations/{reservation_id}/cancel",
            post(cancel_reservation),
        )
}

// ===== Request/Response Types =====

#[derive(Debug, Deserialize)]
pub struct CreateReservationRequest {
    pub event_id: Uuid,
    pub seat_number: u32,
}

#[derive(Debug, Deserialize)]
pub struct CancelReservationRequest {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct OwnerQuery {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct ReservationResponse {
    pub reservation_id: Uuid,
    pub event_id: Uuid,
    pub seat_number: u32,
    pub status: ReservationStatus,
    pub held_at: DateTime<Utc>,
    pub hold_expires_at: DateTime<Utc>,
}

impl From<Reservation> for ReservationResponse {
    fn from(r: Reservation) -> Self {
        Self {
            reservation_id: r.reservation_id,
            event_id: r.event_id,
            seat_number: r.seat_number,
            status: r.status,
            held_at: r.held_at,
            hold_expires_at: r.hold_expires_at,
        }
    }
}

/// The bearer token on reservation calls is the queue token id issued by
/// POST /queue. No header means the caller skipped the waiting room.
fn bearer_token(bearer: Option<TypedHeader<Authorization<Bearer>>>) -> ApiResult<Uuid> {
    let TypedHeader(auth) = bearer.ok_or(ApiError::Booking(BookingError::AdmissionRequired))?;
    Uuid::parse_str(auth.token())
        .map_err(|_| ApiError::Validation("bearer token must be a queue token id".into()))
}

// ===== Handlers =====

/// POST /reservations
async fn create_reservation(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    Json(req): Json<CreateReservationRequest>,
) -> ApiResult<Json<ReservationResponse>> {
    let token_id = bearer_token(bearer)?;
    let token = state
        .store
        .get_token(token_id)
        .await?
        .ok_or(BookingError::TokenNotFound(token_id))?;

    match state
        .locks
        .hold(token_id, &token.user_id, req.event_id, req.seat_number)
        .await
    {
        Ok(reservation) => {
            state.metrics.holds_acquired.inc();
            let _ = state.seat_tx.send(SeatEvent::new(
                reservation.event_id,
                reservation.seat_number,
                SeatEventKind::Held,
                reservation.reservation_id,
            ));
            Ok(Json(reservation.into()))
        }
        Err(e) => {
            if matches!(e, BookingError::SeatUnavailable { .. }) {
                state.metrics.holds_rejected.inc();
            }
            Err(e.into())
        }
    }
}

/// GET /reservations/{reservation_id}?user_id=...
async fn get_reservation(
    State(state): State<AppState>,
    Path(reservation_id): Path<Uuid>,
    Query(owner): Query<OwnerQuery>,
) -> ApiResult<Json<ReservationResponse>> {
    let reservation = state.locks.get(reservation_id, &owner.user_id).await?;
    Ok(Json(reservation.into()))
}

/// POST /reservations/{reservation_id}/cancel
async fn cancel_reservation(
    State(state): State<AppState>,
    Path(reservation_id): Path<Uuid>,
    Json(req): Json<CancelReservationRequest>,
) -> ApiResult<Json<ReservationResponse>> {
    if req.user_id.trim().is_empty() {
        return Err(ApiError::Validation("user_id must not be empty".into()));
    }

    let reservation = state.locks.cancel(reservation_id, &req.user_id).await?;
    if reservation.status == ReservationStatus::Cancelled {
        let _ = state.seat_tx.send(SeatEvent::new(
            reservation.event_id,
            reservation.seat_number,
            SeatEventKind::Released,
            reservation.reservation_id,
        ));
    }
    Ok(Json(reservation.into()))
}

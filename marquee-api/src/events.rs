use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use marquee_core::{EventRecord, SeatStatus};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/events", post(create_event))
        .route("/events/{event_id}/seats", get(list_seats))
}

// ===== Request/Response Types =====

#[derive(Debug, Deserialize)]
pub struct CreateEventRequest {
    pub name: Option<String>,
    #[serde(default = "default_seat_count")]
    pub seat_count: u32,
    #[serde(default = "default_price")]
    pub price: i64,
}

fn default_seat_count() -> u32 {
    50
}

fn default_price() -> i64 {
    150_000
}

#[derive(Debug, Serialize)]
pub struct EventResponse {
    pub event_id: Uuid,
    pub name: String,
    pub seat_count: u32,
    pub price: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct SeatResponse {
    pub seat_number: u32,
    pub status: SeatStatus,
    pub price: i64,
}

#[derive(Debug, Serialize)]
pub struct SeatListResponse {
    pub event_id: Uuid,
    pub seats: Vec<SeatResponse>,
}

// ===== Handlers =====

/// POST /events
async fn create_event(
    State(state): State<AppState>,
    Json(req): Json<CreateEventRequest>,
) -> ApiResult<Json<EventResponse>> {
    if req.seat_count == 0 || req.seat_count > 10_000 {
        return Err(ApiError::Validation(
            "seat_count must be between 1 and 10000".into(),
        ));
    }
    if req.price <= 0 {
        return Err(ApiError::Validation("price must be positive".into()));
    }

    let event_id = Uuid::new_v4();
    let record = EventRecord {
        event_id,
        name: req.name.unwrap_or_else(|| format!("Event {event_id}")),
        seat_count: req.seat_count,
        price: req.price,
        created_at: Utc::now(),
    };
    state.store.create_event(&record).await?;
    tracing::info!(event_id = %event_id, seats = record.seat_count, "event created");

    Ok(Json(EventResponse {
        event_id: record.event_id,
        name: record.name,
        seat_count: record.seat_count,
        price: record.price,
        created_at: record.created_at,
    }))
}

/// GET /events/{event_id}/seats
async fn list_seats(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> ApiResult<Json<SeatListResponse>> {
    if state.store.get_event(event_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("event {event_id} not found")));
    }

    let mut seats = state.store.list_seats(event_id).await?;
    seats.sort_by_key(|s| s.seat_number);

    Ok(Json(SeatListResponse {
        event_id,
        seats: seats
            .into_iter()
            .map(|s| SeatResponse {
                seat_number: s.seat_number,
                status: s.status,
                price: s.price,
            })
            .collect(),
    }))
}

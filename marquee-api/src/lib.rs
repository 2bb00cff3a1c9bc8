//! HTTP surface of the marquee booking service: waiting-room admission,
//! seat holds, settlement, and the seat event stream.

use axum::{
    extract::State,
    http::{header, Method},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod balance;
pub mod error;
pub mod events;
pub mod metrics;
pub mod payments;
pub mod queue;
pub mod reservations;
pub mod state;
pub mod stream;
pub mod workers;

pub use error::{ApiError, ApiResult};
pub use state::AppState;
pub use workers::spawn_background_workers;

/// Builds the router with all routes and middleware.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    Router::new()
        .merge(queue::routes())
        .merge(reservations::routes())
        .merge(payments::routes())
        .merge(events::routes())
        .merge(balance::routes())
        .merge(stream::routes())
        .route("/health", get(health))
        .route("/metrics", get(export_metrics))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn export_metrics(State(state): State<AppState>) -> ApiResult<String> {
    Ok(state.metrics.export().map_err(anyhow::Error::from)?)
}

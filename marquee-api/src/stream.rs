use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures_util::{Stream, StreamExt};
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/events/{event_id}/stream", get(seat_stream))
}

/// GET /events/{event_id}/stream
///
/// Server-sent seat transitions for one event. A consumer that lags past
/// the channel capacity misses messages instead of stalling the senders,
/// so clients should treat this as a hint and re-read the seat listing.
async fn seat_stream(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.seat_tx.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |msg| async move {
        let seat_event = msg.ok()?;
        if seat_event.event_id != event_id {
            return None;
        }
        let event = Event::default()
            .event("seat_update")
            .json_data(&seat_event)
            .ok()?;
        Some(Ok::<_, Infallible>(event))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

//! Server-sent event streams of the three buses.
//!
//! Each connection gets its own bus subscription (so a slow browser tab
//! only drops its own events) and a 15-second keep-alive comment.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::Stream;
use serde::Serialize;

use echo_bus::Subscription;

use crate::state::AppState;

const KEEP_ALIVE: Duration = Duration::from_secs(15);

pub async fn events_sse(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    bus_stream(state.raw_bus.subscribe(), "event")
}

pub async fn narrations_sse(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    bus_stream(state.narration_bus.subscribe(), "narration")
}

pub async fn responses_sse(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    bus_stream(state.response_bus.subscribe(), "response")
}

fn bus_stream<T: Serialize + Clone + Send + 'static>(
    mut sub: Subscription<T>,
    event_name: &'static str,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = async_stream::stream! {
        while let Some(item) = sub.recv().await {
            let data = match serde_json::to_string(&item) {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to serialize SSE payload");
                    continue;
                }
            };
            yield Ok(Event::default().event(event_name).data(data));
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE))
}

//! The localhost HTTP surface.
//!
//! - `POST /event`      - agent hook ingress
//! - `POST /respond`    - manual (typed) response to a block
//! - `GET  /health`     - pipeline and degradation status
//! - `GET  /events`     - SSE stream of the raw bus
//! - `GET  /narrations` - SSE stream of the narration bus
//! - `GET  /responses`  - SSE stream of the response bus

pub mod health;
pub mod ingress;
pub mod respond;
pub mod streams;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/event", post(ingress::post_event))
        .route("/respond", post(respond::post_respond))
        .route("/health", get(health::health))
        .route("/events", get(streams::events_sse))
        .route("/narrations", get(streams::narrations_sse))
        .route("/responses", get(streams::responses_sse))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

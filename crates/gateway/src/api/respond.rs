//! Manual response endpoint: resolve a block without voice.

use axum::extract::State;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RespondRequest {
    pub session_id: String,
    pub text: String,
}

pub async fn post_respond(
    State(state): State<AppState>,
    Json(body): Json<RespondRequest>,
) -> impl IntoResponse {
    let text = body.text.trim();
    if text.is_empty() || body.session_id.trim().is_empty() {
        return Json(json!({
            "status": "error",
            "text": body.text,
            "session_id": body.session_id,
        }));
    }

    let dispatched = state
        .voice
        .handle_manual_response(&body.session_id, text)
        .await;
    let status = if dispatched { "ok" } else { "dispatch_failed" };
    Json(json!({
        "status": status,
        "text": text,
        "session_id": body.session_id,
    }))
}

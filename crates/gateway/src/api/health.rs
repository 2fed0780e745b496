//! Health endpoint: one JSON snapshot of every degradation axis.

use axum::extract::State;
use axum::response::Json;
use serde_json::json;

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let stt_state = match (state.stt.is_available(), state.mic.is_available()) {
        (true, true) => "active",
        (false, false) => "disabled",
        _ => "degraded",
    };
    Json(json!({
        "subscribers": state.raw_bus.subscriber_count(),
        "narration_subscribers": state.narration_bus.subscriber_count(),
        "tts_state": state.speaker.state(),
        "tts_available": state.tts.is_available(),
        "audio_available": state.player.available(),
        "remote_connected": state
            .remote
            .as_ref()
            .map(|r| r.is_connected())
            .unwrap_or(false),
        "alert_active": state.alerts.active_count() > 0,
        "stt_state": stt_state,
        "stt_available": state.stt.is_available(),
        "mic_available": state.mic.is_available(),
        "dispatch_available": state.dispatcher.is_available(),
        "stt_listening": state.voice.is_listening(),
    }))
}

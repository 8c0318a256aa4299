//! API request handlers for the voxcast engine

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::json;

use voxcast_common::events::InterruptMode;

use crate::api::AppState;
use crate::error::Error;
use crate::synthesis::{split_script, VoiceMap};

/// Map an engine error to an HTTP response
fn error_response(error: Error) -> Response {
    let status = match &error {
        Error::BadRequest(_) => StatusCode::BAD_REQUEST,
        Error::InvalidState(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": error.to_string() }))).into_response()
}

/// POST /api/v1/call/connect
pub async fn connect(State(state): State<AppState>) -> Response {
    let session = state.session.clone();
    let result = state
        .arbiter
        .start_call_session(move || async move { session.connect().await })
        .await;

    match result {
        Ok(()) => Json(json!({ "status": "connected" })).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /api/v1/call/disconnect
pub async fn disconnect(State(state): State<AppState>) -> Json<serde_json::Value> {
    let session = state.session.clone();
    state
        .arbiter
        .end_call_session(move || {
            // Teardown must not block the arbiter; the attempt-id bump inside
            // disconnect makes any late callbacks harmless
            tokio::spawn(async move { session.disconnect().await });
        })
        .await;

    Json(json!({ "status": "disconnected" }))
}

/// POST /api/v1/call/mic - toggle the microphone gate
pub async fn toggle_mic(State(state): State<AppState>) -> Json<serde_json::Value> {
    let muted = state.session.toggle_mic();
    Json(json!({ "muted": muted }))
}

/// GET /api/v1/call/status
pub async fn call_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "connection": state.state.connection_status().await,
        "speaking": state.state.is_speaking().await,
        "mic_muted": state.session.is_mic_muted(),
        "output_level": state.state.output_level().await,
    }))
}

/// GET /api/v1/call/transcript
pub async fn transcript(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "transcript": state.state.transcript().await }))
}

/// GET /api/v1/focus/state
pub async fn focus_state(State(state): State<AppState>) -> Json<serde_json::Value> {
    let debug = state.arbiter.debug_state().await;
    Json(serde_json::to_value(debug).unwrap_or_else(|_| json!({})))
}

#[derive(Deserialize)]
pub struct InterruptModeRequest {
    pub mode: InterruptMode,
}

/// POST /api/v1/focus/interrupt_mode
pub async fn set_interrupt_mode(
    State(state): State<AppState>,
    Json(request): Json<InterruptModeRequest>,
) -> Json<serde_json::Value> {
    state.arbiter.set_interrupt_mode(request.mode);
    Json(json!({ "mode": request.mode }))
}

/// POST /api/v1/focus/playback/start
///
/// The UI-side podcast player asks permission immediately before producing
/// sound.
pub async fn request_playback_start(State(state): State<AppState>) -> Json<serde_json::Value> {
    let granted = state.arbiter.request_playback_start().await;
    Json(json!({ "granted": granted }))
}

/// POST /api/v1/focus/playback/stopped
pub async fn report_playback_stopped(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.arbiter.report_playback_stopped().await;
    Json(json!({ "status": "ok" }))
}

/// GET /api/v1/focus/debug_bundle - downloadable diagnostic artifact
pub async fn debug_bundle(State(state): State<AppState>) -> Response {
    let bundle = state.arbiter.export_debug_bundle().await;
    (
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"voxcast-debug.json\"".to_string(),
            ),
        ],
        Json(bundle),
    )
        .into_response()
}

#[derive(Deserialize)]
pub struct SynthesizeRequest {
    /// Script in `Speaker: line` form
    pub script: String,
    /// Speaker name → backend voice id
    #[serde(default)]
    pub voices: VoiceMap,
}

/// POST /api/v1/podcast/synthesize
///
/// Runs the chunked pipeline over the posted script and returns the raw PCM16
/// asset. Progress is broadcast as SSE `SynthesisProgress` events.
pub async fn synthesize(
    State(state): State<AppState>,
    Json(request): Json<SynthesizeRequest>,
) -> Response {
    let Some(pipeline) = state.synthesis.clone() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "no synthesis backend configured" })),
        )
            .into_response();
    };

    let chunks = split_script(&request.script);
    if chunks.is_empty() {
        return error_response(Error::BadRequest("script has no dialogue turns".to_string()));
    }

    match pipeline
        .synthesize(&chunks, &request.voices, |_fraction| {})
        .await
    {
        Some(episode) => (
            [
                (header::CONTENT_TYPE, "application/octet-stream".to_string()),
                (
                    header::HeaderName::from_static("x-sample-rate"),
                    episode.audio.sample_rate.to_string(),
                ),
                (
                    header::HeaderName::from_static("x-channels"),
                    episode.audio.channels.to_string(),
                ),
                (
                    header::HeaderName::from_static("x-dropped-chunks"),
                    episode.dropped.len().to_string(),
                ),
            ],
            episode.audio.data,
        )
            .into_response(),
        None => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "error": "synthesis failed for every chunk" })),
        )
            .into_response(),
    }
}

//! REST API implementation for the voxcast engine
//!
//! Thin adapter over the core APIs: no focus/session/synthesis logic lives in
//! handlers.

pub mod handlers;
pub mod sse;

use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use voxcast_common::telemetry::TelemetryRecorder;

use crate::focus::FocusArbiter;
use crate::session::CallSession;
use crate::state::SharedState;
use crate::synthesis::SynthesisPipeline;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub arbiter: Arc<FocusArbiter>,
    pub session: Arc<CallSession>,
    /// Present only when a synthesis backend is configured
    pub synthesis: Option<Arc<SynthesisPipeline>>,
    pub state: Arc<SharedState>,
    pub telemetry: Arc<TelemetryRecorder>,
    pub port: u16,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check (no prefix for health endpoint)
        .route("/health", get(health_check))

        // API v1 routes
        .nest("/api/v1", Router::new()
            // Live call session
            .route("/call/connect", post(handlers::connect))
            .route("/call/disconnect", post(handlers::disconnect))
            .route("/call/mic", post(handlers::toggle_mic))
            .route("/call/status", get(handlers::call_status))
            .route("/call/transcript", get(handlers::transcript))

            // Focus arbitration
            .route("/focus/state", get(handlers::focus_state))
            .route("/focus/interrupt_mode", post(handlers::set_interrupt_mode))
            .route("/focus/playback/start", post(handlers::request_playback_start))
            .route("/focus/playback/stopped", post(handlers::report_playback_stopped))
            .route("/focus/debug_bundle", get(handlers::debug_bundle))

            // Podcast synthesis
            .route("/podcast/synthesize", post(handlers::synthesize))

            // SSE events
            .route("/events", get(sse::event_stream))
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "module": "voxcast-engine",
        "version": env!("CARGO_PKG_VERSION"),
        "port": state.port,
        "telemetry_events": state.telemetry.len(),
    }))
}

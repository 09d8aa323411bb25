//! Parley server library logic.

pub mod api;
pub mod api_speech;
pub mod api_stt;
pub mod config;
pub mod relay;

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Extension, Json, Router,
};
use config::LimitsConfig;
use parley_voice::{GenerationEngine, SessionSettings, SpeechPipeline, TranscriptionEngine};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
///
/// Engines are constructed once per process and shared by every connection;
/// queues and workers are created per connection or request.
#[derive(Clone)]
pub struct AppState {
    /// Speech recognizer behind `/ws/stt`.
    pub transcriber: Arc<dyn TranscriptionEngine>,
    /// Text generator behind `/generate-speech`.
    pub generator: Arc<dyn GenerationEngine>,
    /// Synthesizer and voice behind `/generate-speech`.
    pub speech: SpeechPipeline,
    /// Worker timing and queue sizing.
    pub session: SessionSettings,
    /// Request limits for `/generate-speech`.
    pub limits: LimitsConfig,
    /// Allowed CORS origins. Empty allows any origin.
    pub cors_origins: Vec<String>,
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(parsed))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    let cors = cors_layer(&state.cors_origins);

    Router::new()
        .route("/health", get(health))
        .route("/ws/stt", get(api_stt::stt_ws_handler))
        .route("/generate-speech", post(api_speech::generate_speech_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(Extension(Arc::new(state)))
}

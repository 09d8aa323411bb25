//! WebSocket endpoint for streaming transcription.

use crate::{relay, AppState};
use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, Extension},
    response::IntoResponse,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

/// Handler for `GET /ws/stt`.
///
/// Upgrades to a WebSocket and relays binary audio frames into a fresh
/// transcription session. Result frames are sent back as JSON text frames:
/// either a transcript result or `{"error": "..."}`.
pub async fn stt_ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let session_id = Uuid::new_v4();
    tracing::info!(%session_id, remote_addr = %addr, "transcription socket requested");

    let engine = Arc::clone(&state.transcriber);
    let settings = state.session.clone();
    let span = tracing::info_span!("stt_session", %session_id, remote_addr = %addr);

    ws.on_upgrade(move |socket| relay::run(socket, engine, settings).instrument(span))
}

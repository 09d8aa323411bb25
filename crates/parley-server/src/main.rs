//! Parley server binary.
//!
//! Starts an axum HTTP server with structured logging, the configured speech
//! and generation engines, and graceful shutdown on SIGTERM/SIGINT.

use parley_server::{app, config, AppState};
use parley_voice::{
    CommandRecognizer, CommandSynthesizer, GeminiGenerator, SpeechPipeline,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("PARLEY_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // Load configuration
    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration; the server cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    // Engines are shared by every connection for the life of the process.
    if config.generation.api_key.is_empty() {
        tracing::warn!("no generation API key configured; /generate-speech requests will fail");
    }
    let generator = GeminiGenerator::new(config.generation.clone())
        .expect("failed to build generation client; check [generation] in config");
    let transcriber = CommandRecognizer::new(config.transcription.command());
    let synthesizer = CommandSynthesizer::new(config.synthesis.command());

    tracing::info!(
        recognizer = %config.transcription.program,
        synthesizer = %config.synthesis.program,
        model = %config.generation.model,
        voice = %config.synthesis.voice.voice,
        "engines configured"
    );

    let state = AppState {
        transcriber: Arc::new(transcriber),
        generator: Arc::new(generator),
        speech: SpeechPipeline::new(
            Arc::new(synthesizer),
            config.synthesis.voice.clone(),
            config.session.clone(),
        ),
        session: config.session.clone(),
        limits: config.limits.clone(),
        cors_origins: config.cors.allowed_origins.clone(),
    };

    // Build application
    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting parley server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address; is another process using this port?");

    // Serve with graceful shutdown
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("server error");

    tracing::info!("parley server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}

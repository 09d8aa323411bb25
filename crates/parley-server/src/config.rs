//! Server configuration loading from file and environment variables.

use parley_voice::{CommandConfig, GeminiConfig, SessionSettings, SynthesisConfig};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub cors: CorsConfig,

    /// Per-connection and per-request worker tuning.
    #[serde(default)]
    pub session: SessionSettings,

    /// Speech recognizer program.
    #[serde(default)]
    pub transcription: TranscriptionConfig,

    /// Speech synthesizer program and voice.
    #[serde(default)]
    pub synthesis: SynthesisSection,

    /// Text generation API.
    #[serde(default)]
    pub generation: GeminiConfig,

    /// Request size limits for `/generate-speech`.
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "parley_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Cross-origin settings. An empty list allows any origin.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CorsConfig {
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptionConfig {
    #[serde(default = "default_recognizer_program")]
    pub program: String,
    #[serde(default = "default_recognizer_args")]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SynthesisSection {
    #[serde(default = "default_synthesizer_program")]
    pub program: String,
    /// `{voice}` and `{language}` are substituted per request.
    #[serde(default = "default_synthesizer_args")]
    pub args: Vec<String>,
    #[serde(flatten)]
    pub voice: SynthesisConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Largest accepted `content`, in bytes.
    #[serde(default = "default_max_content_bytes")]
    pub max_content_bytes: usize,
    /// Longest accepted `conversation_history`.
    #[serde(default = "default_max_history_messages")]
    pub max_history_messages: usize,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_recognizer_program() -> String {
    "parley-recognizer".to_string()
}

fn default_recognizer_args() -> Vec<String> {
    vec!["--sample-rate".to_string(), "16000".to_string()]
}

fn default_synthesizer_program() -> String {
    "piper".to_string()
}

fn default_synthesizer_args() -> Vec<String> {
    ["--model", "voices/{voice}.onnx", "--output_raw"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_max_content_bytes() -> usize {
    64 * 1024
}

fn default_max_history_messages() -> usize {
    200
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            program: default_recognizer_program(),
            args: default_recognizer_args(),
        }
    }
}

impl TranscriptionConfig {
    pub fn command(&self) -> CommandConfig {
        CommandConfig::new(self.program.clone(), self.args.iter().cloned())
    }
}

impl Default for SynthesisSection {
    fn default() -> Self {
        Self {
            program: default_synthesizer_program(),
            args: default_synthesizer_args(),
            voice: SynthesisConfig::default(),
        }
    }
}

impl SynthesisSection {
    pub fn command(&self) -> CommandConfig {
        CommandConfig::new(self.program.clone(), self.args.iter().cloned())
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_content_bytes: default_max_content_bytes(),
            max_history_messages: default_max_history_messages(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `PARLEY_HOST` overrides `server.host`
/// - `PARLEY_PORT` overrides `server.port`
/// - `PARLEY_LOG_LEVEL` overrides `logging.level`
/// - `PARLEY_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `GEMINI_API_KEY` overrides `generation.api_key`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("PARLEY_HOST") {
        match host.parse() {
            Ok(parsed) => config.server.host = parsed,
            Err(_) => tracing::warn!(value = %host, "ignoring unparsable PARLEY_HOST"),
        }
    }
    if let Some(port) = var("PARLEY_PORT") {
        match port.parse() {
            Ok(parsed) => config.server.port = parsed,
            Err(_) => tracing::warn!(value = %port, "ignoring unparsable PARLEY_PORT"),
        }
    }
    if let Some(level) = var("PARLEY_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("PARLEY_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(key) = var("GEMINI_API_KEY").filter(|key| !key.trim().is_empty()) {
        config.generation.api_key = key;
    }
}

//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// Root of the per-session directory tree.
    pub data_dir: PathBuf,
    pub log_level: Level,
    pub openai_api_key: Option<String>,
    pub embedding_model: String,
    pub qa_model: String,
    /// Target chunk length in chars.
    pub chunk_size: usize,
    /// Overlap between adjacent chunks in chars; must stay below `chunk_size`.
    pub chunk_overlap: usize,
    /// Number of chunks retrieved as grounding context per question.
    pub top_k: usize,
    /// Upper bound on the text handed to the generator for artifacts.
    pub max_artifact_chars: usize,
    /// Timeout applied to every external capability call.
    pub call_timeout: Duration,
    /// Maximum accepted request body size for uploads, in bytes.
    pub max_upload_bytes: usize,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Server and Storage Settings ---
        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let data_dir = std::env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Load API Keys (as optional) ---
        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();

        // --- Load Adapter-specific Settings ---
        let embedding_model = std::env::var("EMBEDDING_MODEL")
            .unwrap_or_else(|_| "text-embedding-3-small".to_string());
        let qa_model = std::env::var("QA_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        // --- Load Engine Settings ---
        let chunk_size = parse_var("CHUNK_SIZE", 1000)?;
        let chunk_overlap = parse_var("CHUNK_OVERLAP", 200)?;
        if chunk_size == 0 || chunk_overlap >= chunk_size {
            return Err(ConfigError::InvalidValue(
                "CHUNK_OVERLAP".to_string(),
                format!(
                    "overlap {} must be smaller than chunk size {}",
                    chunk_overlap, chunk_size
                ),
            ));
        }
        let top_k = parse_var("TOP_K", 4)?;
        let max_artifact_chars = parse_var("MAX_ARTIFACT_CHARS", 12_000)?;
        let call_timeout = Duration::from_secs(parse_var("CALL_TIMEOUT_SECS", 60)? as u64);
        let max_upload_bytes = parse_var("MAX_UPLOAD_BYTES", 16 * 1024 * 1024)?;

        Ok(Self {
            bind_address,
            data_dir,
            log_level,
            openai_api_key,
            embedding_model,
            qa_model,
            chunk_size,
            chunk_overlap,
            top_k,
            max_artifact_chars,
            call_timeout,
            max_upload_bytes,
        })
    }
}

fn parse_var(name: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<usize>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

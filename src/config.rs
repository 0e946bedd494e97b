//! Configuration loader for the `pondwatch` backend service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). By consolidating configuration logic here, we
//! avoid scattering `env::var` calls throughout the codebase.
//!
use std::env;

use anyhow::{anyhow, Result};

use crate::cache;

/// Parse an optional numeric environment variable with a default value.
macro_rules! parse_env {
    ($var_name:expr, $ty:ty, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Read an optional string environment variable, treating blank as unset.
fn optional_env(var_name: &str) -> Option<String> {
    env::var(var_name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub const DEFAULT_LLM_MODEL_ID: &str = "apac.amazon.nova-micro-v1:0";

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// PostgreSQL connection string.
    pub db_url: String,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// TCP port the HTTP server binds to.
    pub listen_port: u16,

    /// Base URL of the hosted language model runtime. `None` disables
    /// generated summaries; insights then carry the fallback text.
    pub llm_api_url: Option<String>,

    /// Bearer token for the language model runtime.
    pub llm_api_key: Option<String>,

    /// Model identifier passed to the runtime.
    pub llm_model_id: String,

    /// Request timeout for summary generation, in milliseconds.
    pub llm_timeout_ms: u64,

    /// Most reading snapshots the alert cache holds at once.
    pub reading_cache_max: usize,

    /// Age after which a cached reading snapshot is reloaded, in seconds.
    pub reading_cache_ttl_secs: u64,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `DATABASE_URL` – PostgreSQL connection string
///
/// Optional:
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `LISTEN_PORT` – HTTP port (default: 8080)
/// - `LLM_API_URL` – language model runtime base URL (default: unset)
/// - `LLM_API_KEY` – bearer token for the runtime (default: unset)
/// - `LLM_MODEL_ID` – model identifier (default: `apac.amazon.nova-micro-v1:0`)
/// - `LLM_TIMEOUT_MS` – summary request timeout (default: 8000)
/// - `READING_CACHE_MAX` – cached reading snapshots (default: 64)
/// - `READING_CACHE_TTL_SECS` – snapshot lifetime (default: 300)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let db_url = require_env!("DATABASE_URL");
    let db_pool_max = parse_env!("DB_POOL_MAX", u32, 5);
    let listen_port = parse_env!("LISTEN_PORT", u16, 8080);
    let llm_timeout_ms = parse_env!("LLM_TIMEOUT_MS", u64, 8000);
    let reading_cache_max = parse_env!("READING_CACHE_MAX", usize, cache::DEFAULT_MAX_ENTRIES);
    let reading_cache_ttl_secs = parse_env!("READING_CACHE_TTL_SECS", u64, cache::DEFAULT_TTL.as_secs());

    Ok(Config {
        db_url,
        db_pool_max,
        listen_port,
        llm_api_url: optional_env("LLM_API_URL"),
        llm_api_key: optional_env("LLM_API_KEY"),
        llm_model_id: optional_env("LLM_MODEL_ID")
            .unwrap_or_else(|| DEFAULT_LLM_MODEL_ID.to_string()),
        llm_timeout_ms,
        reading_cache_max,
        reading_cache_ttl_secs,
    })
}

/// Mask the password component of a connection URL.
fn mask_db_url(db_url: &str) -> String {
    // ---
    if let Some(at_pos) = db_url.rfind('@') {
        if let Some(colon_pos) = db_url[..at_pos].rfind(':') {
            // "postgres://host@..." has no password, only the scheme colon
            if !db_url[colon_pos..].starts_with("://") {
                return format!("{}:****{}", &db_url[..colon_pos], &db_url[at_pos..]);
            }
        }
    }
    db_url.to_string()
}

fn mask_secret(secret: Option<&str>) -> &'static str {
    match secret {
        Some(_) => "****",
        None => "(unset)",
    }
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks sensitive information like database passwords and API keys while
    /// showing all configuration values that were loaded.
    pub fn log_config(&self) {
        // ---
        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL   : {}", mask_db_url(&self.db_url));
        tracing::info!("  DB_POOL_MAX    : {}", self.db_pool_max);
        tracing::info!("  LISTEN_PORT    : {}", self.listen_port);
        tracing::info!(
            "  LLM_API_URL    : {}",
            self.llm_api_url.as_deref().unwrap_or("(unset)")
        );
        tracing::info!("  LLM_API_KEY    : {}", mask_secret(self.llm_api_key.as_deref()));
        tracing::info!("  LLM_MODEL_ID   : {}", self.llm_model_id);
        tracing::info!("  LLM_TIMEOUT_MS : {}", self.llm_timeout_ms);
        tracing::info!("  READING_CACHE_MAX      : {}", self.reading_cache_max);
        tracing::info!("  READING_CACHE_TTL_SECS : {}", self.reading_cache_ttl_secs);
    }
}

//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

use crate::adapters::ChromaSettings;

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
    pub database_url: String,
    pub log_level: Level,
    pub cors_origin: String,
    pub upload_dir: PathBuf,

    // --- Generation backend ---
    pub ollama_host: String,
    pub ollama_port: u16,
    pub ollama_model: String,
    pub ollama_max_tokens: u32,
    pub ollama_temperature: f32,
    pub ollama_timeout: Duration,
    pub embedding_model: String,

    // --- Vector store ---
    pub chroma_host: String,
    pub chroma_port: u16,
    pub chroma_tenant: String,
    pub chroma_database: String,
    pub chroma_embedded_fallback: bool,

    pub generation_backoff: Duration,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Reads and parses a variable, falling back to `default` when it is unset.
fn parsed_or<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
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

        // --- Load Server and Database Settings ---
        let bind_address_str = var_or("BIND_ADDRESS", "0.0.0.0:3000");
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let cors_origin = var_or("CORS_ORIGIN", "http://localhost:3000");
        let upload_dir = PathBuf::from(var_or("UPLOAD_DIR", "./uploads"));

        // --- Load Ollama Settings ---
        let ollama_host = var_or("OLLAMA_HOST", "127.0.0.1");
        let ollama_port = parsed_or("OLLAMA_PORT", 11434)?;
        let ollama_model = var_or("OLLAMA_MODEL", "llama3.1:70b");
        let ollama_max_tokens = parsed_or("OLLAMA_MAX_TOKENS", 2048)?;
        let ollama_temperature: f32 = parsed_or("OLLAMA_TEMPERATURE", 0.7)?;
        if !(0.0..=2.0).contains(&ollama_temperature) {
            return Err(ConfigError::InvalidValue(
                "OLLAMA_TEMPERATURE".to_string(),
                format!("{} is outside 0.0..=2.0", ollama_temperature),
            ));
        }
        let ollama_timeout = Duration::from_secs(parsed_or("OLLAMA_TIMEOUT_SECS", 300)?);
        let embedding_model = var_or("EMBEDDING_MODEL", "nomic-embed-text");

        // --- Load Chroma Settings ---
        let chroma_host = var_or("CHROMA_HOST", "localhost");
        let chroma_port = parsed_or("CHROMA_PORT", 8001)?;
        let chroma_tenant = var_or("CHROMA_TENANT", "default_tenant");
        let chroma_database = var_or("CHROMA_DATABASE", "default_database");
        let chroma_embedded_fallback = parsed_or("CHROMA_EMBEDDED_FALLBACK", true)?;

        let generation_backoff = Duration::from_millis(parsed_or("GENERATION_BACKOFF_MS", 2000)?);

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            cors_origin,
            upload_dir,
            ollama_host,
            ollama_port,
            ollama_model,
            ollama_max_tokens,
            ollama_temperature,
            ollama_timeout,
            embedding_model,
            chroma_host,
            chroma_port,
            chroma_tenant,
            chroma_database,
            chroma_embedded_fallback,
            generation_backoff,
        })
    }

    pub fn ollama_base_url(&self) -> String {
        format!("http://{}:{}", self.ollama_host, self.ollama_port)
    }

    pub fn chroma_settings(&self) -> ChromaSettings {
        ChromaSettings {
            host: self.chroma_host.clone(),
            port: self.chroma_port,
            tenant: self.chroma_tenant.clone(),
            database: self.chroma_database.clone(),
            embedded_fallback: self.chroma_embedded_fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Both cases touch the process environment, so they run in one test.
    #[test]
    fn loads_defaults_and_rejects_bad_values() {
        std::env::set_var("DATABASE_URL", "postgres://localhost/tutor");
        std::env::set_var("RUST_LOG", "info");
        std::env::remove_var("BIND_ADDRESS");
        std::env::remove_var("CHROMA_EMBEDDED_FALLBACK");
        std::env::remove_var("OLLAMA_PORT");
        std::env::remove_var("CHROMA_PORT");
        std::env::remove_var("GENERATION_BACKOFF_MS");
        std::env::remove_var("OLLAMA_TEMPERATURE");

        let config = Config::from_env().unwrap();
        assert_eq!(config.ollama_base_url(), format!("http://{}:11434", config.ollama_host));
        assert_eq!(config.chroma_settings().port, 8001);
        assert_eq!(config.generation_backoff, Duration::from_millis(2000));

        std::env::set_var("OLLAMA_PORT", "onze");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::InvalidValue(name, _)) if name == "OLLAMA_PORT"
        ));
        std::env::remove_var("OLLAMA_PORT");

        std::env::remove_var("DATABASE_URL");
        assert!(matches!(Config::from_env(), Err(ConfigError::MissingVar(_))));
    }
}

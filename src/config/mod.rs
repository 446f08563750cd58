use std::env;
use std::path::PathBuf;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub backend: BackendConfig,
    pub database: DatabaseConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub sync: SyncConfig,
}

/// Hosted backend configuration
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub url: String,
    pub anon_key: String,
    /// Where confirmation emails send the user after sign-up.
    pub signup_redirect_url: Option<String>,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Location of the persisted auth session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub path: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// Outbox delivery configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Attempts before a pending remote operation is dropped.
    pub max_attempts: u32,
    /// Period of the background drain when no nudge arrives.
    pub interval_ms: u64,
    /// Base delay for exponential backoff between attempts.
    pub retry_delay_ms: u64,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let backend = BackendConfig {
            url: env::var("BACKEND_URL").map_err(|_| AppError::Config {
                message: "BACKEND_URL is required".to_string(),
            })?,
            anon_key: env::var("BACKEND_ANON_KEY").map_err(|_| AppError::Config {
                message: "BACKEND_ANON_KEY is required".to_string(),
            })?,
            signup_redirect_url: env::var("SIGNUP_REDIRECT_URL")
                .ok()
                .filter(|s| !s.is_empty()),
        };

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/divergente.db".to_string()),
            ),
            max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 5),
        };

        let session = SessionConfig {
            path: PathBuf::from(
                env::var("SESSION_PATH").unwrap_or_else(|_| "./data/session.json".to_string()),
            ),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: env_parse("REQUEST_TIMEOUT_MS", 30000),
            max_retries: env_parse("MAX_RETRIES", 3),
            retry_delay_ms: env_parse("RETRY_DELAY_MS", 1000),
        };

        let sync = SyncConfig {
            max_attempts: env_parse("OUTBOX_MAX_ATTEMPTS", 8),
            interval_ms: env_parse("OUTBOX_INTERVAL_MS", 30000),
            retry_delay_ms: request.retry_delay_ms,
        };

        Ok(Config {
            backend,
            database,
            session,
            logging,
            request,
            sync,
        })
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            interval_ms: 30000,
            retry_delay_ms: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_config_default() {
        let config = RequestConfig::default();
        assert_eq!(config.timeout_ms, 30000);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay_ms, 1000);
    }

    #[test]
    fn test_sync_config_default() {
        let config = SyncConfig::default();
        assert_eq!(config.max_attempts, 8);
        assert_eq!(config.interval_ms, 30000);
    }

    #[test]
    fn test_env_parse_falls_back_on_garbage() {
        std::env::set_var("DIVERGENTE_TEST_PARSE", "not-a-number");
        assert_eq!(env_parse("DIVERGENTE_TEST_PARSE", 42u32), 42);
        std::env::remove_var("DIVERGENTE_TEST_PARSE");
    }
}

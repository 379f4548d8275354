use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Locations searched for the source configuration document when
/// `SOURCES_CONFIG` is not set.
pub const DEFAULT_SOURCES_PATHS: &[&str] = &[
    "config/sources.json",
    "sources.json",
    "config/mcp.json",
    "mcp.json",
];

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub sources_path: Option<PathBuf>,
    pub dispatch: DispatchConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
}

/// Global concurrency budget for outbound calls
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub max_concurrent_calls: usize,
}

/// Session retention configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub max_messages: usize,
    pub idle_timeout_secs: u64,
    pub reap_interval_secs: u64,
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

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub connect_timeout_ms: u64,
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let sources_path = env::var("SOURCES_CONFIG").ok().map(PathBuf::from);

        let dispatch = DispatchConfig {
            max_concurrent_calls: parse_env("MAX_CONCURRENT_CALLS", 3),
        };
        if dispatch.max_concurrent_calls == 0 {
            return Err(ConfigError::Invalid {
                message: "MAX_CONCURRENT_CALLS must be at least 1".to_string(),
            });
        }

        let session = SessionConfig {
            max_messages: parse_env("SESSION_MAX_MESSAGES", 50),
            idle_timeout_secs: parse_env("SESSION_IDLE_TIMEOUT_SECS", 3600),
            reap_interval_secs: parse_env("SESSION_REAP_INTERVAL_SECS", 300),
        };
        if session.max_messages == 0 {
            return Err(ConfigError::Invalid {
                message: "SESSION_MAX_MESSAGES must be at least 1".to_string(),
            });
        }
        if session.idle_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                message: "SESSION_IDLE_TIMEOUT_SECS must be at least 1".to_string(),
            });
        }

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
            connect_timeout_ms: parse_env("CONNECT_TIMEOUT_MS", 10_000),
        };

        Ok(Config {
            sources_path,
            dispatch,
            session,
            logging,
            request,
        })
    }

    /// Resolve the configuration document path: the explicit path if set,
    /// otherwise the first existing default location.
    pub fn resolve_sources_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.sources_path {
            return Ok(path.clone());
        }
        DEFAULT_SOURCES_PATHS
            .iter()
            .map(Path::new)
            .find(|p| p.exists())
            .map(Path::to_path_buf)
            .ok_or_else(|| ConfigError::NotFound {
                searched: DEFAULT_SOURCES_PATHS.join(", "),
            })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sources_path: None,
            dispatch: DispatchConfig::default(),
            session: SessionConfig::default(),
            logging: LoggingConfig::default(),
            request: RequestConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 3,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_messages: 50,
            idle_timeout_secs: 3600,
            reap_interval_secs: 300,
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
        }
    }
}

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8001";
pub const DEFAULT_UPSTREAM_BASE_URL: &str = "wss://generativelanguage.googleapis.com";
pub const DEFAULT_UPSTREAM_API_VERSION: &str = "v1alpha";
pub const DEFAULT_CREDENTIAL_VAR: &str = "GOOGLE_API_KEY";
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_MODE: &str = "general";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub upstream_base_url: String,
    pub upstream_api_version: String,
    /// Name of the environment variable holding the upstream API key. The
    /// key itself is read per session, not here.
    pub credential_var: String,
    pub handshake_timeout: Duration,
    pub default_mode: String,
    pub prompts_path: Option<PathBuf>,
    pub log_level: Level,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 8001)),
            upstream_base_url: DEFAULT_UPSTREAM_BASE_URL.to_string(),
            upstream_api_version: DEFAULT_UPSTREAM_API_VERSION.to_string(),
            credential_var: DEFAULT_CREDENTIAL_VAR.to_string(),
            handshake_timeout: Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
            default_mode: DEFAULT_MODE.to_string(),
            prompts_path: None,
            log_level: Level::INFO,
        }
    }
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str = var_or("BIND_ADDRESS", DEFAULT_BIND_ADDRESS);
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let upstream_base_url = var_or("UPSTREAM_BASE_URL", DEFAULT_UPSTREAM_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        if !(upstream_base_url.starts_with("wss://") || upstream_base_url.starts_with("ws://")) {
            return Err(ConfigError::InvalidValue(
                "UPSTREAM_BASE_URL".to_string(),
                format!("'{}' is not a ws:// or wss:// URL", upstream_base_url),
            ));
        }

        let upstream_api_version = var_or("UPSTREAM_API_VERSION", DEFAULT_UPSTREAM_API_VERSION);
        let version_ok = upstream_api_version
            .strip_prefix('v')
            .is_some_and(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
            && upstream_api_version.chars().all(|c| c.is_ascii_alphanumeric());
        if !version_ok {
            return Err(ConfigError::InvalidValue(
                "UPSTREAM_API_VERSION".to_string(),
                format!("'{}' is not an API version like v1alpha", upstream_api_version),
            ));
        }

        let credential_var = var_or("CREDENTIAL_VAR", DEFAULT_CREDENTIAL_VAR);

        let timeout_str = var_or(
            "HANDSHAKE_TIMEOUT_SECS",
            &DEFAULT_HANDSHAKE_TIMEOUT_SECS.to_string(),
        );
        let handshake_timeout = match timeout_str.parse::<u64>() {
            Ok(secs) if secs > 0 => Duration::from_secs(secs),
            _ => {
                return Err(ConfigError::InvalidValue(
                    "HANDSHAKE_TIMEOUT_SECS".to_string(),
                    format!("'{}' is not a positive number of seconds", timeout_str),
                ));
            }
        };

        let default_mode = var_or("DEFAULT_MODE", DEFAULT_MODE);

        let prompts_path = std::env::var("PROMPTS_PATH")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            upstream_base_url,
            upstream_api_version,
            credential_var,
            handshake_timeout,
            default_mode,
            prompts_path,
            log_level,
        })
    }
}

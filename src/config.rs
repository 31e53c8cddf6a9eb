use anyhow::{Context, Result};
use std::path::PathBuf;

/// Client configuration
#[derive(Clone, Debug)]
pub struct Config {
    /// Base URL every request path is resolved against, token endpoints included
    pub base_url: String,

    /// Login (token obtain) path, relative to the base URL
    pub token_obtain_path: String,

    /// Token refresh path, relative to the base URL
    pub token_refresh_path: String,

    /// SQLite credential database location
    pub credentials_db: PathBuf,

    // HTTP client
    pub http_max_connections: usize,
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,
}

impl Config {
    /// Load configuration from the environment with defaults
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let config = Config {
            base_url: std::env::var("COTIDOMO_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8000/api/v1/".to_string()),

            token_obtain_path: std::env::var("COTIDOMO_TOKEN_PATH")
                .unwrap_or_else(|_| "token/".to_string()),

            token_refresh_path: std::env::var("COTIDOMO_TOKEN_REFRESH_PATH")
                .unwrap_or_else(|_| "token/refresh/".to_string()),

            credentials_db: std::env::var("COTIDOMO_CREDENTIALS_DB")
                .ok()
                .map(|s| expand_tilde(&s))
                .or_else(default_credentials_db)
                .context(
                    "COTIDOMO_CREDENTIALS_DB is not set and no platform data directory was found",
                )?,

            http_max_connections: std::env::var("COTIDOMO_HTTP_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(20),

            http_connect_timeout: std::env::var("COTIDOMO_HTTP_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),

            http_request_timeout: std::env::var("COTIDOMO_HTTP_REQUEST_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),
        };

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.base_url)
            .with_context(|| format!("Invalid base URL: {}", self.base_url))?;

        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("Base URL must use http or https: {}", self.base_url);
        }

        if self.http_request_timeout == 0 {
            anyhow::bail!("HTTP request timeout must be greater than zero");
        }

        Ok(())
    }
}

/// Default credential database under the platform data directory
fn default_credentials_db() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("cotidomo").join("session.sqlite3"))
}

/// Expand tilde (~) in file paths to the user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(&path[2..]);
        }
    }
    PathBuf::from(path)
}

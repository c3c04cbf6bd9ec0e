use std::env;
use std::path::PathBuf;

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host (default: 0.0.0.0)
    pub host: String,
    /// Server port (default: 3040)
    pub port: u16,
    /// Data directory holding content, history and the manifest (default: ./folio-data)
    pub data_dir: PathBuf,
    /// Bearer token every `/api` request must present
    pub api_token: String,
    /// URL notified after every successful change (optional)
    pub rebuild_webhook: Option<String>,
    /// CORS allowed origins (comma-separated)
    pub cors_origins: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3040".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let data_dir =
            PathBuf::from(env::var("FOLIO_DATA_DIR").unwrap_or_else(|_| "./folio-data".to_string()));

        let api_token = env::var("FOLIO_API_TOKEN")
            .map(|v| v.trim().to_string())
            .unwrap_or_default();
        if api_token.is_empty() {
            return Err(ConfigError::MissingApiToken);
        }

        let rebuild_webhook = env::var("FOLIO_REBUILD_WEBHOOK")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let cors_origins = env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            host,
            port,
            data_dir,
            api_token,
            rebuild_webhook,
            cors_origins,
        })
    }

    /// Get the server address string
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration errors
#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    MissingApiToken,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "Invalid PORT environment variable"),
            ConfigError::MissingApiToken => {
                write!(f, "FOLIO_API_TOKEN must be set to a non-empty value")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

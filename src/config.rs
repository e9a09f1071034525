use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

/// Application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Relay server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Relay server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Base URL of the AI endpoints (analyze-code, technical-qna)
    #[serde(default = "default_ai_service_url")]
    pub ai_service_url: String,

    /// Base URL clients use to reach the relay (ws://host:port)
    #[serde(default = "default_relay_url")]
    pub relay_url: String,

    /// Quiescence window before an analysis request fires
    #[serde(default = "default_analysis_debounce_ms")]
    pub analysis_debounce_ms: u64,

    /// Window in which consecutive local edits form one undo step
    #[serde(default = "default_undo_merge_interval_ms")]
    pub undo_merge_interval_ms: u64,

    /// Upper bound for analysis and assistant requests
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// How long an empty room's document is retained
    #[serde(default = "default_room_idle_secs")]
    pub room_idle_secs: u64,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        // Load from environment variables using envy
        match envy::from_env::<Config>() {
            Ok(config) => {
                info!("✅ Configuration loaded successfully");
                Ok(config)
            }
            Err(e) => {
                error!("❌ Failed to load configuration: {}", e);
                Err(ConfigError::EnvError(e))
            }
        }
    }

    /// Get the full server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.environment.to_lowercase() == "dev" || self.environment.to_lowercase() == "development"
    }

    /// Default tracing filter: `log_level` for this crate and the HTTP layer,
    /// everything else at `info` in development and `warn` elsewhere
    pub fn log_filter(&self) -> String {
        let others = if self.is_development() { "info" } else { "warn" };
        format!("colabri_code={0},tower_http={0},{1}", self.log_level, others)
    }

    pub fn analysis_debounce(&self) -> Duration {
        Duration::from_millis(self.analysis_debounce_ms)
    }

    pub fn undo_merge_interval(&self) -> Duration {
        Duration::from_millis(self.undo_merge_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn room_idle(&self) -> Duration {
        Duration::from_secs(self.room_idle_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            log_level: default_log_level(),
            ai_service_url: default_ai_service_url(),
            relay_url: default_relay_url(),
            analysis_debounce_ms: default_analysis_debounce_ms(),
            undo_merge_interval_ms: default_undo_merge_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            room_idle_secs: default_room_idle_secs(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    EnvError(envy::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::EnvError(e) => write!(f, "Environment variable error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_ai_service_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_relay_url() -> String {
    "ws://127.0.0.1:3000".to_string()
}

fn default_analysis_debounce_ms() -> u64 {
    1000
}

fn default_undo_merge_interval_ms() -> u64 {
    500
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_room_idle_secs() -> u64 {
    300
}

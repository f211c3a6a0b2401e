//! Configuration management

use crate::error::{ErrorContext, HydroError, HydroResult};
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding the API base URL
pub const API_URL_ENV: &str = "HYDROWATCH_API_URL";
/// Environment variable overriding the session file location
pub const SESSION_FILE_ENV: &str = "HYDROWATCH_SESSION_FILE";

pub const DEFAULT_API_URL: &str = "http://localhost:5000";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HydroConfig {
    pub api: ApiConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

/// Remote API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the dashboard backend
    pub base_url: String,
    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// User agent string
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            request_timeout_ms: 10_000,
            user_agent: format!("hydrowatch/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Session persistence and restore settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session file; `None` resolves to the platform data directory
    pub storage_path: Option<PathBuf>,
    /// Upper bound for the network legs of restore and refresh
    pub restore_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            storage_path: None,
            restore_timeout_ms: 10_000,
        }
    }
}

impl SessionConfig {
    /// Resolve the session file location
    pub fn resolved_storage_path(&self) -> PathBuf {
        self.storage_path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("hydrowatch")
                .join("session.json")
        })
    }
}

impl HydroConfig {
    /// 从文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> HydroResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| HydroError::Config {
            message: format!("Failed to read config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("read_file")
                .with_suggestion("Check if the config file exists and is readable"),
        })?;

        let config: HydroConfig = toml::from_str(&content).map_err(|e| HydroError::Config {
            message: format!("Failed to parse config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("parse_toml")
                .with_suggestion("Check TOML syntax in config file"),
        })?;

        Ok(config)
    }

    /// Load the optional file, apply environment overrides, then validate
    pub fn load(path: Option<&Path>) -> HydroResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `HYDROWATCH_*` environment overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                self.api.base_url = url.trim().to_string();
            }
        }
        if let Ok(path) = std::env::var(SESSION_FILE_ENV) {
            if !path.trim().is_empty() {
                self.session.storage_path = Some(PathBuf::from(path.trim()));
            }
        }
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> HydroResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| HydroError::Config {
            message: format!("Failed to serialize config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config").with_operation("serialize_toml"),
        })?;

        std::fs::write(path, content).map_err(|e| HydroError::Config {
            message: format!("Failed to write config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("write_file")
                .with_suggestion("Check if the directory exists and is writable"),
        })?;

        Ok(())
    }

    /// 验证配置
    pub fn validate(&self) -> HydroResult<()> {
        let url = url::Url::parse(&self.api.base_url).map_err(|e| HydroError::Config {
            message: format!("Invalid api.base_url '{}': {}", self.api.base_url, e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config")
                .with_operation("validate")
                .with_suggestion("Use an absolute URL such as http://localhost:5000"),
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(HydroError::Config {
                message: format!("Unsupported API scheme: {}", url.scheme()),
                source: None,
                context: ErrorContext::new("config")
                    .with_operation("validate")
                    .with_suggestion("Use http or https"),
            });
        }

        if self.api.request_timeout_ms == 0 {
            return Err(HydroError::Config {
                message: "api.request_timeout_ms must be greater than 0".to_string(),
                source: None,
                context: ErrorContext::new("config")
                    .with_operation("validate")
                    .with_suggestion("Set api.request_timeout_ms to a positive value"),
            });
        }

        if self.session.restore_timeout_ms == 0 {
            return Err(HydroError::Config {
                message: "session.restore_timeout_ms must be greater than 0".to_string(),
                source: None,
                context: ErrorContext::new("config")
                    .with_operation("validate")
                    .with_suggestion("Set session.restore_timeout_ms to a positive value"),
            });
        }

        Ok(())
    }
}

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use teloxide::types::{ChatId, UserId};
use thiserror::Error;

use crate::relay::chain::{ChainError, ModelChain, ModelDescriptor};
use crate::relay::gemini::{DEFAULT_API_VERSION, DEFAULT_BASE_URL};
use crate::relay::quota::UsageCategory;
use crate::relay::session::SessionScope;
use crate::relay::translate::AwaitingToggle;

/// Config file used when no path is given on the command line.
pub const DEFAULT_CONFIG_PATH: &str = "gemini-relay.json";

pub const ENV_TELEGRAM_TOKEN: &str = "TELEGRAM_TOKEN";
pub const ENV_GEMINI_API_KEY: &str = "GEMINI_API_KEY";
pub const ENV_OWNER_ID: &str = "MY_TELEGRAM_ID";

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", .path.display())]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("failed to parse config file '{}': {source}", .path.display())]
    ParseJson { path: PathBuf, source: serde_json::Error },
    #[error("invalid {name} chain: {source}")]
    InvalidChain { name: &'static str, source: ChainError },
    #[error("config validation error: {0}")]
    Validation(String),
}

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    telegram_bot_token: String,
    #[serde(default)]
    gemini_api_key: String,
    /// 0 or absent means anyone may use the bot
    #[serde(default)]
    owner_id: u64,
    models: Option<Vec<ModelDescriptor>>,
    image_models: Option<Vec<ModelDescriptor>>,
    api_base_url: Option<String>,
    api_version: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    request_timeout_secs: u64,
    #[serde(default)]
    session_scope: SessionScope,
    #[serde(default)]
    awaiting_toggle: AwaitingToggle,
    #[serde(default)]
    quota_limits: HashMap<UsageCategory, u32>,
    #[serde(default = "default_health_port")]
    health_port: u16,
    /// Directory for state files (logs). Defaults to current directory.
    data_dir: Option<String>,
    log_chat_id: Option<i64>,
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_health_port() -> u16 {
    8000
}

fn default_models() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor::new("gemini-2.0-flash-exp", true, 0),
        ModelDescriptor::new("gemini-1.5-flash", true, 1),
    ]
}

fn default_image_models() -> Vec<ModelDescriptor> {
    vec![ModelDescriptor::new("gemini-2.5-flash-image", true, 0)]
}

pub struct Config {
    pub telegram_bot_token: String,
    pub gemini_api_key: String,
    /// Only this user is served when set.
    pub owner_id: Option<UserId>,
    pub models: ModelChain,
    pub image_models: ModelChain,
    pub api_base_url: String,
    pub api_version: String,
    pub request_timeout: Duration,
    pub session_scope: SessionScope,
    pub awaiting_toggle: AwaitingToggle,
    pub quota_limits: HashMap<UsageCategory, u32>,
    pub health_port: u16,
    /// Directory for state files (logs).
    pub data_dir: PathBuf,
    pub log_chat_id: Option<ChatId>,
}

impl Config {
    /// Load from `path` (or the default file if it exists) and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    /// Like [`Config::load`], reading environment values through `env`.
    pub fn load_with_env<F>(path: Option<&Path>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = match path {
            Some(path) => read_file(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    read_file(default)?
                } else {
                    ConfigFile::default_values()
                }
            }
        };
        Self::from_file(file, env)
    }

    fn from_file<F>(mut file: ConfigFile, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Environment wins over the file
        if let Some(token) = env(ENV_TELEGRAM_TOKEN).filter(|v| !v.trim().is_empty()) {
            file.telegram_bot_token = token.trim().to_string();
        }
        if let Some(key) = env(ENV_GEMINI_API_KEY).filter(|v| !v.trim().is_empty()) {
            file.gemini_api_key = key.trim().to_string();
        }
        if let Some(owner) = env(ENV_OWNER_ID).filter(|v| !v.trim().is_empty()) {
            file.owner_id = owner.trim().parse().map_err(|_| {
                ConfigError::Validation(format!("{ENV_OWNER_ID} must be a numeric user id, got '{owner}'"))
            })?;
        }

        if file.telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation(format!(
                "telegram_bot_token is required (or set {ENV_TELEGRAM_TOKEN})"
            )));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = file.telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into(),
            ));
        }
        if file.gemini_api_key.is_empty() {
            return Err(ConfigError::Validation(format!(
                "gemini_api_key is required (or set {ENV_GEMINI_API_KEY})"
            )));
        }
        if file.request_timeout_secs == 0 {
            return Err(ConfigError::Validation("request_timeout_secs must be positive".into()));
        }

        let models = ModelChain::new(file.models.unwrap_or_else(default_models))
            .map_err(|source| ConfigError::InvalidChain { name: "models", source })?;
        let image_models = ModelChain::new(file.image_models.unwrap_or_else(default_image_models))
            .map_err(|source| ConfigError::InvalidChain { name: "image_models", source })?;

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            telegram_bot_token: file.telegram_bot_token,
            gemini_api_key: file.gemini_api_key,
            owner_id: (file.owner_id != 0).then_some(UserId(file.owner_id)),
            models,
            image_models,
            api_base_url: file
                .api_base_url
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_version: file.api_version.unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            request_timeout: Duration::from_secs(file.request_timeout_secs),
            session_scope: file.session_scope,
            awaiting_toggle: file.awaiting_toggle,
            quota_limits: file.quota_limits,
            health_port: file.health_port,
            data_dir,
            log_chat_id: file.log_chat_id.map(ChatId),
        })
    }

    /// True if `user_id` may use the bot.
    pub fn is_allowed(&self, user_id: UserId) -> bool {
        self.owner_id.is_none_or(|owner| owner == user_id)
    }
}

impl ConfigFile {
    fn default_values() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            health_port: default_health_port(),
            ..Self::default()
        }
    }
}

fn read_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ReadFile { path: path.to_path_buf(), source: e })?;
    serde_json::from_str(&content).map_err(|e| ConfigError::ParseJson { path: path.to_path_buf(), source: e })
}

//! Bot configuration.
//!
//! Loaded from a TOML file (default `<config dir>/booker/config.toml`). Every
//! section has defaults, so a missing file yields a usable config apart from
//! the bot token, which can also come from `BOOKER_TELEGRAM_BOT_TOKEN`.

use anyhow::Context;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::flows::session::SessionPolicy;

pub const TOKEN_ENV: &str = "BOOKER_TELEGRAM_BOT_TOKEN";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("telegram.bot_token is missing (set it in the config file or {TOKEN_ENV})")]
    MissingBotToken,
    #[error("telegram.bot_token does not look like a bot token")]
    InvalidBotToken,
    #[error("telegram.allowed_users is empty; nobody could use the bot")]
    NoAllowedUsers,
    #[error("conversation.{0} must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("gateway.bind '{0}' is not a socket address")]
    InvalidBind(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub conversation: ConversationConfig,
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Usernames or numeric user ids; `"*"` allows everyone.
    pub allowed_users: Vec<String>,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            allowed_users: vec!["*".into()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    pub step_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub max_branch_attempts: u32,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            step_timeout_secs: 300,
            sweep_interval_secs: 5,
            max_branch_attempts: 3,
        }
    }
}

impl ConversationConfig {
    pub fn session_policy(&self) -> SessionPolicy {
        SessionPolicy {
            step_timeout: Duration::from_secs(self.step_timeout_secs),
            max_branch_attempts: self.max_branch_attempts,
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub enabled: bool,
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: "127.0.0.1:9464".into(),
        }
    }
}

impl GatewayConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind
            .parse()
            .map_err(|_| ConfigError::InvalidBind(self.bind.clone()))
    }
}

/// `<config dir>/booker/config.toml` for the current platform.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "booker").map(|d| d.config_dir().join("config.toml"))
}

/// Expand `~` and `$VARS` in a user-supplied path.
pub fn expand_path(raw: &str) -> anyhow::Result<PathBuf> {
    let expanded = shellexpand::full(raw).with_context(|| format!("failed to expand path {raw}"))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

impl Config {
    /// Parse a config from TOML text.
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).context("failed to parse config")
    }

    /// Load from `path`, or from the default location when `None`.
    ///
    /// An explicit path must exist; a missing default file yields defaults.
    /// The token environment variable overrides the file either way.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("failed to read {}", p.display()))?;
                Self::from_toml(&content).with_context(|| format!("in {}", p.display()))?
            }
            None => match default_config_path() {
                Some(p) if p.exists() => {
                    let content = std::fs::read_to_string(&p)
                        .with_context(|| format!("failed to read {}", p.display()))?;
                    tracing::debug!("loaded config from {}", p.display());
                    Self::from_toml(&content).with_context(|| format!("in {}", p.display()))?
                }
                _ => {
                    tracing::debug!("no config file found, using defaults");
                    Self::default()
                }
            },
        };

        if let Ok(token) = std::env::var(TOKEN_ENV) {
            if !token.trim().is_empty() {
                config.telegram.bot_token = token.trim().to_string();
            }
        }

        Ok(config)
    }

    /// Semantic checks that parsing cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let token = self.telegram.bot_token.trim();
        if token.is_empty() {
            return Err(ConfigError::MissingBotToken);
        }
        if !token.contains(':') {
            return Err(ConfigError::InvalidBotToken);
        }
        if self.telegram.allowed_users.is_empty() {
            return Err(ConfigError::NoAllowedUsers);
        }
        if self.conversation.step_timeout_secs == 0 {
            return Err(ConfigError::ZeroDuration("step_timeout_secs"));
        }
        if self.conversation.sweep_interval_secs == 0 {
            return Err(ConfigError::ZeroDuration("sweep_interval_secs"));
        }
        if self.gateway.enabled {
            self.gateway.socket_addr()?;
        }
        Ok(())
    }
}

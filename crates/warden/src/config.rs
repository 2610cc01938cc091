//! Configuration management for Warden.
//!
//! The file is read once at startup. After that, changes only come from the
//! `/config` command: they are sent to a single owner task, which validates
//! them, writes the file back and swaps the shared snapshot. Readers take a
//! cheap `Arc` clone of the current snapshot and never hold the lock across
//! platform calls.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc, oneshot};

use warden_common::constants::{
    DEFAULT_CHALLENGE_TIMEOUT_SECS, DEFAULT_LISTEN_ADDR, DEFAULT_MAX_ATTEMPTS, DEFAULT_REDIS_URL,
    MAX_MUTE_HOURS,
};
use warden_common::{ConfigError, DeliveryMode, UserId};

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Health/status HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Store backend
    #[serde(default)]
    pub store: StoreBackend,

    /// Join gate configuration
    #[serde(default)]
    pub gate: GateConfig,

    /// Moderator commands and mutes
    #[serde(default)]
    pub moderation: ModerationConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Redis,
    Memory,
}

/// Join gate configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Where the challenge is presented
    #[serde(default)]
    pub delivery_mode: DeliveryMode,

    /// Challenge validity in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Wrong answers before the member is removed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Posted on admission, `{name}` is replaced by the member's name
    #[serde(default = "default_welcome_message")]
    pub welcome_message: String,

    /// 0 keeps the welcome message
    #[serde(default = "default_welcome_delete")]
    pub welcome_delete_after_secs: u64,

    /// Removal and delivery-failure notices
    #[serde(default = "default_notice_delete")]
    pub notice_delete_after_secs: u64,

    /// Wrong-answer warnings in in-chat mode
    #[serde(default = "default_warning_delete")]
    pub warning_delete_after_secs: u64,

    /// Recovery sweep period
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl GateConfig {
    pub fn timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.timeout_secs as i64)
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            delivery_mode: DeliveryMode::default(),
            timeout_secs: default_timeout(),
            max_attempts: default_max_attempts(),
            welcome_message: default_welcome_message(),
            welcome_delete_after_secs: default_welcome_delete(),
            notice_delete_after_secs: default_notice_delete(),
            warning_delete_after_secs: default_warning_delete(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

/// Moderator command configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationConfig {
    /// `/mute` without an hour count
    #[serde(default = "default_mute_hours")]
    pub default_mute_hours: u32,

    #[serde(default = "default_max_mute_hours")]
    pub max_mute_hours: u32,

    /// Upper bound for `/del N`
    #[serde(default = "default_max_delete")]
    pub max_delete_messages: u32,

    /// Command replies and the commands themselves are removed after this
    #[serde(default = "default_command_reply_delete")]
    pub command_reply_delete_after_secs: u64,

    /// Users allowed to change settings with `/config`
    #[serde(default)]
    pub admin_user_ids: Vec<i64>,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            default_mute_hours: default_mute_hours(),
            max_mute_hours: default_max_mute_hours(),
            max_delete_messages: default_max_delete(),
            command_reply_delete_after_secs: default_command_reply_delete(),
            admin_user_ids: Vec::new(),
        }
    }
}

// Default value functions
fn default_redis_url() -> String { DEFAULT_REDIS_URL.to_string() }
fn default_listen_addr() -> String { DEFAULT_LISTEN_ADDR.to_string() }
fn default_timeout() -> u64 { DEFAULT_CHALLENGE_TIMEOUT_SECS }
fn default_max_attempts() -> u32 { DEFAULT_MAX_ATTEMPTS }
fn default_welcome_message() -> String { "Welcome to the group, {name}!".to_string() }
fn default_welcome_delete() -> u64 { 300 } // 5 minutes
fn default_notice_delete() -> u64 { 60 }
fn default_warning_delete() -> u64 { 15 }
fn default_sweep_interval() -> u64 { 60 }
fn default_mute_hours() -> u32 { 24 }
fn default_max_mute_hours() -> u32 { MAX_MUTE_HOURS }
fn default_max_delete() -> u32 { 100 }
fn default_command_reply_delete() -> u64 { 30 }

impl AppConfig {
    /// Load configuration from file, with CLI overrides
    pub fn load(config_path: &str, args: &super::Args) -> Result<Self> {
        let mut config = if Path::new(config_path).exists() {
            let settings = config::Config::builder()
                .add_source(config::File::with_name(config_path))
                .build()
                .context("Failed to load config file")?;

            settings
                .try_deserialize()
                .context("Failed to parse config")?
        } else {
            // Use defaults if config file doesn't exist
            tracing::warn!("Config file not found, using defaults");
            Self::default()
        };

        // Apply CLI overrides
        if let Some(ref redis_url) = args.redis_url {
            config.redis_url = redis_url.clone();
        }
        if let Some(ref listen) = args.listen {
            config.listen_addr = listen.clone();
        }
        if args.memory_store {
            config.store = StoreBackend::Memory;
        }

        config.validate().context("Invalid configuration")?;

        Ok(config)
    }

    /// Cross-field checks, also run after every runtime change
    pub fn validate(&self) -> Result<(), ConfigError> {
        let gate = &self.gate;
        let moderation = &self.moderation;

        check_range("timeout_secs", gate.timeout_secs, 30, 86_400)?;
        check_range("max_attempts", gate.max_attempts as u64, 1, 10)?;
        check_range("welcome_delete_after_secs", gate.welcome_delete_after_secs, 0, 86_400)?;
        check_range("max_mute_hours", moderation.max_mute_hours as u64, 1, MAX_MUTE_HOURS as u64)?;
        check_range(
            "default_mute_hours",
            moderation.default_mute_hours as u64,
            1,
            moderation.max_mute_hours as u64,
        )?;
        check_range("max_delete_messages", moderation.max_delete_messages as u64, 1, 1000)?;
        check_range("sweep_interval_secs", gate.sweep_interval_secs, 1, 3600)?;

        if gate.welcome_message.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "welcome_message",
                reason: "must not be empty".into(),
            });
        }

        Ok(())
    }

    pub fn is_bot_admin(&self, user: UserId) -> bool {
        self.moderation.admin_user_ids.contains(&user.0)
    }

    /// Human-readable settings listing for `/config`
    pub fn describe(&self) -> String {
        let gate = &self.gate;
        let moderation = &self.moderation;
        format!(
            "Current settings:\n\
             • delivery_mode = {}\n\
             • timeout_secs = {}\n\
             • max_attempts = {}\n\
             • welcome_message = {}\n\
             • welcome_delete_after_secs = {}\n\
             • default_mute_hours = {} (max {})\n\
             • max_delete_messages = {}\n\
             • admins = {:?}\n\n\
             Change with /config <key> <value>, or add_admin/remove_admin <user id>.",
            gate.delivery_mode.as_str(),
            gate.timeout_secs,
            gate.max_attempts,
            gate.welcome_message,
            gate.welcome_delete_after_secs,
            moderation.default_mute_hours,
            moderation.max_mute_hours,
            moderation.max_delete_messages,
            moderation.admin_user_ids,
        )
    }
}

fn check_range(key: &'static str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::InvalidValue {
            key,
            reason: format!("{value} is outside {min}..={max}"),
        });
    }
    Ok(())
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            listen_addr: default_listen_addr(),
            store: StoreBackend::default(),
            gate: GateConfig::default(),
            moderation: ModerationConfig::default(),
        }
    }
}

/// A single runtime settings change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigChange {
    TimeoutSecs(u64),
    MaxAttempts(u32),
    WelcomeMessage(String),
    WelcomeDeleteAfterSecs(u64),
    DeliveryMode(DeliveryMode),
    DefaultMuteHours(u32),
    MaxDeleteMessages(u32),
    AddAdmin(UserId),
    RemoveAdmin(UserId),
}

impl ConfigChange {
    pub const KEYS: &'static [&'static str] = &[
        "timeout_secs",
        "max_attempts",
        "welcome_message",
        "welcome_delete_after_secs",
        "delivery_mode",
        "default_mute_hours",
        "max_delete_messages",
        "add_admin",
        "remove_admin",
    ];

    /// Parse `/config <key> <value>`
    pub fn parse(key: &str, value: &str) -> Result<Self, ConfigError> {
        let value = value.trim();
        match key {
            "timeout_secs" => Ok(Self::TimeoutSecs(parse_number("timeout_secs", value)?)),
            "max_attempts" => Ok(Self::MaxAttempts(parse_number("max_attempts", value)?)),
            "welcome_message" => Ok(Self::WelcomeMessage(value.to_string())),
            "welcome_delete_after_secs" => Ok(Self::WelcomeDeleteAfterSecs(parse_number(
                "welcome_delete_after_secs",
                value,
            )?)),
            "delivery_mode" => value
                .parse()
                .map(Self::DeliveryMode)
                .map_err(|reason| ConfigError::InvalidValue {
                    key: "delivery_mode",
                    reason,
                }),
            "default_mute_hours" => Ok(Self::DefaultMuteHours(parse_number(
                "default_mute_hours",
                value,
            )?)),
            "max_delete_messages" => Ok(Self::MaxDeleteMessages(parse_number(
                "max_delete_messages",
                value,
            )?)),
            "add_admin" => Ok(Self::AddAdmin(parse_user("add_admin", value)?)),
            "remove_admin" => Ok(Self::RemoveAdmin(parse_user("remove_admin", value)?)),
            other => Err(ConfigError::UnknownKey(other.to_string())),
        }
    }

    /// Apply to a copy of the config, then validate the result
    pub fn apply_to(self, config: &mut AppConfig) -> Result<(), ConfigError> {
        match self {
            Self::TimeoutSecs(v) => config.gate.timeout_secs = v,
            Self::MaxAttempts(v) => config.gate.max_attempts = v,
            Self::WelcomeMessage(v) => config.gate.welcome_message = v,
            Self::WelcomeDeleteAfterSecs(v) => config.gate.welcome_delete_after_secs = v,
            Self::DeliveryMode(v) => config.gate.delivery_mode = v,
            Self::DefaultMuteHours(v) => config.moderation.default_mute_hours = v,
            Self::MaxDeleteMessages(v) => config.moderation.max_delete_messages = v,
            Self::AddAdmin(user) => {
                if !config.moderation.admin_user_ids.contains(&user.0) {
                    config.moderation.admin_user_ids.push(user.0);
                }
            }
            Self::RemoveAdmin(user) => config.moderation.admin_user_ids.retain(|id| *id != user.0),
        }
        config.validate()
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key,
        reason: format!("expected a non-negative number, got {value:?}"),
    })
}

fn parse_user(key: &'static str, value: &str) -> Result<UserId, ConfigError> {
    match value.parse::<i64>() {
        Ok(id) if id > 0 => Ok(UserId(id)),
        _ => Err(ConfigError::InvalidValue {
            key,
            reason: format!("expected a numeric user id, got {value:?}"),
        }),
    }
}

type ChangeRequest = (
    ConfigChange,
    oneshot::Sender<Result<Arc<AppConfig>, ConfigError>>,
);

/// Shared read access to the config plus a channel to its owner task
#[derive(Clone)]
pub struct ConfigHandle {
    current: Arc<RwLock<Arc<AppConfig>>>,
    tx: mpsc::Sender<ChangeRequest>,
}

impl ConfigHandle {
    /// Start the owner task. Changes are written back to `persist_path` when set.
    pub fn spawn(initial: AppConfig, persist_path: Option<PathBuf>) -> Self {
        let current = Arc::new(RwLock::new(Arc::new(initial)));
        let (tx, rx) = mpsc::channel(16);

        tokio::spawn(config_owner(current.clone(), rx, persist_path));

        Self { current, tx }
    }

    /// Snapshot of the current configuration
    pub async fn current(&self) -> Arc<AppConfig> {
        self.current.read().await.clone()
    }

    /// Submit a change and wait for the owner's verdict
    pub async fn apply(&self, change: ConfigChange) -> Result<Arc<AppConfig>, ConfigError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((change, reply_tx))
            .await
            .map_err(|_| ConfigError::OwnerGone)?;
        reply_rx.await.map_err(|_| ConfigError::OwnerGone)?
    }
}

/// Single writer of the configuration
async fn config_owner(
    current: Arc<RwLock<Arc<AppConfig>>>,
    mut rx: mpsc::Receiver<ChangeRequest>,
    persist_path: Option<PathBuf>,
) {
    while let Some((change, reply)) = rx.recv().await {
        let mut next = current.read().await.as_ref().clone();
        let description = format!("{change:?}");

        let result = match change.apply_to(&mut next) {
            Ok(()) => match persist(persist_path.as_deref(), &next).await {
                Ok(()) => {
                    let next = Arc::new(next);
                    *current.write().await = next.clone();
                    tracing::info!(change = %description, "Configuration updated");
                    Ok(next)
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to persist configuration");
                    Err(e)
                }
            },
            Err(e) => {
                tracing::debug!(change = %description, error = %e, "Configuration change rejected");
                Err(e)
            }
        };

        let _ = reply.send(result);
    }

    tracing::debug!("Configuration owner stopped");
}

/// Write to a temp file next to the target, then rename over it
async fn persist(path: Option<&Path>, config: &AppConfig) -> Result<(), ConfigError> {
    let Some(path) = path else {
        return Ok(());
    };

    let body = toml::to_string_pretty(config).map_err(|e| ConfigError::Persist(e.to_string()))?;
    let tmp = path.with_extension("toml.tmp");

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ConfigError::Persist(e.to_string()))?;
    }
    tokio::fs::write(&tmp, body)
        .await
        .map_err(|e| ConfigError::Persist(e.to_string()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| ConfigError::Persist(e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert_ok!(config.validate());
        assert_eq!(config.gate.delivery_mode, DeliveryMode::Private);
        assert_eq!(config.gate.timeout_secs, 300);
        assert_eq!(config.gate.max_attempts, 3);
    }

    #[test]
    fn test_parse_changes() {
        assert_eq!(
            ConfigChange::parse("timeout_secs", "120"),
            Ok(ConfigChange::TimeoutSecs(120))
        );
        assert_eq!(
            ConfigChange::parse("delivery_mode", "in_chat"),
            Ok(ConfigChange::DeliveryMode(DeliveryMode::InChat))
        );
        assert_eq!(
            ConfigChange::parse("welcome_message", "  Hi {name}  "),
            Ok(ConfigChange::WelcomeMessage("Hi {name}".into()))
        );
        assert_eq!(
            ConfigChange::parse("add_admin", "42"),
            Ok(ConfigChange::AddAdmin(UserId(42)))
        );
        assert_eq!(
            ConfigChange::parse("colour", "blue"),
            Err(ConfigError::UnknownKey("colour".into()))
        );
        assert_err!(ConfigChange::parse("max_attempts", "-1"));
        assert_err!(ConfigChange::parse("remove_admin", "@someone"));
    }

    #[test]
    fn test_apply_validates() {
        let mut config = AppConfig::default();
        assert_ok!(ConfigChange::MaxAttempts(5).apply_to(&mut config));
        assert_eq!(config.gate.max_attempts, 5);

        let mut config = AppConfig::default();
        assert_err!(ConfigChange::TimeoutSecs(5).apply_to(&mut config));

        let mut config = AppConfig::default();
        let err = ConfigChange::DefaultMuteHours(1000)
            .apply_to(&mut config)
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "default_mute_hours",
                ..
            }
        ));
    }

    #[test]
    fn test_admin_list_has_no_duplicates() {
        let mut config = AppConfig::default();
        assert_ok!(ConfigChange::AddAdmin(UserId(7)).apply_to(&mut config));
        assert_ok!(ConfigChange::AddAdmin(UserId(7)).apply_to(&mut config));
        assert_eq!(config.moderation.admin_user_ids, vec![7]);
        assert!(config.is_bot_admin(UserId(7)));

        assert_ok!(ConfigChange::RemoveAdmin(UserId(7)).apply_to(&mut config));
        assert!(!config.is_bot_admin(UserId(7)));
    }

    #[test]
    fn test_toml_roundtrip_through_config_crate() {
        let mut config = AppConfig::default();
        config.gate.delivery_mode = DeliveryMode::InChat;
        config.moderation.admin_user_ids = vec![1, 2];

        let body = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(&body, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(parsed, config);
    }

    #[tokio::test]
    async fn test_owner_swaps_snapshot_and_persists() {
        let dir = std::env::temp_dir().join(format!("warden-config-{}", std::process::id()));
        let path = dir.join("warden.toml");
        let handle = ConfigHandle::spawn(AppConfig::default(), Some(path.clone()));

        let before = handle.current().await;
        let after = handle
            .apply(ConfigChange::DeliveryMode(DeliveryMode::InChat))
            .await
            .unwrap();

        assert_eq!(before.gate.delivery_mode, DeliveryMode::Private);
        assert_eq!(after.gate.delivery_mode, DeliveryMode::InChat);
        assert_eq!(handle.current().await.gate.delivery_mode, DeliveryMode::InChat);

        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(written.contains("delivery_mode = \"in_chat\""));
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_owner_rejects_invalid_change() {
        let handle = ConfigHandle::spawn(AppConfig::default(), None);
        let result = handle.apply(ConfigChange::MaxAttempts(0)).await;
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
        assert_eq!(handle.current().await.gate.max_attempts, 3);
    }
}

//! Console configuration system.

use chrono::{DateTime, FixedOffset, Local, Offset, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};

/// Environment variable that overrides `smtp.password`.
pub const SMTP_PASSWORD_ENV: &str = "IMERSAO_SMTP_PASSWORD";

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    /// Rendered as `{{app}}` in notification copy.
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// Wall-clock zone for "today". Absent means the host's local offset.
    #[serde(default)]
    pub timezone_offset_minutes: Option<i32>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
}

fn default_app_name() -> String { "Imersões".into() }
fn default_database_path() -> String { "~/.imersao/console.db".into() }

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            database_path: default_database_path(),
            timezone_offset_minutes: None,
            scheduler: SchedulerConfig::default(),
            smtp: SmtpConfig::default(),
        }
    }
}

impl ConsoleConfig {
    /// Load config from the default path (~/.imersao/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Configuration(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| EngineError::Configuration(format!("Failed to parse config: {e}")))
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| EngineError::Serialization(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the console home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".imersao")
    }

    /// Database path with `~` expanded.
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.database_path).to_string())
    }

    /// The zone "today" is computed in.
    pub fn timezone(&self) -> WallClock {
        self.timezone_offset_minutes
            .and_then(|m| FixedOffset::east_opt(m * 60))
            .map_or(WallClock::Host, WallClock::Fixed)
    }

    /// Secrets from the environment win over the file.
    pub fn apply_env(&mut self) {
        if let Ok(password) = std::env::var(SMTP_PASSWORD_ENV)
            && !password.is_empty()
        {
            self.smtp.password = password;
        }
    }
}

/// Periodic invoker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Upper bound on actions echoed back in a cycle report.
    #[serde(default = "default_max_actions")]
    pub max_actions: usize,
}

fn default_interval_secs() -> u64 { 3600 }
fn default_max_actions() -> usize { 50 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            max_actions: default_max_actions(),
        }
    }
}

/// Outbound SMTP settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(default)]
    pub from_email: String,
    #[serde(default)]
    pub from_name: Option<String>,
    #[serde(default)]
    pub reply_to: Option<String>,
}

fn default_smtp_port() -> u16 { 587 }

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            from_email: String::new(),
            from_name: None,
            reply_to: None,
        }
    }
}

impl SmtpConfig {
    /// Checks that real sends are possible. Preview runs never call this.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.host.trim().is_empty() {
            missing.push("host");
        }
        if self.username.trim().is_empty() {
            missing.push("username");
        }
        if self.password.is_empty() {
            missing.push("password");
        }
        if self.from_email.trim().is_empty() {
            missing.push("from_email");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Configuration(format!(
                "SMTP not configured: missing {}",
                missing.join(", ")
            )))
        }
    }

    /// `Name <addr>` when a display name is set.
    pub fn from_header(&self) -> String {
        match self.from_name.as_deref().filter(|n| !n.trim().is_empty()) {
            Some(name) => format!("{name} <{}>", self.from_email),
            None => self.from_email.clone(),
        }
    }
}

/// Where the local calendar comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WallClock {
    Fixed(FixedOffset),
    /// Host zone, resolved at each instant so DST changes are picked up.
    Host,
}

impl WallClock {
    pub fn offset_at(&self, at: DateTime<Utc>) -> FixedOffset {
        match self {
            Self::Fixed(offset) => *offset,
            Self::Host => Local.offset_from_utc_datetime(&at.naive_utc()).fix(),
        }
    }
}

//! Engine configuration.
//!
//! # Responsibility
//! - Describe every tunable of the engine in one serde structure.
//! - Load it from TOML, then apply `REMINDLY_*` environment overrides.
//! - Hand typed per-component settings to constructors.
//!
//! # Invariants
//! - Every field has a default; an empty file is a valid configuration.
//! - `validate()` runs on every load path before values reach components.

use crate::delivery::dispatcher::DispatchPolicy;
use crate::normalizer::parse_offset;
use crate::scheduler::due_scheduler::SchedulerConfig;
use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "REMINDLY_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config value `{key}`: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub delivery: DeliverySection,
    #[serde(default)]
    pub alerts: AlertSection,
    #[serde(default)]
    pub telegram: TelegramSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Single operating timezone as `±HH:MM`.
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            utc_offset: default_utc_offset(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("remindly.sqlite3")
}

fn default_utc_offset() -> String {
    "+03:00".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSection {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_delivery_timeout_secs")]
    pub delivery_timeout_secs: u64,
    /// Absent means unbounded retry.
    #[serde(default)]
    pub max_delivery_attempts: Option<u32>,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            delivery_timeout_secs: default_delivery_timeout_secs(),
            max_delivery_attempts: None,
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_delivery_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverySection {
    /// Treat a recipient rejection as permanent (dead-letter) instead of
    /// retrying it every pass.
    #[serde(default)]
    pub permanent_on_rejection: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertSection {
    /// Operator recipient id; alerts are only logged when absent.
    #[serde(default)]
    pub recipient: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelegramSection {
    #[serde(default)]
    pub bot_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Falls back to `default_log_level()` when absent.
    #[serde(default)]
    pub level: Option<String>,
    /// Absolute log directory; callers pick one when absent.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl EngineConfig {
    /// Loads configuration from `path` (when it exists) and the process
    /// environment.
    ///
    /// A missing file is not an error: defaults plus environment apply.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(path) if path.exists() => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                toml::from_str(&text)?
            }
            _ => Self::default(),
        };

        let config = base.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `REMINDLY_*` overrides read through `lookup`.
    ///
    /// Unparseable numeric or boolean overrides are ignored and logged.
    pub fn apply_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(value) = var("DATABASE_PATH") {
            self.engine.database_path = PathBuf::from(value);
        }
        if let Some(value) = var("UTC_OFFSET") {
            self.engine.utc_offset = value;
        }
        if let Some(value) = var("POLL_INTERVAL_SECS") {
            match value.parse() {
                Ok(secs) => self.scheduler.poll_interval_secs = secs,
                Err(_) => ignored_override("POLL_INTERVAL_SECS"),
            }
        }
        if let Some(value) = var("DELIVERY_TIMEOUT_SECS") {
            match value.parse() {
                Ok(secs) => self.scheduler.delivery_timeout_secs = secs,
                Err(_) => ignored_override("DELIVERY_TIMEOUT_SECS"),
            }
        }
        if let Some(value) = var("MAX_DELIVERY_ATTEMPTS") {
            if value.trim().is_empty() || value.eq_ignore_ascii_case("unbounded") {
                self.scheduler.max_delivery_attempts = None;
            } else {
                match value.parse() {
                    Ok(max) => self.scheduler.max_delivery_attempts = Some(max),
                    Err(_) => ignored_override("MAX_DELIVERY_ATTEMPTS"),
                }
            }
        }
        if let Some(value) = var("PERMANENT_ON_REJECTION") {
            match parse_bool(&value) {
                Some(flag) => self.delivery.permanent_on_rejection = flag,
                None => ignored_override("PERMANENT_ON_REJECTION"),
            }
        }
        if let Some(value) = var("ALERT_RECIPIENT") {
            self.alerts.recipient = Some(value).filter(|v| !v.trim().is_empty());
        }
        if let Some(value) = var("TELEGRAM_TOKEN") {
            self.telegram.bot_token = Some(value).filter(|v| !v.trim().is_empty());
        }
        if let Some(value) = var("LOG_LEVEL") {
            self.logging.level = Some(value);
        }
        if let Some(value) = var("LOG_DIR") {
            self.logging.dir = Some(PathBuf::from(value));
        }

        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if parse_offset(&self.engine.utc_offset).is_none() {
            return Err(ConfigError::Invalid {
                key: "engine.utc_offset",
                message: format!("expected ±HH:MM, got `{}`", self.engine.utc_offset),
            });
        }
        if self.scheduler.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "scheduler.poll_interval_secs",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.scheduler.delivery_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "scheduler.delivery_timeout_secs",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.scheduler.max_delivery_attempts == Some(0) {
            return Err(ConfigError::Invalid {
                key: "scheduler.max_delivery_attempts",
                message: "must be greater than zero when set".to_string(),
            });
        }
        Ok(())
    }

    /// Operating timezone. Falls back to UTC if called on an unvalidated
    /// config with a bad offset.
    pub fn operating_offset(&self) -> FixedOffset {
        parse_offset(&self.engine.utc_offset).unwrap_or_else(|| Utc.fix())
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            poll_interval: Duration::from_secs(self.scheduler.poll_interval_secs),
            max_delivery_attempts: self.scheduler.max_delivery_attempts,
        }
    }

    pub fn dispatch_policy(&self) -> DispatchPolicy {
        DispatchPolicy {
            delivery_timeout: Duration::from_secs(self.scheduler.delivery_timeout_secs),
            permanent_on_rejection: self.delivery.permanent_on_rejection,
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn ignored_override(name: &str) {
    log::warn!(
        "event=config_override module=config status=skip var={ENV_PREFIX}{name} reason=unparseable"
    );
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, EngineConfig};
    use std::collections::HashMap;
    use std::time::Duration;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.scheduler.poll_interval_secs, 30);
        assert_eq!(config.scheduler.max_delivery_attempts, None);
        assert!(!config.delivery.permanent_on_rejection);
        assert_eq!(config.operating_offset().local_minus_utc(), 3 * 3600);
    }

    #[test]
    fn parses_sections() {
        let config = EngineConfig::from_toml_str(
            r#"
            [engine]
            utc_offset = "+01:00"
            database_path = "/var/lib/remindly/db.sqlite3"

            [scheduler]
            poll_interval_secs = 5
            delivery_timeout_secs = 3
            max_delivery_attempts = 10

            [delivery]
            permanent_on_rejection = true

            [alerts]
            recipient = "570278582"
            "#,
        )
        .unwrap();

        let scheduler = config.scheduler_config();
        assert_eq!(scheduler.poll_interval, Duration::from_secs(5));
        assert_eq!(scheduler.max_delivery_attempts, Some(10));
        let policy = config.dispatch_policy();
        assert_eq!(policy.delivery_timeout, Duration::from_secs(3));
        assert!(policy.permanent_on_rejection);
        assert_eq!(config.alerts.recipient.as_deref(), Some("570278582"));
    }

    #[test]
    fn env_overrides_take_precedence() {
        let config = EngineConfig::default().apply_env_overrides(env(&[
            ("REMINDLY_POLL_INTERVAL_SECS", "7"),
            ("REMINDLY_MAX_DELIVERY_ATTEMPTS", "3"),
            ("REMINDLY_PERMANENT_ON_REJECTION", "yes"),
            ("REMINDLY_TELEGRAM_TOKEN", "abc"),
            ("REMINDLY_ALERT_RECIPIENT", ""),
        ]));
        assert_eq!(config.scheduler.poll_interval_secs, 7);
        assert_eq!(config.scheduler.max_delivery_attempts, Some(3));
        assert!(config.delivery.permanent_on_rejection);
        assert_eq!(config.telegram.bot_token.as_deref(), Some("abc"));
        assert_eq!(config.alerts.recipient, None);
    }

    #[test]
    fn unparseable_override_is_ignored() {
        let config = EngineConfig::default()
            .apply_env_overrides(env(&[("REMINDLY_POLL_INTERVAL_SECS", "soon")]));
        assert_eq!(config.scheduler.poll_interval_secs, 30);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let err = EngineConfig::from_toml_str("[engine]\nutc_offset = \"Moscow\"").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "engine.utc_offset", .. }));

        let err =
            EngineConfig::from_toml_str("[scheduler]\npoll_interval_secs = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "scheduler.poll_interval_secs", .. }));

        let err =
            EngineConfig::from_toml_str("[scheduler]\nmax_delivery_attempts = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = EngineConfig::load(Some(path.as_path())).unwrap();
        assert_eq!(config.engine.utc_offset.len(), 6);
    }
}

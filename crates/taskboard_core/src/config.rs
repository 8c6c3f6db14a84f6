//! Board configuration loaded from TOML.
//!
//! # Invariants
//! - A missing config file yields defaults, never an error.
//! - Timeouts, limits and capacities are non-zero after `validate`.

use crate::logging::default_log_level;
use crate::relay::broadcast::{RelayLimits, DEFAULT_MAX_SESSIONS, DEFAULT_QUEUE_CAPACITY};
use crate::service::activity_recorder::{ACTIVITY_LIMIT_MAX, DEFAULT_ACTIVITY_LIMIT};
use crate::service::board_service::BoardOptions;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_DB_FILE: &str = "taskboard.sqlite3";
const DEFAULT_EDIT_LOCK_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    pub db_path: PathBuf,
    pub log_level: String,
    /// File logging is skipped when unset.
    pub log_dir: Option<PathBuf>,
    pub edit_lock_timeout_secs: u64,
    pub activity_default_limit: u32,
    pub relay_queue_capacity: usize,
    pub relay_max_sessions: usize,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_FILE),
            log_level: default_log_level().to_string(),
            log_dir: None,
            edit_lock_timeout_secs: DEFAULT_EDIT_LOCK_TIMEOUT_SECS,
            activity_default_limit: DEFAULT_ACTIVITY_LIMIT,
            relay_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            relay_max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }
}

impl BoardConfig {
    /// Parses and validates a TOML document. Missing keys take defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.edit_lock_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "edit_lock_timeout_secs",
                reason: "must be > 0".to_string(),
            });
        }
        if self.activity_default_limit == 0 || self.activity_default_limit > ACTIVITY_LIMIT_MAX {
            return Err(ConfigError::Invalid {
                field: "activity_default_limit",
                reason: format!("must be within 1..={ACTIVITY_LIMIT_MAX}"),
            });
        }
        if self.relay_queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "relay_queue_capacity",
                reason: "must be > 0".to_string(),
            });
        }
        if self.relay_max_sessions == 0 {
            return Err(ConfigError::Invalid {
                field: "relay_max_sessions",
                reason: "must be > 0".to_string(),
            });
        }
        Ok(())
    }

    pub fn edit_lock_timeout(&self) -> Duration {
        Duration::from_secs(self.edit_lock_timeout_secs)
    }

    pub fn board_options(&self) -> BoardOptions {
        BoardOptions {
            edit_lock_timeout: self.edit_lock_timeout(),
            activity_default_limit: self.activity_default_limit,
        }
    }

    pub fn relay_limits(&self) -> Result<RelayLimits, ConfigError> {
        RelayLimits::new(self.relay_max_sessions, self.relay_queue_capacity).map_err(|err| {
            ConfigError::Invalid {
                field: "relay",
                reason: err.to_string(),
            }
        })
    }
}

/// Loads config from `path`, falling back to defaults when it does not exist.
pub fn load_config(path: impl AsRef<Path>) -> Result<BoardConfig, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(BoardConfig::default());
    }
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    BoardConfig::from_toml_str(&raw)
}

#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse(toml::de::Error),
    Invalid {
        field: &'static str,
        reason: String,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "failed to parse config: {err}"),
            Self::Invalid { field, reason } => write!(f, "invalid config `{field}`: {reason}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Read { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Invalid { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{load_config, BoardConfig, ConfigError};
    use std::time::Duration;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, BoardConfig::default());
        assert_eq!(config.edit_lock_timeout(), Duration::from_secs(30));
        assert_eq!(config.activity_default_limit, 20);
    }

    #[test]
    fn partial_document_keeps_other_defaults() {
        let config = BoardConfig::from_toml_str(
            r#"
db_path = "/var/lib/board.sqlite3"
edit_lock_timeout_secs = 45
"#,
        )
        .unwrap();
        assert_eq!(config.edit_lock_timeout(), Duration::from_secs(45));
        assert_eq!(config.relay_queue_capacity, 256);
        assert_eq!(config.board_options().edit_lock_timeout.as_secs(), 45);
    }

    #[test]
    fn zero_values_are_rejected() {
        let err = BoardConfig::from_toml_str("relay_queue_capacity = 0").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "relay_queue_capacity",
                ..
            }
        ));
        assert!(BoardConfig::from_toml_str("activity_default_limit = 101").is_err());
        assert!(matches!(
            BoardConfig::from_toml_str("edit_lock_timeout_secs = \"soon\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn file_on_disk_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("board.toml");
        std::fs::write(&path, "log_level = \"warn\"\nrelay_max_sessions = 8\n").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.relay_limits().unwrap().max_sessions, 8);
    }
}

//! Settings file
//!
//! TOML with three sections. Every field has a default, so a missing file
//! and an empty file both give the default configuration.
//!
//! ```toml
//! [storage]
//! data_dir = "/var/lib/scanvault"
//! soft_limit_bytes = 4194304
//! min_retained = 10
//! emergency_retained = 5
//! history_max = 50
//! session_capacity_bytes = 268435456
//!
//! [runner]
//! tool_path = "/usr/local/bin/nmap"
//! max_buffer_bytes = 104857600
//! env = { NMAPDIR = "/opt/nmap/share" }
//!
//! [scan]
//! default_timing = 4
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::{
    APP_DIR_NAME, DEFAULT_EMERGENCY_RETAINED, DEFAULT_HISTORY_MAX, DEFAULT_MAX_BUFFER_BYTES,
    DEFAULT_MIN_RETAINED, DEFAULT_SESSION_CAPACITY_BYTES, DEFAULT_SOFT_LIMIT_BYTES,
    DEFAULT_TIMING_LEVEL, MAX_TIMING_LEVEL,
};
use crate::errors::ConfigError;
use crate::store::EvictionPolicy;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub storage: StorageSettings,
    pub runner: RunnerSettings,
    pub scan: ScanSettings,
}

/// Durable tier location and size rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSettings {
    /// Directory for the durable tier; platform data dir when unset
    pub data_dir: Option<PathBuf>,
    pub soft_limit_bytes: usize,
    pub min_retained: usize,
    pub emergency_retained: usize,
    pub history_max: usize,
    /// Hard cap on the durable directory, mimicking a quota-limited backend
    pub durable_capacity_bytes: Option<usize>,
    /// Cap on the in-memory session tier that keeps raw output
    pub session_capacity_bytes: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: None,
            soft_limit_bytes: DEFAULT_SOFT_LIMIT_BYTES,
            min_retained: DEFAULT_MIN_RETAINED,
            emergency_retained: DEFAULT_EMERGENCY_RETAINED,
            history_max: DEFAULT_HISTORY_MAX,
            durable_capacity_bytes: None,
            session_capacity_bytes: DEFAULT_SESSION_CAPACITY_BYTES,
        }
    }
}

impl StorageSettings {
    pub fn eviction_policy(&self) -> EvictionPolicy {
        EvictionPolicy {
            soft_limit_bytes: self.soft_limit_bytes,
            min_retained: self.min_retained,
            emergency_retained: self.emergency_retained,
        }
    }
}

/// Scanner process settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunnerSettings {
    /// Skips discovery when set
    pub tool_path: Option<String>,
    pub max_buffer_bytes: usize,
    /// Extra environment for the scanner process
    pub env: BTreeMap<String, String>,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            tool_path: None,
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
            env: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanSettings {
    /// Timing template used when `--timing` is not given
    pub default_timing: u8,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            default_timing: DEFAULT_TIMING_LEVEL,
        }
    }
}

impl AppConfig {
    /// Load and validate a settings file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: AppConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, else the default location if it exists, else defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load_from_file(path);
        }
        match Self::default_config_path() {
            Ok(default) if default.exists() => Self::load_from_file(&default),
            Ok(_) => Ok(Self::default()),
            Err(e) => {
                log::debug!("{}; using default configuration", e);
                Ok(Self::default())
            }
        }
    }

    /// `<config_dir>/scanvault/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR_NAME).join("config.toml"))
            .ok_or(ConfigError::NoPlatformDir("configuration"))
    }

    /// Configured data dir, or `<data_dir>/scanvault`
    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.storage.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::data_dir()
                .map(|dir| dir.join(APP_DIR_NAME))
                .ok_or(ConfigError::NoPlatformDir("data")),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let storage = &self.storage;
        if storage.soft_limit_bytes == 0 {
            return Err(invalid("storage.soft_limit_bytes", "must be greater than 0"));
        }
        if storage.min_retained == 0 {
            return Err(invalid("storage.min_retained", "must be at least 1"));
        }
        if storage.emergency_retained == 0 {
            return Err(invalid("storage.emergency_retained", "must be at least 1"));
        }
        if storage.session_capacity_bytes == 0 {
            return Err(invalid("storage.session_capacity_bytes", "must be greater than 0"));
        }
        if storage.history_max == 0 {
            return Err(invalid("storage.history_max", "must be at least 1"));
        }
        if self.runner.max_buffer_bytes == 0 {
            return Err(invalid("runner.max_buffer_bytes", "must be greater than 0"));
        }
        if self.scan.default_timing > MAX_TIMING_LEVEL {
            return Err(invalid(
                "scan.default_timing",
                &format!("must be between 0 and {}", MAX_TIMING_LEVEL),
            ));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

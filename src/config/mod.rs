//! Runtime configuration.
//!
//! Resolution order, later sources winning:
//! 1. built-in defaults
//! 2. `kernel-bridge.toml` in the working directory (or an explicit file)
//! 3. `KERNEL_BRIDGE_TARGET`, `KERNEL_BRIDGE_MAX_TEXTURE_WIDTH`,
//!    `KERNEL_BRIDGE_LOG`
//!
//! ```toml
//! target = "native"
//! max-texture-width = 4096
//! power-preference = "high-performance"
//! log-filter = "warn,kernel_bridge=debug"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::addressing::DEFAULT_MAX_TEXTURE_WIDTH;
use crate::codegen::Target;
use crate::error::ConfigError;

/// File looked up in the working directory.
pub const CONFIG_FILE: &str = "kernel-bridge.toml";

pub const ENV_TARGET: &str = "KERNEL_BRIDGE_TARGET";
pub const ENV_MAX_TEXTURE_WIDTH: &str = "KERNEL_BRIDGE_MAX_TEXTURE_WIDTH";
pub const ENV_LOG: &str = "KERNEL_BRIDGE_LOG";

/// Default `tracing` filter for the binary.
pub const DEFAULT_LOG_FILTER: &str = "warn,kernel_bridge=info";

/// Which adapter to ask for when several are present.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PowerPreference {
    LowPower,
    #[default]
    HighPerformance,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Target used when a command does not name one.
    pub target: Target,
    /// Widest texture the emulated target creates.
    pub max_texture_width: u32,
    pub power_preference: PowerPreference,
    /// `tracing` filter directives.
    pub log_filter: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            target: Target::Native,
            max_texture_width: DEFAULT_MAX_TEXTURE_WIDTH,
            power_preference: PowerPreference::default(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Read a TOML config file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults, then `file` (or `kernel-bridge.toml` if it exists), then
    /// the process environment.
    pub fn resolve(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match file {
            Some(path) => Self::load(path)?,
            None if Path::new(CONFIG_FILE).is_file() => Self::load(Path::new(CONFIG_FILE))?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        tracing::debug!(?config, "resolved runtime config");
        Ok(config)
    }

    /// Apply environment-style overrides fetched through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_TARGET) {
            self.target = Target::from_name(&value).ok_or_else(|| ConfigError::Invalid {
                key: ENV_TARGET.to_string(),
                value: value.clone(),
            })?;
        }
        if let Some(value) = lookup(ENV_MAX_TEXTURE_WIDTH) {
            self.max_texture_width =
                value.trim().parse().map_err(|_| ConfigError::Invalid {
                    key: ENV_MAX_TEXTURE_WIDTH.to_string(),
                    value: value.clone(),
                })?;
        }
        if let Some(value) = lookup(ENV_LOG) {
            self.log_filter = value;
        }
        self.validate()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_texture_width == 0 {
            return Err(ConfigError::Invalid {
                key: "max-texture-width".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

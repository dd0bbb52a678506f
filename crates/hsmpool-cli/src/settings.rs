//! Layered settings: built-in defaults, an optional TOML file, then `HSMPOOL_*` variables.
//!
//! Nested keys use a double underscore in the environment, e.g.
//! `HSMPOOL_POOL__DEFAULT_KEY_GROUP=3` or `HSMPOOL_LOGGING__JSON=true`.

use std::collections::HashMap;
use std::path::Path;

use config::{Config, ConfigError, Environment, File, FileFormat};
use hsmpool::PoolConfig;
use hsmpool_driver::KeyInfo;
use hsmpool_driver::sim::SimulatedUnit;
use serde::{Deserialize, Serialize};

/// Prefix of the environment variables read by [`Settings::load`]
pub const ENV_PREFIX: &str = "HSMPOOL";

/// Log output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is not set
    pub level: String,
    /// Emit JSON lines instead of text
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Everything the command line needs to build a pool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Pool configuration
    pub pool: PoolConfig,
    /// Log output
    pub logging: LoggingSettings,
    /// Simulated rack; empty selects [`Settings::demo_rack`]
    pub units: Vec<SimulatedUnit>,
}

impl Settings {
    /// Load settings from `path` (if any) and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, None)
    }

    /// Like [`Settings::load`], reading variables from `env` instead of the process
    /// environment when given
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }
        builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?
            .try_deserialize()
    }

    /// Units to simulate
    pub fn rack(&self) -> Vec<SimulatedUnit> {
        if self.units.is_empty() {
            Self::demo_rack()
        } else {
            self.units.clone()
        }
    }

    /// Two units sharing group 1, each with one group of its own
    pub fn demo_rack() -> Vec<SimulatedUnit> {
        vec![
            SimulatedUnit::new(0x0001_0203)
                .version(2)
                .key(KeyInfo::in_group(0))
                .key(KeyInfo::in_group(1))
                .key(KeyInfo::in_group(2))
                .respond("0084000008", "01020304050607089000")
                .respond("80CA4F0000", "00000000C10800009000"),
            SimulatedUnit::new(0x0001_0204)
                .version(2)
                .key(KeyInfo::in_group(1))
                .key(KeyInfo::in_group(10)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hsmpool_driver::KeyGroup;

    #[test]
    fn test_defaults_without_sources() {
        let settings = Settings::load_with_env(None, Some(HashMap::new())).unwrap();
        assert_eq!(settings.pool, PoolConfig::default());
        assert_eq!(settings.logging, LoggingSettings::default());
        assert!(settings.units.is_empty());
        assert_eq!(settings.rack().len(), 2);
    }

    #[test]
    fn test_environment_overrides() {
        let env = HashMap::from([
            ("HSMPOOL_POOL__DEFAULT_KEY_GROUP".to_string(), "7".to_string()),
            ("HSMPOOL_LOGGING__JSON".to_string(), "true".to_string()),
        ]);
        let settings = Settings::load_with_env(None, Some(env)).unwrap();
        assert_eq!(settings.pool.default_key_group, KeyGroup(7));
        assert!(settings.logging.json);
    }
}

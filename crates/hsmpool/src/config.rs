//! Pool configuration
//!
//! ```
//! use hsmpool::config::PoolConfigBuilder;
//! use hsmpool_driver::KeyGroup;
//!
//! let config = PoolConfigBuilder::new()
//!     .name("SamPool").unwrap()
//!     .default_key_group(KeyGroup(1))
//!     .dump_key_inventory(false)
//!     .build();
//!
//! assert_eq!(config.name, "SamPool");
//! assert_eq!(config.default_key_group, KeyGroup(1));
//! assert!(PoolConfigBuilder::new().name("  ").is_err());
//! ```

use hsmpool_driver::KeyGroup;
use serde::{Deserialize, Serialize};

/// Pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Name reported by the pool
    pub name: String,
    /// Group used when the caller gives no reference
    pub default_key_group: KeyGroup,
    /// Dump every unit's key inventory at debug level during initialization
    pub dump_key_inventory: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: crate::PLUGIN_NAME.to_string(),
            default_key_group: KeyGroup::DEFAULT,
            dump_key_inventory: true,
        }
    }
}

/// Builder for [`PoolConfig`]
#[derive(Debug, Default)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    /// Start from the default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pool name
    pub fn name(mut self, name: impl Into<String>) -> Result<Self, String> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err("Pool name cannot be empty".to_string());
        }
        self.config.name = name;
        Ok(self)
    }

    /// Set the group used when no reference is given
    #[must_use]
    pub const fn default_key_group(mut self, group: KeyGroup) -> Self {
        self.config.default_key_group = group;
        self
    }

    /// Enable or disable the key inventory dump
    #[must_use]
    pub const fn dump_key_inventory(mut self, enabled: bool) -> Self {
        self.config.dump_key_inventory = enabled;
        self
    }

    /// Build the configuration
    #[must_use]
    pub fn build(self) -> PoolConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.name, crate::PLUGIN_NAME);
        assert_eq!(config.default_key_group, KeyGroup(0));
        assert!(config.dump_key_inventory);
    }

    #[test]
    fn test_partial_deserialization() {
        let config: PoolConfig = serde_json::from_str(r#"{ "default_key_group": 4 }"#).unwrap();
        assert_eq!(config.default_key_group, KeyGroup(4));
        assert_eq!(config.name, crate::PLUGIN_NAME);
    }
}

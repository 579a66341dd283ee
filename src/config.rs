//! Pool configuration
//!
//! Loaded from TOML, optionally layered with `TILEPOOL_*` environment
//! variables:
//!
//! ```toml
//! max_bytes = 268435456
//! overflow_factor = 1.2
//! initial_slots = 1024
//! growth_factor = 1.5
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "TILEPOOL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Memory budget in bytes
    pub max_bytes: u64,
    /// Slack over the budget tolerated before recency is ignored
    pub overflow_factor: f64,
    /// Slots allocated up front
    pub initial_slots: usize,
    /// Table growth multiplier
    pub growth_factor: f64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_bytes: 256 * 1024 * 1024,
            overflow_factor: 1.2,
            initial_slots: 1024,
            growth_factor: 1.5,
        }
    }
}

impl PoolConfig {
    /// Default configuration with the given budget
    pub fn with_max_bytes(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            ..Self::default()
        }
    }

    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| Error::Config(format!("Invalid pool configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an optional TOML file, then apply `TILEPOOL_*` overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }
        builder =
            builder.add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true));

        let config: Self = builder
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| Error::Config(format!("Failed to load pool configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_bytes == 0 {
            return Err(Error::Config("max_bytes must be positive".to_string()));
        }
        if !(self.overflow_factor >= 1.0) {
            return Err(Error::Config(format!(
                "overflow_factor must be at least 1.0, got {}",
                self.overflow_factor
            )));
        }
        if self.initial_slots == 0 {
            return Err(Error::Config("initial_slots must be positive".to_string()));
        }
        if !(self.growth_factor > 1.0) {
            return Err(Error::Config(format!(
                "growth_factor must be greater than 1.0, got {}",
                self.growth_factor
            )));
        }
        Ok(())
    }
}

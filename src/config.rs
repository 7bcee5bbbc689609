//! Chain configuration

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::CUTOFF_AGE;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse chain config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("cutoff_age must be at least 1")]
    ZeroCutoffAge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// How many heights below the tallest block a parent may sit and still
    /// be extended. Nodes further behind are pruned.
    pub cutoff_age: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            cutoff_age: CUTOFF_AGE,
        }
    }
}

impl ChainConfig {
    /// Parse from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: ChainConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cutoff_age == 0 {
            return Err(ConfigError::ZeroCutoffAge);
        }
        Ok(())
    }
}

//! Runtime configuration, read from TOML with environment overrides
use std::{env, path::Path, path::PathBuf};

use serde::Deserialize;

use super::error::ConfigError;
use super::pricing::PricingRule;

#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub pricing: PricingRule,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    // throwaway database removed on drop, for tests and demos
    pub temporary: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("cargo.db"),
            temporary: false,
        }
    }
}

impl DatabaseConfig {
    pub fn sled_config(&self) -> sled::Config {
        sled::Config::new()
            .path(&self.path)
            .temporary(self.temporary)
    }
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Overrides fields from `CARGO_DB_PATH`, `CARGO_RATE_PER_KG_CENTS` and
    /// `CARGO_MAX_WEIGHT_KG` when they are set.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_vars(|key| env::var(key).ok())
    }

    fn apply_vars(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(path) = var("CARGO_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(rate) = var("CARGO_RATE_PER_KG_CENTS") {
            self.pricing.rate_per_kg_cents = rate
                .parse()
                .map_err(|_| ConfigError::InvalidEnv("CARGO_RATE_PER_KG_CENTS"))?;
        }
        if let Some(max) = var("CARGO_MAX_WEIGHT_KG") {
            self.pricing.max_weight_kg = max
                .parse()
                .map_err(|_| ConfigError::InvalidEnv("CARGO_MAX_WEIGHT_KG"))?;
        }
        self.validate()
    }

    // a NaN bound would let every weight through, a non-positive one none
    fn validate(self) -> Result<Self, ConfigError> {
        let max = self.pricing.max_weight_kg;
        if !max.is_finite() || max <= 0.0 {
            return Err(ConfigError::InvalidValue("max_weight_kg"));
        }
        Ok(self)
    }
}

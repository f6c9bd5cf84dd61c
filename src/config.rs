//! Process-wide configuration of the connection engine

use std::env;
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Page size limits applied at plan time
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Page size used when neither `first` nor `last` is given
    pub default_page_size: u32,

    /// Largest accepted `first`/`last`; larger requests are rejected
    pub max_page_size: u32,

    pub loader: LoaderConfig,
}

/// Batching window of the entity loader
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Cooperative yield points the dispatcher waits before collecting a batch
    pub batch_yields: u32,

    /// Keys per underlying multi-id fetch; larger batches are split
    pub max_batch_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            default_page_size: 10,
            max_page_size: 100,
            loader: LoaderConfig::default(),
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_yields: 1,
            max_batch_size: 100,
        }
    }
}

impl ConnectionConfig {
    /// Load configuration from environment variables, falling back to defaults
    ///
    /// - `CONNECTION_DEFAULT_PAGE_SIZE`
    /// - `CONNECTION_MAX_PAGE_SIZE`
    /// - `LOADER_BATCH_YIELDS`
    /// - `LOADER_MAX_BATCH_SIZE`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with variables read through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            default_page_size: parse_or(
                "CONNECTION_DEFAULT_PAGE_SIZE",
                lookup("CONNECTION_DEFAULT_PAGE_SIZE"),
                defaults.default_page_size,
            )?,
            max_page_size: parse_or(
                "CONNECTION_MAX_PAGE_SIZE",
                lookup("CONNECTION_MAX_PAGE_SIZE"),
                defaults.max_page_size,
            )?,
            loader: LoaderConfig {
                batch_yields: parse_or(
                    "LOADER_BATCH_YIELDS",
                    lookup("LOADER_BATCH_YIELDS"),
                    defaults.loader.batch_yields,
                )?,
                max_batch_size: parse_or(
                    "LOADER_MAX_BATCH_SIZE",
                    lookup("LOADER_MAX_BATCH_SIZE"),
                    defaults.loader.max_batch_size,
                )?,
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_page_size == 0 {
            return Err(ConfigError::Invalid(
                "max_page_size must be greater than 0".to_string(),
            ));
        }
        if self.default_page_size > self.max_page_size {
            return Err(ConfigError::Invalid(format!(
                "default_page_size ({}) exceeds max_page_size ({})",
                self.default_page_size, self.max_page_size
            )));
        }
        if self.loader.max_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "loader.max_batch_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_or<T: FromStr>(name: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError> {
    match value {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        None => Ok(default),
    }
}

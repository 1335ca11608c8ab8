//! Configuration management for fetchtree
//!
//! Settings are layered, lowest priority first:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. `.env` file
//! 4. Environment variables
//!
//! # Usage
//!
//! ```no_run
//! use fetchtree::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Downloading into: {}", config.downloads.directory.display());
//! ```
//!
//! # Environment Variables
//!
//! Any key can be overridden with `FETCHTREE__<section>__<key>`, e.g.
//! `FETCHTREE__DOWNLOADS__MAX_CONCURRENT=8` or
//! `FETCHTREE__SERVER__BIND_ADDR=127.0.0.1:9000`.
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/fetchtree.toml`.
//! This can be overridden using the `FETCHTREE_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use crate::humanize::ByteSize;
pub use models::{Config, DownloadsConfig, FeedConfig, RemoteConfig, ServerConfig};
pub use validation::{MAX_RETRY_ATTEMPTS, ValidationError};

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),

    #[error("Failed to render configuration: {0}")]
    RenderError(#[from] toml::ser::Error),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// # Errors
    ///
    /// Returns an error if the file is malformed or a value fails validation.
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let config = sources::load_from_sources(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Re-check after command-line overrides have been applied.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validation::validate(self)
    }

    /// Effective configuration as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

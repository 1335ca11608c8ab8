use reqwest::Url;
use thiserror::Error;

use super::models::Config;

pub const MAX_RETRY_ATTEMPTS: u32 = 16;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("downloads.max_concurrent must be at least 1")]
    NoConcurrency,

    #[error("downloads.max_retry_attempts ({actual}) exceeds limit of {limit}")]
    TooManyRetries { actual: u32, limit: u32 },

    #[error("downloads.directory must not be empty")]
    EmptyDownloadDirectory,

    #[error("{field} must be positive")]
    ZeroValue { field: &'static str },

    #[error("remote.allowed_prefixes entry '{prefix}' is not an http(s) URL")]
    InvalidPrefix { prefix: String },
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_downloads(config)?;
    validate_feed(config)?;
    validate_remote(config)?;
    Ok(())
}

fn positive(value: u64, field: &'static str) -> Result<(), ValidationError> {
    if value == 0 {
        return Err(ValidationError::ZeroValue { field });
    }
    Ok(())
}

fn validate_downloads(config: &Config) -> Result<(), ValidationError> {
    let downloads = &config.downloads;

    if downloads.max_concurrent == 0 {
        return Err(ValidationError::NoConcurrency);
    }
    if downloads.max_retry_attempts > MAX_RETRY_ATTEMPTS {
        return Err(ValidationError::TooManyRetries {
            actual: downloads.max_retry_attempts,
            limit: MAX_RETRY_ATTEMPTS,
        });
    }
    if downloads.directory.as_os_str().is_empty() {
        return Err(ValidationError::EmptyDownloadDirectory);
    }

    positive(downloads.retry_base_delay_ms, "downloads.retry_base_delay_ms")?;
    positive(downloads.progress_interval_ms, "downloads.progress_interval_ms")?;
    positive(downloads.write_buffer.as_u64(), "downloads.write_buffer")?;
    Ok(())
}

fn validate_feed(config: &Config) -> Result<(), ValidationError> {
    positive(config.feed.coalesce_window_ms, "feed.coalesce_window_ms")?;
    positive(config.feed.event_capacity as u64, "feed.event_capacity")?;
    Ok(())
}

fn validate_remote(config: &Config) -> Result<(), ValidationError> {
    positive(config.remote.connect_timeout_secs, "remote.connect_timeout_secs")?;
    positive(config.remote.listing_timeout_secs, "remote.listing_timeout_secs")?;

    for prefix in &config.remote.allowed_prefixes {
        let valid = Url::parse(prefix)
            .map(|url| matches!(url.scheme(), "http" | "https") && url.has_host())
            .unwrap_or(false);
        if !valid {
            return Err(ValidationError::InvalidPrefix {
                prefix: prefix.clone(),
            });
        }
    }
    Ok(())
}

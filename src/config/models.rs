use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::EngineOptions;
use crate::humanize::ByteSize;
use crate::remote::HttpConfig;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub downloads: DownloadsConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Download engine settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownloadsConfig {
    #[serde(default = "default_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    /// Initial state of the runtime verification toggle
    #[serde(default = "default_true")]
    pub verify: bool,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    #[serde(default = "default_write_buffer")]
    pub write_buffer: ByteSize,
}

impl Default for DownloadsConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            max_concurrent: default_max_concurrent(),
            max_retry_attempts: default_max_retry_attempts(),
            verify: true,
            retry_base_delay_ms: default_retry_base_delay_ms(),
            progress_interval_ms: default_progress_interval_ms(),
            write_buffer: default_write_buffer(),
        }
    }
}

fn default_directory() -> PathBuf {
    PathBuf::from("/data")
}

fn default_max_concurrent() -> usize {
    4
}

fn default_max_retry_attempts() -> u32 {
    8
}

fn default_true() -> bool {
    true
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_progress_interval_ms() -> u64 {
    250
}

fn default_write_buffer() -> ByteSize {
    ByteSize(256 * 1024)
}

/// Observer feed settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedConfig {
    /// Window over which task updates are coalesced before broadcast
    #[serde(default = "default_coalesce_window_ms")]
    pub coalesce_window_ms: u64,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            coalesce_window_ms: default_coalesce_window_ms(),
            event_capacity: default_event_capacity(),
        }
    }
}

fn default_coalesce_window_ms() -> u64 {
    50
}

fn default_event_capacity() -> usize {
    1024
}

/// Share source settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RemoteConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_listing_timeout_secs")]
    pub listing_timeout_secs: u64,
    /// Accept `http://` share references
    #[serde(default)]
    pub allow_insecure: bool,
    /// When non-empty, share references must start with one of these
    #[serde(default)]
    pub allowed_prefixes: Vec<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            connect_timeout_secs: default_connect_timeout_secs(),
            listing_timeout_secs: default_listing_timeout_secs(),
            allow_insecure: false,
            allowed_prefixes: Vec::new(),
        }
    }
}

fn default_user_agent() -> String {
    concat!("fetchtree/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_listing_timeout_secs() -> u64 {
    30
}

impl Config {
    pub fn engine_options(&self) -> EngineOptions {
        let downloads = &self.downloads;
        EngineOptions::builder()
            .download_dir(downloads.directory.clone())
            .max_concurrent(downloads.max_concurrent)
            .max_retry_attempts(downloads.max_retry_attempts)
            .verify_by_default(downloads.verify)
            .retry_base_delay(Duration::from_millis(downloads.retry_base_delay_ms))
            .progress_interval(Duration::from_millis(downloads.progress_interval_ms))
            .write_buffer(downloads.write_buffer.as_usize())
            .event_capacity(self.feed.event_capacity)
            .build()
    }

    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            connect_timeout: Duration::from_secs(self.remote.connect_timeout_secs),
            listing_timeout: Duration::from_secs(self.remote.listing_timeout_secs),
            user_agent: self.remote.user_agent.clone(),
        }
    }

    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.feed.coalesce_window_ms)
    }
}

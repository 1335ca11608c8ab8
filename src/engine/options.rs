use std::path::PathBuf;
use std::time::Duration;

use bon::Builder;

use crate::remote::RetryPolicy;

/// Process-wide engine settings, fixed at construction.
///
/// ```
/// use fetchtree::engine::EngineOptions;
///
/// let options = EngineOptions::builder()
///     .download_dir("/data")
///     .max_concurrent(2)
///     .build();
/// assert_eq!(options.max_retry_attempts, 8);
/// ```
#[derive(Debug, Clone, Builder)]
pub struct EngineOptions {
    /// Root every destination must resolve under.
    #[builder(into)]
    pub download_dir: PathBuf,
    #[builder(default = 4)]
    pub max_concurrent: usize,
    #[builder(default = 8)]
    pub max_retry_attempts: u32,
    /// Initial value of the runtime verification toggle.
    #[builder(default = true)]
    pub verify_by_default: bool,
    #[builder(default = Duration::from_millis(1000))]
    pub retry_base_delay: Duration,
    #[builder(default = Duration::from_millis(250))]
    pub progress_interval: Duration,
    #[builder(default = 256 * 1024)]
    pub write_buffer: usize,
    /// Capacity of the task event channel.
    #[builder(default = 1024)]
    pub event_capacity: usize,
}

impl EngineOptions {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retry_attempts, self.retry_base_delay)
    }
}

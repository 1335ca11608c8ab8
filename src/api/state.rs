use std::sync::Arc;

use tokio::sync::watch;

use crate::config::Config;
use crate::engine::DownloadManager;
use crate::feed::Feed;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub manager: DownloadManager,
    pub feed: Feed,
    /// Flipped to `true` on shutdown; live sockets close when they see it.
    pub shutdown: Arc<watch::Sender<bool>>,
}

impl AppState {
    /// Must be called within a Tokio runtime (the feed starts immediately).
    pub fn new(config: Config, manager: DownloadManager) -> Self {
        let feed = Feed::spawn(manager.clone(), config.coalesce_window());
        let (shutdown, _) = watch::channel(false);
        Self {
            config: Arc::new(config),
            manager,
            feed,
            shutdown: Arc::new(shutdown),
        }
    }
}

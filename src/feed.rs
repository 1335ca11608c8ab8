//! Observer feed: task events coalesced into periodic batches.
//!
//! Every task snapshot the engine emits lands in a pending batch keyed by
//! task id, so a batch carries only the latest state of each task. The batch
//! is flushed once per window to every subscriber.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

use crate::engine::{DownloadManager, TaskId, TaskSnapshot};

pub const DEFAULT_WINDOW: Duration = Duration::from_millis(50);
const SUBSCRIBER_CAPACITY: usize = 256;

/// Messages pushed to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FeedMessage {
    /// Full task list, sent on connect and after a clear.
    #[serde(rename = "status")]
    Status { tasks: Vec<TaskSnapshot> },

    /// Latest snapshot of every task that changed during the window.
    #[serde(rename = "tasks:update")]
    Update { data: Vec<TaskSnapshot> },
}

#[derive(Debug, Default)]
struct Batch {
    order: Vec<TaskId>,
    latest: HashMap<TaskId, TaskSnapshot>,
}

impl Batch {
    fn push(&mut self, snapshot: TaskSnapshot) {
        if !self.latest.contains_key(&snapshot.id) {
            self.order.push(snapshot.id.clone());
        }
        self.latest.insert(snapshot.id.clone(), snapshot);
    }

    fn take(&mut self) -> Vec<TaskSnapshot> {
        let mut latest = std::mem::take(&mut self.latest);
        std::mem::take(&mut self.order)
            .into_iter()
            .filter_map(|id| latest.remove(&id))
            .collect()
    }

    fn clear(&mut self) {
        self.order.clear();
        self.latest.clear();
    }
}

struct Shared {
    pending: Mutex<Batch>,
    out: broadcast::Sender<FeedMessage>,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, Batch> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn flush(&self) {
        let data = self.pending().take();
        if !data.is_empty() {
            let _ = self.out.send(FeedMessage::Update { data });
        }
    }
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[derive(Clone)]
pub struct Feed {
    manager: DownloadManager,
    shared: Arc<Shared>,
    _pump: Arc<AbortOnDrop>,
}

impl Feed {
    /// Start coalescing the manager's events. Must be called within a Tokio runtime.
    pub fn spawn(manager: DownloadManager, window: Duration) -> Self {
        let (out, _) = broadcast::channel(SUBSCRIBER_CAPACITY);
        let shared = Arc::new(Shared {
            pending: Mutex::new(Batch::default()),
            out,
        });

        let events = manager.subscribe();
        let pump = tokio::spawn(pump(manager.clone(), Arc::clone(&shared), events, window));

        Self {
            manager,
            shared,
            _pump: Arc::new(AbortOnDrop(pump)),
        }
    }

    /// Current full task list.
    pub fn status(&self) -> FeedMessage {
        FeedMessage::Status {
            tasks: self.manager.list_tasks(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedMessage> {
        self.shared.out.subscribe()
    }

    /// Drop the pending batch and push a full status to every observer.
    pub fn reset(&self) {
        let mut pending = self.shared.pending();
        pending.clear();
        let _ = self.shared.out.send(self.status());
    }
}

async fn pump(
    manager: DownloadManager,
    shared: Arc<Shared>,
    mut events: broadcast::Receiver<TaskSnapshot>,
    window: Duration,
) {
    let mut ticker = time::interval(window.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(snapshot) => shared.pending().push(snapshot),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "feed lagged behind task events, sending full status");
                    let mut pending = shared.pending();
                    pending.clear();
                    let _ = shared.out.send(FeedMessage::Status {
                        tasks: manager.list_tasks(),
                    });
                }
                Err(RecvError::Closed) => {
                    shared.flush();
                    debug!("task event channel closed, feed stopped");
                    return;
                }
            },
            _ = ticker.tick() => shared.flush(),
        }
    }
}

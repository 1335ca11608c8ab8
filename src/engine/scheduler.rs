//! Admission control over the pending queue.

use std::sync::Arc;

use chrono::Utc;
use tokio::runtime::Handle;
use tracing::{info, warn};

use super::manager::Shared;
use super::pipeline;
use super::task::{TaskId, TaskStatus};
use crate::remote::StreamControl;

/// A task that just won a slot.
pub(super) struct Admitted {
    pub id: TaskId,
    pub run: u64,
    pub control: StreamControl,
}

/// Frees the slot when the pipeline future completes or is dropped.
struct Slot {
    shared: Arc<Shared>,
    id: TaskId,
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.shared.lock().running.remove(&self.id);
        self.shared.admit();
    }
}

impl Shared {
    /// Start queued tasks while the gate is open and slots are free.
    ///
    /// Runs entirely under the state lock, so concurrent callers can never
    /// admit past the limit. Queue entries that are no longer pending are
    /// dropped; an entry whose previous pipeline is still unwinding waits in
    /// place.
    pub(super) fn admit(self: &Arc<Self>) {
        let limit = self.options.max_concurrent.max(1);
        let admitted = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let mut admitted = Vec::new();
            let mut index = 0;

            while !state.paused && state.running.len() < limit && index < state.queue.len() {
                let id = state.queue[index].clone();
                let pending = state
                    .registry
                    .get(&id)
                    .is_some_and(|task| task.status == TaskStatus::Pending);
                if !pending {
                    state.queue.remove(index);
                    continue;
                }
                if state.running.contains(&id) {
                    index += 1;
                    continue;
                }
                state.queue.remove(index);

                let Some(task) = state.registry.get_mut(&id) else {
                    continue;
                };
                if let Err(err) = task.transition(TaskStatus::Downloading) {
                    warn!(task_id = %id, %err, "admission rejected");
                    continue;
                }
                task.run += 1;
                task.started_at = Some(Utc::now());
                let control = StreamControl::new();
                task.transfer = Some(control.clone());
                self.emit(task);
                info!(task_id = %id, name = %task.name, "download started");

                admitted.push(Admitted {
                    id: id.clone(),
                    run: task.run,
                    control,
                });
                state.running.insert(id);
            }
            admitted
        };

        for job in admitted {
            self.spawn_pipeline(job);
        }
    }

    fn spawn_pipeline(self: &Arc<Self>, job: Admitted) {
        let Ok(runtime) = Handle::try_current() else {
            warn!(task_id = %job.id, "no runtime available, releasing slot");
            self.lock().running.remove(&job.id);
            return;
        };

        let shared = Arc::clone(self);
        runtime.spawn(async move {
            let _slot = Slot {
                shared: shared.clone(),
                id: job.id.clone(),
            };
            pipeline::run(shared, job).await;
        });
    }
}

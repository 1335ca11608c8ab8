use std::collections::{BTreeSet, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::fs;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::EngineError;
use super::options::EngineOptions;
use super::paths::{self, PathError};
use super::registry::TaskRegistry;
use super::session::SessionTracker;
use super::task::{Task, TaskId, TaskSnapshot, TaskStatus, session_of};
use crate::observability::Metrics;
use crate::remote::tree::natural_cmp;
use crate::remote::{RemoteNode, RemoteSource, ResolvedTree};

/// Mutable engine state, always accessed under one lock.
#[derive(Debug, Default)]
pub(super) struct EngineState {
    pub registry: TaskRegistry,
    pub sessions: SessionTracker,
    pub queue: VecDeque<TaskId>,
    /// Ids with a live pipeline; its size is the active transfer count.
    pub running: HashSet<TaskId>,
    pub paused: bool,
}

pub(super) struct Shared {
    pub remote: Arc<dyn RemoteSource>,
    pub options: EngineOptions,
    pub metrics: Arc<Metrics>,
    verify: AtomicBool,
    state: Mutex<EngineState>,
    events: broadcast::Sender<TaskSnapshot>,
}

impl Shared {
    pub fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish a task's current snapshot. Called with the state lock held so
    /// per-task events keep mutation order.
    pub fn emit(&self, task: &Task) {
        let _ = self.events.send(task.snapshot());
    }

    pub fn verify_enabled(&self) -> bool {
        self.verify.load(Ordering::Relaxed)
    }

    /// Release the task's session if nothing in it can still run or be retried.
    pub fn try_clean_session(&self, task_id: &str) {
        let session_id = session_of(task_id);
        let release = {
            let mut guard = self.lock();
            let state = &mut *guard;
            state.sessions.try_release(session_id, &state.registry)
        };
        if release {
            self.release_session(session_id);
        }
    }

    fn release_session(&self, session_id: &str) {
        self.remote.release_session(session_id);
        info!(session_id, "session released");
    }
}

/// Destroy handles and mark an active task cancelled. Caller holds the lock.
fn cancel_locked(shared: &Shared, task: &mut Task) -> bool {
    if !task.status.is_active() {
        return false;
    }
    task.release_handles();
    if let Err(err) = task.transition(TaskStatus::Cancelled) {
        warn!(task_id = %task.id, %err, "cancel rejected");
        return false;
    }
    task.speed = 0;
    shared.emit(task);
    shared.metrics.task_cancelled();
    info!(task_id = %task.id, name = %task.name, "download cancelled");
    true
}

enum Planned {
    Folder(PathBuf),
    File {
        node: Arc<RemoteNode>,
        destination: PathBuf,
    },
}

fn plan_node(
    root: &Path,
    node: Arc<RemoteNode>,
    relative: &Path,
    planned: &mut Vec<Planned>,
) -> Result<(), PathError> {
    let destination = paths::resolve_destination(root, relative, &node.name)?;

    if !node.is_directory {
        planned.push(Planned::File { node, destination });
        return Ok(());
    }

    planned.push(Planned::Folder(destination));
    let mut children = node.children.clone();
    children.sort_by(|a, b| natural_cmp(&a.name, &b.name));
    let inner = relative.join(&node.name);
    for child in children {
        plan_node(root, child, &inner, planned)?;
    }
    Ok(())
}

/// Download orchestration engine.
///
/// Cheap to clone; all clones drive the same registry and scheduler. Methods
/// that may start transfers must be called from within a Tokio runtime.
#[derive(Clone)]
pub struct DownloadManager {
    pub(super) shared: Arc<Shared>,
}

impl DownloadManager {
    pub fn new(remote: Arc<dyn RemoteSource>, options: EngineOptions) -> Self {
        Self::with_metrics(remote, options, Arc::new(Metrics::new()))
    }

    pub fn with_metrics(remote: Arc<dyn RemoteSource>, options: EngineOptions, metrics: Arc<Metrics>) -> Self {
        let (events, _) = broadcast::channel(options.event_capacity.max(1));
        let shared = Shared {
            remote,
            verify: AtomicBool::new(options.verify_by_default),
            options,
            metrics,
            state: Mutex::new(EngineState::default()),
            events,
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Receive a snapshot after every task state change.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskSnapshot> {
        self.shared.events.subscribe()
    }

    pub fn options(&self) -> &EngineOptions {
        &self.shared.options
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.shared.metrics
    }

    pub fn verify_downloads(&self) -> bool {
        self.shared.verify_enabled()
    }

    pub fn set_verify_downloads(&self, enabled: bool) {
        self.shared.verify.store(enabled, Ordering::Relaxed);
        info!(enabled, "download verification toggled");
    }

    /// Resolve a share reference into a browsable tree.
    pub async fn submit(&self, reference: &str) -> Result<ResolvedTree, EngineError> {
        Ok(self.shared.remote.resolve_tree(reference).await?)
    }

    /// Turn remote ids into tasks and start what the concurrency limit allows.
    ///
    /// Folders expand recursively in natural name order. Unknown ids are
    /// skipped. Every destination is checked before any task is created, so a
    /// path-safety violation leaves the registry untouched.
    pub async fn enqueue(&self, file_ids: &[String]) -> Result<Vec<TaskId>, EngineError> {
        let root = &self.shared.options.download_dir;
        let mut planned = Vec::new();
        for id in file_ids {
            let Some(node) = self.shared.remote.lookup_node(id) else {
                warn!(node_id = %id, "unknown remote node, skipping");
                continue;
            };
            let relative = PathBuf::from(self.shared.remote.node_path(id));
            plan_node(root, node, &relative, &mut planned)?;
        }

        let mut task_ids = Vec::new();
        for item in planned {
            match item {
                Planned::Folder(path) => {
                    if let Err(source) = fs::create_dir_all(&path).await {
                        return Err(EngineError::Io { path, source });
                    }
                }
                Planned::File { node, destination } => {
                    let existing = paths::file_len(&destination).await;
                    let partial = paths::file_len(&paths::part_path(&destination)).await;
                    self.register(&node, destination, existing, partial);
                    task_ids.push(node.id.clone());
                }
            }
        }

        self.shared.admit();

        // a session whose files were all present on disk is already done
        let mut seen = BTreeSet::new();
        for id in &task_ids {
            if seen.insert(session_of(id)) {
                self.shared.try_clean_session(id);
            }
        }
        Ok(task_ids)
    }

    fn register(&self, node: &RemoteNode, destination: PathBuf, existing: Option<u64>, partial: Option<u64>) {
        let mut guard = self.shared.lock();
        let state = &mut *guard;

        let previous_run = match state.registry.get(&node.id) {
            Some(task) if task.status.is_active() => {
                debug!(task_id = %node.id, status = %task.status, "task already tracked");
                return;
            }
            Some(task) => task.run,
            None => 0,
        };
        state.sessions.register(&node.id);

        if existing.is_some_and(|len| len >= node.size) {
            let mut task = Task::skipped(node, destination);
            task.run = previous_run;
            self.shared.emit(&task);
            self.shared.metrics.task_skipped();
            info!(task_id = %node.id, name = %node.name, "already downloaded, skipping");
            state.registry.insert(task);
            return;
        }

        let mut task = Task::pending(node, destination);
        task.run = previous_run;
        if let Some(len) = partial {
            task.existing_partial = Some(len);
            task.bytes_downloaded = len.min(node.size);
        }
        self.shared.emit(&task);
        self.shared.metrics.task_enqueued();
        debug!(task_id = %node.id, name = %node.name, "task queued");
        state.registry.insert(task);
        state.queue.push_back(node.id.clone());
    }

    /// Cancel one active task. Terminal tasks are left alone.
    pub fn cancel(&self, id: &str) -> bool {
        let cancelled = {
            let mut guard = self.shared.lock();
            match guard.registry.get_mut(id) {
                Some(task) => cancel_locked(&self.shared, task),
                None => false,
            }
        };
        if cancelled {
            self.shared.try_clean_session(id);
        }
        cancelled
    }

    /// Cancel every active task and drop the queue.
    pub fn cancel_all(&self) -> usize {
        let cancelled: Vec<TaskId> = {
            let mut guard = self.shared.lock();
            let state = &mut *guard;
            state.queue.clear();
            state
                .registry
                .ids()
                .into_iter()
                .filter(|id| {
                    state
                        .registry
                        .get_mut(id)
                        .is_some_and(|task| cancel_locked(&self.shared, task))
                })
                .collect()
        };

        let sessions: BTreeSet<&str> = cancelled.iter().map(|id| session_of(id)).collect();
        for session_id in sessions {
            let release = {
                let mut guard = self.shared.lock();
                let state = &mut *guard;
                state.sessions.try_release(session_id, &state.registry)
            };
            if release {
                self.shared.release_session(session_id);
            }
        }
        cancelled.len()
    }

    /// Re-queue a failed or cancelled task.
    pub fn retry(&self, id: &str) -> bool {
        {
            let mut guard = self.shared.lock();
            let state = &mut *guard;
            let Some(task) = state.registry.get_mut(id) else {
                return false;
            };
            if task.demo || !task.status.is_retryable() || task.reset_for_retry().is_err() {
                return false;
            }
            self.shared.emit(task);
            info!(task_id = %id, name = %task.name, "retry requested");
            state.queue.push_back(id.to_string());
        }
        self.shared.admit();
        true
    }

    /// Re-queue every failed task. Cancelled tasks stay cancelled.
    pub fn retry_all_failed(&self) -> usize {
        let retried = {
            let mut guard = self.shared.lock();
            let state = &mut *guard;
            let mut retried = 0;
            for id in state.registry.ids() {
                let Some(task) = state.registry.get_mut(&id) else {
                    continue;
                };
                if task.demo || task.status != TaskStatus::Failed || task.reset_for_retry().is_err() {
                    continue;
                }
                self.shared.emit(task);
                state.queue.push_back(id);
                retried += 1;
            }
            retried
        };
        if retried > 0 {
            info!(retried, "retrying failed downloads");
            self.shared.admit();
        }
        retried
    }

    /// Close the admission gate and suspend every running transfer.
    pub fn pause_all(&self) {
        let mut guard = self.shared.lock();
        let state = &mut *guard;
        if state.paused {
            return;
        }
        state.paused = true;

        for id in state.registry.ids() {
            let Some(task) = state.registry.get_mut(&id) else {
                continue;
            };
            if task.status != TaskStatus::Downloading {
                continue;
            }
            if let Some(control) = &task.transfer {
                control.pause();
            }
            if task.transition(TaskStatus::Paused).is_ok() {
                task.speed = 0;
                self.shared.emit(task);
            }
        }
        info!("downloads paused");
    }

    /// Reopen the admission gate and resume suspended transfers.
    pub fn resume_all(&self) {
        {
            let mut guard = self.shared.lock();
            let state = &mut *guard;
            if !state.paused {
                return;
            }
            state.paused = false;

            for id in state.registry.ids() {
                let Some(task) = state.registry.get_mut(&id) else {
                    continue;
                };
                if task.status != TaskStatus::Paused || task.transition(TaskStatus::Downloading).is_err() {
                    continue;
                }
                if let Some(control) = &task.transfer {
                    control.resume();
                }
                let bytes = task.bytes_downloaded;
                if let Some(tracker) = task.tracker.as_mut() {
                    tracker.reset(bytes);
                }
                self.shared.emit(task);
            }
            info!("downloads resumed");
        }
        self.shared.admit();
    }

    /// Drop completed, skipped and cancelled tasks. Failed tasks stay for retry.
    pub fn clear_finished(&self) -> usize {
        let (cleared, released) = {
            let mut guard = self.shared.lock();
            let state = &mut *guard;
            let mut removed = state.registry.remove_where(|task| task.status.is_clearable());
            for task in &mut removed {
                task.release_handles();
            }

            let touched: BTreeSet<String> = removed
                .iter()
                .filter(|task| !task.demo)
                .map(|task| session_of(&task.id).to_string())
                .collect();
            let released: Vec<String> = touched
                .into_iter()
                .filter(|session_id| state.sessions.release_if_cleared(session_id, &state.registry))
                .collect();
            (removed.len(), released)
        };

        for session_id in &released {
            self.shared.release_session(session_id);
        }
        info!(cleared, "finished downloads cleared");
        cleared
    }

    pub fn list_tasks(&self) -> Vec<TaskSnapshot> {
        self.shared.lock().registry.snapshots()
    }

    pub fn task(&self, id: &str) -> Option<TaskSnapshot> {
        self.shared.lock().registry.get(id).map(Task::snapshot)
    }

    pub fn active_count(&self) -> usize {
        self.shared.lock().running.len()
    }

    pub fn queued(&self) -> usize {
        self.shared.lock().queue.len()
    }

    pub fn is_paused(&self) -> bool {
        self.shared.lock().paused
    }
}

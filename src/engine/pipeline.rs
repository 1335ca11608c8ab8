//! Per-task download pipeline.
//!
//! A run owns one admission of one task: it detects resumable bytes in the
//! `.part` file, streams the rest, optionally verifies, and renames the file
//! into place. All record mutations go through [`Run::with_task`], which
//! ignores the record once a newer run (after a retry) has taken over.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tracing::{debug, error, info, warn};

use super::manager::Shared;
use super::paths;
use super::progress::ProgressTracker;
use super::scheduler::Admitted;
use super::task::{InvalidTransition, Task, TaskId, TaskStatus};
use crate::humanize::{ByteSize, Rate};
use crate::remote::{StreamControl, StreamOptions, TransferError, VERIFY_KEY_LEN};

const VERIFY_READ_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
enum PipelineError {
    #[error("download cancelled")]
    Cancelled,

    #[error("remote node not found")]
    NodeNotFound,

    #[error(transparent)]
    Transfer(TransferError),

    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Verification failed: {0}")]
    Verification(String),

    #[error("received {received} bytes, expected {expected}")]
    SizeMismatch { received: u64, expected: u64 },

    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

impl From<TransferError> for PipelineError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::Cancelled => PipelineError::Cancelled,
            other => PipelineError::Transfer(other),
        }
    }
}

fn io_err(context: &'static str) -> impl FnOnce(io::Error) -> PipelineError {
    move |source| PipelineError::Io { context, source }
}

async fn remove_if_exists(path: &Path) -> Result<(), PipelineError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err("removing partial file")(err)),
    }
}

struct Run {
    shared: Arc<Shared>,
    id: TaskId,
    run: u64,
    control: StreamControl,
}

pub(super) async fn run(shared: Arc<Shared>, admitted: Admitted) {
    let run = Run {
        shared,
        id: admitted.id,
        run: admitted.run,
        control: admitted.control,
    };

    match run.execute().await {
        Ok(()) => {}
        Err(PipelineError::Cancelled) => run.settle_cancelled(),
        Err(err) => run.fail(&err),
    }
    run.shared.try_clean_session(&run.id);
}

impl Run {
    /// Mutate this run's task under the lock. `None` if the task was removed
    /// or re-admitted since this run started.
    fn with_task<T>(&self, f: impl FnOnce(&mut Task) -> T) -> Option<T> {
        let mut state = self.shared.lock();
        state
            .registry
            .get_mut(&self.id)
            .filter(|task| task.run == self.run)
            .map(f)
    }

    async fn execute(&self) -> Result<(), PipelineError> {
        let node = self
            .shared
            .remote
            .lookup_node(&self.id)
            .ok_or(PipelineError::NodeNotFound)?;
        let (destination, seen_at_enqueue) = self
            .with_task(|task| (task.destination.clone(), task.existing_partial.take()))
            .ok_or(PipelineError::Cancelled)?;

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(io_err("creating destination folder"))?;
        }

        let part = paths::part_path(&destination);
        let mut partial = paths::file_len(&part).await;
        if seen_at_enqueue.is_some() && partial != seen_at_enqueue {
            debug!(task_id = %self.id, ?seen_at_enqueue, ?partial, "partial file changed while queued");
        }

        let key = self.verification_key(node.verify_key.as_deref());

        if let Some(len) = partial.filter(|len| *len >= node.size) {
            debug!(task_id = %self.id, len, "partial file already complete");
            self.with_task(|task| task.bytes_downloaded = node.size);

            let Some(key) = key.as_deref() else {
                return self.finalize(&part, &destination).await;
            };
            match self.verify(&part, key).await {
                Ok(()) => return self.finalize(&part, &destination).await,
                Err(PipelineError::Verification(reason)) => {
                    warn!(task_id = %self.id, %reason, "complete partial file failed verification, downloading again");
                    remove_if_exists(&part).await?;
                    self.restart()?;
                    partial = None;
                }
                Err(err) => return Err(err),
            }
        }

        let offset = match partial {
            Some(len) if len > 0 && len < node.size => len,
            _ => 0,
        };
        self.begin_transfer(offset, node.size)?;
        if offset > 0 {
            info!(task_id = %self.id, offset, "resuming download");
        }

        let options = StreamOptions {
            start_offset: offset,
            retry: self.shared.options.retry_policy(),
            control: self.control.clone(),
        };
        let mut stream = self.shared.remote.open_stream(&node, options).await?;

        let file = if offset > 0 {
            fs::OpenOptions::new().append(true).open(&part).await
        } else {
            fs::File::create(&part).await
        }
        .map_err(io_err("opening partial file"))?;
        let mut writer = BufWriter::with_capacity(self.shared.options.write_buffer, file);

        let mut received = offset;
        while let Some(chunk) = stream.next_chunk().await {
            let chunk = chunk?;
            writer
                .write_all(&chunk)
                .await
                .map_err(io_err("writing partial file"))?;
            received += chunk.len() as u64;
            self.shared.metrics.bytes_received(chunk.len() as u64);
            self.record_progress(received);
        }
        writer.flush().await.map_err(io_err("flushing partial file"))?;
        drop(writer);

        if received != node.size {
            return Err(PipelineError::SizeMismatch {
                received,
                expected: node.size,
            });
        }
        self.end_transfer(node.size)?;

        if let Some(key) = key.as_deref() {
            if let Err(err) = self.verify(&part, key).await {
                if matches!(err, PipelineError::Verification(_)) {
                    remove_if_exists(&part).await?;
                }
                return Err(err);
            }
        }

        self.finalize(&part, &destination).await
    }

    fn verification_key(&self, key: Option<&[u8]>) -> Option<Vec<u8>> {
        if !self.shared.verify_enabled() {
            return None;
        }
        key.filter(|key| key.len() == VERIFY_KEY_LEN).map(<[u8]>::to_vec)
    }

    fn begin_transfer(&self, offset: u64, size: u64) -> Result<(), PipelineError> {
        let interval = self.shared.options.progress_interval;
        self.with_task(|task| {
            if task.status == TaskStatus::Cancelled {
                return Err(PipelineError::Cancelled);
            }
            task.bytes_downloaded = offset;
            task.tracker = Some(ProgressTracker::starting_at(size, interval, offset, Instant::now()));
            if offset > 0 {
                self.shared.emit(task);
            }
            Ok(())
        })
        .unwrap_or(Err(PipelineError::Cancelled))
    }

    /// Progress samples only land while the task is actively downloading.
    fn record_progress(&self, received: u64) {
        self.with_task(|task| {
            if task.status != TaskStatus::Downloading {
                return;
            }
            task.bytes_downloaded = received;
            let update = task.tracker.as_mut().and_then(|tracker| tracker.update(received));
            if let Some(update) = update {
                task.speed = update.speed.round() as u64;
                self.shared.emit(task);
            }
        });
    }

    fn end_transfer(&self, size: u64) -> Result<(), PipelineError> {
        self.with_task(|task| {
            if task.status == TaskStatus::Cancelled {
                return Err(PipelineError::Cancelled);
            }
            task.bytes_downloaded = size;
            task.speed = 0;
            task.tracker = None;
            Ok(())
        })
        .unwrap_or(Err(PipelineError::Cancelled))
    }

    /// Move to `verifying`, waiting out a pause first.
    async fn enter_verifying(&self) -> Result<StreamControl, PipelineError> {
        loop {
            self.control.wait_running().await?;
            let entered = self
                .with_task(|task| match task.status {
                    TaskStatus::Downloading => {
                        task.transition(TaskStatus::Verifying)?;
                        let verification = StreamControl::new();
                        task.transfer = None;
                        task.verification = Some(verification.clone());
                        task.speed = 0;
                        self.shared.emit(task);
                        Ok(Some(verification))
                    }
                    TaskStatus::Paused => Ok(None),
                    _ => Err(PipelineError::Cancelled),
                })
                .unwrap_or(Err(PipelineError::Cancelled))?;

            if let Some(verification) = entered {
                return Ok(verification);
            }
        }
    }

    async fn verify(&self, part: &Path, key: &[u8]) -> Result<(), PipelineError> {
        let control = self.enter_verifying().await?;
        info!(task_id = %self.id, "verifying download");

        let mut verifier = self.shared.remote.open_verifier(key);
        let mut file = fs::File::open(part)
            .await
            .map_err(|e| PipelineError::Verification(e.to_string()))?;
        let mut buf = vec![0u8; VERIFY_READ_SIZE];

        loop {
            let read = tokio::select! {
                biased;
                _ = control.cancelled() => return Err(PipelineError::Cancelled),
                read = file.read(&mut buf) => read.map_err(|e| PipelineError::Verification(e.to_string()))?,
            };
            if read == 0 {
                break;
            }
            verifier.update(&buf[..read]);
        }

        verifier
            .finish()
            .map_err(|e| PipelineError::Verification(e.to_string()))
    }

    /// Self-healing path: an unverifiable complete `.part` is downloaded again.
    ///
    /// A pause that landed during verification holds the new transfer until
    /// `resume_all`.
    fn restart(&self) -> Result<(), PipelineError> {
        let mut guard = self.shared.lock();
        let state = &mut *guard;
        let Some(task) = state
            .registry
            .get_mut(&self.id)
            .filter(|task| task.run == self.run)
        else {
            return Err(PipelineError::Cancelled);
        };
        if task.status != TaskStatus::Verifying {
            return Err(PipelineError::Cancelled);
        }

        task.transition(TaskStatus::Downloading)?;
        if let Some(verification) = task.verification.take() {
            verification.destroy();
        }
        task.transfer = Some(self.control.clone());
        task.bytes_downloaded = 0;
        task.speed = 0;
        self.shared.emit(task);

        if state.paused {
            self.control.pause();
            task.transition(TaskStatus::Paused)?;
            self.shared.emit(task);
            debug!(task_id = %self.id, "re-download held by pause");
        }
        Ok(())
    }

    /// Rename into place and mark completed, unless cancelled meanwhile.
    async fn finalize(&self, part: &Path, destination: &Path) -> Result<(), PipelineError> {
        loop {
            self.control.wait_running().await?;
            let done = self
                .with_task(|task| {
                    match task.status {
                        TaskStatus::Paused => return Ok(false),
                        TaskStatus::Downloading | TaskStatus::Verifying => {}
                        _ => return Err(PipelineError::Cancelled),
                    }
                    // rename under the lock so a cancel cannot slip in between
                    std::fs::rename(part, destination).map_err(io_err("renaming partial file"))?;
                    task.transition(TaskStatus::Completed)?;
                    let now = Utc::now();
                    task.bytes_downloaded = task.size;
                    task.speed = 0;
                    task.completed_at = Some(now);
                    task.release_handles();
                    self.shared.emit(task);
                    self.shared.metrics.task_completed();
                    let rate = task
                        .started_at
                        .map(|started| {
                            let millis = (now - started).num_milliseconds().max(1) as u64;
                            Rate(task.size.saturating_mul(1000) / millis).to_string()
                        })
                        .unwrap_or_else(|| "-".to_owned());
                    info!(
                        task_id = %task.id,
                        name = %task.name,
                        size = %ByteSize(task.size),
                        %rate,
                        "download completed"
                    );
                    Ok(true)
                })
                .unwrap_or(Err(PipelineError::Cancelled))?;

            if done {
                return Ok(());
            }
        }
    }

    fn settle_cancelled(&self) {
        self.with_task(Task::release_handles);
        debug!(task_id = %self.id, "pipeline stopped after cancellation");
    }

    fn fail(&self, err: &PipelineError) {
        let message = err.to_string();
        self.with_task(|task| {
            task.release_handles();
            task.speed = 0;
            if matches!(task.status, TaskStatus::Failed | TaskStatus::Cancelled) {
                return;
            }
            if let Err(rejected) = task.transition(TaskStatus::Failed) {
                warn!(task_id = %task.id, %rejected, "could not mark task failed");
                return;
            }
            task.error = Some(message.clone());
            self.shared.emit(task);
            self.shared.metrics.task_failed();
            error!(task_id = %task.id, name = %task.name, error = %message, "download failed");
        });
    }
}

//! Task records, statuses and the public snapshot projection.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::progress::ProgressTracker;
use crate::remote::{RemoteNode, StreamControl};

pub type TaskId = String;

/// Session prefix of a task id (`s3-17` belongs to `s3`).
pub fn session_of(id: &str) -> &str {
    id.rsplit_once('-').map(|(session, _)| session).unwrap_or(id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Downloading,
    Paused,
    Verifying,
    Completed,
    Failed,
    Cancelled,
    Skipped,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 8] = [
        TaskStatus::Pending,
        TaskStatus::Downloading,
        TaskStatus::Paused,
        TaskStatus::Verifying,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
        TaskStatus::Skipped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Downloading => "downloading",
            TaskStatus::Paused => "paused",
            TaskStatus::Verifying => "verifying",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Skipped => "skipped",
        }
    }

    /// Not yet settled: cancellable, and re-submission is idempotent.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TaskStatus::Pending | TaskStatus::Downloading | TaskStatus::Paused | TaskStatus::Verifying
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskStatus::Failed | TaskStatus::Cancelled)
    }

    /// Removed by `clear_finished`.
    pub fn is_clearable(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Skipped | TaskStatus::Cancelled
        )
    }

    /// Still needs the remote tree (running, or could be retried).
    pub fn holds_session(&self) -> bool {
        !matches!(self, TaskStatus::Completed | TaskStatus::Skipped)
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Downloading)
                | (Pending, Cancelled)
                | (Downloading, Completed)
                | (Downloading, Verifying)
                | (Downloading, Paused)
                | (Downloading, Failed)
                | (Downloading, Cancelled)
                | (Paused, Downloading)
                | (Paused, Cancelled)
                | (Paused, Failed)
                | (Verifying, Completed)
                | (Verifying, Failed)
                | (Verifying, Cancelled)
                | (Verifying, Downloading)
                | (Failed, Pending)
                | (Cancelled, Pending)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal task transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// Observer-facing view of a task. Handles and paths never leave the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub name: String,
    pub size: u64,
    pub status: TaskStatus,
    pub bytes_downloaded: u64,
    pub speed: u64,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Engine-internal task record, owned by the registry.
#[derive(Debug)]
pub(crate) struct Task {
    pub id: TaskId,
    pub name: String,
    pub size: u64,
    pub status: TaskStatus,
    pub bytes_downloaded: u64,
    pub speed: u64,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub destination: PathBuf,

    pub transfer: Option<StreamControl>,
    pub verification: Option<StreamControl>,
    pub tracker: Option<ProgressTracker>,
    /// `.part` length seen when the task was enqueued.
    pub existing_partial: Option<u64>,
    /// Bumped on every admission; stale pipeline runs compare against it.
    pub run: u64,
    pub demo: bool,
}

impl Task {
    pub fn pending(node: &RemoteNode, destination: PathBuf) -> Self {
        Self {
            id: node.id.clone(),
            name: node.name.clone(),
            size: node.size,
            status: TaskStatus::Pending,
            bytes_downloaded: 0,
            speed: 0,
            error: None,
            started_at: None,
            completed_at: None,
            destination,
            transfer: None,
            verification: None,
            tracker: None,
            existing_partial: None,
            run: 0,
            demo: false,
        }
    }

    pub fn skipped(node: &RemoteNode, destination: PathBuf) -> Self {
        let mut task = Self::pending(node, destination);
        task.status = TaskStatus::Skipped;
        task.bytes_downloaded = node.size;
        task.completed_at = Some(Utc::now());
        task
    }

    pub fn transition(&mut self, to: TaskStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(to) {
            return Err(InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Destroy and drop any open transfer or verification handle.
    pub fn release_handles(&mut self) {
        if let Some(control) = self.transfer.take() {
            control.destroy();
        }
        if let Some(control) = self.verification.take() {
            control.destroy();
        }
        self.tracker = None;
    }

    pub fn reset_for_retry(&mut self) -> Result<(), InvalidTransition> {
        self.transition(TaskStatus::Pending)?;
        self.bytes_downloaded = 0;
        self.speed = 0;
        self.error = None;
        self.completed_at = None;
        self.existing_partial = None;
        Ok(())
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            size: self.size,
            status: self.status,
            bytes_downloaded: self.bytes_downloaded,
            speed: self.speed,
            error: self.error.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, size: u64) -> RemoteNode {
        RemoteNode {
            id: id.to_string(),
            name: "file.bin".to_string(),
            size,
            is_directory: false,
            locator: None,
            verify_key: None,
            children: Vec::new(),
        }
    }

    #[test]
    fn test_session_of() {
        assert_eq!(session_of("s1-0"), "s1");
        assert_eq!(session_of("s12-345"), "s12");
        assert_eq!(session_of("demo-4"), "demo");
        assert_eq!(session_of("orphan"), "orphan");
    }

    #[test]
    fn test_terminal_states_only_leave_through_retry() {
        for from in TaskStatus::ALL {
            for to in TaskStatus::ALL {
                if from.can_transition_to(to) && !from.is_active() {
                    assert!(from.is_retryable(), "{from} -> {to}");
                    assert_eq!(to, TaskStatus::Pending);
                }
            }
        }
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Skipped.can_transition_to(TaskStatus::Pending));
    }

    #[test]
    fn test_cancelled_is_never_overwritten_by_failure() {
        assert!(!TaskStatus::Cancelled.can_transition_to(TaskStatus::Failed));
        let mut task = Task::pending(&node("s1-0", 10), PathBuf::from("/data/file.bin"));
        task.transition(TaskStatus::Cancelled).unwrap();
        assert!(task.transition(TaskStatus::Failed).is_err());
        assert_eq!(task.status, TaskStatus::Cancelled);
    }

    #[test]
    fn test_skipped_counts_full_size() {
        let task = Task::skipped(&node("s1-0", 42), PathBuf::from("/data/file.bin"));
        assert_eq!(task.status, TaskStatus::Skipped);
        assert_eq!(task.bytes_downloaded, 42);
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn test_reset_for_retry_clears_progress() {
        let mut task = Task::pending(&node("s1-0", 100), PathBuf::from("/data/file.bin"));
        task.transition(TaskStatus::Downloading).unwrap();
        task.bytes_downloaded = 60;
        task.speed = 5;
        task.transition(TaskStatus::Failed).unwrap();
        task.error = Some("boom".into());

        task.reset_for_retry().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.bytes_downloaded, 0);
        assert_eq!(task.speed, 0);
        assert!(task.error.is_none());
    }

    #[test]
    fn test_snapshot_hides_internal_fields() {
        let mut task = Task::pending(&node("s1-0", 100), PathBuf::from("/data/secret/file.bin"));
        task.transfer = Some(StreamControl::new());
        let json = serde_json::to_value(task.snapshot()).unwrap();
        let keys: Vec<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();

        assert_eq!(keys.len(), 9);
        for key in [
            "id",
            "name",
            "size",
            "status",
            "bytesDownloaded",
            "speed",
            "error",
            "startedAt",
            "completedAt",
        ] {
            assert!(keys.contains(&key), "missing {key}");
        }
        assert!(!json.to_string().contains("secret"));
        assert_eq!(json["status"], "pending");
    }

    #[test]
    fn test_release_handles_destroys_controls() {
        let mut task = Task::pending(&node("s1-0", 100), PathBuf::from("/data/file.bin"));
        let control = StreamControl::new();
        task.transfer = Some(control.clone());
        task.release_handles();
        assert!(control.is_destroyed());
        assert!(task.transfer.is_none());
    }
}

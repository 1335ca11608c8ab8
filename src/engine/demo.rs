//! Fixture tasks covering every status, for UI work without a real share.

use chrono::{Duration, Utc};
use tracing::info;

use super::manager::DownloadManager;
use super::task::{Task, TaskStatus};
use crate::remote::RemoteNode;

pub const DEMO_PREFIX: &str = "demo-";

struct Fixture {
    ordinal: u32,
    name: &'static str,
    size: u64,
    status: TaskStatus,
    bytes: u64,
    speed: u64,
    started_secs_ago: Option<i64>,
    completed_secs_ago: Option<i64>,
    error: Option<&'static str>,
}

const FIXTURES: [Fixture; 8] = [
    Fixture {
        ordinal: 0,
        name: "Project Documentation.pdf",
        size: 45_000_000,
        status: TaskStatus::Downloading,
        bytes: 31_500_000,
        speed: 2_400_000,
        started_secs_ago: Some(300),
        completed_secs_ago: None,
        error: None,
    },
    Fixture {
        ordinal: 1,
        name: "Meeting Recording 2026-01-15.mp4",
        size: 890_000_000,
        status: TaskStatus::Verifying,
        bytes: 890_000_000,
        speed: 0,
        started_secs_ago: Some(600),
        completed_secs_ago: None,
        error: None,
    },
    Fixture {
        ordinal: 2,
        name: "Budget Spreadsheet Q1.xlsx",
        size: 2_300_000,
        status: TaskStatus::Paused,
        bytes: 1_150_000,
        speed: 0,
        started_secs_ago: Some(240),
        completed_secs_ago: None,
        error: None,
    },
    Fixture {
        ordinal: 7,
        name: "Weekly Report Template.docx",
        size: 850_000,
        status: TaskStatus::Pending,
        bytes: 0,
        speed: 0,
        started_secs_ago: None,
        completed_secs_ago: None,
        error: None,
    },
    Fixture {
        ordinal: 3,
        name: "Team Photo Album.zip",
        size: 340_000_000,
        status: TaskStatus::Completed,
        bytes: 340_000_000,
        speed: 0,
        started_secs_ago: None,
        completed_secs_ago: Some(120),
        error: None,
    },
    Fixture {
        ordinal: 4,
        name: "Client Presentation.pptx",
        size: 28_000_000,
        status: TaskStatus::Failed,
        bytes: 14_200_000,
        speed: 0,
        started_secs_ago: Some(180),
        completed_secs_ago: None,
        error: Some("network timeout"),
    },
    Fixture {
        ordinal: 5,
        name: "Source Code Backup.tar.gz",
        size: 512_000_000,
        status: TaskStatus::Skipped,
        bytes: 512_000_000,
        speed: 0,
        started_secs_ago: None,
        completed_secs_ago: Some(60),
        error: None,
    },
    Fixture {
        ordinal: 6,
        name: "Design Mockups.fig",
        size: 15_000_000,
        status: TaskStatus::Cancelled,
        bytes: 3_200_000,
        speed: 0,
        started_secs_ago: None,
        completed_secs_ago: None,
        error: None,
    },
];

impl Fixture {
    fn task(&self, manager: &DownloadManager) -> Task {
        let now = Utc::now();
        let node = RemoteNode {
            id: format!("{DEMO_PREFIX}{}", self.ordinal),
            name: self.name.to_string(),
            size: self.size,
            is_directory: false,
            locator: None,
            verify_key: None,
            children: Vec::new(),
        };
        let destination = manager.options().download_dir.join(self.name);

        let mut task = Task::pending(&node, destination);
        task.status = self.status;
        task.bytes_downloaded = self.bytes;
        task.speed = self.speed;
        task.error = self.error.map(str::to_string);
        task.started_at = self.started_secs_ago.map(|secs| now - Duration::seconds(secs));
        task.completed_at = self.completed_secs_ago.map(|secs| now - Duration::seconds(secs));
        task.demo = true;
        task
    }
}

impl DownloadManager {
    /// Replace any previous demo tasks with a fresh fixture set.
    ///
    /// Demo tasks never run a pipeline. They can be cancelled and cleared
    /// but not retried.
    pub fn populate_demo(&self) {
        let mut state = self.shared.lock();
        state.registry.remove_where(|task| task.demo);

        for fixture in &FIXTURES {
            let task = fixture.task(self);
            self.shared.emit(&task);
            state.registry.insert(task);
        }
        info!(tasks = FIXTURES.len(), "demo tasks populated");
    }
}

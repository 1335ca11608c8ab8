//! Download orchestration engine.
//!
//! [`DownloadManager`] owns the task registry, the admission queue and the
//! session bookkeeping. Each admitted task runs its own pipeline on the Tokio
//! runtime; every state change is published as a [`TaskSnapshot`].

mod demo;
mod manager;
mod options;
mod paths;
mod pipeline;
mod progress;
mod registry;
mod scheduler;
mod session;
mod task;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::remote::RemoteError;

pub use manager::DownloadManager;
pub use options::EngineOptions;
pub use paths::{PART_SUFFIX, PathError, part_path};
pub use progress::{ProgressTracker, ProgressUpdate};
pub use task::{InvalidTransition, TaskId, TaskSnapshot, TaskStatus, session_of};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Path(#[from] PathError),

    #[error("failed to prepare {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, EngineError>;

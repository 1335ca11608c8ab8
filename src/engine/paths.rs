//! Destination paths under the download root.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

pub const PART_SUFFIX: &str = ".part";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("path escapes download directory: {}", .0.display())]
    Traversal(PathBuf),
}

/// Provisional file for a destination (`movie.mkv` -> `movie.mkv.part`).
pub fn part_path(destination: &Path) -> PathBuf {
    let mut name = OsString::from(destination.as_os_str());
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}

/// Length of a regular file, `None` when it does not exist.
pub async fn file_len(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path)
        .await
        .ok()
        .filter(|meta| meta.is_file())
        .map(|meta| meta.len())
}

/// Lexically resolve `.` and `..` without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Join `root / relative / name` and require the result to stay strictly inside `root`.
pub fn resolve_destination(root: &Path, relative: &Path, name: &str) -> Result<PathBuf, PathError> {
    let candidate = normalize(&root.join(relative).join(name));
    ensure_within(root, candidate)
}

pub fn ensure_within(root: &Path, candidate: PathBuf) -> Result<PathBuf, PathError> {
    let root = normalize(root);
    if candidate != root && candidate.starts_with(&root) {
        Ok(candidate)
    } else {
        Err(PathError::Traversal(candidate))
    }
}

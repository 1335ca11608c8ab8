//! In-process [`RemoteSource`] backed by byte buffers.
//!
//! Used by the test suites. Shares are registered up front under
//! a reference string; transfers are served in fixed-size chunks with an
//! optional per-chunk delay, and open attempts can be made to fail on demand.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream;

use super::stream::{ChunkStream, spawn_transfer};
use super::tree::{NodeSpec, RemoteNode, ResolvedTree, TreeIndex};
use super::verify::Sha256Verifier;
use super::{ByteStream, RemoteError, RemoteSource, StreamOptions, TransferError};

const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A file or folder inside an in-memory share.
#[derive(Debug, Clone)]
pub enum MemoryEntry {
    File {
        name: String,
        content: Bytes,
        verify_key: Option<Vec<u8>>,
    },
    Directory {
        name: String,
        children: Vec<MemoryEntry>,
    },
}

impl MemoryEntry {
    pub fn file(name: impl Into<String>, content: impl Into<Bytes>) -> Self {
        MemoryEntry::File {
            name: name.into(),
            content: content.into(),
            verify_key: None,
        }
    }

    pub fn dir(name: impl Into<String>, children: Vec<MemoryEntry>) -> Self {
        MemoryEntry::Directory {
            name: name.into(),
            children,
        }
    }

    /// Override the verification key (defaults to the content's SHA-256).
    pub fn with_verify_key(self, key: Vec<u8>) -> Self {
        match self {
            MemoryEntry::File { name, content, .. } => MemoryEntry::File {
                name,
                content,
                verify_key: Some(key),
            },
            dir => dir,
        }
    }
}

/// Counters shared with running transfers.
#[derive(Debug, Default)]
struct Telemetry {
    faults: Mutex<HashMap<String, u32>>,
    opened: Mutex<Vec<(String, u64)>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl Telemetry {
    fn take_fault(&self, name: &str) -> bool {
        let mut faults = lock(&self.faults);
        match faults.get_mut(name) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

/// Decrements the active-stream gauge when a body is dropped.
struct ActiveBody {
    telemetry: Arc<Telemetry>,
}

impl ActiveBody {
    fn new(telemetry: Arc<Telemetry>) -> Self {
        let now = telemetry.active.fetch_add(1, Ordering::SeqCst) + 1;
        telemetry.peak.fetch_max(now, Ordering::SeqCst);
        Self { telemetry }
    }
}

impl Drop for ActiveBody {
    fn drop(&mut self) {
        self.telemetry.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// File bytes shared by every live session that resolved them.
#[derive(Debug)]
struct Stored {
    content: Bytes,
    sessions: usize,
}

#[derive(Debug)]
pub struct MemorySource {
    index: TreeIndex,
    shares: Mutex<HashMap<String, MemoryEntry>>,
    contents: Mutex<HashMap<String, Stored>>,
    session_files: Mutex<HashMap<String, Vec<String>>>,
    released: Mutex<Vec<String>>,
    telemetry: Arc<Telemetry>,
    chunk_size: usize,
    chunk_delay: Duration,
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySource {
    pub fn new() -> Self {
        Self {
            index: TreeIndex::new(),
            shares: Mutex::new(HashMap::new()),
            contents: Mutex::new(HashMap::new()),
            session_files: Mutex::new(HashMap::new()),
            released: Mutex::new(Vec::new()),
            telemetry: Arc::new(Telemetry::default()),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_delay: Duration::ZERO,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    pub fn add_share(&self, reference: impl Into<String>, root: MemoryEntry) {
        lock(&self.shares).insert(reference.into(), root);
    }

    /// Make the next `count` stream opens for files named `name` fail.
    pub fn fail_opens(&self, name: impl Into<String>, count: u32) {
        lock(&self.telemetry.faults).insert(name.into(), count);
    }

    /// Offsets requested by stream opens for files named `name`, in order.
    pub fn opened_offsets(&self, name: &str) -> Vec<u64> {
        lock(&self.telemetry.opened)
            .iter()
            .filter(|(opened, _)| opened == name)
            .map(|(_, offset)| *offset)
            .collect()
    }

    /// Highest number of bodies that were streaming at the same time.
    pub fn peak_streams(&self) -> usize {
        self.telemetry.peak.load(Ordering::SeqCst)
    }

    pub fn released_sessions(&self) -> Vec<String> {
        lock(&self.released).clone()
    }

    /// Number of file bodies still held for unreleased sessions.
    pub fn stored_files(&self) -> usize {
        lock(&self.contents).len()
    }

    fn to_spec(
        &self,
        reference: &str,
        entry: MemoryEntry,
        parent: &str,
        files: &mut Vec<(String, Bytes)>,
    ) -> NodeSpec {
        match entry {
            MemoryEntry::File {
                name,
                content,
                verify_key,
            } => {
                let locator = format!("{reference}#{parent}/{name}");
                let key = verify_key.unwrap_or_else(|| Sha256Verifier::digest(&content));
                let spec = NodeSpec::file(name, content.len() as u64)
                    .with_locator(locator.clone())
                    .with_verify_key(key);
                files.push((locator, content));
                spec
            }
            MemoryEntry::Directory { name, children } => {
                let path = format!("{parent}/{name}");
                let children = children
                    .into_iter()
                    .map(|child| self.to_spec(reference, child, &path, files))
                    .collect();
                NodeSpec::directory(name, children)
            }
        }
    }
}

fn chunked(content: Bytes, offset: u64, chunk_size: usize, delay: Duration, body: ActiveBody) -> ChunkStream {
    let start = usize::try_from(offset).unwrap_or(usize::MAX).min(content.len());
    stream::unfold((content, start, body), move |(content, pos, body)| async move {
        if pos >= content.len() {
            return None;
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let end = (pos + chunk_size).min(content.len());
        let chunk = content.slice(pos..end);
        Some((Ok(chunk), (content, end, body)))
    })
    .boxed()
}

#[async_trait]
impl RemoteSource for MemorySource {
    async fn resolve_tree(&self, reference: &str) -> Result<ResolvedTree, RemoteError> {
        let entry = lock(&self.shares)
            .get(reference)
            .cloned()
            .ok_or_else(|| RemoteError::UnknownShare(reference.to_string()))?;

        let mut files = Vec::new();
        let spec = self.to_spec(reference, entry, "", &mut files);
        let tree = self.index.insert(spec);

        let mut contents = lock(&self.contents);
        let mut locators = Vec::with_capacity(files.len());
        for (locator, content) in files {
            let stored = contents.entry(locator.clone()).or_insert_with(|| Stored {
                content: content.clone(),
                sessions: 0,
            });
            stored.content = content;
            stored.sessions += 1;
            locators.push(locator);
        }
        drop(contents);
        lock(&self.session_files).insert(tree.session_id.clone(), locators);
        Ok(tree)
    }

    fn lookup_node(&self, id: &str) -> Option<Arc<RemoteNode>> {
        self.index.lookup(id)
    }

    fn node_path(&self, id: &str) -> String {
        self.index.parent_path(id)
    }

    fn release_session(&self, session_id: &str) {
        self.index.release(session_id);
        if let Some(locators) = lock(&self.session_files).remove(session_id) {
            let mut contents = lock(&self.contents);
            for locator in locators {
                let Some(stored) = contents.get_mut(&locator) else {
                    continue;
                };
                stored.sessions = stored.sessions.saturating_sub(1);
                if stored.sessions == 0 {
                    contents.remove(&locator);
                }
            }
        }
        lock(&self.released).push(session_id.to_string());
    }

    async fn open_stream(
        &self,
        node: &RemoteNode,
        options: StreamOptions,
    ) -> Result<ByteStream, TransferError> {
        let locator = node
            .locator
            .as_ref()
            .ok_or_else(|| TransferError::MissingLocator(node.id.clone()))?;
        let content = lock(&self.contents)
            .get(locator)
            .map(|stored| stored.content.clone())
            .ok_or_else(|| TransferError::MissingLocator(node.id.clone()))?;

        let telemetry = self.telemetry.clone();
        let name = node.name.clone();
        let chunk_size = self.chunk_size;
        let delay = self.chunk_delay;

        Ok(spawn_transfer(
            options.start_offset,
            options.retry,
            options.control,
            move |offset| {
                let telemetry = telemetry.clone();
                let name = name.clone();
                let content = content.clone();
                async move {
                    lock(&telemetry.opened).push((name.clone(), offset));
                    if telemetry.take_fault(&name) {
                        return Err(TransferError::Request(format!("injected fault for {name}")));
                    }
                    let body = ActiveBody::new(telemetry);
                    Ok(chunked(content, offset, chunk_size, delay, body))
                }
            },
        ))
    }
}

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};

use fetchtree::engine::{DownloadManager, EngineError, EngineOptions, PathError, TaskSnapshot, TaskStatus};
use fetchtree::remote::{
    ByteStream, MemoryEntry, MemorySource, RemoteError, RemoteNode, RemoteSource, ResolvedTree, StreamOptions,
    TransferError, Verifier, VerifyError,
};

const WAIT: Duration = Duration::from_secs(10);

struct Harness {
    _dir: TempDir,
    root: PathBuf,
    source: Arc<MemorySource>,
    manager: DownloadManager,
}

fn harness(source: MemorySource, max_concurrent: usize, max_retry_attempts: u32) -> Harness {
    let source = Arc::new(source);
    let remote = source.clone() as Arc<dyn RemoteSource>;
    harness_over(source, remote, max_concurrent, max_retry_attempts)
}

/// Like [`harness`], but the engine talks to `remote` (which wraps `source`).
fn harness_over(
    source: Arc<MemorySource>,
    remote: Arc<dyn RemoteSource>,
    max_concurrent: usize,
    max_retry_attempts: u32,
) -> Harness {
    let dir = TempDir::new().unwrap();
    let root = dir.path().to_path_buf();
    let options = EngineOptions::builder()
        .download_dir(root.clone())
        .max_concurrent(max_concurrent)
        .max_retry_attempts(max_retry_attempts)
        .retry_base_delay(Duration::from_millis(1))
        .progress_interval(Duration::from_millis(1))
        .write_buffer(64)
        .build();
    let manager = DownloadManager::new(remote, options);
    Harness {
        _dir: dir,
        root,
        source,
        manager,
    }
}

fn content(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

fn id_of(manager: &DownloadManager, name: &str) -> String {
    manager
        .list_tasks()
        .into_iter()
        .find(|task| task.name == name)
        .map(|task| task.id)
        .unwrap_or_else(|| panic!("no task named {name}"))
}

async fn wait_for(manager: &DownloadManager, id: &str, status: TaskStatus) -> TaskSnapshot {
    timeout(WAIT, async {
        loop {
            if let Some(task) = manager.task(id) {
                if task.status == status {
                    return task;
                }
            }
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{id} never reached {status}: {:?}", manager.task(id)))
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !done() {
            sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached");
}

fn drain(events: &mut broadcast::Receiver<TaskSnapshot>) -> Vec<TaskSnapshot> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// Every consecutive pair of statuses seen for a task must be a legal transition.
fn assert_legal_history(events: &[TaskSnapshot]) {
    let mut last: HashMap<&str, TaskStatus> = HashMap::new();
    for event in events {
        if let Some(previous) = last.insert(&event.id, event.status) {
            assert!(
                previous == event.status || previous.can_transition_to(event.status),
                "{}: illegal {previous} -> {}",
                event.id,
                event.status
            );
        } else {
            assert!(
                matches!(event.status, TaskStatus::Pending | TaskStatus::Skipped),
                "{} first seen as {}",
                event.id,
                event.status
            );
        }
    }
}

/// Memory source whose verifiers block on their first chunk until `open` is set.
struct GatedVerification {
    inner: Arc<MemorySource>,
    open: Arc<AtomicBool>,
}

struct GatedVerifier {
    inner: Box<dyn Verifier>,
    open: Arc<AtomicBool>,
}

impl Verifier for GatedVerifier {
    fn update(&mut self, chunk: &[u8]) {
        while !self.open.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(1));
        }
        self.inner.update(chunk);
    }

    fn finish(self: Box<Self>) -> Result<(), VerifyError> {
        let GatedVerifier { inner, .. } = *self;
        inner.finish()
    }
}

#[async_trait]
impl RemoteSource for GatedVerification {
    async fn resolve_tree(&self, reference: &str) -> Result<ResolvedTree, RemoteError> {
        self.inner.resolve_tree(reference).await
    }

    fn lookup_node(&self, id: &str) -> Option<Arc<RemoteNode>> {
        self.inner.lookup_node(id)
    }

    fn node_path(&self, id: &str) -> String {
        self.inner.node_path(id)
    }

    fn release_session(&self, session_id: &str) {
        self.inner.release_session(session_id)
    }

    async fn open_stream(&self, node: &RemoteNode, options: StreamOptions) -> Result<ByteStream, TransferError> {
        self.inner.open_stream(node, options).await
    }

    fn open_verifier(&self, key: &[u8]) -> Box<dyn Verifier> {
        Box::new(GatedVerifier {
            inner: self.inner.open_verifier(key),
            open: self.open.clone(),
        })
    }
}

fn gated_harness() -> (Harness, Arc<AtomicBool>) {
    let source = Arc::new(MemorySource::new().with_chunk_size(64));
    let open = Arc::new(AtomicBool::new(false));
    let remote = Arc::new(GatedVerification {
        inner: source.clone(),
        open: open.clone(),
    });
    (harness_over(source, remote, 1, 0), open)
}

async fn load(h: &Harness, reference: &str, entry: MemoryEntry) -> String {
    h.source.add_share(reference, entry);
    h.manager.submit(reference).await.unwrap().root.id
}

fn read(path: &Path) -> Vec<u8> {
    std::fs::read(path).unwrap()
}

#[tokio::test]
async fn test_folder_expands_in_name_order() {
    let h = harness(MemorySource::new(), 4, 0);
    let root_id = load(
        &h,
        "mem://docs",
        MemoryEntry::dir(
            "docs",
            vec![
                MemoryEntry::file("b.txt", content(10, 1)),
                MemoryEntry::file("a.txt", content(20, 2)),
                MemoryEntry::dir(
                    "sub",
                    vec![
                        MemoryEntry::file("c10.txt", content(30, 3)),
                        MemoryEntry::file("c2.txt", content(40, 4)),
                    ],
                ),
            ],
        ),
    )
    .await;

    let task_ids = h.manager.enqueue(&[root_id]).await.unwrap();
    assert_eq!(task_ids.len(), 4);

    let names: Vec<String> = h.manager.list_tasks().into_iter().map(|t| t.name).collect();
    assert_eq!(names, vec!["a.txt", "b.txt", "c2.txt", "c10.txt"]);

    for id in &task_ids {
        wait_for(&h.manager, id, TaskStatus::Completed).await;
    }
    assert_eq!(read(&h.root.join("docs/a.txt")), content(20, 2));
    assert_eq!(read(&h.root.join("docs/sub/c10.txt")), content(30, 3));
    assert!(!h.root.join("docs/sub/c10.txt.part").exists());
}

#[tokio::test]
async fn test_resubmission_is_idempotent() {
    let h = harness(MemorySource::new(), 1, 0);
    let id = load(&h, "mem://one", MemoryEntry::file("one.bin", content(100, 7))).await;

    h.manager.pause_all();
    let first = h.manager.enqueue(std::slice::from_ref(&id)).await.unwrap();
    let second = h.manager.enqueue(std::slice::from_ref(&id)).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(h.manager.list_tasks().len(), 1);
    assert_eq!(h.manager.queued(), 1);
    assert_eq!(h.manager.task(&id).unwrap().status, TaskStatus::Pending);

    h.manager.resume_all();
    wait_for(&h.manager, &id, TaskStatus::Completed).await;
    assert_eq!(h.manager.metrics().snapshot().tasks_enqueued, 1);
}

#[tokio::test]
async fn test_resume_starts_at_partial_offset() {
    let h = harness(MemorySource::new().with_chunk_size(128), 1, 0);
    let data = content(1000, 9);
    std::fs::write(h.root.join("movie.bin.part"), &data[..400]).unwrap();

    let id = load(&h, "mem://movie", MemoryEntry::file("movie.bin", data.clone())).await;
    h.manager.enqueue(std::slice::from_ref(&id)).await.unwrap();

    let task = wait_for(&h.manager, &id, TaskStatus::Completed).await;
    assert_eq!(task.bytes_downloaded, 1000);
    assert_eq!(h.source.opened_offsets("movie.bin"), vec![400]);
    assert_eq!(read(&h.root.join("movie.bin")), data);
    assert!(!h.root.join("movie.bin.part").exists());
}

#[tokio::test]
async fn test_admission_never_exceeds_limit() {
    let source = MemorySource::new()
        .with_chunk_size(64)
        .with_chunk_delay(Duration::from_millis(2));
    let h = harness(source, 2, 0);
    let files = (0..6)
        .map(|n| MemoryEntry::file(format!("f{n}.bin"), content(512, n)))
        .collect();
    let root_id = load(&h, "mem://burst", MemoryEntry::dir("burst", files)).await;

    let ids = h.manager.enqueue(&[root_id]).await.unwrap();
    assert!(h.manager.active_count() <= 2);

    let manager = h.manager.clone();
    let mut peak_active = 0;
    wait_until(|| {
        peak_active = peak_active.max(manager.active_count());
        manager
            .list_tasks()
            .iter()
            .all(|task| task.status == TaskStatus::Completed)
    })
    .await;

    assert!(peak_active <= 2, "active count reached {peak_active}");
    assert!(h.source.peak_streams() <= 2, "peak streams {}", h.source.peak_streams());
    assert_eq!(ids.len(), 6);
    assert_eq!(h.manager.active_count(), 0);
}

#[tokio::test]
async fn test_pause_resume_keeps_progress() {
    let source = MemorySource::new()
        .with_chunk_size(32)
        .with_chunk_delay(Duration::from_millis(10));
    let h = harness(source, 1, 0);
    let mut events = h.manager.subscribe();
    let root_id = load(
        &h,
        "mem://pair",
        MemoryEntry::dir(
            "pair",
            vec![
                MemoryEntry::file("a.bin", content(640, 1)),
                MemoryEntry::file("b.bin", content(320, 2)),
            ],
        ),
    )
    .await;
    h.manager.enqueue(&[root_id]).await.unwrap();
    let a = id_of(&h.manager, "a.bin");
    let b = id_of(&h.manager, "b.bin");

    let manager = h.manager.clone();
    let a_id = a.clone();
    wait_until(|| manager.task(&a_id).is_some_and(|t| t.bytes_downloaded > 0)).await;

    h.manager.pause_all();
    assert!(h.manager.is_paused());
    let paused = h.manager.task(&a).unwrap();
    assert_eq!(paused.status, TaskStatus::Paused);
    assert_eq!(paused.speed, 0);
    assert_eq!(h.manager.task(&b).unwrap().status, TaskStatus::Pending);

    sleep(Duration::from_millis(100)).await;
    let still = h.manager.task(&a).unwrap();
    assert_eq!(still.status, TaskStatus::Paused);
    assert_eq!(still.bytes_downloaded, paused.bytes_downloaded);

    h.manager.resume_all();
    wait_for(&h.manager, &a, TaskStatus::Completed).await;
    wait_for(&h.manager, &b, TaskStatus::Completed).await;
    assert_eq!(read(&h.root.join("pair/a.bin")), content(640, 1));
    assert_eq!(h.source.opened_offsets("a.bin"), vec![0]);

    let history = drain(&mut events);
    assert_legal_history(&history);
    let a_bytes: Vec<u64> = history
        .iter()
        .filter(|e| e.id == a)
        .map(|e| e.bytes_downloaded)
        .collect();
    assert!(a_bytes.windows(2).all(|w| w[0] <= w[1]), "{a_bytes:?}");
}

#[tokio::test]
async fn test_clear_finished_keeps_failed() {
    let source = MemorySource::new();
    source.fail_opens("bad.bin", 1);
    let h = harness(source, 4, 0);
    let root_id = load(
        &h,
        "mem://mix",
        MemoryEntry::dir(
            "mix",
            vec![
                MemoryEntry::file("ok.bin", content(50, 1)),
                MemoryEntry::file("bad.bin", content(50, 2)),
                MemoryEntry::file("gone.bin", content(50, 3)),
                MemoryEntry::file("here.bin", content(50, 4)),
            ],
        ),
    )
    .await;
    std::fs::create_dir_all(h.root.join("mix")).unwrap();
    std::fs::write(h.root.join("mix/here.bin"), content(50, 4)).unwrap();

    h.manager.pause_all();
    h.manager.enqueue(&[root_id]).await.unwrap();
    let gone = id_of(&h.manager, "gone.bin");
    assert!(h.manager.cancel(&gone));
    h.manager.resume_all();

    let bad = id_of(&h.manager, "bad.bin");
    wait_for(&h.manager, &id_of(&h.manager, "ok.bin"), TaskStatus::Completed).await;
    wait_for(&h.manager, &bad, TaskStatus::Failed).await;
    assert_eq!(
        h.manager.task(&id_of(&h.manager, "here.bin")).unwrap().status,
        TaskStatus::Skipped
    );

    let cleared = h.manager.clear_finished();
    assert_eq!(cleared, 3);
    let remaining = h.manager.list_tasks();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, bad);
    assert!(remaining.iter().all(|t| !t.status.is_clearable()));
}

#[tokio::test]
async fn test_failed_task_retries_to_completion() {
    let source = MemorySource::new();
    source.fail_opens("report.bin", 1);
    let h = harness(source, 1, 0);
    let id = load(&h, "mem://report", MemoryEntry::file("report.bin", content(1000, 5))).await;

    h.manager.enqueue(std::slice::from_ref(&id)).await.unwrap();
    let failed = wait_for(&h.manager, &id, TaskStatus::Failed).await;
    assert!(failed.error.as_deref().unwrap().contains("injected fault"));

    let mut events = h.manager.subscribe();
    assert!(h.manager.retry(&id));
    let done = wait_for(&h.manager, &id, TaskStatus::Completed).await;
    assert_eq!(done.bytes_downloaded, 1000);
    assert!(done.error.is_none());

    let statuses: Vec<TaskStatus> = drain(&mut events).into_iter().map(|e| e.status).collect();
    assert_eq!(statuses.first(), Some(&TaskStatus::Pending));
    assert_eq!(statuses.last(), Some(&TaskStatus::Completed));
    assert!(!h.manager.retry(&id), "completed tasks are not retryable");
}

#[tokio::test]
async fn test_transient_errors_are_retried_in_place() {
    let source = MemorySource::new();
    source.fail_opens("flaky.bin", 2);
    let h = harness(source, 1, 3);
    let id = load(&h, "mem://flaky", MemoryEntry::file("flaky.bin", content(300, 6))).await;

    h.manager.enqueue(std::slice::from_ref(&id)).await.unwrap();
    wait_for(&h.manager, &id, TaskStatus::Completed).await;
    assert_eq!(h.source.opened_offsets("flaky.bin"), vec![0, 0, 0]);
}

#[tokio::test]
async fn test_path_escape_creates_no_tasks() {
    let source = Arc::new(MemorySource::new());
    let options = EngineOptions::builder().download_dir("/data").build();
    let manager = DownloadManager::new(source.clone() as Arc<dyn RemoteSource>, options);

    source.add_share(
        "mem://evil",
        MemoryEntry::dir(
            "evil",
            vec![
                MemoryEntry::file("fine.txt", content(5, 0)),
                MemoryEntry::file("/etc/passwd", content(5, 1)),
            ],
        ),
    );
    let tree = manager.submit("mem://evil").await.unwrap();

    let err = manager.enqueue(&[tree.root.id]).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Path(PathError::Traversal(ref path)) if path == Path::new("/etc/passwd")
    ));
    assert!(manager.list_tasks().is_empty());
    assert_eq!(manager.queued(), 0);
}

#[tokio::test]
async fn test_verification_failure_discards_partial() {
    let h = harness(MemorySource::new(), 1, 0);
    let entry = MemoryEntry::file("signed.bin", content(200, 3)).with_verify_key(vec![0u8; 32]);
    let id = load(&h, "mem://signed", entry).await;

    h.manager.enqueue(std::slice::from_ref(&id)).await.unwrap();
    let failed = wait_for(&h.manager, &id, TaskStatus::Failed).await;
    assert!(failed.error.unwrap().starts_with("Verification failed"));
    assert!(!h.root.join("signed.bin").exists());
    assert!(!h.root.join("signed.bin.part").exists());

    h.manager.set_verify_downloads(false);
    assert!(h.manager.retry(&id));
    wait_for(&h.manager, &id, TaskStatus::Completed).await;
    assert_eq!(h.source.opened_offsets("signed.bin"), vec![0, 0]);
}

#[tokio::test]
async fn test_corrupt_complete_partial_is_downloaded_again() {
    let h = harness(MemorySource::new(), 1, 0);
    let data = content(500, 8);
    std::fs::write(h.root.join("image.iso.part"), vec![0u8; 500]).unwrap();

    let id = load(&h, "mem://image", MemoryEntry::file("image.iso", data.clone())).await;
    let mut events = h.manager.subscribe();
    h.manager.enqueue(std::slice::from_ref(&id)).await.unwrap();

    wait_for(&h.manager, &id, TaskStatus::Completed).await;
    assert_eq!(read(&h.root.join("image.iso")), data);
    assert_eq!(h.source.opened_offsets("image.iso"), vec![0]);

    let history = drain(&mut events);
    assert_legal_history(&history);
    assert!(history.iter().all(|e| e.status != TaskStatus::Failed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pause_during_verification_holds_redownload() {
    let (h, open) = gated_harness();
    let data = content(800, 5);
    std::fs::write(h.root.join("disk.img.part"), vec![0u8; 800]).unwrap();

    let id = load(&h, "mem://disk", MemoryEntry::file("disk.img", data.clone())).await;
    let mut events = h.manager.subscribe();
    h.manager.enqueue(std::slice::from_ref(&id)).await.unwrap();

    wait_for(&h.manager, &id, TaskStatus::Verifying).await;
    h.manager.pause_all();
    open.store(true, Ordering::SeqCst);

    let paused = wait_for(&h.manager, &id, TaskStatus::Paused).await;
    assert_eq!(paused.bytes_downloaded, 0);
    sleep(Duration::from_millis(50)).await;
    let still = h.manager.task(&id).unwrap();
    assert_eq!(still.status, TaskStatus::Paused);
    assert_eq!(still.bytes_downloaded, 0);
    assert!(!h.root.join("disk.img").exists());

    h.manager.resume_all();
    wait_for(&h.manager, &id, TaskStatus::Completed).await;
    assert_eq!(read(&h.root.join("disk.img")), data);

    let history = drain(&mut events);
    assert_legal_history(&history);
    assert!(history.iter().all(|e| e.status != TaskStatus::Failed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_during_verification_keeps_partial() {
    let (h, open) = gated_harness();
    let data = content(300, 6);
    std::fs::write(h.root.join("report.pdf.part"), &data).unwrap();

    let id = load(&h, "mem://report", MemoryEntry::file("report.pdf", data.clone())).await;
    let mut events = h.manager.subscribe();
    h.manager.enqueue(std::slice::from_ref(&id)).await.unwrap();

    wait_for(&h.manager, &id, TaskStatus::Verifying).await;
    assert!(h.manager.cancel(&id));
    open.store(true, Ordering::SeqCst);
    sleep(Duration::from_millis(100)).await;

    let task = h.manager.task(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert_eq!(task.error, None);
    assert_eq!(read(&h.root.join("report.pdf.part")), data);
    assert!(!h.root.join("report.pdf").exists());

    let history = drain(&mut events);
    assert_legal_history(&history);
    assert!(history.iter().all(|e| e.status != TaskStatus::Failed && e.status != TaskStatus::Completed));
}

#[tokio::test]
async fn test_complete_partial_without_verification_is_finalized() {
    let h = harness(MemorySource::new(), 1, 0);
    h.manager.set_verify_downloads(false);
    let data = content(64, 2);
    std::fs::write(h.root.join("notes.txt.part"), &data).unwrap();

    let id = load(&h, "mem://notes", MemoryEntry::file("notes.txt", data.clone())).await;
    h.manager.enqueue(std::slice::from_ref(&id)).await.unwrap();

    wait_for(&h.manager, &id, TaskStatus::Completed).await;
    assert_eq!(read(&h.root.join("notes.txt")), data);
    assert!(h.source.opened_offsets("notes.txt").is_empty());
}

#[tokio::test]
async fn test_existing_file_is_skipped_and_session_released() {
    let h = harness(MemorySource::new(), 1, 0);
    let data = content(80, 1);
    std::fs::write(h.root.join("done.bin"), &data).unwrap();

    let id = load(&h, "mem://done", MemoryEntry::file("done.bin", data)).await;
    h.manager.enqueue(std::slice::from_ref(&id)).await.unwrap();

    let task = h.manager.task(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Skipped);
    assert_eq!(task.bytes_downloaded, 80);
    assert!(h.source.opened_offsets("done.bin").is_empty());
    assert_eq!(h.source.released_sessions(), vec!["s1"]);
}

#[tokio::test]
async fn test_session_release_waits_for_retryable_tasks() {
    let source = MemorySource::new();
    source.fail_opens("b.bin", 1);
    let h = harness(source, 2, 0);
    let root_id = load(
        &h,
        "mem://pair",
        MemoryEntry::dir(
            "pair",
            vec![
                MemoryEntry::file("a.bin", content(10, 1)),
                MemoryEntry::file("b.bin", content(10, 2)),
            ],
        ),
    )
    .await;
    h.manager.enqueue(&[root_id]).await.unwrap();
    let a = id_of(&h.manager, "a.bin");
    let b = id_of(&h.manager, "b.bin");
    wait_for(&h.manager, &a, TaskStatus::Completed).await;
    wait_for(&h.manager, &b, TaskStatus::Failed).await;

    // failed task can still be retried, so the tree stays loaded
    sleep(Duration::from_millis(20)).await;
    assert!(h.source.released_sessions().is_empty());

    assert!(h.manager.retry(&b));
    wait_for(&h.manager, &b, TaskStatus::Completed).await;
    let source = h.source.clone();
    wait_until(|| source.released_sessions() == vec!["s1"]).await;
    assert!(h.source.lookup_node(&a).is_none());
}

#[tokio::test]
async fn test_cancelled_session_released_on_clear() {
    let h = harness(MemorySource::new(), 1, 0);
    let id = load(&h, "mem://later", MemoryEntry::file("later.bin", content(10, 1))).await;

    h.manager.pause_all();
    h.manager.enqueue(std::slice::from_ref(&id)).await.unwrap();
    assert!(h.manager.cancel(&id));
    assert!(!h.manager.cancel(&id), "second cancel is a no-op");
    assert!(h.source.released_sessions().is_empty());

    assert_eq!(h.manager.clear_finished(), 1);
    assert_eq!(h.source.released_sessions(), vec!["s1"]);
}

#[tokio::test]
async fn test_cancel_during_transfer_then_retry() {
    let source = MemorySource::new()
        .with_chunk_size(16)
        .with_chunk_delay(Duration::from_millis(5));
    let h = harness(source, 1, 0);
    let data = content(800, 4);
    let id = load(&h, "mem://big", MemoryEntry::file("big.bin", data.clone())).await;

    h.manager.enqueue(std::slice::from_ref(&id)).await.unwrap();
    let manager = h.manager.clone();
    let watched = id.clone();
    wait_until(|| manager.task(&watched).is_some_and(|t| t.bytes_downloaded > 0)).await;

    assert!(h.manager.cancel(&id));
    sleep(Duration::from_millis(50)).await;
    let cancelled = h.manager.task(&id).unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert!(cancelled.error.is_none());
    assert!(!h.root.join("big.bin").exists());
    assert_eq!(h.manager.active_count(), 0);

    assert!(h.manager.retry(&id));
    wait_for(&h.manager, &id, TaskStatus::Completed).await;
    assert_eq!(read(&h.root.join("big.bin")), data);
    assert_eq!(h.manager.metrics().snapshot().tasks_cancelled, 1);
}

#[tokio::test]
async fn test_cancel_all_empties_queue() {
    let source = MemorySource::new()
        .with_chunk_size(8)
        .with_chunk_delay(Duration::from_millis(5));
    let h = harness(source, 1, 0);
    let files = (0..3)
        .map(|n| MemoryEntry::file(format!("q{n}.bin"), content(200, n)))
        .collect();
    let root_id = load(&h, "mem://queue", MemoryEntry::dir("queue", files)).await;

    h.manager.enqueue(&[root_id]).await.unwrap();
    assert_eq!(h.manager.queued(), 2);

    assert_eq!(h.manager.cancel_all(), 3);
    assert_eq!(h.manager.queued(), 0);
    let manager = h.manager.clone();
    wait_until(|| manager.active_count() == 0).await;
    assert!(
        h.manager
            .list_tasks()
            .iter()
            .all(|t| t.status == TaskStatus::Cancelled)
    );
}

#[tokio::test]
async fn test_snapshots_never_expose_paths() {
    let h = harness(MemorySource::new(), 1, 0);
    let mut events = h.manager.subscribe();
    let id = load(&h, "mem://tiny", MemoryEntry::file("tiny.bin", content(4, 0))).await;
    h.manager.enqueue(std::slice::from_ref(&id)).await.unwrap();
    wait_for(&h.manager, &id, TaskStatus::Completed).await;

    let root = h.root.to_string_lossy().to_string();
    for event in drain(&mut events) {
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains(&root), "{json}");
    }
}

//! Byte streams with cooperative pause/resume/destroy control.
//!
//! A [`StreamControl`] is created by the engine before a stream is opened and
//! stored on the task record, so pause and cancel requests can reach a transfer
//! at any point of its life (including while it waits on a retry back-off).
//! Sources build a [`ByteStream`] with [`spawn_transfer`], which owns the retry
//! loop and reopens the underlying body at the current offset.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use super::TransferError;
use super::retry::RetryPolicy;

/// Chunks buffered between the producer task and the consumer.
const CHANNEL_DEPTH: usize = 8;

/// Body returned by a source for one open attempt.
pub type ChunkStream = BoxStream<'static, Result<Bytes, TransferError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Running,
    Paused,
    Destroyed,
}

/// Shared handle used to pause, resume or destroy a transfer.
///
/// Destruction is sticky: once destroyed, pause and resume are ignored.
#[derive(Debug, Clone)]
pub struct StreamControl {
    tx: Arc<watch::Sender<StreamState>>,
}

impl Default for StreamControl {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamControl {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(StreamState::Running);
        Self { tx: Arc::new(tx) }
    }

    pub fn state(&self) -> StreamState {
        *self.tx.borrow()
    }

    pub fn is_destroyed(&self) -> bool {
        self.state() == StreamState::Destroyed
    }

    pub fn pause(&self) {
        self.tx.send_if_modified(|state| {
            if *state == StreamState::Running {
                *state = StreamState::Paused;
                true
            } else {
                false
            }
        });
    }

    pub fn resume(&self) {
        self.tx.send_if_modified(|state| {
            if *state == StreamState::Paused {
                *state = StreamState::Running;
                true
            } else {
                false
            }
        });
    }

    pub fn destroy(&self) {
        self.tx.send_if_modified(|state| {
            if *state == StreamState::Destroyed {
                false
            } else {
                *state = StreamState::Destroyed;
                true
            }
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<StreamState> {
        self.tx.subscribe()
    }

    /// Resolves once the handle is destroyed.
    pub async fn cancelled(&self) {
        let mut rx = self.subscribe();
        wait_destroyed(&mut rx).await;
    }

    /// Waits while paused. Fails with [`TransferError::Cancelled`] if destroyed.
    pub async fn wait_running(&self) -> Result<(), TransferError> {
        let mut rx = self.subscribe();
        wait_running(&mut rx).await
    }
}

async fn wait_running(rx: &mut watch::Receiver<StreamState>) -> Result<(), TransferError> {
    loop {
        match *rx.borrow_and_update() {
            StreamState::Running => return Ok(()),
            StreamState::Destroyed => return Err(TransferError::Cancelled),
            StreamState::Paused => {}
        }
        if rx.changed().await.is_err() {
            return Err(TransferError::Cancelled);
        }
    }
}

async fn wait_destroyed(rx: &mut watch::Receiver<StreamState>) {
    loop {
        if *rx.borrow_and_update() == StreamState::Destroyed {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Consumer side of a transfer.
///
/// While the control is paused [`ByteStream::next_chunk`] does not pull from
/// the producer, so bytes already in flight stay buffered and the source sees
/// back-pressure. Destroying the control ends the stream with
/// [`TransferError::Cancelled`].
pub struct ByteStream {
    chunks: mpsc::Receiver<Result<Bytes, TransferError>>,
    control: watch::Receiver<StreamState>,
}

impl ByteStream {
    pub fn new(chunks: mpsc::Receiver<Result<Bytes, TransferError>>, control: &StreamControl) -> Self {
        Self {
            chunks,
            control: control.subscribe(),
        }
    }

    /// Next chunk, `None` once the body is exhausted.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes, TransferError>> {
        if let Err(err) = wait_running(&mut self.control).await {
            return Some(Err(err));
        }

        tokio::select! {
            biased;
            _ = wait_destroyed(&mut self.control) => Some(Err(TransferError::Cancelled)),
            chunk = self.chunks.recv() => chunk,
        }
    }
}

/// Drive a source's body on a background task, retrying transient failures.
///
/// `open` is called with the byte offset to (re)start from. After a failure the
/// driver waits for the policy's back-off and reopens at the offset reached so
/// far; the attempt counter resets whenever a chunk arrives.
pub fn spawn_transfer<F, Fut>(
    start_offset: u64,
    retry: RetryPolicy,
    control: StreamControl,
    mut open: F,
) -> ByteStream
where
    F: FnMut(u64) -> Fut + Send + 'static,
    Fut: Future<Output = Result<ChunkStream, TransferError>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
    let stream = ByteStream::new(rx, &control);

    tokio::spawn(async move {
        let mut offset = start_offset;
        let mut attempt = 0u32;

        loop {
            let opened = tokio::select! {
                biased;
                _ = control.cancelled() => return,
                opened = open(offset) => opened,
            };

            let failure = match opened {
                Ok(mut body) => loop {
                    tokio::select! {
                        biased;
                        _ = control.cancelled() => return,
                        next = body.next() => match next {
                            Some(Ok(chunk)) => {
                                offset += chunk.len() as u64;
                                attempt = 0;
                                if tx.send(Ok(chunk)).await.is_err() {
                                    return;
                                }
                            }
                            Some(Err(err)) => break err,
                            None => {
                                debug!(offset, "transfer body finished");
                                return;
                            }
                        }
                    }
                },
                Err(err) => err,
            };

            if !failure.is_transient() || !retry.allows(attempt) {
                let _ = tx.send(Err(failure)).await;
                return;
            }

            warn!(attempt, offset, error = %failure, "transfer interrupted, backing off");
            if let Err(err) = retry.backoff(attempt, &control).await {
                let _ = tx.send(Err(err)).await;
                return;
            }
            attempt += 1;
        }
    });

    stream
}

//! Remote collaborator interface.
//!
//! The engine never talks to a storage provider directly. It consumes a
//! [`RemoteSource`], which resolves share references into node trees, opens
//! resumable byte streams and builds verification sinks.

pub mod http;
pub mod memory;
pub mod retry;
pub mod stream;
pub mod tree;
pub mod verify;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use http::{HttpConfig, HttpSource};
pub use memory::{MemoryEntry, MemorySource};
pub use retry::RetryPolicy;
pub use stream::{ByteStream, StreamControl, StreamState};
pub use tree::{NodeSpec, RemoteNode, ResolvedTree, TreeEntry, TreeIndex};
pub use verify::{Sha256Verifier, VERIFY_KEY_LEN, Verifier, VerifyError};

/// Errors raised while resolving a share reference.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("invalid share reference: {0}")]
    InvalidReference(String),

    #[error("share listing request failed: {0}")]
    Request(String),

    #[error("share listing returned HTTP {0}")]
    Status(u16),

    #[error("malformed share listing: {0}")]
    Listing(String),

    #[error("unknown share: {0}")]
    UnknownShare(String),
}

/// Errors surfaced by a byte stream.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The stream's control handle was destroyed.
    #[error("download cancelled")]
    Cancelled,

    #[error("transfer failed: {0}")]
    Request(String),

    #[error("server responded with HTTP {0}")]
    Status(u16),

    #[error("server ignored the range request for offset {0}")]
    RangeIgnored(u64),

    #[error("node {0} has no download location")]
    MissingLocator(String),
}

impl TransferError {
    /// Whether the retry policy may reopen the stream after this error.
    pub fn is_transient(&self) -> bool {
        match self {
            TransferError::Request(_) => true,
            TransferError::Status(code) => *code == 408 || *code == 429 || *code >= 500,
            TransferError::Cancelled
            | TransferError::RangeIgnored(_)
            | TransferError::MissingLocator(_) => false,
        }
    }
}

/// Parameters for [`RemoteSource::open_stream`].
#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub start_offset: u64,
    pub retry: RetryPolicy,
    pub control: StreamControl,
}

#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Resolve a share reference into a new session's node tree.
    async fn resolve_tree(&self, reference: &str) -> Result<ResolvedTree, RemoteError>;

    fn lookup_node(&self, id: &str) -> Option<Arc<RemoteNode>>;

    /// Relative folder path of the node's parent ("" for a root node).
    fn node_path(&self, id: &str) -> String;

    /// Forget every node of a session.
    fn release_session(&self, session_id: &str);

    /// Open a byte stream for a file node from `options.start_offset`.
    ///
    /// Transient failures are retried under `options.retry`; destroying
    /// `options.control` ends the stream with [`TransferError::Cancelled`].
    async fn open_stream(
        &self,
        node: &RemoteNode,
        options: StreamOptions,
    ) -> Result<ByteStream, TransferError>;

    fn open_verifier(&self, key: &[u8]) -> Box<dyn Verifier> {
        Box::new(Sha256Verifier::new(key))
    }
}

//! HTTP(S) share source.
//!
//! A share reference is the URL of a JSON listing:
//!
//! ```json
//! { "name": "photos", "children": [
//!     { "name": "a.jpg", "size": 1024, "url": "files/a.jpg", "sha256": "9f86d0..." }
//! ] }
//! ```
//!
//! An entry with `children` is a folder; every file entry must carry its
//! `size`. File URLs resolve relative to the
//! listing URL (an entry without `url` is fetched by name). Transfers resume
//! with `Range: bytes=<offset>-`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{CONTENT_TYPE, HeaderValue, RANGE};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, info};

use super::stream::{ChunkStream, spawn_transfer};
use super::tree::{NodeSpec, RemoteNode, ResolvedTree, TreeIndex};
use super::verify::VERIFY_KEY_LEN;
use super::{ByteStream, RemoteError, RemoteSource, StreamOptions, TransferError};

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    /// Whole-request timeout for listing fetches (transfers have none).
    pub listing_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            listing_timeout: Duration::from_secs(30),
            user_agent: format!("fetchtree/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListingEntry {
    name: String,
    size: Option<u64>,
    url: Option<String>,
    sha256: Option<String>,
    children: Option<Vec<ListingEntry>>,
}

pub struct HttpSource {
    client: Client,
    config: HttpConfig,
    index: TreeIndex,
}

impl HttpSource {
    pub fn new(config: HttpConfig) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| RemoteError::Request(e.to_string()))?;

        Ok(Self {
            client,
            config,
            index: TreeIndex::new(),
        })
    }

    async fn fetch_listing(&self, url: &Url) -> Result<ListingEntry, RemoteError> {
        debug!(%url, "fetching share listing");
        let response = self
            .client
            .get(url.clone())
            .timeout(self.config.listing_timeout)
            .send()
            .await
            .map_err(|e| RemoteError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status(status.as_u16()));
        }
        ensure_json(response.headers().get(CONTENT_TYPE))?;

        let body = response
            .bytes()
            .await
            .map_err(|e| RemoteError::Request(e.to_string()))?;
        serde_json::from_slice(&body).map_err(|e| RemoteError::Listing(e.to_string()))
    }
}

/// Accept `application/json` and `+json` media types; a missing header is tolerated.
fn ensure_json(content_type: Option<&HeaderValue>) -> Result<(), RemoteError> {
    let Some(value) = content_type else {
        return Ok(());
    };
    let raw = value
        .to_str()
        .map_err(|_| RemoteError::Listing("invalid Content-Type header".into()))?;
    let media: mime::Mime = raw
        .parse()
        .map_err(|_| RemoteError::Listing(format!("invalid Content-Type: {raw}")))?;

    let is_json = (media.type_() == mime::APPLICATION && media.subtype() == mime::JSON)
        || media.suffix() == Some(mime::JSON);
    if is_json {
        Ok(())
    } else {
        Err(RemoteError::Listing(format!("expected JSON listing, got {media}")))
    }
}

fn to_spec(entry: ListingEntry, base: &Url) -> Result<NodeSpec, RemoteError> {
    if let Some(children) = entry.children {
        let children = children
            .into_iter()
            .map(|child| to_spec(child, base))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(NodeSpec::directory(entry.name, children));
    }

    let size = entry
        .size
        .ok_or_else(|| RemoteError::Listing(format!("file {} has no size", entry.name)))?;
    let href = entry.url.as_deref().unwrap_or(&entry.name);
    let url = base
        .join(href)
        .map_err(|e| RemoteError::Listing(format!("bad url for {}: {e}", entry.name)))?;

    let mut spec = NodeSpec::file(entry.name, size).with_locator(url.to_string());
    if let Some(digest) = entry.sha256 {
        let key = hex::decode(digest.trim())
            .map_err(|e| RemoteError::Listing(format!("bad sha256 for {}: {e}", spec.name)))?;
        if key.len() != VERIFY_KEY_LEN {
            return Err(RemoteError::Listing(format!(
                "sha256 for {} must be {VERIFY_KEY_LEN} bytes",
                spec.name
            )));
        }
        spec = spec.with_verify_key(key);
    }
    Ok(spec)
}

async fn open_range(client: Client, url: Url, offset: u64) -> Result<ChunkStream, TransferError> {
    let mut request = client.get(url);
    if offset > 0 {
        request = request.header(RANGE, format!("bytes={offset}-"));
    }

    let response = request
        .send()
        .await
        .map_err(|e| TransferError::Request(e.to_string()))?;

    let status = response.status();
    if offset > 0 && status == StatusCode::OK {
        return Err(TransferError::RangeIgnored(offset));
    }
    if !status.is_success() {
        return Err(TransferError::Status(status.as_u16()));
    }

    Ok(response
        .bytes_stream()
        .map(|chunk| chunk.map_err(|e| TransferError::Request(e.to_string())))
        .boxed())
}

#[async_trait]
impl RemoteSource for HttpSource {
    async fn resolve_tree(&self, reference: &str) -> Result<ResolvedTree, RemoteError> {
        let url = Url::parse(reference).map_err(|e| RemoteError::InvalidReference(e.to_string()))?;
        let listing = self.fetch_listing(&url).await?;
        let spec = to_spec(listing, &url)?;
        let tree = self.index.insert(spec);
        info!(session_id = %tree.session_id, root = %tree.root.name, "share resolved");
        Ok(tree)
    }

    fn lookup_node(&self, id: &str) -> Option<Arc<RemoteNode>> {
        self.index.lookup(id)
    }

    fn node_path(&self, id: &str) -> String {
        self.index.parent_path(id)
    }

    fn release_session(&self, session_id: &str) {
        let removed = self.index.release(session_id);
        debug!(session_id, removed, "share session released");
    }

    async fn open_stream(
        &self,
        node: &RemoteNode,
        options: StreamOptions,
    ) -> Result<ByteStream, TransferError> {
        let locator = node
            .locator
            .as_deref()
            .ok_or_else(|| TransferError::MissingLocator(node.id.clone()))?;
        let url = Url::parse(locator).map_err(|_| TransferError::MissingLocator(node.id.clone()))?;
        let client = self.client.clone();

        Ok(spawn_transfer(
            options.start_offset,
            options.retry,
            options.control,
            move |offset| open_range(client.clone(), url.clone(), offset),
        ))
    }
}

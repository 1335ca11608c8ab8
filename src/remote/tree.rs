//! Session-scoped index of resolved remote trees.
//!
//! Every resolved share becomes a session `s<N>`; its nodes get ids
//! `s<N>-<ordinal>` assigned depth-first with children in natural name order.
//! Sources keep one [`TreeIndex`] and delegate node lookups to it.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::iter::Peekable;
use std::str::Chars;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

/// Unresolved node description produced by a source before ids are assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    pub name: String,
    pub size: u64,
    pub locator: Option<String>,
    pub verify_key: Option<Vec<u8>>,
    /// `Some` for folders, even when empty.
    pub children: Option<Vec<NodeSpec>>,
}

impl NodeSpec {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            locator: None,
            verify_key: None,
            children: None,
        }
    }

    pub fn directory(name: impl Into<String>, children: Vec<NodeSpec>) -> Self {
        Self {
            name: name.into(),
            size: 0,
            locator: None,
            verify_key: None,
            children: Some(children),
        }
    }

    pub fn with_locator(mut self, locator: impl Into<String>) -> Self {
        self.locator = Some(locator.into());
        self
    }

    pub fn with_verify_key(mut self, key: Vec<u8>) -> Self {
        self.verify_key = Some(key);
        self
    }
}

/// A resolved node. Folders carry their (sorted) children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteNode {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub is_directory: bool,
    /// Source-specific location of the bytes (a URL for HTTP shares).
    pub locator: Option<String>,
    pub verify_key: Option<Vec<u8>>,
    pub children: Vec<Arc<RemoteNode>>,
}

impl RemoteNode {
    pub fn entry(&self) -> TreeEntry {
        TreeEntry {
            id: self.id.clone(),
            name: self.name.clone(),
            size: self.size,
            directory: self.is_directory,
            children: self
                .is_directory
                .then(|| self.children.iter().map(|child| child.entry()).collect()),
        }
    }
}

/// Public view of a resolved node, as returned to callers of `submit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeEntry {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub directory: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<TreeEntry>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedTree {
    pub session_id: String,
    #[serde(flatten)]
    pub root: TreeEntry,
}

#[derive(Debug, Default)]
struct IndexState {
    sessions_issued: u64,
    nodes: HashMap<String, Arc<RemoteNode>>,
    parents: HashMap<String, String>,
}

#[derive(Debug, Default)]
pub struct TreeIndex {
    state: Mutex<IndexState>,
}

impl TreeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, IndexState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Assign ids to a freshly listed tree under a new session.
    pub fn insert(&self, root: NodeSpec) -> ResolvedTree {
        let mut state = self.state();
        state.sessions_issued += 1;
        let session_id = format!("s{}", state.sessions_issued);

        let mut ordinal = 0u64;
        let node = build(root, &session_id, &mut ordinal, "", &mut state);
        tracing::debug!(session_id = %session_id, nodes = ordinal, "indexed remote tree");

        ResolvedTree {
            session_id,
            root: node.entry(),
        }
    }

    pub fn lookup(&self, id: &str) -> Option<Arc<RemoteNode>> {
        self.state().nodes.get(id).cloned()
    }

    /// Slash-separated path of the node's parent folder, empty at the root.
    pub fn parent_path(&self, id: &str) -> String {
        self.state().parents.get(id).cloned().unwrap_or_default()
    }

    /// Drop every node of a session. Returns how many were removed.
    pub fn release(&self, session_id: &str) -> usize {
        let prefix = format!("{session_id}-");
        let mut state = self.state();
        let before = state.nodes.len();
        state.nodes.retain(|id, _| !id.starts_with(&prefix));
        state.parents.retain(|id, _| !id.starts_with(&prefix));
        before - state.nodes.len()
    }

    pub fn len(&self) -> usize {
        self.state().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn build(
    spec: NodeSpec,
    session_id: &str,
    ordinal: &mut u64,
    parent_path: &str,
    state: &mut IndexState,
) -> Arc<RemoteNode> {
    let id = format!("{session_id}-{ordinal}");
    *ordinal += 1;

    let path = if parent_path.is_empty() {
        spec.name.clone()
    } else {
        format!("{parent_path}/{}", spec.name)
    };
    state.parents.insert(id.clone(), parent_path.to_string());

    let is_directory = spec.children.is_some();
    let mut specs = spec.children.unwrap_or_default();
    specs.sort_by(|a, b| natural_cmp(&a.name, &b.name));
    let children: Vec<Arc<RemoteNode>> = specs
        .into_iter()
        .map(|child| build(child, session_id, ordinal, &path, state))
        .collect();

    let size = if is_directory {
        children.iter().map(|child| child.size).sum()
    } else {
        spec.size
    };

    let node = Arc::new(RemoteNode {
        id: id.clone(),
        name: spec.name,
        size,
        is_directory,
        locator: spec.locator,
        verify_key: spec.verify_key,
        children,
    });
    state.nodes.insert(id, node.clone());
    node
}

/// Natural ordering: digit runs compare numerically, letters case-insensitively.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();

    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let l = take_digits(&mut left);
                let r = take_digits(&mut right);
                let l = l.trim_start_matches('0');
                let r = r.trim_start_matches('0');
                let ord = l.len().cmp(&r.len()).then_with(|| l.cmp(r));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(x), Some(y)) => {
                let ord = x.to_lowercase().cmp(y.to_lowercase());
                if ord != Ordering::Equal {
                    return ord;
                }
                left.next();
                right.next();
            }
        }
    }
}

fn take_digits(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(c) = chars.next_if(|c| c.is_ascii_digit()) {
        digits.push(c);
    }
    digits
}

//! Session bookkeeping: which tasks came from which resolved tree.

use std::collections::{HashMap, HashSet};

use super::registry::TaskRegistry;
use super::task::{TaskId, session_of};

#[derive(Debug, Default)]
pub(crate) struct SessionTracker {
    sessions: HashMap<String, HashSet<TaskId>>,
}

impl SessionTracker {
    pub fn register(&mut self, task_id: &str) {
        self.sessions
            .entry(session_of(task_id).to_string())
            .or_default()
            .insert(task_id.to_string());
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Forget the session if none of its tasks still needs the remote tree.
    ///
    /// Returns `true` when the caller should release the session's tree data.
    pub fn try_release(&mut self, session_id: &str, registry: &TaskRegistry) -> bool {
        let Some(ids) = self.sessions.get(session_id) else {
            return false;
        };
        let needed = ids
            .iter()
            .filter_map(|id| registry.get(id))
            .any(|task| task.status.holds_session());
        if needed {
            return false;
        }
        self.sessions.remove(session_id);
        true
    }

    /// After a clear: release only once no task of the session is left at all.
    pub fn release_if_cleared(&mut self, session_id: &str, registry: &TaskRegistry) -> bool {
        let Some(ids) = self.sessions.get(session_id) else {
            return false;
        };
        if ids.iter().any(|id| registry.contains(id)) {
            return false;
        }
        self.sessions.remove(session_id);
        true
    }
}

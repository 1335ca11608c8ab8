//! Insertion-ordered task store.

use std::collections::HashMap;

use super::task::{Task, TaskId, TaskSnapshot};

/// Single owner of all task records.
///
/// Iteration follows first-insertion order; re-inserting an existing id
/// replaces the record in place.
#[derive(Debug, Default)]
pub(crate) struct TaskRegistry {
    tasks: HashMap<TaskId, Task>,
    order: Vec<TaskId>,
}

impl TaskRegistry {
    pub fn insert(&mut self, task: Task) {
        if !self.tasks.contains_key(&task.id) {
            self.order.push(task.id.clone());
        }
        self.tasks.insert(task.id.clone(), task);
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    /// Remove every task matching `predicate`, returning the removed records.
    pub fn remove_where(&mut self, mut predicate: impl FnMut(&Task) -> bool) -> Vec<Task> {
        let mut removed = Vec::new();
        let tasks = &mut self.tasks;
        self.order.retain(|id| {
            let drop = tasks.get(id).is_none_or(&mut predicate);
            if drop {
                if let Some(task) = tasks.remove(id) {
                    removed.push(task);
                }
            }
            !drop
        });
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    pub fn ids(&self) -> Vec<TaskId> {
        self.order.clone()
    }

    pub fn snapshots(&self) -> Vec<TaskSnapshot> {
        self.iter().map(Task::snapshot).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }
}

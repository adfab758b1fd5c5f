//! In-memory task store. One reader/writer lock guards the map;
//! every read and write copies in/out so callers can freely mutate the
//! task they got back without corrupting store state.

use std::collections::HashMap;

use tokio::sync::RwLock;

use super::task::{Artifact, Task, TaskState};

#[derive(Default)]
pub struct TaskStore {
    tasks: RwLock<HashMap<String, Task>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Returns a deep copy of the stored task, or `None` if absent.
    pub async fn get(&self, id: &str) -> Option<Task> {
        self.tasks.read().await.get(id).cloned()
    }

    /// Replaces or inserts a deep copy of `task`.
    pub async fn put(&self, task: Task) {
        self.tasks.write().await.insert(task.id.clone(), task);
    }

    /// Mutates only the status; fails silently (returns `false`) if the
    /// task is absent.
    pub async fn update_status(&self, id: &str, state: TaskState) -> bool {
        let mut guard = self.tasks.write().await;
        match guard.get_mut(id) {
            Some(task) => {
                task.set_state(state);
                true
            }
            None => false,
        }
    }

    pub async fn set_artifacts(&self, id: &str, artifacts: Vec<Artifact>) -> bool {
        let mut guard = self.tasks.write().await;
        match guard.get_mut(id) {
            Some(task) => {
                task.artifacts = artifacts;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::Message;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = TaskStore::new();
        let task = Task::new_submitted("t1", Message::user_text("hi"));
        store.put(task.clone()).await;
        let fetched = store.get("t1").await.unwrap();
        assert_eq!(fetched, task);
    }

    #[tokio::test]
    async fn mutating_returned_copy_does_not_affect_store() {
        let store = TaskStore::new();
        store
            .put(Task::new_submitted("t1", Message::user_text("hi")))
            .await;
        let mut copy = store.get("t1").await.unwrap();
        copy.history.push(Message::agent_text("mutated"));
        let fresh = store.get("t1").await.unwrap();
        assert_eq!(fresh.history.len(), 1);
    }

    #[tokio::test]
    async fn update_status_on_missing_task_reports_false() {
        let store = TaskStore::new();
        assert!(!store.update_status("missing", TaskState::Canceled).await);
    }

    #[tokio::test]
    async fn update_status_mutates_in_place() {
        let store = TaskStore::new();
        store
            .put(Task::new_submitted("t1", Message::user_text("hi")))
            .await;
        assert!(store.update_status("t1", TaskState::Working).await);
        let task = store.get("t1").await.unwrap();
        assert_eq!(task.status.state, TaskState::Working);
    }
}

pub mod task;

use crate::error::{TaskError, TaskResult};
use crate::poller::PollHandle;
use std::collections::HashMap;
use task::{Region, Task, TaskId, TaskSpec};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// A task together with the timer polling it
struct TaskEntry {
    task: Task,
    poller: Option<PollHandle>,
}

/// Single source of truth for task state.
///
/// Dropping the registry aborts every poller it still owns.
#[derive(Default)]
pub struct TaskRegistry {
    entries: RwLock<HashMap<TaskId, TaskEntry>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a `Pending` task, generating an id unless the `TaskSpec` carries one
    pub async fn create(&self, spec: &TaskSpec, region: Region) -> TaskResult<TaskId> {
        let mut entries = self.entries.write().await;

        let id = match &spec.id {
            Some(id) if entries.contains_key(id) => return Err(TaskError::DuplicateId(id.clone())),
            Some(id) => id.clone(),
            None => loop {
                let id = TaskId::generate();
                if !entries.contains_key(&id) {
                    break id;
                }
            },
        };

        entries.insert(
            id.clone(),
            TaskEntry {
                task: Task::new(id.clone(), spec, region),
                poller: None,
            },
        );
        Ok(id)
    }

    pub async fn get(&self, id: &TaskId) -> TaskResult<Task> {
        let entries = self.entries.read().await;
        entries
            .get(id)
            .map(|entry| entry.task.clone())
            .ok_or_else(|| TaskError::NotFound(id.clone()))
    }

    /// Apply `mutator` to the task while holding the write lock
    pub async fn update<F, T>(&self, id: &TaskId, mutator: F) -> TaskResult<T>
    where
        F: FnOnce(&mut Task) -> T,
    {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(id).ok_or_else(|| TaskError::NotFound(id.clone()))?;
        Ok(mutator(&mut entry.task))
    }

    /// Remove a task. Absent ids are not an error.
    pub async fn remove(&self, id: &TaskId) -> Option<Task> {
        let entry = self.entries.write().await.remove(id)?;
        // entry.poller drops here and aborts its loop
        Some(entry.task)
    }

    pub async fn contains(&self, id: &TaskId) -> bool {
        self.entries.read().await.contains_key(id)
    }

    pub async fn list(&self) -> Vec<Task> {
        let entries = self.entries.read().await;
        entries.values().map(|entry| entry.task.clone()).collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Spawn a poller for `id` unless one is already live. The check and the
    /// spawn happen under the same lock.
    pub async fn attach_poller<F>(&self, id: &TaskId, spawn: F) -> TaskResult<()>
    where
        F: FnOnce() -> JoinHandle<()>,
    {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(id).ok_or_else(|| TaskError::NotFound(id.clone()))?;

        if entry.poller.as_ref().is_some_and(PollHandle::is_active) {
            return Err(TaskError::AlreadyPolling(id.clone()));
        }

        entry.poller = Some(PollHandle::new(spawn()));
        Ok(())
    }

    pub async fn detach_poller(&self, id: &TaskId) -> Option<PollHandle> {
        let mut entries = self.entries.write().await;
        entries.get_mut(id)?.poller.take()
    }

    pub async fn is_polling(&self, id: &TaskId) -> bool {
        let entries = self.entries.read().await;
        entries
            .get(id)
            .and_then(|entry| entry.poller.as_ref())
            .is_some_and(PollHandle::is_active)
    }

    /// Drop every task and abort every poller
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Non-blocking [`clear`](Self::clear) for teardown paths that cannot await.
    /// Returns false if the lock was held.
    pub fn try_clear(&self) -> bool {
        match self.entries.try_write() {
            Ok(mut entries) => {
                entries.clear();
                true
            }
            Err(_) => false,
        }
    }
}

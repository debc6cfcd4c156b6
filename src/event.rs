use crate::registry::task::{Task, TaskId, TaskState};

/// Change notifications published to subscribers of the controller
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Started(Task),
    Progress(Task),
    Paused(Task),
    Resumed(Task),
    /// The task left the registry; `state` is its last known state
    Removed { id: TaskId, state: Option<TaskState> },
}

impl ProgressEvent {
    pub fn task_id(&self) -> &TaskId {
        match self {
            ProgressEvent::Started(task)
            | ProgressEvent::Progress(task)
            | ProgressEvent::Paused(task)
            | ProgressEvent::Resumed(task) => &task.id,
            ProgressEvent::Removed { id, .. } => id,
        }
    }
}

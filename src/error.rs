use crate::registry::task::{SelectionField, TaskId, TaskState};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Task not found: {0}")]
    NotFound(TaskId),

    #[error("Task {id} is {state}, cannot {operation}")]
    InvalidState {
        id: TaskId,
        state: TaskState,
        operation: &'static str,
    },

    #[error("Task id already in use: {0}")]
    DuplicateId(TaskId),

    #[error("Task {0} already has an active poller")]
    AlreadyPolling(TaskId),

    #[error("Downloader unreachable: {0}")]
    Unreachable(String),

    #[error("No region selected")]
    NoRegionSelected,

    #[error("No {0} selected")]
    NoSelectionMade(SelectionField),

    #[error("Invalid task id: {0}")]
    InvalidId(String),

    #[error("Downloader rejected request: {0}")]
    Rejected(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TaskError {
    /// Errors the poller absorbs and retries on the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, TaskError::Unreachable(_))
    }
}

pub type TaskResult<T> = Result<T, TaskError>;

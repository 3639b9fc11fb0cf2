use crate::models::TaskId;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CoreErrorKind {
    InvalidInput,
    UnsupportedStrategy,
    FetchFailure,
    BrowserFailure,
    ExtractionFailure,
    Timeout,
    Cancelled,
    StorageFailure,
    InvalidTransition,
    Internal,
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct CoreError {
    pub task: Option<TaskId>,
    pub kind: CoreErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            task: None,
            kind,
            message: message.into(),
        }
    }

    /// Attributes the error to `task_id` unless it already names a task.
    pub fn for_task(mut self, task_id: TaskId) -> Self {
        self.task = self.task.or(Some(task_id));
        self
    }

    pub fn cancelled(task_id: Option<TaskId>) -> Self {
        Self {
            task: task_id,
            kind: CoreErrorKind::Cancelled,
            message: "task was cancelled".to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == CoreErrorKind::Cancelled
    }
}

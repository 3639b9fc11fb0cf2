use crate::models::{BusinessRecord, CoreError, TaskId, TaskRecord, TaskStatus};

pub type PersistenceResult<T> = Result<T, CoreError>;

pub trait MigrationStore: Send + Sync {
    fn current_version(&self) -> PersistenceResult<i64>;

    fn apply_migration(&self, target_version: i64) -> PersistenceResult<()>;
}

pub trait TaskStore: Send + Sync {
    /// Inserts a task in `Created` state and returns its storage-assigned id.
    fn create_task(&self, keyword: &str, location: &str) -> PersistenceResult<TaskId>;

    fn get_task(&self, task_id: TaskId) -> PersistenceResult<Option<TaskRecord>>;

    /// Rejects any move the task state machine does not allow with `InvalidTransition`.
    /// A `None` message leaves the stored error message untouched.
    fn update_task_status(
        &self,
        task_id: TaskId,
        status: TaskStatus,
        error_message: Option<&str>,
    ) -> PersistenceResult<()>;

    /// Newest first.
    fn get_all_tasks(&self) -> PersistenceResult<Vec<TaskRecord>>;

    /// Deletes the task and every result attached to it.
    fn delete_task(&self, task_id: TaskId) -> PersistenceResult<bool>;
}

pub trait ResultStore: Send + Sync {
    /// Appends `records` under `task_id`, stamping task linkage and scrape time,
    /// and sets the task's results_count to `records.len()`.
    fn save_results(&self, task_id: TaskId, records: &[BusinessRecord])
    -> PersistenceResult<usize>;

    fn get_task_results(&self, task_id: TaskId) -> PersistenceResult<Vec<BusinessRecord>>;

    fn get_all_results(&self) -> PersistenceResult<Vec<BusinessRecord>>;

    /// Returns how many results were deleted; results_count is reset to zero.
    fn clear_task_results(&self, task_id: TaskId) -> PersistenceResult<usize>;
}

/// Everything the orchestrator needs from storage.
pub trait ScrapeStore: TaskStore + ResultStore {}

impl<T: TaskStore + ResultStore> ScrapeStore for T {}

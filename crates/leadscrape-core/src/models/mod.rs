pub mod business;
pub mod error;
pub mod task;

pub use business::{BusinessRecord, UNKNOWN_NAME, dedupe_by_name};
pub use error::{CoreError, CoreErrorKind};
pub use task::{TaskId, TaskRecord, TaskStatus};

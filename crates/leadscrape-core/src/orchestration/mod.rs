pub mod cancellation;
pub mod events;
pub mod orchestrator;
pub mod registry;

pub use cancellation::TaskCancellationToken;
pub use events::{TaskCallback, TaskEvent, event_channel};
pub use orchestrator::{NO_RESULTS_MESSAGE, TaskOrchestrator};
pub use registry::JobRegistry;

use crate::models::CoreError;

pub type OrchestrationResult<T> = Result<T, CoreError>;

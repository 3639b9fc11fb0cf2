use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::models::{BusinessRecord, TaskId, TaskStatus};

/// Progress notifications for a single job, in emission order.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum TaskEvent {
    StatusChanged { status: TaskStatus },
    Completed { results: Vec<BusinessRecord> },
    Failed { error: String },
    Cancelled {},
}

impl TaskEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StatusChanged { .. } => "status_changed",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Cancelled {} => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::StatusChanged { .. })
    }
}

/// Invoked from the job's execution context; must not block for long.
pub type TaskCallback = Arc<dyn Fn(TaskId, TaskEvent) + Send + Sync>;

/// A callback that forwards every event into an unbounded channel.
pub fn event_channel() -> (TaskCallback, mpsc::UnboundedReceiver<(TaskId, TaskEvent)>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let callback: TaskCallback = Arc::new(move |task_id, event| {
        if sender.send((task_id, event)).is_err() {
            tracing::debug!(%task_id, "event receiver dropped");
        }
    });
    (callback, receiver)
}

/// A panicking callback is logged and otherwise ignored.
pub(crate) fn deliver(callback: Option<&TaskCallback>, task_id: TaskId, event: TaskEvent) {
    let Some(callback) = callback else {
        return;
    };
    let name = event.name();
    if catch_unwind(AssertUnwindSafe(|| callback(task_id, event))).is_err() {
        tracing::error!(%task_id, event = name, "task callback panicked");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::{TaskCallback, TaskEvent, deliver, event_channel};
    use crate::models::{BusinessRecord, TaskId, TaskStatus};

    #[test]
    fn events_serialize_as_name_and_payload() {
        let status = serde_json::to_value(TaskEvent::StatusChanged {
            status: TaskStatus::Running,
        })
        .unwrap();
        assert_eq!(
            status,
            json!({"event": "status_changed", "payload": {"status": "Running"}})
        );

        let cancelled = serde_json::to_value(TaskEvent::Cancelled {}).unwrap();
        assert_eq!(cancelled, json!({"event": "cancelled", "payload": {}}));

        let completed = serde_json::to_value(TaskEvent::Completed {
            results: vec![BusinessRecord {
                name: "Cafe".to_string(),
                ..BusinessRecord::default()
            }],
        })
        .unwrap();
        assert_eq!(completed["event"], "completed");
        assert_eq!(completed["payload"]["results"][0]["name"], "Cafe");
    }

    #[test]
    fn channel_forwards_events_in_order() {
        let (callback, mut receiver) = event_channel();
        deliver(Some(&callback), TaskId(4), TaskEvent::Cancelled {});
        deliver(
            Some(&callback),
            TaskId(4),
            TaskEvent::Failed {
                error: "boom".to_string(),
            },
        );

        assert_eq!(receiver.try_recv().unwrap(), (TaskId(4), TaskEvent::Cancelled {}));
        assert_eq!(receiver.try_recv().unwrap().1.name(), "failed");
    }

    #[test]
    fn panicking_callback_is_contained() {
        let callback: TaskCallback = Arc::new(|_, _| panic!("listener bug"));
        deliver(Some(&callback), TaskId(1), TaskEvent::Cancelled {});
        deliver(None, TaskId(1), TaskEvent::Cancelled {});
    }
}

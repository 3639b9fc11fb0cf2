use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::task::AbortHandle;

use crate::models::{CoreError, CoreErrorKind, TaskId};
use crate::orchestration::OrchestrationResult;
use crate::orchestration::cancellation::TaskCancellationToken;
use crate::orchestration::events::TaskCallback;

/// Whoever wins the claim owns the job's terminal status and event.
#[derive(Clone, Debug, Default)]
pub(crate) struct TerminalClaim(Arc<AtomicBool>);

impl TerminalClaim {
    pub(crate) fn claim(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }
}

/// How far `start_task` got with a registered job.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum StartPhase {
    Pending,
    /// `Running` is persisted; the task can be moved to `Cancelled`.
    Running,
    /// The start failed or was dropped; the task never left `Created`.
    Abandoned,
}

pub(crate) struct JobHandle {
    pub(crate) generation: u64,
    pub(crate) token: TaskCancellationToken,
    pub(crate) terminal: TerminalClaim,
    pub(crate) callback: Option<TaskCallback>,
    started: watch::Receiver<StartPhase>,
    unit: Option<AbortHandle>,
}

/// What a newly registered job needs to run.
pub(crate) struct Registration {
    pub(crate) generation: u64,
    pub(crate) token: TaskCancellationToken,
    pub(crate) terminal: TerminalClaim,
    pub(crate) callback: Option<TaskCallback>,
    started: watch::Sender<StartPhase>,
}

impl Registration {
    pub(crate) fn mark_started(&self, phase: StartPhase) {
        self.started.send_replace(phase);
    }
}

/// Live jobs keyed by task id, at most one per id.
#[derive(Clone, Default)]
pub struct JobRegistry {
    inner: Arc<Mutex<RegistryState>>,
    released: Arc<Notify>,
}

#[derive(Default)]
struct RegistryState {
    next_generation: u64,
    jobs: HashMap<TaskId, JobHandle>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when the id already has a job.
    pub(crate) fn try_register(
        &self,
        task_id: TaskId,
        callback: Option<TaskCallback>,
    ) -> Option<Registration> {
        let mut state = self.state();
        if state.jobs.contains_key(&task_id) {
            return None;
        }

        state.next_generation = state.next_generation.saturating_add(1);
        let (started_tx, started_rx) = watch::channel(StartPhase::Pending);
        let handle = JobHandle {
            generation: state.next_generation,
            token: TaskCancellationToken::new(),
            terminal: TerminalClaim::default(),
            callback,
            started: started_rx,
            unit: None,
        };
        let registration = Registration {
            generation: handle.generation,
            token: handle.token.clone(),
            terminal: handle.terminal.clone(),
            callback: handle.callback.clone(),
            started: started_tx,
        };
        state.jobs.insert(task_id, handle);
        Some(registration)
    }

    pub(crate) fn attach_unit(&self, task_id: TaskId, generation: u64, unit: AbortHandle) {
        let mut state = self.state();
        if let Some(handle) = state.jobs.get_mut(&task_id)
            && handle.generation == generation
        {
            handle.unit = Some(unit);
        }
    }

    /// Removes the entry only if it still belongs to `generation`.
    pub(crate) fn release(&self, task_id: TaskId, generation: u64) -> bool {
        let removed = {
            let mut state = self.state();
            match state.jobs.get(&task_id) {
                Some(handle) if handle.generation == generation => {
                    state.jobs.remove(&task_id);
                    true
                }
                _ => false,
            }
        };
        if removed {
            self.released.notify_waiters();
        }
        removed
    }

    pub(crate) fn take(&self, task_id: TaskId) -> Option<JobHandle> {
        let handle = self.state().jobs.remove(&task_id);
        if handle.is_some() {
            self.released.notify_waiters();
        }
        handle
    }

    /// Registered and its execution unit has not finished.
    pub fn is_live(&self, task_id: TaskId) -> bool {
        self.state().jobs.get(&task_id).is_some_and(JobHandle::is_live)
    }

    pub fn live_task_ids(&self) -> HashSet<TaskId> {
        self.state()
            .jobs
            .iter()
            .filter(|(_, handle)| handle.is_live())
            .map(|(task_id, _)| *task_id)
            .collect()
    }

    pub fn tracked_task_ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.state().jobs.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn contains(&self, task_id: TaskId) -> bool {
        self.state().jobs.contains_key(&task_id)
    }

    /// Waits until `task_id` has no registry entry.
    pub async fn wait_for_release(
        &self,
        task_id: TaskId,
        timeout: Option<Duration>,
    ) -> OrchestrationResult<()> {
        let deadline = timeout.map(|timeout| tokio::time::Instant::now() + timeout);
        loop {
            let notified = self.released.notified();
            if !self.contains(task_id) {
                return Ok(());
            }
            match deadline {
                Some(deadline) => {
                    tokio::time::timeout_at(deadline, notified)
                        .await
                        .map_err(|_| {
                            CoreError::new(
                                CoreErrorKind::Timeout,
                                format!("timed out waiting for task '{task_id}' to release"),
                            )
                            .for_task(task_id)
                        })?;
                }
                None => notified.await,
            }
        }
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl JobHandle {
    /// Waits for the start that registered this job to settle.
    pub(crate) async fn start_settled(&mut self) -> StartPhase {
        self.started
            .wait_for(|phase| *phase != StartPhase::Pending)
            .await
            .map(|phase| *phase)
            .unwrap_or(StartPhase::Abandoned)
    }

    fn is_live(&self) -> bool {
        self.unit.as_ref().is_none_or(|unit| !unit.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{JobRegistry, StartPhase};
    use crate::models::{CoreErrorKind, TaskId};

    #[test]
    fn second_registration_for_the_same_id_is_refused() {
        let registry = JobRegistry::new();
        let first = registry.try_register(TaskId(1), None).unwrap();
        assert!(registry.try_register(TaskId(1), None).is_none());
        assert!(registry.try_register(TaskId(2), None).is_some());
        assert!(registry.is_live(TaskId(1)));
        assert_eq!(registry.tracked_task_ids(), vec![TaskId(1), TaskId(2)]);
        assert!(first.terminal.claim());
        assert!(!first.terminal.claim());
    }

    #[test]
    fn stale_generation_cannot_release_a_newer_entry() {
        let registry = JobRegistry::new();
        let old = registry.try_register(TaskId(7), None).unwrap();
        assert!(registry.take(TaskId(7)).is_some());
        let new = registry.try_register(TaskId(7), None).unwrap();

        assert!(!registry.release(TaskId(7), old.generation));
        assert!(registry.contains(TaskId(7)));
        assert!(registry.release(TaskId(7), new.generation));
        assert!(!registry.contains(TaskId(7)));
    }

    #[tokio::test]
    async fn wait_for_release_times_out_then_observes_release() {
        let registry = JobRegistry::new();
        let registration = registry.try_register(TaskId(3), None).unwrap();

        let error = registry
            .wait_for_release(TaskId(3), Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert_eq!(error.kind, CoreErrorKind::Timeout);

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.wait_for_release(TaskId(3), None).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        registry.release(TaskId(3), registration.generation);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn taken_handle_waits_for_the_start_to_settle() {
        let registry = JobRegistry::new();
        let registration = registry.try_register(TaskId(5), None).unwrap();
        let mut handle = registry.take(TaskId(5)).unwrap();

        let settled = tokio::spawn(async move { handle.start_settled().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!settled.is_finished());

        registration.mark_started(StartPhase::Running);
        assert_eq!(settled.await.unwrap(), StartPhase::Running);
    }

    #[tokio::test]
    async fn dropped_registration_counts_as_abandoned() {
        let registry = JobRegistry::new();
        let registration = registry.try_register(TaskId(6), None).unwrap();
        let mut handle = registry.take(TaskId(6)).unwrap();

        drop(registration);
        assert_eq!(handle.start_settled().await, StartPhase::Abandoned);
    }
}

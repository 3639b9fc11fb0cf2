use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ScraperConfig;
use crate::extraction::{ExtractionResult, StrategyFactory};
use crate::models::{BusinessRecord, CoreError, CoreErrorKind, TaskId, TaskStatus};
use crate::orchestration::OrchestrationResult;
use crate::orchestration::cancellation::TaskCancellationToken;
use crate::orchestration::events::{TaskCallback, TaskEvent, deliver};
use crate::orchestration::registry::{JobRegistry, Registration, StartPhase};
use crate::persistence::{PersistenceResult, ResultStore, ScrapeStore, TaskStore};

pub const NO_RESULTS_MESSAGE: &str = "No results found";

/// Runs scrape jobs concurrently, one live job per task id, and owns every
/// status change a job goes through after `Created`.
#[derive(Clone)]
pub struct TaskOrchestrator {
    store: Arc<dyn ScrapeStore>,
    strategies: Arc<dyn StrategyFactory>,
    registry: JobRegistry,
    admission: Option<Arc<Semaphore>>,
}

impl TaskOrchestrator {
    pub fn new(store: Arc<dyn ScrapeStore>, strategies: Arc<dyn StrategyFactory>) -> Self {
        Self {
            store,
            strategies,
            registry: JobRegistry::new(),
            admission: None,
        }
    }

    /// Applies `max_concurrent_tasks` from the config.
    pub fn from_config(
        store: Arc<dyn ScrapeStore>,
        strategies: Arc<dyn StrategyFactory>,
        config: &ScraperConfig,
    ) -> Self {
        Self::new(store, strategies).with_admission_limit(config.max_concurrent_tasks)
    }

    /// Caps how many accepted jobs scrape at once; the rest wait, still
    /// reported as running and still stoppable.
    pub fn with_admission_limit(mut self, max_concurrent: Option<usize>) -> Self {
        self.admission = max_concurrent
            .filter(|limit| *limit > 0)
            .map(|limit| Arc::new(Semaphore::new(limit)));
        self
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn available_strategies(&self) -> &'static [&'static str] {
        self.strategies.available_strategies()
    }

    /// Accepts a job for an existing `Created` task. Returns `Ok(false)` if a
    /// job for `task_id` is already live.
    pub async fn start_task(
        &self,
        task_id: TaskId,
        keyword: &str,
        location: &str,
        strategy_name: &str,
        callback: Option<TaskCallback>,
    ) -> OrchestrationResult<bool> {
        let keyword = keyword.trim();
        let location = location.trim();
        if keyword.is_empty() || location.is_empty() {
            return Err(CoreError::new(
                CoreErrorKind::InvalidInput,
                "keyword and location must both be non-empty",
            )
            .for_task(task_id));
        }

        let Some(registration) = self.registry.try_register(task_id, callback) else {
            tracing::warn!(%task_id, "task is already running");
            return Ok(false);
        };

        if let Err(error) =
            update_status(self.store.clone(), task_id, TaskStatus::Running, None).await
        {
            registration.mark_started(StartPhase::Abandoned);
            self.registry.release(task_id, registration.generation);
            return Err(error.for_task(task_id));
        }
        deliver(
            registration.callback.as_ref(),
            task_id,
            TaskEvent::StatusChanged {
                status: TaskStatus::Running,
            },
        );
        registration.mark_started(StartPhase::Running);

        // A stop that arrived during the `Running` write now owns the terminal state.
        if registration.token.is_cancelled() {
            tracing::info!(%task_id, "task was stopped while starting");
            return Ok(true);
        }

        let generation = registration.generation;
        let unit = JobUnit {
            task_id,
            keyword: keyword.to_string(),
            location: location.to_string(),
            strategy_name: strategy_name.to_string(),
            store: self.store.clone(),
            strategies: self.strategies.clone(),
            registry: self.registry.clone(),
            admission: self.admission.clone(),
            registration,
        };
        let join = tokio::spawn(unit.run());
        self.registry
            .attach_unit(task_id, generation, join.abort_handle());

        tracing::info!(%task_id, keyword, location, strategy = strategy_name, "started scrape task");
        Ok(true)
    }

    /// Requests cancellation. `Ok(false)` when no job is tracked for the id or
    /// the job already reached its own terminal state.
    ///
    /// A stop that races `start_task` waits for the `Running` write to land
    /// before cancelling. If persisting `Cancelled` fails, the `cancelled`
    /// event is still delivered and the storage error is returned.
    pub async fn stop_task(&self, task_id: TaskId) -> OrchestrationResult<bool> {
        let Some(mut handle) = self.registry.take(task_id) else {
            return Ok(false);
        };
        if handle.start_settled().await == StartPhase::Abandoned {
            tracing::info!(%task_id, "task never started; nothing to stop");
            return Ok(false);
        }
        if !handle.terminal.claim() {
            tracing::info!(%task_id, "task finished before it could be stopped");
            return Ok(false);
        }

        handle.token.cancel();
        let persisted =
            update_status(self.store.clone(), task_id, TaskStatus::Cancelled, None).await;
        deliver(handle.callback.as_ref(), task_id, TaskEvent::Cancelled {});

        match persisted {
            Ok(()) => {
                tracing::info!(%task_id, "stopped scrape task");
                Ok(true)
            }
            Err(error) => {
                tracing::error!(%task_id, error = %error, "could not record task cancellation");
                Err(error.for_task(task_id))
            }
        }
    }

    pub fn is_task_running(&self, task_id: TaskId) -> bool {
        self.registry.is_live(task_id)
    }

    pub fn get_running_tasks(&self) -> HashSet<TaskId> {
        self.registry.live_task_ids()
    }

    /// Stops every tracked job and returns how many were cancelled.
    pub async fn stop_all_tasks(&self) -> usize {
        let mut stopped = 0;
        for task_id in self.registry.tracked_task_ids() {
            match self.stop_task(task_id).await {
                Ok(true) => stopped += 1,
                Ok(false) => {}
                Err(error) => {
                    tracing::error!(%task_id, error = %error, "failed to stop task");
                }
            }
        }
        stopped
    }

    /// Waits until `task_id` has no registry entry: the unit finished on its
    /// own, or a stop removed it.
    pub async fn wait_for_release(
        &self,
        task_id: TaskId,
        timeout: Option<Duration>,
    ) -> OrchestrationResult<()> {
        self.registry.wait_for_release(task_id, timeout).await
    }
}

struct JobUnit {
    task_id: TaskId,
    keyword: String,
    location: String,
    strategy_name: String,
    store: Arc<dyn ScrapeStore>,
    strategies: Arc<dyn StrategyFactory>,
    registry: JobRegistry,
    admission: Option<Arc<Semaphore>>,
    registration: Registration,
}

/// Drops the registry entry when the unit ends, however it ends.
struct ReleaseGuard {
    registry: JobRegistry,
    task_id: TaskId,
    generation: u64,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.registry.release(self.task_id, self.generation);
    }
}

impl JobUnit {
    async fn run(self) {
        let _release = ReleaseGuard {
            registry: self.registry.clone(),
            task_id: self.task_id,
            generation: self.registration.generation,
        };

        let outcome = self.execute().await;
        self.finish(outcome).await;
    }

    async fn execute(&self) -> ExtractionResult<Vec<BusinessRecord>> {
        let token = &self.registration.token;
        let _permit = self.admit(token).await?;
        token.ensure_active()?;

        let mut strategy = AssertUnwindSafe(self.strategies.create(&self.strategy_name))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(panic_error("creating strategy", payload)))?;

        let outcome = AssertUnwindSafe(strategy.scrape(&self.keyword, &self.location, token))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(panic_error("scraping", payload)));

        if let Err(error) = strategy.close().await {
            tracing::warn!(task_id = %self.task_id, error = %error, "failed to close strategy");
        }
        outcome
    }

    async fn admit(
        &self,
        token: &TaskCancellationToken,
    ) -> ExtractionResult<Option<OwnedSemaphorePermit>> {
        let Some(admission) = &self.admission else {
            return Ok(None);
        };
        let permit = token
            .run_until_cancelled(admission.clone().acquire_owned())
            .await?
            .map_err(|_| CoreError::new(CoreErrorKind::Internal, "admission gate closed"))?;
        Ok(Some(permit))
    }

    async fn finish(&self, outcome: ExtractionResult<Vec<BusinessRecord>>) {
        let task_id = self.task_id;
        let terminal = &self.registration.terminal;

        match outcome {
            Ok(mut records) => {
                if !terminal.claim() {
                    tracing::info!(%task_id, discarded = records.len(), "task was stopped; discarding results");
                    return;
                }
                for record in &mut records {
                    record.task_id = Some(task_id);
                }
                if let Err(error) = self.complete(&records).await {
                    self.fail(error).await;
                    return;
                }
                tracing::info!(%task_id, count = records.len(), "task completed");
                self.emit(TaskEvent::Completed { results: records });
            }
            // Cancellation is only signalled after a stop has claimed the terminal state.
            Err(error) => {
                if terminal.claim() {
                    self.fail(error).await;
                } else {
                    tracing::debug!(%task_id, error = %error, "task ended after being stopped");
                }
            }
        }
    }

    async fn complete(&self, records: &[BusinessRecord]) -> OrchestrationResult<()> {
        let task_id = self.task_id;
        let owned = records.to_vec();
        blocking(self.store.clone(), move |store| {
            store.save_results(task_id, &owned)
        })
        .await?;

        let message = records.is_empty().then_some(NO_RESULTS_MESSAGE);
        update_status(self.store.clone(), task_id, TaskStatus::Completed, message).await
    }

    /// Caller must already hold the terminal claim.
    async fn fail(&self, error: CoreError) {
        let task_id = self.task_id;
        tracing::error!(%task_id, error = %error, "task failed");
        if let Err(store_error) = update_status(
            self.store.clone(),
            task_id,
            TaskStatus::Failed,
            Some(&error.message),
        )
        .await
        {
            tracing::error!(%task_id, error = %store_error, "could not record task failure");
        }
        self.emit(TaskEvent::Failed {
            error: error.message,
        });
    }

    fn emit(&self, event: TaskEvent) {
        deliver(self.registration.callback.as_ref(), self.task_id, event);
    }
}

async fn update_status(
    store: Arc<dyn ScrapeStore>,
    task_id: TaskId,
    status: TaskStatus,
    message: Option<&str>,
) -> OrchestrationResult<()> {
    let message = message.map(str::to_string);
    blocking(store, move |store| {
        store.update_task_status(task_id, status, message.as_deref())
    })
    .await
}

async fn blocking<T, F>(store: Arc<dyn ScrapeStore>, operation: F) -> OrchestrationResult<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn ScrapeStore) -> PersistenceResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || operation(store.as_ref()))
        .await
        .map_err(|error| {
            CoreError::new(
                CoreErrorKind::Internal,
                format!("storage worker failed: {error}"),
            )
        })?
}

fn panic_error(stage: &str, payload: Box<dyn Any + Send>) -> CoreError {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    CoreError::new(
        CoreErrorKind::Internal,
        format!("panic while {stage}: {detail}"),
    )
}

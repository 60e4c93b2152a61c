//! Sequential task driver with retry, backoff, and dead-lettering.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;

use super::handlers::TaskHandlers;
use super::store::{TaskStats, TaskStore, TaskStoreError};
use super::types::{backoff_delay, DeadLetterEntry, FailureOutcome, Task, TaskId, TaskStatus};

/// Task engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Name for logging
    pub name: String,
    /// Backoff after the n-th failure is `backoff_unit * 2^n`
    pub backoff_unit: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "task-engine".to_string(),
            backoff_unit: Duration::from_secs(1),
        }
    }
}

impl EngineConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }
}

/// Anything that accepts freshly created tasks.
pub trait TaskSink: Send + Sync {
    /// Schedule a pending task. Never waits for the queue to drain.
    fn enqueue(&self, task: Task) -> Result<TaskId, TaskStoreError>;
}

impl<T: TaskSink + ?Sized> TaskSink for Arc<T> {
    fn enqueue(&self, task: Task) -> Result<TaskId, TaskStoreError> {
        (**self).enqueue(task)
    }
}

/// Cloneable enqueue handle that wakes the driver.
#[derive(Clone)]
pub struct TaskQueue<S> {
    store: S,
    wake: Arc<Notify>,
}

impl<S: TaskStore> TaskSink for TaskQueue<S> {
    fn enqueue(&self, task: Task) -> Result<TaskId, TaskStoreError> {
        let kind = task.kind();
        let id = self.store.enqueue(task)?;
        debug!(task_id = %id, kind = %kind, "task enqueued");
        self.wake.notify_one();
        Ok(id)
    }
}

/// What happened to a claimed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    /// Backoff elapsed; the task is back at the head of the queue.
    Retried { attempts: u32 },
    DeadLettered { attempts: u32 },
}

/// Single-consumer task engine.
///
/// Claims the head of the pending sequence, runs its handler on an isolated
/// tokio task, and records the outcome. A failed task waits out its backoff
/// and is put back at the head; nothing else runs in the meantime.
pub struct TaskEngine<S> {
    store: S,
    clock: Arc<dyn Clock>,
    handlers: TaskHandlers,
    config: EngineConfig,
    wake: Arc<Notify>,
}

impl<S> TaskEngine<S>
where
    S: TaskStore + Clone + 'static,
{
    pub fn new(store: S, clock: Arc<dyn Clock>, handlers: TaskHandlers, config: EngineConfig) -> Self {
        Self {
            store,
            clock,
            handlers,
            config,
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Enqueue handle for producers (the report service).
    pub fn queue(&self) -> TaskQueue<S> {
        TaskQueue {
            store: self.store.clone(),
            wake: self.wake.clone(),
        }
    }

    pub fn stats(&self) -> Result<TaskStats, TaskStoreError> {
        self.store.stats()
    }

    pub fn task(&self, id: TaskId) -> Result<Option<Task>, TaskStoreError> {
        self.store.get(id)
    }

    pub fn dead_letters(&self) -> Result<Vec<DeadLetterEntry>, TaskStoreError> {
        self.store.list_dead_letters()
    }

    pub fn completed(&self) -> Result<Vec<Task>, TaskStoreError> {
        self.store.list_by_status(Some(TaskStatus::Completed))
    }

    /// Claim and run the head task, including any backoff wait.
    ///
    /// Returns `None` when nothing is pending.
    pub async fn run_one(&self) -> Result<Option<TaskOutcome>, TaskStoreError> {
        match self.store.claim_next()? {
            Some(task) => self.process(task).await.map(Some),
            None => Ok(None),
        }
    }

    /// Process until the pending sequence is empty. Returns the number of
    /// attempts made.
    pub async fn drain(&self) -> usize {
        let mut attempts = 0;
        loop {
            match self.run_one().await {
                Ok(Some(_)) => attempts += 1,
                Ok(None) => return attempts,
                Err(e) => {
                    error!(engine = %self.config.name, error = %e, "task store failure, drain stopped");
                    return attempts;
                }
            }
        }
    }

    async fn process(&self, mut task: Task) -> Result<TaskOutcome, TaskStoreError> {
        let kind = task.kind();
        let attempt = task.attempts + 1;
        debug!(
            engine = %self.config.name,
            task_id = %task.id,
            kind = %kind,
            attempt,
            "claimed task"
        );

        let handler = self.handlers.for_kind(kind);
        let snapshot = task.clone();
        let result = match tokio::spawn(async move { handler.handle(&snapshot).await }).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(join) if join.is_panic() => Err(format!(
                "handler panicked: {}",
                panic_message(join.into_panic())
            )),
            Err(join) => Err(format!("handler aborted: {join}")),
        };

        let error = match result {
            Ok(()) => {
                task.mark_completed(self.clock.now());
                self.store.update(&task)?;
                debug!(engine = %self.config.name, task_id = %task.id, kind = %kind, "task completed");
                return Ok(TaskOutcome::Completed);
            }
            Err(error) => error,
        };

        match task.mark_failed(error.as_str()) {
            FailureOutcome::DeadLetter { attempts } => {
                warn!(
                    engine = %self.config.name,
                    task_id = %task.id,
                    kind = %kind,
                    attempts,
                    error = %error,
                    "task dead-lettered"
                );
                self.store.dead_letter(task, self.clock.now())?;
                Ok(TaskOutcome::DeadLettered { attempts })
            }
            FailureOutcome::Retry { attempts } => {
                let delay = backoff_delay(attempts, self.config.backoff_unit);
                self.store.update(&task)?;
                warn!(
                    engine = %self.config.name,
                    task_id = %task.id,
                    kind = %kind,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "task failed, retrying after backoff"
                );
                self.clock.sleep(delay).await;
                self.store.requeue_front(task)?;
                Ok(TaskOutcome::Retried { attempts })
            }
        }
    }

    /// Run the driver on the tokio runtime until the handle shuts it down.
    pub fn spawn(self) -> TaskEngineHandle<S>
    where
        S: Send + Sync,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let engine = Arc::new(self);
        let join = tokio::spawn(driver_loop(engine.clone(), shutdown_rx));

        TaskEngineHandle {
            shutdown: shutdown_tx,
            join,
            engine,
        }
    }
}

async fn driver_loop<S>(engine: Arc<TaskEngine<S>>, mut shutdown: watch::Receiver<bool>)
where
    S: TaskStore + Clone + 'static,
{
    let name = engine.config.name.clone();
    info!(engine = %name, "task engine started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        match engine.run_one().await {
            Ok(Some(_)) => continue,
            Ok(None) => {}
            Err(e) => error!(engine = %name, error = %e, "task store failure"),
        }

        // Idle: a notify_one issued before we get here leaves a permit behind.
        tokio::select! {
            _ = engine.wake.notified() => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    info!(engine = %name, "task engine stopped");
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Handle to a spawned engine.
pub struct TaskEngineHandle<S> {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
    engine: Arc<TaskEngine<S>>,
}

impl<S> TaskEngineHandle<S>
where
    S: TaskStore + Clone + 'static,
{
    pub fn engine(&self) -> &TaskEngine<S> {
        &self.engine
    }

    pub fn queue(&self) -> TaskQueue<S> {
        self.engine.queue()
    }

    pub fn stats(&self) -> Result<TaskStats, TaskStoreError> {
        self.engine.stats()
    }

    /// Stop after the task in flight (and its backoff) finishes.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            error!(engine = %self.engine.config.name, error = %e, "task engine driver failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::InMemoryEntityStore;
    use crate::tasks::handlers::{
        FaultInjector, FaultMode, HandlerError, Notifier, TaskHandler,
    };
    use crate::tasks::store::InMemoryTaskStore;
    use crate::tasks::types::{
        CacheInvalidationPayload, NotifyPayload, PreviewPayload, TaskKind, TaskPayload,
    };
    use async_trait::async_trait;
    use chrono::Utc;
    use reportdesk_core::{ReportId, UserId};
    use reportdesk_reports::Report;
    use std::sync::Mutex;

    /// Records execution order across all kinds, failing on injected faults.
    struct Recorder {
        faults: Arc<FaultInjector>,
        runs: Mutex<Vec<TaskId>>,
    }

    #[async_trait]
    impl TaskHandler for Recorder {
        async fn handle(&self, task: &Task) -> Result<(), HandlerError> {
            self.runs.lock().unwrap().push(task.id);
            self.faults.check(task.kind())
        }
    }

    struct Harness {
        engine: TaskEngine<Arc<InMemoryTaskStore>>,
        clock: Arc<ManualClock>,
        faults: Arc<FaultInjector>,
    }

    fn harness() -> Harness {
        let faults = FaultInjector::arc();
        let handlers = TaskHandlers::simulated(faults.clone(), InMemoryEntityStore::<Report>::arc());
        harness_with(faults, handlers)
    }

    fn harness_with(faults: Arc<FaultInjector>, handlers: TaskHandlers) -> Harness {
        let clock = Arc::new(ManualClock::default());
        let engine = TaskEngine::new(
            InMemoryTaskStore::arc(),
            clock.clone(),
            handlers,
            EngineConfig::default().with_name("test-engine"),
        );
        Harness {
            engine,
            clock,
            faults,
        }
    }

    fn recorder_harness() -> (Harness, Arc<Recorder>) {
        let faults = FaultInjector::arc();
        let recorder = Arc::new(Recorder {
            faults: faults.clone(),
            runs: Mutex::new(Vec::new()),
        });
        let handlers = TaskHandlers::new(recorder.clone(), recorder.clone(), recorder.clone());
        (harness_with(faults, handlers), recorder)
    }

    fn notify_task() -> Task {
        Task::new(
            TaskPayload::Notify(NotifyPayload {
                report_id: ReportId::new(),
                recipient_id: UserId::new(),
                title: "weekly".to_string(),
            }),
            Utc::now(),
        )
    }

    fn cache_task() -> Task {
        Task::new(
            TaskPayload::InvalidateCache(CacheInvalidationPayload {
                report_id: ReportId::new(),
                keys: vec!["reports:list".to_string()],
            }),
            Utc::now(),
        )
    }

    fn preview_task() -> Task {
        Task::new(
            TaskPayload::GeneratePreview(PreviewPayload {
                report_id: ReportId::new(),
            }),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn successful_tasks_complete_without_attempts() {
        let h = harness();
        let queue = h.engine.queue();
        let ids: Vec<_> = [notify_task(), cache_task(), preview_task()]
            .into_iter()
            .map(|t| queue.enqueue(t).unwrap())
            .collect();

        assert_eq!(h.engine.drain().await, 3);

        for id in ids {
            let task = h.engine.task(id).unwrap().unwrap();
            assert_eq!(task.status, TaskStatus::Completed);
            assert_eq!(task.attempts, 0);
            assert!(task.completed_at.is_some());
        }
        let stats = h.engine.stats().unwrap();
        assert_eq!(stats.completed, 3);
        assert!(stats.is_settled());
        assert!(h.clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn retry_waits_exponential_backoff() {
        let h = harness();
        h.faults.set(TaskKind::Notify, FaultMode::FailNext(2));
        let id = h.engine.queue().enqueue(notify_task()).unwrap();

        h.engine.drain().await;

        let task = h.engine.task(id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.attempts, 2);
        assert_eq!(
            h.clock.sleeps(),
            vec![Duration::from_secs(2), Duration::from_secs(4)]
        );
    }

    #[tokio::test]
    async fn exhausted_task_is_dead_lettered_once() {
        let h = harness();
        h.faults.set(TaskKind::Notify, FaultMode::Always);
        let id = h
            .engine
            .queue()
            .enqueue(notify_task().with_max_attempts(2))
            .unwrap();

        assert_eq!(h.engine.drain().await, 2);

        let dls = h.engine.dead_letters().unwrap();
        assert_eq!(dls.len(), 1);
        assert_eq!(dls[0].task.id, id);
        assert_eq!(dls[0].task.attempts, 2);
        assert_eq!(dls[0].task.status, TaskStatus::DeadLetter);
        assert_eq!(h.clock.sleeps(), vec![Duration::from_secs(2)]);

        // Never picked up again.
        assert_eq!(h.engine.drain().await, 0);
        assert_eq!(h.engine.stats().unwrap().dead_letter, 1);
    }

    #[tokio::test]
    async fn cache_invalidation_gives_up_after_two_attempts() {
        let h = harness();
        h.faults.set(TaskKind::InvalidateCache, FaultMode::Always);
        let id = h.engine.queue().enqueue(cache_task()).unwrap();

        h.engine.drain().await;

        let task = h.engine.task(id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::DeadLetter);
        assert_eq!(task.attempts, 2);
        assert_eq!(
            task.last_error.as_deref(),
            Some("injected failure in invalidate-cache handler")
        );
    }

    #[tokio::test]
    async fn retried_task_runs_before_later_fresh_tasks() {
        let (h, recorder) = recorder_harness();
        h.faults.set(TaskKind::Notify, FaultMode::FailNext(1));

        let queue = h.engine.queue();
        let first = queue.enqueue(notify_task()).unwrap();
        let second = queue.enqueue(cache_task()).unwrap();
        let third = queue.enqueue(preview_task()).unwrap();

        h.engine.drain().await;

        assert_eq!(
            *recorder.runs.lock().unwrap(),
            vec![first, first, second, third]
        );
    }

    #[tokio::test]
    async fn handler_panic_is_isolated() {
        let h = harness();
        h.faults.set(TaskKind::GeneratePreview, FaultMode::Panic);
        let panicking = h.engine.queue().enqueue(preview_task()).unwrap();
        let healthy = h.engine.queue().enqueue(notify_task()).unwrap();

        h.engine.drain().await;

        let task = h.engine.task(panicking).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::DeadLetter);
        assert_eq!(task.attempts, 3);
        assert!(task
            .last_error
            .as_deref()
            .unwrap()
            .starts_with("handler panicked: injected panic"));

        let task = h.engine.task(healthy).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn queue_rejects_non_pending_tasks() {
        let h = harness();
        let mut task = notify_task();
        task.mark_processing();
        assert_eq!(
            h.engine.queue().enqueue(task.clone()),
            Err(TaskStoreError::NotPending(task.id))
        );
        assert_eq!(h.engine.stats().unwrap().pending, 0);
    }

    #[tokio::test]
    async fn spawned_engine_processes_and_shuts_down() {
        let faults = FaultInjector::arc();
        let notifier = Arc::new(Notifier::new(faults.clone()));
        let handlers = TaskHandlers {
            notify: notifier.clone(),
            ..TaskHandlers::simulated(faults.clone(), InMemoryEntityStore::<Report>::arc())
        };
        let h = harness_with(faults, handlers);
        h.faults.set(TaskKind::Notify, FaultMode::FailNext(1));

        let handle = h.engine.spawn();
        let queue = handle.queue();
        queue.enqueue(notify_task()).unwrap();
        queue.enqueue(cache_task()).unwrap();

        for _ in 0..200 {
            let stats = handle.stats().unwrap();
            if stats.completed == 2 && stats.is_settled() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let stats = handle.stats().unwrap();
        assert_eq!(stats.completed, 2);
        assert!(stats.is_settled());
        assert_eq!(notifier.sent().len(), 1);
        assert_eq!(h.clock.sleeps(), vec![Duration::from_secs(2)]);

        handle.shutdown().await;
    }
}

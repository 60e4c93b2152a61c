//! Kind-specific side-effect handlers.
//!
//! Each handler stands in for an external system (mail relay, cache cluster,
//! renderer). They record what they would have done so tests can observe it,
//! and consult a shared [`FaultInjector`] before doing any work.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::{debug, warn};

use reportdesk_core::{AggregateRoot, ReportId};
use reportdesk_reports::Report;

use crate::store::EntityStore;

use super::types::{
    CacheInvalidationPayload, NotifyPayload, PreviewPayload, Task, TaskKind, TaskPayload,
};

/// Handler failure; recorded as the task's last error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    #[error("injected failure in {0} handler")]
    Injected(TaskKind),
    #[error("{handler} handler received a {actual} payload")]
    WrongPayload {
        handler: TaskKind,
        actual: TaskKind,
    },
    #[error("{0}")]
    Failed(String),
}

#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    async fn handle(&self, task: &Task) -> Result<(), HandlerError>;
}

/// How an injected fault behaves for one task kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultMode {
    /// Fail the next `n` invocations, then recover.
    FailNext(u32),
    /// Fail every invocation.
    Always,
    /// Panic inside the handler.
    Panic,
}

/// Per-kind fault points shared by all handlers.
#[derive(Debug, Default)]
pub struct FaultInjector {
    faults: Mutex<HashMap<TaskKind, FaultMode>>,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn set(&self, kind: TaskKind, mode: FaultMode) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, mode);
    }

    pub fn clear(&self, kind: TaskKind) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&kind);
    }

    pub fn mode(&self, kind: TaskKind) -> Option<FaultMode> {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .copied()
    }

    /// Consume one fault for `kind`, if any is armed.
    pub fn check(&self, kind: TaskKind) -> Result<(), HandlerError> {
        let mode = {
            let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
            match faults.get(&kind).copied() {
                None => return Ok(()),
                Some(FaultMode::FailNext(n)) => {
                    if n <= 1 {
                        faults.remove(&kind);
                    } else {
                        faults.insert(kind, FaultMode::FailNext(n - 1));
                    }
                    if n == 0 {
                        return Ok(());
                    }
                    FaultMode::FailNext(n)
                }
                Some(mode) => mode,
            }
        };

        match mode {
            // The guard is dropped above so a panic cannot poison the map.
            FaultMode::Panic => panic!("injected panic in {kind} handler"),
            FaultMode::FailNext(_) | FaultMode::Always => Err(HandlerError::Injected(kind)),
        }
    }
}

/// Simulated notification delivery; keeps an outbox of sent messages.
#[derive(Debug)]
pub struct Notifier {
    faults: Arc<FaultInjector>,
    outbox: Mutex<Vec<NotifyPayload>>,
}

impl Notifier {
    pub fn new(faults: Arc<FaultInjector>) -> Self {
        Self {
            faults,
            outbox: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<NotifyPayload> {
        self.outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl TaskHandler for Notifier {
    async fn handle(&self, task: &Task) -> Result<(), HandlerError> {
        let TaskPayload::Notify(payload) = &task.payload else {
            return Err(wrong_payload(TaskKind::Notify, task));
        };
        self.faults.check(TaskKind::Notify)?;

        debug!(
            task_id = %task.id,
            report_id = %payload.report_id,
            recipient_id = %payload.recipient_id,
            "notification sent"
        );
        self.outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(payload.clone());
        Ok(())
    }
}

/// Simulated cache purge; remembers every key it was asked to drop.
#[derive(Debug)]
pub struct CacheInvalidator {
    faults: Arc<FaultInjector>,
    invalidated: Mutex<Vec<String>>,
}

impl CacheInvalidator {
    pub fn new(faults: Arc<FaultInjector>) -> Self {
        Self {
            faults,
            invalidated: Mutex::new(Vec::new()),
        }
    }

    pub fn invalidated(&self) -> Vec<String> {
        self.invalidated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl TaskHandler for CacheInvalidator {
    async fn handle(&self, task: &Task) -> Result<(), HandlerError> {
        let TaskPayload::InvalidateCache(CacheInvalidationPayload { keys, .. }) = &task.payload
        else {
            return Err(wrong_payload(TaskKind::InvalidateCache, task));
        };
        self.faults.check(TaskKind::InvalidateCache)?;

        debug!(task_id = %task.id, keys = keys.len(), "cache keys invalidated");
        self.invalidated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(keys.iter().cloned());
        Ok(())
    }
}

/// Simulated preview rendering.
///
/// The report may have been deleted between enqueue and execution; that is
/// not a failure, there is simply nothing to render.
pub struct PreviewGenerator {
    faults: Arc<FaultInjector>,
    reports: Arc<dyn EntityStore<Report>>,
    previews: Mutex<HashMap<ReportId, String>>,
}

impl PreviewGenerator {
    pub fn new(faults: Arc<FaultInjector>, reports: Arc<dyn EntityStore<Report>>) -> Self {
        Self {
            faults,
            reports,
            previews: Mutex::new(HashMap::new()),
        }
    }

    pub fn preview(&self, report_id: ReportId) -> Option<String> {
        self.previews
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&report_id)
            .cloned()
    }

    fn render(report: &Report) -> String {
        format!(
            "{} [{}] v{}: {} entries",
            report.title(),
            report.status(),
            report.version(),
            report.entries().len()
        )
    }
}

#[async_trait]
impl TaskHandler for PreviewGenerator {
    async fn handle(&self, task: &Task) -> Result<(), HandlerError> {
        let TaskPayload::GeneratePreview(PreviewPayload { report_id }) = &task.payload else {
            return Err(wrong_payload(TaskKind::GeneratePreview, task));
        };
        self.faults.check(TaskKind::GeneratePreview)?;

        let report = EntityStore::<Report>::get(self.reports.as_ref(), report_id)
            .map_err(|e| HandlerError::Failed(e.to_string()))?;

        let Some(report) = report else {
            warn!(task_id = %task.id, report_id = %report_id, "report gone, skipping preview");
            return Ok(());
        };

        let preview = Self::render(&report);
        debug!(task_id = %task.id, report_id = %report_id, "preview generated");
        self.previews
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(*report_id, preview);
        Ok(())
    }
}

fn wrong_payload(handler: TaskKind, task: &Task) -> HandlerError {
    HandlerError::WrongPayload {
        handler,
        actual: task.kind(),
    }
}

/// One handler per task kind; dispatch is exhaustive over [`TaskKind`].
#[derive(Clone)]
pub struct TaskHandlers {
    pub notify: Arc<dyn TaskHandler>,
    pub invalidate_cache: Arc<dyn TaskHandler>,
    pub generate_preview: Arc<dyn TaskHandler>,
}

impl TaskHandlers {
    pub fn new(
        notify: Arc<dyn TaskHandler>,
        invalidate_cache: Arc<dyn TaskHandler>,
        generate_preview: Arc<dyn TaskHandler>,
    ) -> Self {
        Self {
            notify,
            invalidate_cache,
            generate_preview,
        }
    }

    /// The stock simulated handlers, wired to one fault injector.
    pub fn simulated(faults: Arc<FaultInjector>, reports: Arc<dyn EntityStore<Report>>) -> Self {
        Self::new(
            Arc::new(Notifier::new(faults.clone())),
            Arc::new(CacheInvalidator::new(faults.clone())),
            Arc::new(PreviewGenerator::new(faults, reports)),
        )
    }

    pub fn for_kind(&self, kind: TaskKind) -> Arc<dyn TaskHandler> {
        match kind {
            TaskKind::Notify => self.notify.clone(),
            TaskKind::InvalidateCache => self.invalidate_cache.clone(),
            TaskKind::GeneratePreview => self.generate_preview.clone(),
        }
    }
}

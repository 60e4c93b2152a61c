//! Task storage: the pending sequence, task records, and the dead-letter collection.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use super::types::{DeadLetterEntry, Task, TaskId, TaskStatus};

/// Task store abstraction.
///
/// Records are never removed: completed and dead-lettered tasks stay queryable
/// for the lifetime of the store.
pub trait TaskStore: Send + Sync {
    /// Record a new task and append it to the back of the pending sequence.
    fn enqueue(&self, task: Task) -> Result<TaskId, TaskStoreError>;

    /// Put a task back at the head of the pending sequence (retries).
    fn requeue_front(&self, task: Task) -> Result<(), TaskStoreError>;

    /// Pop the head of the pending sequence and mark it processing.
    fn claim_next(&self) -> Result<Option<Task>, TaskStoreError>;

    /// Overwrite the stored record of a task.
    fn update(&self, task: &Task) -> Result<(), TaskStoreError>;

    /// Park an exhausted task in the dead-letter collection.
    fn dead_letter(&self, task: Task, at: DateTime<Utc>) -> Result<(), TaskStoreError>;

    fn get(&self, task_id: TaskId) -> Result<Option<Task>, TaskStoreError>;

    /// List tasks, optionally filtered by status, oldest first.
    fn list_by_status(&self, status: Option<TaskStatus>) -> Result<Vec<Task>, TaskStoreError>;

    /// Dead-lettered tasks in the order they were parked.
    fn list_dead_letters(&self) -> Result<Vec<DeadLetterEntry>, TaskStoreError>;

    fn stats(&self) -> Result<TaskStats, TaskStoreError>;
}

/// Task store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskStoreError {
    #[error("task not found: {0}")]
    NotFound(TaskId),
    #[error("task already exists: {0}")]
    AlreadyExists(TaskId),
    #[error("only pending tasks can be enqueued (task {0})")]
    NotPending(TaskId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Queue snapshot for external inspection.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct TaskStats {
    /// Length of the pending sequence.
    pub pending: usize,
    /// Whether a handler is running right now.
    pub processing: bool,
    /// Tasks waiting out a retry backoff.
    pub backing_off: usize,
    pub completed: usize,
    pub dead_letter: usize,
}

impl TaskStats {
    /// Nothing queued, running, or waiting to be retried.
    pub fn is_settled(&self) -> bool {
        self.pending == 0 && !self.processing && self.backing_off == 0
    }
}

#[derive(Debug, Default)]
struct Inner {
    tasks: HashMap<TaskId, Task>,
    pending: VecDeque<TaskId>,
    dead_letters: Vec<DeadLetterEntry>,
}

/// In-memory task store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    inner: RwLock<Inner>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>, TaskStoreError> {
        self.inner
            .write()
            .map_err(|_| TaskStoreError::Storage("lock poisoned".to_string()))
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>, TaskStoreError> {
        self.inner
            .read()
            .map_err(|_| TaskStoreError::Storage("lock poisoned".to_string()))
    }
}

impl TaskStore for InMemoryTaskStore {
    fn enqueue(&self, task: Task) -> Result<TaskId, TaskStoreError> {
        if task.status != TaskStatus::Pending {
            return Err(TaskStoreError::NotPending(task.id));
        }
        let mut inner = self.write()?;
        if inner.tasks.contains_key(&task.id) {
            return Err(TaskStoreError::AlreadyExists(task.id));
        }
        let id = task.id;
        inner.tasks.insert(id, task);
        inner.pending.push_back(id);
        Ok(id)
    }

    fn requeue_front(&self, mut task: Task) -> Result<(), TaskStoreError> {
        let mut inner = self.write()?;
        if !inner.tasks.contains_key(&task.id) {
            return Err(TaskStoreError::NotFound(task.id));
        }
        task.mark_pending();
        let id = task.id;
        inner.tasks.insert(id, task);
        inner.pending.push_front(id);
        Ok(())
    }

    fn claim_next(&self) -> Result<Option<Task>, TaskStoreError> {
        let mut inner = self.write()?;

        while let Some(id) = inner.pending.pop_front() {
            if let Some(task) = inner.tasks.get_mut(&id) {
                if task.status.is_terminal() {
                    continue;
                }
                task.mark_processing();
                return Ok(Some(task.clone()));
            }
        }

        Ok(None)
    }

    fn update(&self, task: &Task) -> Result<(), TaskStoreError> {
        let mut inner = self.write()?;
        match inner.tasks.get_mut(&task.id) {
            Some(stored) => {
                *stored = task.clone();
                Ok(())
            }
            None => Err(TaskStoreError::NotFound(task.id)),
        }
    }

    fn dead_letter(&self, task: Task, at: DateTime<Utc>) -> Result<(), TaskStoreError> {
        let mut inner = self.write()?;
        if !inner.tasks.contains_key(&task.id) {
            return Err(TaskStoreError::NotFound(task.id));
        }
        let id = task.id;
        inner.pending.retain(|queued| *queued != id);
        inner.tasks.insert(id, task.clone());
        inner.dead_letters.push(DeadLetterEntry::new(task, at));
        Ok(())
    }

    fn get(&self, task_id: TaskId) -> Result<Option<Task>, TaskStoreError> {
        let inner = self.read()?;
        Ok(inner.tasks.get(&task_id).cloned())
    }

    fn list_by_status(&self, status: Option<TaskStatus>) -> Result<Vec<Task>, TaskStoreError> {
        let inner = self.read()?;
        let mut result: Vec<_> = inner
            .tasks
            .values()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();

        // UUIDv7 ids are time ordered; they break created_at ties.
        result.sort_by_key(|t| (t.created_at, t.id.0));
        Ok(result)
    }

    fn list_dead_letters(&self) -> Result<Vec<DeadLetterEntry>, TaskStoreError> {
        let inner = self.read()?;
        Ok(inner.dead_letters.clone())
    }

    fn stats(&self) -> Result<TaskStats, TaskStoreError> {
        let inner = self.read()?;

        let mut stats = TaskStats {
            pending: inner.pending.len(),
            dead_letter: inner.dead_letters.len(),
            ..Default::default()
        };

        for task in inner.tasks.values() {
            match task.status {
                TaskStatus::Processing => stats.processing = true,
                TaskStatus::Failed => stats.backing_off += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Pending | TaskStatus::DeadLetter => {}
            }
        }

        Ok(stats)
    }
}

impl<S> TaskStore for Arc<S>
where
    S: TaskStore + ?Sized,
{
    fn enqueue(&self, task: Task) -> Result<TaskId, TaskStoreError> {
        (**self).enqueue(task)
    }

    fn requeue_front(&self, task: Task) -> Result<(), TaskStoreError> {
        (**self).requeue_front(task)
    }

    fn claim_next(&self) -> Result<Option<Task>, TaskStoreError> {
        (**self).claim_next()
    }

    fn update(&self, task: &Task) -> Result<(), TaskStoreError> {
        (**self).update(task)
    }

    fn dead_letter(&self, task: Task, at: DateTime<Utc>) -> Result<(), TaskStoreError> {
        (**self).dead_letter(task, at)
    }

    fn get(&self, task_id: TaskId) -> Result<Option<Task>, TaskStoreError> {
        (**self).get(task_id)
    }

    fn list_by_status(&self, status: Option<TaskStatus>) -> Result<Vec<Task>, TaskStoreError> {
        (**self).list_by_status(status)
    }

    fn list_dead_letters(&self) -> Result<Vec<DeadLetterEntry>, TaskStoreError> {
        (**self).list_dead_letters()
    }

    fn stats(&self) -> Result<TaskStats, TaskStoreError> {
        (**self).stats()
    }
}

//! Background side-effect tasks with retry, backoff, and dead-letter handling.
//!
//! ## Design
//!
//! - Tasks carry a typed payload; the variant is the task kind
//! - One driver, one task in flight, exponential backoff between attempts
//! - Retried tasks go back to the head of the queue, fresh ones to the back
//! - Exhausted tasks are parked in a dead-letter collection and never retried
//!
//! ## Components
//!
//! - `Task`: the unit of work and its lifecycle
//! - `TaskStore`: pending sequence, records, dead letters
//! - `TaskHandlers`: one simulated external system per kind
//! - `TaskEngine`: the driver

pub mod engine;
pub mod handlers;
pub mod store;
pub mod types;

pub use engine::{EngineConfig, TaskEngine, TaskEngineHandle, TaskOutcome, TaskQueue, TaskSink};
pub use handlers::{
    CacheInvalidator, FaultInjector, FaultMode, HandlerError, Notifier, PreviewGenerator,
    TaskHandler, TaskHandlers,
};
pub use store::{InMemoryTaskStore, TaskStats, TaskStore, TaskStoreError};
pub use types::{
    backoff_delay, CacheInvalidationPayload, DeadLetterEntry, FailureOutcome, NotifyPayload,
    PreviewPayload, Task, TaskId, TaskKind, TaskPayload, TaskStatus, UnknownTaskKind,
};

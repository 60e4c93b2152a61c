//! Infrastructure layer: entity stores, clock, background tasks, and the
//! report mutation service that ties them together.

pub mod clock;
pub mod error;
pub mod service;
pub mod store;
pub mod tasks;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ErrorPayload, MutationError, MutationResult};
pub use service::{ReportService, UpdateRequest};
pub use store::{EntityStore, InMemoryEntityStore, StoreError};

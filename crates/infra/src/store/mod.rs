//! Entity storage abstractions (reports, users).

pub mod entity_store;

pub use entity_store::{EntityStore, InMemoryEntityStore, StoreError};

//! `reportdesk-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;

pub use aggregate::{AggregateRoot, ExpectedVersion, VersionConflict};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{AttachmentId, CommentId, EntryId, ReportId, UserId};

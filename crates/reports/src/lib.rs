//! Reports domain module.
//!
//! This crate contains the report model, its patch semantics, the status
//! transition rules and the role policy, implemented purely as deterministic
//! domain logic (no IO, no HTTP, no storage).

pub mod report;
pub mod transition;
pub mod user;

pub use report::{
    Comment, Confidentiality, Entry, Metadata, MetadataPatch, NewReport, Priority, Report,
    ReportPatch, ReportStatus,
};
pub use transition::{TransitionError, MIN_HIGH_PRIORITY_FOR_ARCHIVE, validate_transition};
pub use user::{AuthzError, Permission, Role, User, authorize};

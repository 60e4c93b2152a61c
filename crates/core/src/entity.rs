//! Identity shared by everything the entity stores hold.

/// A record addressed by a stable identifier.
///
/// The identifier never changes across updates: two values with the same id
/// are two versions of the same record.
pub trait Entity: Clone + Send + Sync + 'static {
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Debug + core::fmt::Display + Send + Sync;

    fn id(&self) -> &Self::Id;
}

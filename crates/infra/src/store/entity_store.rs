use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use reportdesk_core::Entity;

/// Entity store failure.
///
/// The in-memory backend can only fail when a writer panicked mid-update.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store lock poisoned")]
    Poisoned,
}

/// Keyed entity storage: no transactions, no secondary indexes.
///
/// A durable replacement must keep exactly this shape.
pub trait EntityStore<E: Entity>: Send + Sync {
    fn get(&self, id: &E::Id) -> Result<Option<E>, StoreError>;
    fn put(&self, id: E::Id, entity: E) -> Result<E, StoreError>;
    /// Returns whether something was removed.
    fn delete(&self, id: &E::Id) -> Result<bool, StoreError>;
    /// All stored entities, in no particular order.
    fn list_all(&self) -> Result<Vec<E>, StoreError>;
}

impl<E, S> EntityStore<E> for Arc<S>
where
    E: Entity,
    S: EntityStore<E> + ?Sized,
{
    fn get(&self, id: &E::Id) -> Result<Option<E>, StoreError> {
        (**self).get(id)
    }

    fn put(&self, id: E::Id, entity: E) -> Result<E, StoreError> {
        (**self).put(id, entity)
    }

    fn delete(&self, id: &E::Id) -> Result<bool, StoreError> {
        (**self).delete(id)
    }

    fn list_all(&self) -> Result<Vec<E>, StoreError> {
        (**self).list_all()
    }
}

/// In-memory entity store, volatile for the process lifetime.
#[derive(Debug)]
pub struct InMemoryEntityStore<E: Entity> {
    inner: RwLock<HashMap<E::Id, E>>,
}

impl<E: Entity> InMemoryEntityStore<E> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl<E: Entity> Default for InMemoryEntityStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> EntityStore<E> for InMemoryEntityStore<E> {
    fn get(&self, id: &E::Id) -> Result<Option<E>, StoreError> {
        let map = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(map.get(id).cloned())
    }

    fn put(&self, id: E::Id, entity: E) -> Result<E, StoreError> {
        let mut map = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        map.insert(id, entity.clone());
        Ok(entity)
    }

    fn delete(&self, id: &E::Id) -> Result<bool, StoreError> {
        let mut map = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        Ok(map.remove(id).is_some())
    }

    fn list_all(&self) -> Result<Vec<E>, StoreError> {
        let map = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(map.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use reportdesk_reports::{Role, User};

    #[test]
    fn put_get_delete() {
        let store: InMemoryEntityStore<User> = InMemoryEntityStore::new();
        let user = User::new("ada", Role::Editor, Utc::now());
        let id = user.id;

        store.put(id, user.clone()).unwrap();
        assert_eq!(store.get(&id).unwrap(), Some(user));
        assert_eq!(store.list_all().unwrap().len(), 1);

        assert!(store.delete(&id).unwrap());
        assert!(!store.delete(&id).unwrap());
        assert_eq!(store.get(&id).unwrap(), None);
    }

    #[test]
    fn put_overwrites() {
        let store: InMemoryEntityStore<User> = InMemoryEntityStore::new();
        let mut user = User::new("ada", Role::Viewer, Utc::now());
        store.put(user.id, user.clone()).unwrap();

        user.role = Role::Admin;
        store.put(user.id, user.clone()).unwrap();

        assert_eq!(store.get(&user.id).unwrap().map(|u| u.role), Some(Role::Admin));
        assert_eq!(store.list_all().unwrap().len(), 1);
    }

    #[test]
    fn arc_store_shares_state() {
        let store = InMemoryEntityStore::<User>::arc();
        let other = store.clone();
        let user = User::new("grace", Role::Admin, Utc::now());
        store.put(user.id, user.clone()).unwrap();
        assert_eq!(EntityStore::<User>::get(&other, &user.id).unwrap(), Some(user));
    }
}

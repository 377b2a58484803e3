//! In-process repository backed by a concurrent map.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hg_types::{Key, StoreError, StoreResult};
use tracing::debug;

use crate::repository::{Entity, LockOwner, LockTable, Repository};

#[derive(Debug, Clone)]
struct Slot {
    entity: Entity,
    version: u64,
}

/// Repository keeping every entity in memory.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    slots: DashMap<Key, Slot>,
    locks: LockTable,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Owner currently holding the lock on `key`, if any.
    pub fn lock_holder(&self, key: &Key) -> Option<LockOwner> {
        self.locks.holder(key)
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get(&self, key: &Key) -> StoreResult<Option<Entity>> {
        Ok(self.slots.get(key).map(|slot| slot.entity.clone()))
    }

    async fn version(&self, key: &Key) -> StoreResult<Option<u64>> {
        Ok(self.slots.get(key).map(|slot| slot.version))
    }

    async fn create_and_lock(&self, entity: Entity, owner: LockOwner) -> StoreResult<()> {
        let key = entity.key().clone();
        match self.slots.entry(key.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists {
                key: key.to_string(),
            }),
            Entry::Vacant(free) => {
                self.locks.acquire(&key, owner)?;
                free.insert(Slot { entity, version: 1 });
                debug!(key = %key, owner = %owner, "created and locked");
                Ok(())
            }
        }
    }

    async fn lock(&self, key: &Key, owner: LockOwner) -> StoreResult<()> {
        if !self.slots.contains_key(key) {
            return Err(StoreError::NotFound {
                key: key.to_string(),
            });
        }
        self.locks.acquire(key, owner)
    }

    async fn unlock(&self, key: &Key, owner: LockOwner) -> StoreResult<()> {
        self.locks.release(key, owner)
    }

    async fn persist(&self, entity: &Entity, owner: LockOwner) -> StoreResult<u64> {
        let key = entity.key();
        self.locks.ensure_held(key, owner)?;
        let mut slot = self.slots.get_mut(key).ok_or_else(|| StoreError::NotFound {
            key: key.to_string(),
        })?;
        slot.entity = entity.clone();
        slot.version += 1;
        Ok(slot.version)
    }

    async fn put(&self, entity: Entity) -> StoreResult<u64> {
        let key = entity.key().clone();
        self.locks.ensure_free(&key)?;
        match self.slots.entry(key) {
            Entry::Occupied(mut taken) => {
                let slot = taken.get_mut();
                slot.entity.ensure_replaceable_by(&entity)?;
                slot.entity = entity;
                slot.version += 1;
                Ok(slot.version)
            }
            Entry::Vacant(free) => {
                free.insert(Slot { entity, version: 1 });
                Ok(1)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hg_types::{Artifact, FieldNaming, Grid, ParameterSet};
    use uuid::Uuid;

    fn grid(key: &str) -> Entity {
        Entity::Grid(
            Grid::new(
                Key::new(key),
                &ParameterSet::new(),
                vec!["b".into()],
                "gbm",
                FieldNaming::Consistent,
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn create_and_lock_is_exclusive() {
        let repo = InMemoryRepository::new();
        let owner = Uuid::new_v4();

        repo.create_and_lock(grid("g"), owner).await.unwrap();
        assert_eq!(repo.version(&Key::new("g")).await.unwrap(), Some(1));
        assert_eq!(repo.lock_holder(&Key::new("g")), Some(owner));

        let again = repo.create_and_lock(grid("g"), Uuid::new_v4()).await;
        assert!(matches!(again, Err(StoreError::AlreadyExists { .. })));
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn persist_requires_lock_and_bumps_version() {
        let repo = InMemoryRepository::new();
        let owner = Uuid::new_v4();
        let key = Key::new("g");
        repo.create_and_lock(grid("g"), owner).await.unwrap();

        let intruder = repo.persist(&grid("g"), Uuid::new_v4()).await;
        assert!(matches!(intruder, Err(StoreError::NotLocked { .. })));

        assert_eq!(repo.persist(&grid("g"), owner).await.unwrap(), 2);
        assert_eq!(repo.persist(&grid("g"), owner).await.unwrap(), 3);

        repo.unlock(&key, owner).await.unwrap();
        assert!(repo.persist(&grid("g"), owner).await.is_err());
        assert_eq!(repo.version(&key).await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn lock_rejects_other_owner_until_released() {
        let repo = InMemoryRepository::new();
        let key = Key::new("g");
        let (first, second) = (Uuid::new_v4(), Uuid::new_v4());
        repo.create_and_lock(grid("g"), first).await.unwrap();

        assert!(matches!(
            repo.lock(&key, second).await,
            Err(StoreError::Locked { .. })
        ));
        repo.unlock(&key, first).await.unwrap();
        repo.lock(&key, second).await.unwrap();
        assert_eq!(repo.lock_holder(&key), Some(second));

        let missing = repo.lock(&Key::new("nope"), first).await;
        assert!(matches!(missing, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn put_stores_unlocked_entities() {
        let repo = InMemoryRepository::new();
        let artifact = Artifact::new(Key::new("g_model_0"), "gbm").with_metric("auc", 0.9);

        assert_eq!(repo.put(Entity::Artifact(artifact.clone())).await.unwrap(), 1);
        assert_eq!(repo.put(Entity::Artifact(artifact.clone())).await.unwrap(), 2);
        match repo.get(&Key::new("g_model_0")).await.unwrap() {
            Some(Entity::Artifact(stored)) => assert_eq!(stored, artifact),
            other => panic!("unexpected entity: {other:?}"),
        }

        let owner = Uuid::new_v4();
        repo.create_and_lock(grid("g"), owner).await.unwrap();
        assert!(matches!(
            repo.put(grid("g")).await,
            Err(StoreError::Locked { .. })
        ));
    }

    #[tokio::test]
    async fn put_never_replaces_another_kind() {
        let repo = InMemoryRepository::new();
        let owner = Uuid::new_v4();
        let key = Key::new("g_model_0");
        repo.create_and_lock(grid("g_model_0"), owner).await.unwrap();
        repo.unlock(&key, owner).await.unwrap();

        let clobber = repo
            .put(Entity::Artifact(Artifact::new(key.clone(), "gbm")))
            .await;
        assert!(matches!(
            clobber,
            Err(StoreError::KindMismatch { ref existing, .. }) if existing == "grid"
        ));
        assert!(matches!(repo.get(&key).await.unwrap(), Some(Entity::Grid(_))));
        assert_eq!(repo.version(&key).await.unwrap(), Some(1));
    }
}

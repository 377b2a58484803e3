//! Repository abstraction shared by every store backend.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hg_types::{Artifact, Grid, Key, StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of the job holding (or requesting) an entity lock.
pub type LockOwner = Uuid;

/// Anything a repository can hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "entity", rename_all = "snake_case")]
pub enum Entity {
    Grid(Grid),
    Artifact(Artifact),
}

impl Entity {
    pub fn key(&self) -> &Key {
        match self {
            Self::Grid(grid) => &grid.key,
            Self::Artifact(artifact) => &artifact.key,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Grid(_) => "grid",
            Self::Artifact(_) => "artifact",
        }
    }

    /// Whether `incoming` may overwrite `self` through `put`.
    pub(crate) fn ensure_replaceable_by(&self, incoming: &Entity) -> StoreResult<()> {
        if self.kind() == incoming.kind() {
            return Ok(());
        }
        Err(StoreError::KindMismatch {
            key: self.key().to_string(),
            existing: self.kind().to_string(),
            incoming: incoming.kind().to_string(),
        })
    }
}

/// Key-addressed store with exclusive, owner-reentrant locks.
///
/// Every stored entity carries a version: 1 on creation, bumped by each
/// `persist` or `put`.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Current entity stored under `key`.
    async fn get(&self, key: &Key) -> StoreResult<Option<Entity>>;

    /// Current version of the entity stored under `key`.
    async fn version(&self, key: &Key) -> StoreResult<Option<u64>>;

    /// Atomically create `entity` and lock it for `owner`. Fails with
    /// [`StoreError::AlreadyExists`] if the key is taken.
    async fn create_and_lock(&self, entity: Entity, owner: LockOwner) -> StoreResult<()>;

    /// Lock an existing entity. Re-locking by the same owner nests; a lock
    /// held by another owner is rejected with [`StoreError::Locked`].
    async fn lock(&self, key: &Key, owner: LockOwner) -> StoreResult<()>;

    /// Release one level of `owner`'s lock.
    async fn unlock(&self, key: &Key, owner: LockOwner) -> StoreResult<()>;

    /// Replace a locked entity with a newer state. Returns the new version.
    async fn persist(&self, entity: &Entity, owner: LockOwner) -> StoreResult<u64>;

    /// Insert or replace an entity nobody holds locked. Returns the new version.
    /// An entity of another kind is never replaced ([`StoreError::KindMismatch`]).
    async fn put(&self, entity: Entity) -> StoreResult<u64>;
}

#[derive(Debug, Clone, Copy)]
struct LockHold {
    owner: LockOwner,
    depth: u32,
}

/// Process-local lock bookkeeping used by the store backends.
#[derive(Debug, Default)]
pub(crate) struct LockTable {
    holds: DashMap<Key, LockHold>,
}

impl LockTable {
    pub(crate) fn acquire(&self, key: &Key, owner: LockOwner) -> StoreResult<()> {
        match self.holds.entry(key.clone()) {
            Entry::Occupied(mut held) => {
                let hold = held.get_mut();
                if hold.owner != owner {
                    return Err(StoreError::Locked {
                        key: key.to_string(),
                        owner: hold.owner.to_string(),
                    });
                }
                hold.depth += 1;
            }
            Entry::Vacant(free) => {
                free.insert(LockHold { owner, depth: 1 });
            }
        }
        Ok(())
    }

    pub(crate) fn release(&self, key: &Key, owner: LockOwner) -> StoreResult<()> {
        match self.holds.entry(key.clone()) {
            Entry::Occupied(mut held) if held.get().owner == owner => {
                if held.get().depth <= 1 {
                    held.remove();
                } else {
                    held.get_mut().depth -= 1;
                }
                Ok(())
            }
            _ => Err(not_locked(key, owner)),
        }
    }

    pub(crate) fn ensure_held(&self, key: &Key, owner: LockOwner) -> StoreResult<()> {
        match self.holds.get(key) {
            Some(hold) if hold.owner == owner => Ok(()),
            _ => Err(not_locked(key, owner)),
        }
    }

    pub(crate) fn ensure_free(&self, key: &Key) -> StoreResult<()> {
        match self.holds.get(key) {
            Some(hold) => Err(StoreError::Locked {
                key: key.to_string(),
                owner: hold.owner.to_string(),
            }),
            None => Ok(()),
        }
    }

    pub(crate) fn holder(&self, key: &Key) -> Option<LockOwner> {
        self.holds.get(key).map(|hold| hold.owner)
    }
}

fn not_locked(key: &Key, owner: LockOwner) -> StoreError {
    StoreError::NotLocked {
        key: key.to_string(),
        owner: owner.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locks_are_reentrant_per_owner() {
        let table = LockTable::default();
        let key = Key::new("grid");
        let owner = Uuid::new_v4();

        table.acquire(&key, owner).unwrap();
        table.acquire(&key, owner).unwrap();
        table.release(&key, owner).unwrap();
        assert_eq!(table.holder(&key), Some(owner));
        table.release(&key, owner).unwrap();
        assert_eq!(table.holder(&key), None);
        assert!(matches!(
            table.release(&key, owner),
            Err(StoreError::NotLocked { .. })
        ));
    }

    #[test]
    fn foreign_owner_is_rejected() {
        let table = LockTable::default();
        let key = Key::new("grid");
        let (first, second) = (Uuid::new_v4(), Uuid::new_v4());

        table.acquire(&key, first).unwrap();
        assert!(matches!(
            table.acquire(&key, second),
            Err(StoreError::Locked { .. })
        ));
        assert!(table.ensure_held(&key, second).is_err());
        assert!(table.release(&key, second).is_err());
        assert!(table.ensure_free(&key).is_err());
        assert!(table.ensure_held(&key, first).is_ok());
    }
}

//! # Entity Store
//!
//! The canonical `{id -> Entity}` map and the pool of changes waiting to be
//! broadcast.
//!
//! ## Diff Pool Flattening
//!
//! Changes inside one flush interval collapse into one net message per
//! entity:
//!
//! | pending    | new change | result                               |
//! |------------|------------|--------------------------------------|
//! | -          | create     | created                              |
//! | -          | update     | updated (diffs OR-merged)            |
//! | created    | update     | created (snapshot refreshed)         |
//! | created    | delete     | nothing                              |
//! | updated    | delete     | deleted                              |
//! | deleted    | create     | updated with every field (restored)  |
//!
//! ## Threading
//!
//! The simulation thread owns the store. The pool sits behind a mutex so a
//! broadcast thread can [`DiffPoolHandle::flush`] without racing an
//! in-progress update.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::mem;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::delta::{Delta, DeltaKind};
use crate::entity::{Entity, EntityDiff, EntityId};
use crate::error::{CoreError, CoreResult};

/// Latest snapshot and accumulated diff of an updated entity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PendingUpdate {
    /// Entity state at the time of the last update.
    pub entity: Entity,
    /// Every field changed since the last flush.
    pub diff: EntityDiff,
}

/// Outgoing changes accumulated since the last flush.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DiffPool {
    created: Vec<Entity>,
    updated: HashMap<EntityId, PendingUpdate>,
    deleted: Vec<EntityId>,
}

impl DiffPool {
    /// Entities created since the last flush, in creation order.
    #[must_use]
    pub fn created(&self) -> &[Entity] {
        &self.created
    }

    /// Entities updated since the last flush.
    #[must_use]
    pub const fn updated(&self) -> &HashMap<EntityId, PendingUpdate> {
        &self.updated
    }

    /// Entities deleted since the last flush.
    #[must_use]
    pub fn deleted(&self) -> &[EntityId] {
        &self.deleted
    }

    /// Returns true if there is nothing to broadcast.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    fn record_created(&mut self, entity: Entity) {
        if let Some(index) = self.deleted.iter().position(|id| *id == entity.id) {
            // Deletion never left the server: clients still know the entity.
            self.deleted.remove(index);
            self.updated.insert(
                entity.id,
                PendingUpdate {
                    entity,
                    diff: EntityDiff::ALL,
                },
            );
            return;
        }
        self.created.push(entity);
    }

    fn record_updated(&mut self, entity: Entity, diff: EntityDiff) {
        if let Some(created) = self.created.iter_mut().find(|e| e.id == entity.id) {
            *created = entity;
            return;
        }
        match self.updated.entry(entity.id) {
            Entry::Occupied(mut pending) => {
                let pending = pending.get_mut();
                pending.entity = entity;
                pending.diff = pending.diff.merge(diff);
            }
            Entry::Vacant(slot) => {
                slot.insert(PendingUpdate { entity, diff });
            }
        }
    }

    fn record_deleted(&mut self, id: EntityId) {
        if let Some(index) = self.created.iter().position(|e| e.id == id) {
            self.created.remove(index);
            return;
        }
        self.updated.remove(&id);
        self.deleted.push(id);
    }
}

/// Shareable handle that can flush the pool from another thread.
#[derive(Clone, Debug)]
pub struct DiffPoolHandle {
    pool: Arc<Mutex<DiffPool>>,
}

impl DiffPoolHandle {
    /// Atomically swaps the pool for an empty one and returns the old one.
    #[must_use]
    pub fn flush(&self) -> DiffPool {
        mem::take(&mut *self.pool.lock())
    }
}

/// Canonical entity map.
#[derive(Debug)]
pub struct EntityStore {
    entities: HashMap<EntityId, Entity>,
    /// Next id to hand out. Never reused, even after deletion.
    next_id: u32,
    pool: Arc<Mutex<DiffPool>>,
    /// While set, mutations are not recorded in the pool.
    muted: bool,
}

impl EntityStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entities: HashMap::new(),
            next_id: 1,
            pool: Arc::new(Mutex::new(DiffPool::default())),
            muted: false,
        }
    }

    /// Inserts an entity, allocating an id if it has none.
    ///
    /// Returns the stored entity.
    pub fn add(&mut self, mut entity: Entity) -> CoreResult<Entity> {
        if entity.id.is_assigned() {
            if self.entities.contains_key(&entity.id) {
                return Err(CoreError::DuplicateEntity(entity.id));
            }
            self.next_id = self.next_id.max(entity.id.get().saturating_add(1));
        } else {
            entity.id = self.allocate_id()?;
        }

        self.entities.insert(entity.id, entity);
        if !self.muted {
            self.pool.lock().record_created(entity);
        }
        tracing::trace!(entity = %entity.id, "entity created");
        Ok(entity)
    }

    fn allocate_id(&mut self) -> CoreResult<EntityId> {
        let id = self.next_id;
        self.next_id = id
            .checked_add(1)
            .ok_or_else(|| CoreError::InvalidArgument("entity id space exhausted".into()))?;
        Ok(EntityId::new(id))
    }

    /// Copies the fields flagged in `diff` from `entity` onto the stored
    /// entity with the same id.
    ///
    /// Returns the state before the update.
    pub fn update(&mut self, entity: &Entity, diff: EntityDiff) -> CoreResult<Entity> {
        let stored = self
            .entities
            .get_mut(&entity.id)
            .ok_or(CoreError::UnknownEntity(entity.id))?;
        let before = *stored;
        stored.apply(entity, diff);
        let after = *stored;

        if !self.muted && !diff.is_empty() {
            self.pool.lock().record_updated(after, diff);
        }
        Ok(before)
    }

    /// Removes an entity. Returns its last state.
    pub fn delete(&mut self, id: EntityId) -> CoreResult<Entity> {
        let removed = self.entities.remove(&id).ok_or(CoreError::UnknownEntity(id))?;
        if !self.muted {
            self.pool.lock().record_deleted(id);
        }
        tracing::trace!(entity = %id, "entity deleted");
        Ok(removed)
    }

    /// Applies a recorded delta in its forward direction.
    pub fn apply(&mut self, delta: &Delta) -> CoreResult<()> {
        match (delta.kind(), delta.from(), delta.to()) {
            (DeltaKind::Create, _, Some(to)) => self.add(*to).map(|_| ()),
            (DeltaKind::Update, _, Some(to)) => self.update(to, delta.diff()).map(|_| ()),
            (DeltaKind::Delete, Some(from), _) => self.delete(from.id).map(|_| ()),
            _ => Err(CoreError::InvalidDelta {
                entity: delta.entity_id(),
                reason: "delta snapshots do not match its kind",
            }),
        }
    }

    /// Atomically swaps the pool for an empty one and returns the old one.
    #[must_use]
    pub fn flush(&self) -> DiffPool {
        mem::take(&mut *self.pool.lock())
    }

    /// Returns a handle that can flush the pool from another thread.
    #[must_use]
    pub fn pool_handle(&self) -> DiffPoolHandle {
        DiffPoolHandle {
            pool: Arc::clone(&self.pool),
        }
    }

    /// Silently restores an entity to a prior snapshot (`None` removes it).
    ///
    /// Nothing is announced: the rollback engine calls [`Self::announce`]
    /// once the net effect of a rewind is known.
    pub fn rewind(&mut self, id: EntityId, state: Option<Entity>) {
        match state {
            Some(entity) => {
                self.entities.insert(id, entity);
            }
            None => {
                self.entities.remove(&id);
            }
        }
    }

    /// Stops (or resumes) recording mutations in the pool.
    pub(crate) fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    /// Queues the net change between two states of the same entity.
    pub fn announce(&self, id: EntityId, before: Option<&Entity>, after: Option<&Entity>) {
        let mut pool = self.pool.lock();
        match (before, after) {
            (None, Some(after)) => pool.record_created(*after),
            (Some(_), None) => pool.record_deleted(id),
            (Some(before), Some(after)) => {
                let diff = EntityDiff::between(before, after);
                if !diff.is_empty() {
                    pool.record_updated(*after, diff);
                }
            }
            (None, None) => {}
        }
    }

    /// Returns an entity by id.
    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// Returns true if the entity exists.
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    /// Number of live entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns true if no entity is alive.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Iterates over live entities in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> + '_ {
        self.entities.values()
    }
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityKind, Position, Speed};

    fn player(x: f32, y: f32) -> Entity {
        Entity::new(EntityKind::Player, Position::new(0, 0, x, y))
    }

    #[test]
    fn test_add_allocates_ids_without_reuse() {
        let mut store = EntityStore::new();
        let a = store.add(player(0.0, 0.0)).unwrap();
        let b = store.add(player(1.0, 0.0)).unwrap();
        assert_eq!(a.id, EntityId::new(1));
        assert_eq!(b.id, EntityId::new(2));

        store.delete(b.id).unwrap();
        let c = store.add(player(2.0, 0.0)).unwrap();
        assert_eq!(c.id, EntityId::new(3));
    }

    #[test]
    fn test_add_explicit_id() {
        let mut store = EntityStore::new();
        let fixed = player(0.0, 0.0).with_id(EntityId::new(10));
        store.add(fixed).unwrap();
        assert_eq!(store.add(fixed), Err(CoreError::DuplicateEntity(EntityId::new(10))));

        let next = store.add(player(0.0, 0.0)).unwrap();
        assert_eq!(next.id, EntityId::new(11));
    }

    #[test]
    fn test_update_applies_only_flagged_fields() {
        let mut store = EntityStore::new();
        let stored = store.add(player(10.0, 15.0)).unwrap();

        let mut change = stored.with_speed(Speed::new(1.0, 10.0));
        change.position = Position::new(0, 0, 99.0, 99.0);
        let before = store.update(&change, EntityDiff::SPEED_NORM).unwrap();

        assert_eq!(before, stored);
        let now = store.get(stored.id).unwrap();
        assert_eq!(now.speed.norm, 10.0);
        assert_eq!(now.speed.angle, 0.0);
        assert_eq!(now.position, Position::new(0, 0, 10.0, 15.0));
    }

    #[test]
    fn test_unknown_entity() {
        let mut store = EntityStore::new();
        let ghost = player(0.0, 0.0).with_id(EntityId::new(5));
        assert_eq!(store.update(&ghost, EntityDiff::ALL), Err(CoreError::UnknownEntity(ghost.id)));
        assert_eq!(store.delete(ghost.id), Err(CoreError::UnknownEntity(ghost.id)));
    }

    #[test]
    fn test_update_of_created_folds_into_created() {
        let mut store = EntityStore::new();
        let stored = store.add(player(10.0, 15.0)).unwrap();
        store
            .update(&stored.with_speed(Speed::new(0.0, 10.0)), EntityDiff::SPEED_NORM)
            .unwrap();

        let pool = store.flush();
        assert_eq!(pool.created().len(), 1);
        assert_eq!(pool.created()[0].speed.norm, 10.0);
        assert!(pool.updated().is_empty());
        assert!(store.flush().is_empty());
    }

    #[test]
    fn test_updates_coalesce() {
        let mut store = EntityStore::new();
        let stored = store.add(player(0.0, 0.0)).unwrap();
        let _ = store.flush();

        store
            .update(&stored.with_speed(Speed::new(0.0, 10.0)), EntityDiff::SPEED_NORM)
            .unwrap();
        let mut moved = stored;
        moved.position = Position::new(0, 0, 5.0, 5.0);
        store.update(&moved, EntityDiff::POSITION).unwrap();

        let pool = store.flush();
        let pending = pool.updated()[&stored.id];
        assert_eq!(pending.diff, EntityDiff::SPEED_NORM | EntityDiff::POSITION);
        assert_eq!(pending.entity.speed.norm, 10.0);
        assert_eq!(pending.entity.position.x, 5.0);
    }

    #[test]
    fn test_delete_drops_pending_update() {
        let mut store = EntityStore::new();
        let stored = store.add(player(0.0, 0.0)).unwrap();
        let _ = store.flush();

        store
            .update(&stored.with_speed(Speed::new(0.0, 1.0)), EntityDiff::SPEED_NORM)
            .unwrap();
        store.delete(stored.id).unwrap();

        let pool = store.flush();
        assert!(pool.updated().is_empty());
        assert_eq!(pool.deleted(), &[stored.id]);
    }

    #[test]
    fn test_create_then_delete_cancels() {
        let mut store = EntityStore::new();
        let stored = store.add(player(0.0, 0.0)).unwrap();
        store.delete(stored.id).unwrap();
        assert!(store.flush().is_empty());
    }

    #[test]
    fn test_rewind_is_silent_and_announce_reports_net_change() {
        let mut store = EntityStore::new();
        let stored = store.add(player(0.0, 0.0)).unwrap();
        let _ = store.flush();

        let moved = stored.with_speed(Speed::new(0.0, 3.0));
        store.rewind(stored.id, Some(moved));
        assert!(store.flush().is_empty());
        assert_eq!(store.get(stored.id), Some(&moved));

        store.announce(stored.id, Some(&stored), Some(&moved));
        store.announce(stored.id, Some(&moved), Some(&moved));
        let pool = store.flush();
        assert_eq!(pool.updated()[&stored.id].diff, EntityDiff::SPEED_NORM);

        store.rewind(stored.id, None);
        assert!(!store.contains(stored.id));
    }

    #[test]
    fn test_restored_deletion_becomes_full_update() {
        let mut store = EntityStore::new();
        let stored = store.add(player(0.0, 0.0)).unwrap();
        let _ = store.flush();

        store.delete(stored.id).unwrap();
        store.rewind(stored.id, Some(stored));
        store.announce(stored.id, None, Some(&stored));

        let pool = store.flush();
        assert!(pool.deleted().is_empty());
        assert_eq!(pool.updated()[&stored.id].diff, EntityDiff::ALL);
    }

    #[test]
    fn test_flush_from_another_thread() {
        let mut store = EntityStore::new();
        let handle = store.pool_handle();
        store.add(player(0.0, 0.0)).unwrap();

        let pool = std::thread::spawn(move || handle.flush()).join().unwrap();
        assert_eq!(pool.created().len(), 1);
        assert!(store.flush().is_empty());
    }
}

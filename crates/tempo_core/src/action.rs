//! # Actions and Rollback
//!
//! An [`Action`] binds an [`Operation`] to the tick at which it happens.
//! Executing it yields the [`Delta`]s it caused; its inverse replays those
//! deltas backwards, each one inverted, so `A` followed by `inverse(A)`
//! leaves the store untouched.
//!
//! The [`TimelineEngine`] owns the clock, the timeline and the store, and
//! accepts actions at their target tick:
//!
//! ```text
//!  tick >= now            tick in [now - horizon, now)        tick < now - horizon
//!  ─────────────          ─────────────────────────────       ────────────────────
//!  clock jumps forward    1. undo every delta after tick      TickTooOld
//!  execute                2. execute at tick
//!  record                 3. replay undone deltas, re-based
//!                         4. announce net changes only
//! ```

use std::collections::BTreeMap;

use crate::clock::TickClock;
use crate::delta::Delta;
use crate::entity::{Entity, EntityDiff, EntityId};
use crate::error::{CoreError, CoreResult};
use crate::store::EntityStore;
use crate::timeline::DeltaTimeline;
use crate::Tick;

/// Who asked for an action.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ActionOrigin {
    /// Requested by a connected client.
    Client,
    /// Generated by the simulation itself.
    #[default]
    Server,
}

/// Mutation carried by an action.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Operation {
    /// Insert an entity (id allocated if unassigned).
    Create(Entity),
    /// Copy the flagged fields onto the entity with the same id.
    Update {
        /// Source of the new field values.
        entity: Entity,
        /// Fields to copy.
        diff: EntityDiff,
    },
    /// Remove an entity.
    Delete(EntityId),
}

impl Operation {
    fn perform(&self, tick: Tick, store: &mut EntityStore) -> CoreResult<Vec<Delta>> {
        let delta = match *self {
            Self::Create(entity) => Delta::create(tick, store.add(entity)?)?,
            Self::Update { entity, diff } => {
                let before = store.update(&entity, diff)?;
                let after = store.get(entity.id).copied().unwrap_or(before);
                Delta::update(tick, before, after)?
            }
            Self::Delete(id) => Delta::delete(tick, store.delete(id)?)?,
        };
        Ok(if delta.is_noop() { Vec::new() } else { vec![delta] })
    }
}

/// An operation bound to a tick, or the inverse of another action.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    /// Performs its operation.
    Forward {
        /// Tick at which the action takes effect.
        tick: Tick,
        /// Who asked for it.
        origin: ActionOrigin,
        /// What it does.
        operation: Operation,
        /// Deltas recorded by the last execution.
        recorded: Vec<Delta>,
    },
    /// Undoes the wrapped action's recorded deltas.
    Inverse(Box<Action>),
}

impl Action {
    /// Creates an action that has not executed yet.
    #[must_use]
    pub const fn new(tick: Tick, origin: ActionOrigin, operation: Operation) -> Self {
        Self::Forward {
            tick,
            origin,
            operation,
            recorded: Vec::new(),
        }
    }

    /// Server action creating `entity`.
    #[must_use]
    pub const fn create(tick: Tick, entity: Entity) -> Self {
        Self::new(tick, ActionOrigin::Server, Operation::Create(entity))
    }

    /// Server action updating the flagged fields of `entity`.
    #[must_use]
    pub const fn update(tick: Tick, entity: Entity, diff: EntityDiff) -> Self {
        Self::new(tick, ActionOrigin::Server, Operation::Update { entity, diff })
    }

    /// Server action deleting entity `id`.
    #[must_use]
    pub const fn delete(tick: Tick, id: EntityId) -> Self {
        Self::new(tick, ActionOrigin::Server, Operation::Delete(id))
    }

    /// Tick at which the action takes effect.
    #[must_use]
    pub fn tick(&self) -> Tick {
        match self {
            Self::Forward { tick, .. } => *tick,
            Self::Inverse(inner) => inner.tick(),
        }
    }

    /// Who asked for the action.
    #[must_use]
    pub fn origin(&self) -> ActionOrigin {
        match self {
            Self::Forward { origin, .. } => *origin,
            Self::Inverse(inner) => inner.origin(),
        }
    }

    /// Wraps this action so that executing the result undoes it.
    #[must_use]
    pub fn inverse(self) -> Self {
        Self::Inverse(Box::new(self))
    }

    /// Deltas this action stands for, in execution order.
    ///
    /// Empty for a forward action that has not executed yet.
    #[must_use]
    pub fn effect(&self) -> Vec<Delta> {
        match self {
            Self::Forward { recorded, .. } => recorded.clone(),
            Self::Inverse(inner) => inner.effect().iter().rev().map(Delta::inverted).collect(),
        }
    }

    /// Applies the action to `store` and returns the resulting deltas.
    pub fn execute(&mut self, store: &mut EntityStore) -> CoreResult<Vec<Delta>> {
        match self {
            Self::Forward {
                tick,
                operation,
                recorded,
                ..
            } => {
                let deltas = operation.perform(*tick, store)?;
                recorded.clone_from(&deltas);
                Ok(deltas)
            }
            Self::Inverse(_) => {
                let deltas = self.effect();
                for delta in &deltas {
                    store.apply(delta)?;
                }
                Ok(deltas)
            }
        }
    }
}

/// Owner of the authoritative tick, history and entities.
#[derive(Debug)]
pub struct TimelineEngine {
    clock: TickClock,
    timeline: DeltaTimeline,
    store: EntityStore,
}

impl TimelineEngine {
    /// Creates an engine at tick zero that can rewind `horizon` ticks.
    pub fn new(horizon: Tick) -> CoreResult<Self> {
        Ok(Self {
            clock: TickClock::with_horizon(horizon)?,
            timeline: DeltaTimeline::new(horizon),
            store: EntityStore::new(),
        })
    }

    /// Accepts an action at its target tick.
    ///
    /// Returns the deltas the action produced, with their timeline
    /// sequence numbers. On error nothing changes.
    pub fn submit(&mut self, mut action: Action) -> CoreResult<Vec<Delta>> {
        let tick = action.tick();
        let now = self.clock.now();

        if tick >= now {
            let deltas = action.execute(&mut self.store)?;
            self.clock.set(tick);
            return Ok(self.record(deltas));
        }

        if tick < self.clock.oldest_rewindable() {
            return Err(CoreError::TickTooOld {
                tick,
                now,
                horizon: self.clock.horizon(),
            });
        }

        tracing::debug!(tick, now, origin = ?action.origin(), "late action, rewinding");
        self.store.set_muted(true);
        let result = self.submit_late(&mut action);
        self.store.set_muted(false);

        let (deltas, touched) = result?;
        self.announce(touched);
        Ok(deltas)
    }

    /// Undoes history after the action's tick, executes it, then replays.
    fn submit_late(&mut self, action: &mut Action) -> CoreResult<(Vec<Delta>, BTreeMap<EntityId, Option<Entity>>)> {
        let undone = self.timeline.split_after(action.tick());
        let mut touched = self.undo(&undone);

        let deltas = match action.execute(&mut self.store) {
            Ok(deltas) => deltas,
            Err(err) => {
                for delta in &undone {
                    self.store.rewind(delta.entity_id(), delta.to().copied());
                }
                self.record(undone);
                return Err(err);
            }
        };

        for delta in &deltas {
            touched.entry(delta.entity_id()).or_insert_with(|| delta.from().copied());
        }
        let deltas = self.record(deltas);

        for delta in undone {
            let id = delta.entity_id();
            if let Some(rebased) = delta.rebase(self.store.get(id).copied()) {
                self.store.rewind(id, rebased.to().copied());
                self.timeline.insert(rebased);
            }
        }
        Ok((deltas, touched))
    }

    /// Rolls the world back by `dt` ticks, discarding the undone history.
    pub fn rewind(&mut self, dt: i64) -> CoreResult<()> {
        let now = self.clock.now();
        let dt = Tick::try_from(dt)
            .ok()
            .filter(|dt| *dt <= now)
            .ok_or_else(|| CoreError::InvalidArgument(format!("cannot rewind {dt} ticks from tick {now}")))?;

        let target = now - dt;
        let undone = self.timeline.split_after(target);
        let touched = self.undo(&undone);
        self.clock.set(target);
        self.announce(touched);

        tracing::info!(from = now, to = target, undone = undone.len(), "rewound");
        Ok(())
    }

    /// Silently restores the state before `undone` (oldest first).
    ///
    /// Returns the broadcast state of every touched entity.
    fn undo(&mut self, undone: &[Delta]) -> BTreeMap<EntityId, Option<Entity>> {
        let mut touched = BTreeMap::new();
        for delta in undone.iter().rev() {
            let id = delta.entity_id();
            let current = self.store.get(id).copied();
            touched.entry(id).or_insert(current);
            self.store.rewind(id, delta.from().copied());
        }
        touched
    }

    fn record(&mut self, deltas: Vec<Delta>) -> Vec<Delta> {
        deltas
            .into_iter()
            .map(|mut delta| {
                let sequence = self.timeline.insert(delta);
                delta.set_sequence(sequence);
                delta
            })
            .collect()
    }

    fn announce(&self, touched: BTreeMap<EntityId, Option<Entity>>) {
        for (id, before) in touched {
            self.store.announce(id, before.as_ref(), self.store.get(id));
        }
    }

    /// Advances the clock one tick and prunes expired history.
    ///
    /// Returns the number of pruned deltas.
    pub fn advance(&mut self) -> usize {
        self.clock.advance();
        self.timeline.cleanup(self.clock.now())
    }

    /// Moves every entity with a non-zero speed by one tick of motion.
    ///
    /// Returns the number of moved entities.
    pub fn step_motion(&mut self) -> CoreResult<usize> {
        let mut moving: Vec<Entity> = self.store.iter().filter(|e| !e.speed.is_still()).copied().collect();
        moving.sort_by_key(|e| e.id);

        let tick = self.clock.now();
        for entity in &moving {
            let mut moved = *entity;
            moved.position = entity.position.moved(entity.speed);
            self.submit(Action::update(tick, moved, EntityDiff::POSITION))?;
        }
        Ok(moving.len())
    }

    /// The clock.
    #[must_use]
    pub const fn clock(&self) -> &TickClock {
        &self.clock
    }

    /// Current authoritative tick.
    #[must_use]
    pub const fn now(&self) -> Tick {
        self.clock.now()
    }

    /// Recorded history.
    #[must_use]
    pub const fn timeline(&self) -> &DeltaTimeline {
        &self.timeline
    }

    /// Canonical entities and their pending broadcast.
    #[must_use]
    pub const fn store(&self) -> &EntityStore {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityKind, Position, Speed};

    fn player(x: f32, y: f32) -> Entity {
        Entity::new(EntityKind::Player, Position::new(0, 0, x, y))
    }

    fn created(engine: &mut TimelineEngine, tick: Tick, entity: Entity) -> Entity {
        let deltas = engine.submit(Action::create(tick, entity)).unwrap();
        *deltas[0].to().unwrap()
    }

    #[test]
    fn test_inverse_restores_store() {
        let mut store = EntityStore::new();
        let original = store.add(player(10.0, 15.0)).unwrap();

        let mut action = Action::update(3, original.with_speed(Speed::new(0.5, 2.0)), EntityDiff::ALL);
        action.execute(&mut store).unwrap();
        assert_ne!(store.get(original.id), Some(&original));

        let mut inverse = action.inverse();
        let undone = inverse.execute(&mut store).unwrap();
        assert_eq!(undone.len(), 1);
        assert_eq!(store.get(original.id), Some(&original));
    }

    #[test]
    fn test_inverse_of_create_and_delete() {
        let mut store = EntityStore::new();
        let mut create = Action::create(1, player(0.0, 0.0));
        let id = create.execute(&mut store).unwrap()[0].entity_id();

        let mut delete = Action::delete(2, id);
        delete.execute(&mut store).unwrap();
        assert!(!store.contains(id));

        delete.inverse().execute(&mut store).unwrap();
        assert!(store.contains(id));
        create.inverse().execute(&mut store).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_double_inverse_replays() {
        let mut store = EntityStore::new();
        let mut create = Action::create(1, player(0.0, 0.0));
        create.execute(&mut store).unwrap();
        let twice = create.clone().inverse().inverse();
        assert_eq!(twice.effect(), create.effect());
    }

    #[test]
    fn test_submit_moves_clock_forward() {
        let mut engine = TimelineEngine::new(10).unwrap();
        created(&mut engine, 4, player(0.0, 0.0));
        assert_eq!(engine.now(), 4);
        assert_eq!(engine.timeline().len(), 1);
        assert_eq!(engine.timeline().iter().next().unwrap().sequence(), 1);
    }

    #[test]
    fn test_rewind_reproduces_prior_state() {
        let mut engine = TimelineEngine::new(60).unwrap();
        let entity = created(&mut engine, 1, player(10.0, 15.0));

        let mut moved = entity;
        moved.position = Position::new(0, 0, 33.0, 15.0);
        engine.submit(Action::update(6, moved, EntityDiff::POSITION)).unwrap();
        assert_eq!(engine.now(), 6);

        engine.rewind(5).unwrap();
        assert_eq!(engine.now(), 1);
        assert_eq!(engine.store().get(entity.id).unwrap().position, Position::new(0, 0, 10.0, 15.0));
    }

    #[test]
    fn test_rewind_bounds() {
        let mut engine = TimelineEngine::new(60).unwrap();
        for _ in 0..5 {
            engine.advance();
        }
        assert!(matches!(engine.rewind(-1), Err(CoreError::InvalidArgument(_))));
        assert!(matches!(engine.rewind(6), Err(CoreError::InvalidArgument(_))));
        assert_eq!(engine.now(), 5);

        engine.rewind(0).unwrap();
        assert_eq!(engine.now(), 5);
        engine.rewind(5).unwrap();
        assert_eq!(engine.now(), 0);
    }

    #[test]
    fn test_rewind_announces_net_change() {
        let mut engine = TimelineEngine::new(60).unwrap();
        let entity = created(&mut engine, 1, player(10.0, 15.0));
        let _ = engine.store().flush();

        let spawned = created(&mut engine, 3, player(1.0, 1.0));
        engine
            .submit(Action::update(4, entity.with_speed(Speed::new(0.0, 2.0)), EntityDiff::SPEED_NORM))
            .unwrap();
        let _ = engine.store().flush();

        engine.rewind(3).unwrap();
        let pool = engine.store().flush();
        assert_eq!(pool.deleted(), &[spawned.id]);
        assert_eq!(pool.updated()[&entity.id].diff, EntityDiff::SPEED_NORM);
        assert_eq!(pool.updated()[&entity.id].entity.speed.norm, 0.0);
    }

    #[test]
    fn test_late_action_replays_in_order() {
        let mut engine = TimelineEngine::new(60).unwrap();
        let entity = created(&mut engine, 1, player(10.0, 15.0));
        engine
            .submit(Action::update(5, entity.with_speed(Speed::new(0.0, 2.0)), EntityDiff::SPEED_NORM))
            .unwrap();
        for _ in 0..5 {
            engine.advance();
        }
        let _ = engine.store().flush();

        let late = Action::new(
            3,
            ActionOrigin::Client,
            Operation::Update {
                entity: entity.with_speed(Speed::new(1.25, 9.0)),
                diff: EntityDiff::SPEED_ANGLE,
            },
        );
        let deltas = engine.submit(late).unwrap();
        assert_eq!(deltas[0].tick(), 3);
        assert_eq!(engine.now(), 10);

        let stored = engine.store().get(entity.id).unwrap();
        assert_eq!(stored.speed, Speed::new(1.25, 2.0));

        let ticks: Vec<Tick> = engine.timeline().iter().map(Delta::tick).collect();
        assert_eq!(ticks, vec![1, 3, 5]);

        let pool = engine.store().flush();
        assert_eq!(pool.updated()[&entity.id].diff, EntityDiff::SPEED_ANGLE);
    }

    #[test]
    fn test_late_delete_drops_later_updates() {
        let mut engine = TimelineEngine::new(60).unwrap();
        let entity = created(&mut engine, 1, player(0.0, 0.0));
        engine
            .submit(Action::update(6, entity.with_speed(Speed::new(0.0, 1.0)), EntityDiff::SPEED_NORM))
            .unwrap();
        let _ = engine.store().flush();

        engine.submit(Action::delete(4, entity.id)).unwrap();
        assert!(!engine.store().contains(entity.id));
        assert_eq!(engine.timeline().len(), 2);
        assert_eq!(engine.store().flush().deleted(), &[entity.id]);
    }

    #[test]
    fn test_failed_late_action_changes_nothing() {
        let mut engine = TimelineEngine::new(60).unwrap();
        let entity = created(&mut engine, 1, player(0.0, 0.0));
        let faster = entity.with_speed(Speed::new(0.0, 3.0));
        engine.submit(Action::update(6, faster, EntityDiff::SPEED_NORM)).unwrap();
        let _ = engine.store().flush();

        let err = engine.submit(Action::delete(3, EntityId::new(99))).unwrap_err();
        assert_eq!(err, CoreError::UnknownEntity(EntityId::new(99)));
        assert_eq!(engine.store().get(entity.id), Some(&faster));
        assert_eq!(engine.timeline().len(), 2);
        assert!(engine.store().flush().is_empty());
    }

    #[test]
    fn test_tick_too_old() {
        let mut engine = TimelineEngine::new(5).unwrap();
        let entity = created(&mut engine, 20, player(0.0, 0.0));

        let err = engine.submit(Action::delete(14, entity.id)).unwrap_err();
        assert_eq!(
            err,
            CoreError::TickTooOld {
                tick: 14,
                now: 20,
                horizon: 5
            }
        );
        assert!(engine.submit(Action::delete(15, entity.id)).is_ok());
    }

    #[test]
    fn test_step_motion_and_pruning() {
        let mut engine = TimelineEngine::new(2).unwrap();
        let entity = created(&mut engine, 0, player(10.0, 15.0).with_speed(Speed::new(0.0, 1.0)));
        created(&mut engine, 0, player(50.0, 50.0));

        assert_eq!(engine.step_motion().unwrap(), 1);
        assert_eq!(engine.store().get(entity.id).unwrap().position.x, 11.0);

        for _ in 0..3 {
            engine.advance();
        }
        assert!(engine.timeline().is_empty());
    }
}

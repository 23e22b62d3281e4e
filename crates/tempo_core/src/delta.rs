//! # Deltas
//!
//! A [`Delta`] is one reversible state transition of one entity at one tick.
//! It carries read-only snapshots copied when it was recorded:
//!
//! | from    | to      | meaning |
//! |---------|---------|---------|
//! | `None`  | `Some`  | create  |
//! | `Some`  | `None`  | delete  |
//! | `Some`  | `Some`  | update  |
//!
//! The constructors are the only way to build one, so exactly one row holds.

use crate::entity::{Entity, EntityDiff, EntityId};
use crate::error::{CoreError, CoreResult};
use crate::Tick;

/// Shape of a delta.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeltaKind {
    /// The entity comes into existence.
    Create,
    /// Some fields of the entity change.
    Update,
    /// The entity is removed.
    Delete,
}

/// One recorded state transition.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Delta {
    tick: Tick,
    sequence: u64,
    entity_id: EntityId,
    from: Option<Entity>,
    to: Option<Entity>,
    diff: EntityDiff,
}

impl Delta {
    /// Records the creation of `entity`. Its id must already be assigned.
    pub fn create(tick: Tick, entity: Entity) -> CoreResult<Self> {
        Self::check_id(entity.id)?;
        Ok(Self {
            tick,
            sequence: 0,
            entity_id: entity.id,
            from: None,
            to: Some(entity),
            diff: EntityDiff::ALL,
        })
    }

    /// Records a change from `from` to `to`; the diff is computed.
    pub fn update(tick: Tick, from: Entity, to: Entity) -> CoreResult<Self> {
        Self::check_id(from.id)?;
        if from.id != to.id {
            return Err(CoreError::InvalidDelta {
                entity: from.id,
                reason: "update snapshots belong to different entities",
            });
        }
        Ok(Self {
            tick,
            sequence: 0,
            entity_id: from.id,
            diff: EntityDiff::between(&from, &to),
            from: Some(from),
            to: Some(to),
        })
    }

    /// Records the removal of `entity`.
    pub fn delete(tick: Tick, entity: Entity) -> CoreResult<Self> {
        Self::check_id(entity.id)?;
        Ok(Self {
            tick,
            sequence: 0,
            entity_id: entity.id,
            from: Some(entity),
            to: None,
            diff: EntityDiff::ALL,
        })
    }

    fn check_id(id: EntityId) -> CoreResult<()> {
        if id.is_assigned() {
            Ok(())
        } else {
            Err(CoreError::InvalidDelta {
                entity: id,
                reason: "delta snapshots need an assigned id",
            })
        }
    }

    /// Returns the same transition run backwards: from/to swapped.
    #[must_use]
    pub const fn inverted(&self) -> Self {
        Self {
            tick: self.tick,
            sequence: self.sequence,
            entity_id: self.entity_id,
            from: self.to,
            to: self.from,
            diff: self.diff,
        }
    }

    /// Returns the shape of this delta.
    #[must_use]
    pub fn kind(&self) -> DeltaKind {
        match (self.from, self.to) {
            (None, _) => DeltaKind::Create,
            (_, None) => DeltaKind::Delete,
            _ => DeltaKind::Update,
        }
    }

    /// Tick at which the transition happened.
    #[inline]
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// Position in the global `(tick, sequence)` order. Zero until the
    /// delta is inserted into a timeline.
    #[inline]
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Entity the delta applies to.
    #[inline]
    #[must_use]
    pub const fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    /// State before the transition.
    #[inline]
    #[must_use]
    pub const fn from(&self) -> Option<&Entity> {
        self.from.as_ref()
    }

    /// State after the transition.
    #[inline]
    #[must_use]
    pub const fn to(&self) -> Option<&Entity> {
        self.to.as_ref()
    }

    /// Fields touched by the transition.
    #[inline]
    #[must_use]
    pub const fn diff(&self) -> EntityDiff {
        self.diff
    }

    /// Returns true if applying the delta changes nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.kind() == DeltaKind::Update && self.diff.is_empty()
    }

    pub(crate) fn set_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }

    /// Re-targets this delta onto `current`, the entity state left by a
    /// change inserted underneath it.
    ///
    /// Updates re-apply only their flagged fields. Returns `None` when the
    /// delta no longer applies or no longer changes anything.
    pub(crate) fn rebase(&self, current: Option<Entity>) -> Option<Self> {
        let rebased = match (self.kind(), current) {
            (DeltaKind::Create, None) => *self,
            (DeltaKind::Update, Some(current)) => {
                let mut to = current;
                if let Some(target) = &self.to {
                    to.apply(target, self.diff);
                }
                Self {
                    from: Some(current),
                    to: Some(to),
                    diff: EntityDiff::between(&current, &to),
                    ..*self
                }
            }
            (DeltaKind::Delete, Some(current)) => Self {
                from: Some(current),
                ..*self
            },
            _ => return None,
        };
        (!rebased.is_noop()).then_some(rebased)
    }
}

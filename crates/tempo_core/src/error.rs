//! # Core Error Types
//!
//! Validation failures surfaced by the clock, store and rollback engine.
//! Every error leaves the simulation state unchanged.

use thiserror::Error;

use crate::entity::EntityId;
use crate::Tick;

/// Errors that can occur while mutating the authoritative state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// An argument was outside of its valid range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The referenced entity does not exist.
    #[error("unknown entity: {0}")]
    UnknownEntity(EntityId),

    /// An entity with this id already exists.
    #[error("entity already exists: {0}")]
    DuplicateEntity(EntityId),

    /// The target tick fell out of the rewind horizon.
    #[error("tick {tick} is older than the rewind horizon (now {now}, horizon {horizon})")]
    TickTooOld {
        /// Requested tick.
        tick: Tick,
        /// Current authoritative tick.
        now: Tick,
        /// Configured horizon in ticks.
        horizon: Tick,
    },

    /// A delta could not be applied to the current store contents.
    #[error("delta for entity {entity} does not match the store: {reason}")]
    InvalidDelta {
        /// Entity the delta targets.
        entity: EntityId,
        /// What did not match.
        reason: &'static str,
    },
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

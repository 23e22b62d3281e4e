//! # TEMPO Core
//!
//! The authoritative, reversible world state of a real-time simulation.
//!
//! ## Architecture
//!
//! ```text
//!            ┌────────────────────────────────────────────┐
//!            │               TimelineEngine               │
//!            │                                            │
//!  Action ──►│  TickClock ── DeltaTimeline ── EntityStore │──► DiffPool (flush)
//!            │     │              ▲                │      │
//!            │     └── rewind ────┴── inverse ─────┘      │
//!            └────────────────────────────────────────────┘
//! ```
//!
//! - **Clock**: monotonic tick plus a 16-bit wrapping wire tick.
//! - **Timeline**: every applied change is recorded as a [`Delta`], ordered by
//!   `(tick, sequence)` and pruned past the rewind horizon.
//! - **Store**: the canonical entity map and the pool of changes awaiting
//!   broadcast.
//! - **Engine**: executes [`Action`]s at their target tick, rewinding and
//!   replaying when a late action arrives.
//!
//! ## Example
//!
//! ```rust
//! use tempo_core::{Action, Entity, EntityKind, Position, TimelineEngine};
//!
//! let mut engine = TimelineEngine::new(120).unwrap();
//! let entity = Entity::new(EntityKind::Player, Position::new(0, 0, 10.0, 15.0));
//! engine.submit(Action::create(1, entity)).unwrap();
//! let pool = engine.store().flush();
//! assert_eq!(pool.created().len(), 1);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]

pub mod action;
pub mod clock;
pub mod delta;
pub mod entity;
pub mod error;
pub mod store;
pub mod terrain;
pub mod timeline;

pub use action::{Action, ActionOrigin, Operation, TimelineEngine};
pub use clock::{TickClock, WIRE_TICK_MODULUS};
pub use delta::{Delta, DeltaKind};
pub use entity::{Entity, EntityDiff, EntityId, EntityKind, Position, Speed};
pub use error::{CoreError, CoreResult};
pub use store::{DiffPool, DiffPoolHandle, EntityStore, PendingUpdate};
pub use terrain::{ChunkCoord, PointType, TerrainBlock};
pub use timeline::DeltaTimeline;

/// Monotonic simulation tick.
pub type Tick = u64;

/// Wrapped tick as transmitted on the wire.
pub type WireTick = u16;

/// Side length of a chunk, in world units and in terrain points.
pub const CHUNK_SIZE: usize = 256;

//! # Entity Model
//!
//! Entities are small `Copy` records: an id, a kind, a position and a speed.
//! Changes between two versions of an entity are described by an
//! [`EntityDiff`], a one-byte mask with a documented bit order that is also
//! the wire bitfield.
//!
//! ## Bit Order
//!
//! | Bit | Field        |
//! |-----|--------------|
//! | 0   | position     |
//! | 1   | speed angle  |
//! | 2   | speed norm   |
//! | 3   | kind         |

use std::fmt;

use crate::CHUNK_SIZE;

/// Identifier of a simulated entity.
///
/// Zero means "unassigned": the store allocates a fresh id on insertion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct EntityId(u32);

impl EntityId {
    /// The unassigned id.
    pub const UNASSIGNED: Self = Self(0);

    /// Wraps a raw id.
    #[inline]
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw id.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Returns true once an id has been allocated.
    #[inline]
    #[must_use]
    pub const fn is_assigned(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What an entity is.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EntityKind {
    /// A connected player's avatar.
    #[default]
    Player = 1,
    /// A server-controlled character.
    Npc = 2,
    /// A moving projectile.
    Projectile = 3,
}

impl EntityKind {
    /// Decodes a kind from its wire byte.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Player),
            2 => Some(Self::Npc),
            3 => Some(Self::Projectile),
            _ => None,
        }
    }
}

/// World coordinate: a chunk plus a point inside it.
///
/// `x` and `y` always lie in `[0, CHUNK_SIZE)`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Position {
    /// Chunk column.
    pub chunk_x: i32,
    /// Chunk row.
    pub chunk_y: i32,
    /// Horizontal offset inside the chunk.
    pub x: f32,
    /// Vertical offset inside the chunk.
    pub y: f32,
}

impl Position {
    /// Creates a position, carrying out-of-range offsets into the chunk
    /// coordinates. A non-finite offset collapses to the chunk origin.
    #[must_use]
    pub fn new(chunk_x: i32, chunk_y: i32, x: f32, y: f32) -> Self {
        let (chunk_x, x) = normalize_axis(chunk_x, x);
        let (chunk_y, y) = normalize_axis(chunk_y, y);
        Self { chunk_x, chunk_y, x, y }
    }

    /// Returns the position after one tick of motion at `speed`.
    #[must_use]
    pub fn moved(self, speed: Speed) -> Self {
        if speed.is_still() {
            return self;
        }
        let (sin, cos) = speed.angle.sin_cos();
        Self::new(
            self.chunk_x,
            self.chunk_y,
            self.x + cos * speed.norm,
            self.y + sin * speed.norm,
        )
    }
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn normalize_axis(chunk: i32, offset: f32) -> (i32, f32) {
    let size = CHUNK_SIZE as f32;
    if !offset.is_finite() {
        return (chunk, 0.0);
    }
    if (0.0..size).contains(&offset) {
        return (chunk, offset);
    }
    let mut carry = (offset / size).floor();
    let mut rest = offset - carry * size;
    // Rounding can leave the remainder just outside [0, size).
    if rest < 0.0 {
        rest += size;
        carry -= 1.0;
    }
    if rest >= size {
        rest = 0.0;
        carry += 1.0;
    }
    (chunk.saturating_add(carry as i32), rest)
}

/// Motion vector in polar form.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Speed {
    /// Direction in radians.
    pub angle: f32,
    /// Distance travelled per tick.
    pub norm: f32,
}

impl Speed {
    /// Creates a speed.
    #[inline]
    #[must_use]
    pub const fn new(angle: f32, norm: f32) -> Self {
        Self { angle, norm }
    }

    /// Returns true if this speed does not move anything.
    #[inline]
    #[must_use]
    pub fn is_still(self) -> bool {
        self.norm == 0.0
    }
}

/// A simulated object.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Entity {
    /// Identifier, immutable once assigned.
    pub id: EntityId,
    /// Type of entity.
    pub kind: EntityKind,
    /// World position.
    pub position: Position,
    /// Motion vector.
    pub speed: Speed,
}

impl Entity {
    /// Creates an entity with an unassigned id and no motion.
    #[must_use]
    pub fn new(kind: EntityKind, position: Position) -> Self {
        Self {
            id: EntityId::UNASSIGNED,
            kind,
            position,
            speed: Speed::default(),
        }
    }

    /// Returns the entity with its id replaced.
    #[must_use]
    pub const fn with_id(mut self, id: EntityId) -> Self {
        self.id = id;
        self
    }

    /// Returns the entity with its speed replaced.
    #[must_use]
    pub const fn with_speed(mut self, speed: Speed) -> Self {
        self.speed = speed;
        self
    }

    /// Copies the fields flagged in `diff` from `source` onto `self`.
    pub fn apply(&mut self, source: &Self, diff: EntityDiff) {
        if diff.contains(EntityDiff::POSITION) {
            self.position = source.position;
        }
        if diff.contains(EntityDiff::SPEED_ANGLE) {
            self.speed.angle = source.speed.angle;
        }
        if diff.contains(EntityDiff::SPEED_NORM) {
            self.speed.norm = source.speed.norm;
        }
        if diff.contains(EntityDiff::KIND) {
            self.kind = source.kind;
        }
    }
}

/// Set of changed entity fields.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct EntityDiff(u8);

impl EntityDiff {
    /// Position changed.
    pub const POSITION: Self = Self(1 << 0);
    /// Speed angle changed.
    pub const SPEED_ANGLE: Self = Self(1 << 1);
    /// Speed norm changed.
    pub const SPEED_NORM: Self = Self(1 << 2);
    /// Kind changed.
    pub const KIND: Self = Self(1 << 3);
    /// Every field.
    pub const ALL: Self = Self(0b1111);
    /// No field.
    pub const NONE: Self = Self(0);

    /// Decodes a diff, rejecting unknown bits.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Option<Self> {
        if bits & !Self::ALL.0 == 0 {
            Some(Self(bits))
        } else {
            None
        }
    }

    /// Returns the raw mask.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Field-wise OR. Never loses a set flag.
    #[inline]
    #[must_use]
    pub const fn merge(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns true if every flag of `other` is set in `self`.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if no flag is set.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Computes which fields differ between two versions of an entity.
    #[must_use]
    pub fn between(before: &Entity, after: &Entity) -> Self {
        let mut diff = Self::NONE;
        if before.position != after.position {
            diff = diff.merge(Self::POSITION);
        }
        if before.speed.angle != after.speed.angle {
            diff = diff.merge(Self::SPEED_ANGLE);
        }
        if before.speed.norm != after.speed.norm {
            diff = diff.merge(Self::SPEED_NORM);
        }
        if before.kind != after.kind {
            diff = diff.merge(Self::KIND);
        }
        diff
    }
}

impl std::ops::BitOr for EntityDiff {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.merge(rhs)
    }
}

impl std::ops::BitOrAssign for EntityDiff {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.merge(rhs);
    }
}

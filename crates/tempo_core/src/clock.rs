//! # Tick Clock
//!
//! Monotonic simulation time plus its 16-bit wire representation.
//!
//! ## Reconstruction
//!
//! ```text
//!  monotonic: ... 65534 65535 65536 65537 ...
//!  wire:      ... 65534 65535     0     1 ...
//!
//!  reconstruct(wire) = the unique t in (now - M, now] with t ≡ wire (mod M)
//! ```
//!
//! The answer is unambiguous as long as the value was produced less than `M`
//! ticks ago, which the rewind horizon (`< M`) guarantees for every tick the
//! simulation still cares about.

use crate::error::{CoreError, CoreResult};
use crate::{Tick, WireTick};

/// Modulus of the wire tick (`2^16`).
pub const WIRE_TICK_MODULUS: Tick = 1 << 16;

/// Authoritative tick counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickClock {
    /// Current monotonic tick.
    now: Tick,
    /// Maximum number of ticks that can be rewound.
    horizon: Tick,
}

impl TickClock {
    /// Creates a clock at tick zero with the given rewind horizon.
    ///
    /// Fails when the horizon would make wire ticks ambiguous.
    pub fn with_horizon(horizon: Tick) -> CoreResult<Self> {
        Self::resume(0, horizon)
    }

    /// Creates a clock that continues from tick `now`.
    pub fn resume(now: Tick, horizon: Tick) -> CoreResult<Self> {
        if horizon >= WIRE_TICK_MODULUS {
            return Err(CoreError::InvalidArgument(format!(
                "rewind horizon {horizon} must be smaller than the wire tick modulus {WIRE_TICK_MODULUS}"
            )));
        }
        Ok(Self { now, horizon })
    }

    /// Advances the clock by one tick.
    #[inline]
    pub fn advance(&mut self) {
        self.now += 1;
    }

    /// Returns the current monotonic tick.
    #[inline]
    #[must_use]
    pub const fn now(&self) -> Tick {
        self.now
    }

    /// Returns the rewind horizon.
    #[inline]
    #[must_use]
    pub const fn horizon(&self) -> Tick {
        self.horizon
    }

    /// Returns the current tick reduced modulo [`WIRE_TICK_MODULUS`].
    #[inline]
    #[must_use]
    pub const fn wire_tick(&self) -> WireTick {
        Self::to_wire(self.now)
    }

    /// Reduces any monotonic tick to its wire form.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn to_wire(tick: Tick) -> WireTick {
        (tick % WIRE_TICK_MODULUS) as WireTick
    }

    /// Maps a wire tick back to the monotonic tick it was produced at.
    ///
    /// Never returns a tick in the future. Returns `None` only when the
    /// clock is younger than the distance to the congruent tick, i.e. the
    /// value cannot have been produced by this clock.
    #[must_use]
    pub fn reconstruct(&self, wire: WireTick) -> Option<Tick> {
        let back = Tick::from(self.wire_tick().wrapping_sub(wire));
        self.now.checked_sub(back)
    }

    /// Moves the clock to `tick`. Only the rollback engine calls this.
    #[inline]
    pub(crate) fn set(&mut self, tick: Tick) {
        self.now = tick;
    }

    /// Returns the oldest tick that can still be rewound to.
    #[inline]
    #[must_use]
    pub const fn oldest_rewindable(&self) -> Tick {
        self.now.saturating_sub(self.horizon)
    }
}

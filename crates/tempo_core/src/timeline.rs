//! # Delta Timeline
//!
//! Ordered history of applied deltas, used to rewind the world.
//!
//! ## Ordering
//!
//! Entries are sorted by `(tick, sequence)`. The sequence number is assigned
//! on insertion, so deltas sharing a tick keep their insertion order and
//! deltas from independent entities have one global total order.
//!
//! ```text
//!  front (oldest)                                  back (newest)
//!  ┌──────┬──────┬──────┬──────┬──────┬──────┐
//!  │ t=3  │ t=4  │ t=4  │ t=7  │ t=9  │ t=9  │  ◄── insert scans from here
//!  └──────┴──────┴──────┴──────┴──────┴──────┘
//!     ▲
//!     └── cleanup pops while tick < now - horizon
//! ```

use std::collections::VecDeque;

use crate::delta::Delta;
use crate::Tick;

/// Ordered, prunable sequence of deltas.
#[derive(Debug, Default)]
pub struct DeltaTimeline {
    entries: VecDeque<Delta>,
    horizon: Tick,
    next_sequence: u64,
}

impl DeltaTimeline {
    /// Creates an empty timeline that keeps `horizon` ticks of history.
    #[must_use]
    pub fn new(horizon: Tick) -> Self {
        Self {
            entries: VecDeque::new(),
            horizon,
            next_sequence: 1,
        }
    }

    /// Inserts a delta after every entry with a tick at or before its own.
    ///
    /// Inserts almost always land near the tail, so the scan starts there.
    /// Returns the sequence number assigned to the delta.
    pub fn insert(&mut self, mut delta: Delta) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        delta.set_sequence(sequence);

        let mut index = self.entries.len();
        while index > 0 && self.entries[index - 1].tick() > delta.tick() {
            index -= 1;
        }
        self.entries.insert(index, delta);
        sequence
    }

    /// Removes every entry older than `now - horizon`.
    ///
    /// Returns the number of removed entries.
    pub fn cleanup(&mut self, now: Tick) -> usize {
        let limit = now.saturating_sub(self.horizon);
        let mut removed = 0;
        while self.entries.front().is_some_and(|d| d.tick() < limit) {
            self.entries.pop_front();
            removed += 1;
        }
        removed
    }

    /// Returns the last entry whose tick is `<= tick`.
    #[must_use]
    pub fn last_at_or_before(&self, tick: Tick) -> Option<&Delta> {
        let end = self.entries.partition_point(|d| d.tick() <= tick);
        end.checked_sub(1).and_then(|i| self.entries.get(i))
    }

    /// Returns the first entry whose tick is `>= tick`.
    #[must_use]
    pub fn first_at_or_after(&self, tick: Tick) -> Option<&Delta> {
        let start = self.entries.partition_point(|d| d.tick() < tick);
        self.entries.get(start)
    }

    /// Removes and returns every entry with a tick strictly after `tick`,
    /// oldest first.
    pub fn split_after(&mut self, tick: Tick) -> Vec<Delta> {
        let start = self.entries.partition_point(|d| d.tick() <= tick);
        self.entries.drain(start..).collect()
    }

    /// Tick of the newest entry.
    #[must_use]
    pub fn latest_tick(&self) -> Option<Tick> {
        self.entries.back().map(Delta::tick)
    }

    /// Iterates from oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Delta> + '_ {
        self.entries.iter()
    }

    /// Number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// History kept, in ticks.
    #[must_use]
    pub const fn horizon(&self) -> Tick {
        self.horizon
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Entity, EntityId, EntityKind, Position};

    fn delta(tick: Tick, id: u32) -> Delta {
        let entity = Entity::new(EntityKind::Npc, Position::default()).with_id(EntityId::new(id));
        Delta::create(tick, entity).unwrap()
    }

    fn ticks(timeline: &DeltaTimeline) -> Vec<Tick> {
        timeline.iter().map(Delta::tick).collect()
    }

    #[test]
    fn test_insert_keeps_order() {
        let mut timeline = DeltaTimeline::new(100);
        for tick in [5, 3, 9, 3, 7, 10, 1] {
            timeline.insert(delta(tick, 1));
        }
        assert_eq!(ticks(&timeline), vec![1, 3, 3, 5, 7, 9, 10]);
    }

    #[test]
    fn test_equal_ticks_keep_insertion_order() {
        let mut timeline = DeltaTimeline::new(100);
        timeline.insert(delta(4, 1));
        timeline.insert(delta(4, 2));
        timeline.insert(delta(2, 9));
        timeline.insert(delta(4, 3));

        let ids: Vec<u32> = timeline.iter().map(|d| d.entity_id().get()).collect();
        assert_eq!(ids, vec![9, 1, 2, 3]);

        let sequences: Vec<u64> = timeline.iter().filter(|d| d.tick() == 4).map(Delta::sequence).collect();
        assert!(sequences.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_cleanup() {
        let mut timeline = DeltaTimeline::new(10);
        assert_eq!(timeline.cleanup(100), 0);

        for tick in [1, 5, 10, 15, 20] {
            timeline.insert(delta(tick, 1));
        }
        assert_eq!(timeline.cleanup(20), 2);
        assert_eq!(ticks(&timeline), vec![10, 15, 20]);
        assert_eq!(timeline.cleanup(20), 0);
    }

    #[test]
    fn test_nearest_queries() {
        let mut timeline = DeltaTimeline::new(100);
        assert!(timeline.last_at_or_before(5).is_none());
        assert!(timeline.first_at_or_after(5).is_none());

        timeline.insert(delta(2, 1));
        timeline.insert(delta(6, 2));
        timeline.insert(delta(6, 3));

        assert_eq!(timeline.last_at_or_before(5).unwrap().tick(), 2);
        assert_eq!(timeline.last_at_or_before(6).unwrap().entity_id().get(), 3);
        assert!(timeline.last_at_or_before(1).is_none());

        assert_eq!(timeline.first_at_or_after(3).unwrap().entity_id().get(), 2);
        assert_eq!(timeline.first_at_or_after(2).unwrap().tick(), 2);
        assert!(timeline.first_at_or_after(7).is_none());
    }

    #[test]
    fn test_split_after() {
        let mut timeline = DeltaTimeline::new(100);
        for tick in [1, 4, 4, 8, 9] {
            timeline.insert(delta(tick, 1));
        }

        let undone = timeline.split_after(4);
        assert_eq!(undone.iter().map(Delta::tick).collect::<Vec<_>>(), vec![8, 9]);
        assert_eq!(ticks(&timeline), vec![1, 4, 4]);
        assert_eq!(timeline.latest_tick(), Some(4));
    }
}

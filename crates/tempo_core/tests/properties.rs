//! Property tests for the clock, timeline, diff algebra and rollback.

use proptest::prelude::*;
use tempo_core::{
    Action, Delta, DeltaTimeline, Entity, EntityDiff, EntityId, EntityKind, EntityStore, Position, Speed, Tick,
    TickClock, TimelineEngine, WIRE_TICK_MODULUS,
};

fn marker(tick: Tick) -> Delta {
    let entity = Entity::new(EntityKind::Npc, Position::default()).with_id(EntityId::new(1));
    Delta::create(tick, entity).unwrap()
}

fn snapshot(store: &EntityStore) -> Vec<Entity> {
    let mut entities: Vec<Entity> = store.iter().copied().collect();
    entities.sort_by_key(|e| e.id);
    entities
}

fn entity_strategy() -> impl Strategy<Value = Entity> {
    (-4i32..4, -4i32..4, 0.0f32..256.0, 0.0f32..256.0, -3.0f32..3.0, 0.0f32..8.0, 1u8..=3).prop_map(
        |(cx, cy, x, y, angle, norm, kind)| {
            let kind = EntityKind::from_u8(kind).unwrap_or_default();
            Entity::new(kind, Position::new(cx, cy, x, y)).with_speed(Speed::new(angle, norm))
        },
    )
}

fn offset_strategy() -> impl Strategy<Value = f32> {
    prop_oneof![
        -1.0e5f32..1.0e5,
        -1.0e-3f32..1.0e-3,
        255.99f32..256.01,
        -256.01f32..-255.99,
    ]
}

fn world(chunk: i32, offset: f32) -> f64 {
    f64::from(chunk) * 256.0 + f64::from(offset)
}

#[derive(Clone, Debug)]
enum Op {
    Create(Entity),
    Update { target: usize, source: Entity, bits: u8 },
    Delete { target: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        entity_strategy().prop_map(Op::Create),
        (any::<usize>(), entity_strategy(), 0u8..16).prop_map(|(target, source, bits)| Op::Update {
            target,
            source,
            bits
        }),
        any::<usize>().prop_map(|target| Op::Delete { target }),
    ]
}

proptest! {
    #[test]
    fn prop_position_stays_in_chunk(
        chunk_x in -1_000_000i32..1_000_000,
        chunk_y in -1_000_000i32..1_000_000,
        x in offset_strategy(),
        y in offset_strategy(),
    ) {
        let pos = Position::new(chunk_x, chunk_y, x, y);
        prop_assert!((0.0..256.0).contains(&pos.x), "x = {}", pos.x);
        prop_assert!((0.0..256.0).contains(&pos.y), "y = {}", pos.y);
        prop_assert!((world(pos.chunk_x, pos.x) - world(chunk_x, x)).abs() <= 1.0);
        prop_assert!((world(pos.chunk_y, pos.y) - world(chunk_y, y)).abs() <= 1.0);
    }

    #[test]
    fn prop_reconstruct_round_trip(tick in 0u64..(1 << 40), distance in 0u64..WIRE_TICK_MODULUS) {
        let clock = TickClock::resume(tick + distance, 120).unwrap();
        prop_assert_eq!(clock.reconstruct(TickClock::to_wire(tick)), Some(tick));
    }

    #[test]
    fn prop_timeline_stays_ordered(ticks in prop::collection::vec(0u64..50, 0..64)) {
        let mut timeline = DeltaTimeline::new(100);
        for tick in &ticks {
            timeline.insert(marker(*tick));
        }
        let entries: Vec<&Delta> = timeline.iter().collect();
        prop_assert_eq!(entries.len(), ticks.len());
        for pair in entries.windows(2) {
            prop_assert!((pair[0].tick(), pair[0].sequence()) < (pair[1].tick(), pair[1].sequence()));
        }
    }

    #[test]
    fn prop_cleanup_is_monotonic(
        ticks in prop::collection::vec(0u64..500, 0..64),
        now in 0u64..600,
        horizon in 0u64..200,
    ) {
        let mut timeline = DeltaTimeline::new(horizon);
        for tick in &ticks {
            timeline.insert(marker(*tick));
        }
        timeline.cleanup(now);
        let limit = now.saturating_sub(horizon);
        prop_assert!(timeline.iter().all(|d| d.tick() >= limit));
        prop_assert_eq!(timeline.cleanup(now), 0);
    }

    #[test]
    fn prop_diff_merge_algebra(a in 0u8..16, b in 0u8..16, c in 0u8..16) {
        let [a, b, c] = [a, b, c].map(|bits| EntityDiff::from_bits(bits).unwrap());
        prop_assert_eq!(a.merge(b).merge(c), a.merge(b.merge(c)));
        prop_assert_eq!(a.merge(a), a);
        prop_assert_eq!(a.merge(b), b.merge(a));
        prop_assert!(a.merge(b).contains(a));
    }

    #[test]
    fn prop_action_then_inverse_is_identity(
        seed in prop::collection::vec(entity_strategy(), 1..8),
        op in op_strategy(),
    ) {
        let mut store = EntityStore::new();
        let mut ids = Vec::new();
        for entity in seed {
            ids.push(store.add(entity).unwrap().id);
        }
        let before = snapshot(&store);

        let mut action = match op {
            Op::Create(entity) => Action::create(1, entity),
            Op::Update { target, source, bits } => {
                let id = ids[target % ids.len()];
                Action::update(1, source.with_id(id), EntityDiff::from_bits(bits).unwrap())
            }
            Op::Delete { target } => Action::delete(1, ids[target % ids.len()]),
        };
        action.execute(&mut store).unwrap();
        action.inverse().execute(&mut store).unwrap();

        prop_assert_eq!(snapshot(&store), before);
    }

    #[test]
    fn prop_rewind_bounds(elapsed in 0u64..200, dt in -300i64..300) {
        let mut engine = TimelineEngine::new(120).unwrap();
        for _ in 0..elapsed {
            engine.advance();
        }
        let result = engine.rewind(dt);
        let valid = u64::try_from(dt).is_ok_and(|dt| dt <= elapsed);

        prop_assert_eq!(result.is_ok(), valid);
        if valid {
            prop_assert_eq!(engine.now(), elapsed - dt.unsigned_abs());
        } else {
            prop_assert_eq!(engine.now(), elapsed);
        }
    }
}

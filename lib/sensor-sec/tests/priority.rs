// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use drv_sensor_sec_api::{Event, SecError, NUM_EVENTS};
use proptest::prelude::*;
use sensor_sec::engine::Engine;
use sensor_sec::fakes::FakeIrq;
use sensor_sec::{EventLatch, PriorityMap};

fn permutation() -> impl Strategy<Value = [u8; NUM_EVENTS]> {
    Just((0..NUM_EVENTS as u8).collect::<Vec<u8>>())
        .prop_shuffle()
        .prop_map(|v| {
            let mut table = [0u8; NUM_EVENTS];
            table.copy_from_slice(&v);
            table
        })
}

proptest! {
    /// Whatever subset is raised, in whatever order, it comes back out in
    /// strictly ascending priority and nothing is lost or invented.
    #[test]
    fn drains_in_priority_order(
        order in permutation(),
        raise_order in permutation(),
        subset in any::<u32>(),
    ) {
        let map = PriorityMap::from_order(&order).unwrap();
        let irq = FakeIrq::default();
        let latch = EventLatch::new(&irq);

        for id in raise_order.iter().map(|&id| u32::from(id)) {
            if subset & (1 << id) != 0 {
                latch.set_event(id).unwrap();
            }
        }
        prop_assert_eq!(latch.pending(), subset);

        let mut last = None;
        let mut seen = 0u32;
        while let Some(ev) = latch.take_next(&map) {
            let prio = map.priority_of(ev);
            if let Some(prev) = last {
                prop_assert!(prio > prev);
            }
            last = Some(prio);
            seen |= ev.bit();
        }
        prop_assert_eq!(seen, subset);
        prop_assert_eq!(latch.pending(), 0);
        prop_assert!(!irq.is_masked());
    }

    /// The resolver agrees with a plain scan of the priority table.
    #[test]
    fn first_matches_linear_scan(
        order in permutation(),
        pending in any::<u32>(),
    ) {
        let map = PriorityMap::from_order(&order).unwrap();
        let expected = order
            .iter()
            .map(|&id| Event::from_id(u32::from(id)).unwrap())
            .find(|ev| pending & ev.bit() != 0);
        prop_assert_eq!(map.first(pending), expected);
    }

    /// A table pair is accepted exactly when the two are inverses.
    #[test]
    fn table_pairs_must_be_inverse(
        order in permutation(),
        other in permutation(),
    ) {
        let map = PriorityMap::from_order(&order).unwrap();
        let mut inverse = [0u8; NUM_EVENTS];
        for id in 0..NUM_EVENTS as u8 {
            let ev = Event::from_id(u32::from(id)).unwrap();
            inverse[id as usize] = map.priority_of(ev);
        }
        prop_assert_eq!(PriorityMap::from_tables(&inverse, &order), Ok(map));

        let r = PriorityMap::from_tables(&inverse, &other);
        if other == order {
            prop_assert!(r.is_ok());
        } else {
            prop_assert_eq!(r, Err(SecError::InvalidArgument));
        }
    }

    /// Swapping the engine's map at runtime changes what is served next.
    #[test]
    fn engine_uses_installed_map(
        order in permutation(),
        subset in 1..=u32::MAX,
    ) {
        let irq = FakeIrq::default();
        let latch = EventLatch::new(&irq);
        let mut engine = Engine::new(&latch);
        let map = PriorityMap::from_order(&order).unwrap();
        engine.set_priority_map(map);

        for id in 0..NUM_EVENTS as u32 {
            if subset & (1 << id) != 0 {
                engine.set_event(id).unwrap();
            }
        }
        let first = engine.next_event().unwrap();
        prop_assert_eq!(Some(first), map.first(subset));
        prop_assert!(!latch.is_pending(first));
    }
}

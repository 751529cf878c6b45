// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Pending events and the order they are served in.
//!
//! Interrupt handlers only ever set bits in an [`EventLatch`]; the foreground
//! loop takes them back out one at a time, highest priority first. Both
//! sides go through the latch's critical section, so the mask itself only
//! needs plain atomic loads and stores, which every core we care about has
//! (armv6m lacks the read-modify-write ones).

use core::sync::atomic::{AtomicU32, Ordering};

use drv_sensor_sec_api::{Event, SecError, NUM_EVENTS};

use crate::hw::IrqControl;

/// Nesting interrupt mask. The outermost [`enter`](Self::enter) masks
/// interrupts and the matching guard drop unmasks them.
pub struct CriticalSection<'a> {
    irq: &'a dyn IrqControl,
    depth: AtomicU32,
}

impl<'a> CriticalSection<'a> {
    pub const fn new(irq: &'a dyn IrqControl) -> Self {
        Self {
            irq,
            depth: AtomicU32::new(0),
        }
    }

    pub fn enter(&self) -> CsGuard<'_, 'a> {
        // Mask first: once we're masked nothing else can touch `depth`.
        self.irq.mask();
        let d = self.depth.load(Ordering::Relaxed);
        self.depth.store(d + 1, Ordering::Relaxed);
        CsGuard { cs: self }
    }

    pub fn depth(&self) -> u32 {
        self.depth.load(Ordering::Relaxed)
    }

    fn exit(&self) {
        let d = self.depth.load(Ordering::Relaxed);
        debug_assert!(d != 0, "critical section exited more than entered");
        if d == 0 {
            return;
        }
        self.depth.store(d - 1, Ordering::Relaxed);
        if d == 1 {
            self.irq.unmask();
        }
    }
}

#[must_use]
pub struct CsGuard<'c, 'a> {
    cs: &'c CriticalSection<'a>,
}

impl Drop for CsGuard<'_, '_> {
    fn drop(&mut self) {
        self.cs.exit();
    }
}

/// The pending-event mask, shared between interrupt handlers and the
/// foreground loop. Firmware keeps this in a `static`.
pub struct EventLatch<'a> {
    pending: AtomicU32,
    // Identifier + 1 of the last out-of-range event someone tried to raise.
    rejected: AtomicU32,
    cs: CriticalSection<'a>,
}

impl<'a> EventLatch<'a> {
    pub const fn new(irq: &'a dyn IrqControl) -> Self {
        Self {
            pending: AtomicU32::new(0),
            rejected: AtomicU32::new(0),
            cs: CriticalSection::new(irq),
        }
    }

    /// Marks event `id` pending. Safe to call from interrupt context.
    ///
    /// An identifier that doesn't name an event is a programming error: it
    /// is remembered and [`Event::FatalError`] is raised in its place.
    pub fn set_event(&self, id: u32) -> Result<(), SecError> {
        let ev = match Event::from_id(id) {
            Ok(ev) => ev,
            Err(e) => {
                self.rejected.store(id.saturating_add(1), Ordering::Relaxed);
                self.raise(Event::FatalError);
                return Err(e);
            }
        };
        self.raise(ev);
        Ok(())
    }

    pub fn raise(&self, ev: Event) {
        let _cs = self.cs.enter();
        let p = self.pending.load(Ordering::Relaxed);
        self.pending.store(p | ev.bit(), Ordering::Relaxed);
    }

    /// Clears event `id`. Fails with [`SecError::Already`] if it wasn't
    /// pending, and [`SecError::Range`] if there is no such event.
    pub fn clear_event(&self, id: u32) -> Result<(), SecError> {
        let ev = Event::from_id(id)?;
        let _cs = self.cs.enter();
        let p = self.pending.load(Ordering::Relaxed);
        if p & ev.bit() == 0 {
            return Err(SecError::Already);
        }
        self.pending.store(p & !ev.bit(), Ordering::Relaxed);
        Ok(())
    }

    pub fn pending(&self) -> u32 {
        self.pending.load(Ordering::Relaxed)
    }

    pub fn is_pending(&self, ev: Event) -> bool {
        self.pending() & ev.bit() != 0
    }

    /// Removes and returns the highest-priority pending event.
    pub fn take_next(&self, map: &PriorityMap) -> Option<Event> {
        let _cs = self.cs.enter();
        let p = self.pending.load(Ordering::Relaxed);
        let ev = map.first(p)?;
        self.pending.store(p & !ev.bit(), Ordering::Relaxed);
        Some(ev)
    }

    /// Drops every pending event not in `keep`.
    pub(crate) fn retain(&self, keep: u32) {
        let _cs = self.cs.enter();
        let p = self.pending.load(Ordering::Relaxed);
        self.pending.store(p & keep, Ordering::Relaxed);
    }

    /// Identifier of the out-of-range event that was last rejected, if any,
    /// forgetting it.
    pub(crate) fn take_rejected(&self) -> Option<u32> {
        let _cs = self.cs.enter();
        let r = self.rejected.load(Ordering::Relaxed);
        self.rejected.store(0, Ordering::Relaxed);
        r.checked_sub(1)
    }

    /// Sleeps until an interrupt arrives, unless something is already
    /// pending. Waking with nothing to do is fine; the caller just looks
    /// again.
    pub fn wait_if_idle(&self) {
        // Checking and sleeping under the mask closes the window where an
        // interrupt lands between the two; the core still wakes for it.
        let _cs = self.cs.enter();
        if self.pending.load(Ordering::Relaxed) == 0 {
            self.cs.irq.wait_for_interrupt();
        }
    }

    pub fn critical_section(&self) -> &CriticalSection<'a> {
        &self.cs
    }

    pub(crate) fn irq(&self) -> &'a dyn IrqControl {
        self.cs.irq
    }
}

/// A pair of mutually inverse tables ranking events. Slot 0 is served
/// first.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PriorityMap {
    event_to_priority: [u8; NUM_EVENTS],
    priority_to_event: [Event; NUM_EVENTS],
}

impl PriorityMap {
    /// Builds a map from a list of event identifiers, highest priority
    /// first. Every identifier must appear exactly once.
    pub fn from_order(order: &[u8; NUM_EVENTS]) -> Result<Self, SecError> {
        let mut event_to_priority = [0u8; NUM_EVENTS];
        let mut priority_to_event = [Event::FatalError; NUM_EVENTS];
        let mut seen = 0u32;
        for (prio, &id) in order.iter().enumerate() {
            let ev = Event::from_id(u32::from(id))
                .map_err(|_| SecError::InvalidArgument)?;
            if seen & ev.bit() != 0 {
                return Err(SecError::InvalidArgument);
            }
            seen |= ev.bit();
            event_to_priority[id as usize] = prio as u8;
            priority_to_event[prio] = ev;
        }
        Ok(Self {
            event_to_priority,
            priority_to_event,
        })
    }

    /// Builds a map from both tables, as a patch would supply them. The
    /// tables must be inverse permutations of each other.
    pub fn from_tables(
        event_to_priority: &[u8; NUM_EVENTS],
        priority_to_event: &[u8; NUM_EVENTS],
    ) -> Result<Self, SecError> {
        let map = Self::from_order(priority_to_event)?;
        if map.event_to_priority != *event_to_priority {
            return Err(SecError::InvalidArgument);
        }
        Ok(map)
    }

    /// Priority equals identifier.
    pub fn identity() -> Self {
        let mut event_to_priority = [0u8; NUM_EVENTS];
        let mut priority_to_event = [Event::FatalError; NUM_EVENTS];
        for id in 0..NUM_EVENTS {
            event_to_priority[id] = id as u8;
            if let Ok(ev) = Event::from_id(id as u32) {
                priority_to_event[id] = ev;
            }
        }
        Self {
            event_to_priority,
            priority_to_event,
        }
    }

    pub fn priority_of(&self, ev: Event) -> u8 {
        self.event_to_priority[ev as usize]
    }

    pub fn event_at(&self, priority: u8) -> Option<Event> {
        self.priority_to_event.get(priority as usize).copied()
    }

    /// Highest-priority event in `pending`, without a walk over the table:
    /// each set bit moves to its priority slot and the lowest slot wins.
    pub fn first(&self, pending: u32) -> Option<Event> {
        if pending == 0 {
            return None;
        }
        let mut ranked = 0u32;
        let mut rest = pending;
        while rest != 0 {
            let id = rest.trailing_zeros();
            rest &= rest - 1;
            ranked |= 1 << self.event_to_priority[id as usize];
        }
        self.event_at(ranked.trailing_zeros() as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeIrq;

    #[test]
    fn nested_sections_unmask_once() {
        let irq = FakeIrq::default();
        let cs = CriticalSection::new(&irq);
        {
            let _outer = cs.enter();
            {
                let _inner = cs.enter();
                assert_eq!(cs.depth(), 2);
            }
            assert_eq!(cs.depth(), 1);
            assert!(irq.is_masked());
        }
        assert_eq!(cs.depth(), 0);
        assert!(!irq.is_masked());
        assert_eq!(irq.unmask_count(), 1);
    }

    #[test]
    #[should_panic(expected = "exited more than entered")]
    fn unbalanced_exit_is_caught() {
        let irq = FakeIrq::default();
        let cs = CriticalSection::new(&irq);
        cs.exit();
    }

    #[test]
    fn clear_distinguishes_range_and_already() {
        let irq = FakeIrq::default();
        let latch = EventLatch::new(&irq);
        assert_eq!(latch.clear_event(40), Err(SecError::Range));
        assert_eq!(latch.clear_event(6), Err(SecError::Already));
        latch.raise(Event::Doorbell);
        assert_eq!(latch.clear_event(6), Ok(()));
        assert_eq!(latch.pending(), 0);
    }

    #[test]
    fn bad_event_becomes_fatal() {
        let irq = FakeIrq::default();
        let latch = EventLatch::new(&irq);
        assert_eq!(latch.set_event(32), Err(SecError::Range));
        assert!(latch.is_pending(Event::FatalError));
        assert_eq!(latch.take_rejected(), Some(32));
        assert_eq!(latch.take_rejected(), None);
    }

    #[test]
    fn fatal_beats_doorbell() {
        let irq = FakeIrq::default();
        let latch = EventLatch::new(&irq);
        let map = PriorityMap::identity();
        latch.raise(Event::Doorbell);
        latch.raise(Event::FatalError);
        assert_eq!(latch.take_next(&map), Some(Event::FatalError));
        assert_eq!(latch.take_next(&map), Some(Event::Doorbell));
        assert_eq!(latch.take_next(&map), None);
        assert!(!irq.is_masked());
    }

    #[test]
    fn reordered_map_changes_service_order() {
        let mut order = [0u8; NUM_EVENTS];
        for (i, o) in order.iter_mut().enumerate() {
            *o = (NUM_EVENTS - 1 - i) as u8;
        }
        let map = PriorityMap::from_order(&order).unwrap();
        assert_eq!(map.priority_of(Event::Reserved31), 0);
        assert_eq!(
            map.first(Event::FatalError.bit() | Event::Doorbell.bit()),
            Some(Event::Doorbell)
        );
    }

    #[test]
    fn map_rejects_duplicates_and_mismatched_tables() {
        let mut order = [0u8; NUM_EVENTS];
        for (i, o) in order.iter_mut().enumerate() {
            *o = i as u8;
        }
        order[5] = 4;
        assert_eq!(
            PriorityMap::from_order(&order),
            Err(SecError::InvalidArgument)
        );

        let mut fwd = [0u8; NUM_EVENTS];
        for (i, o) in fwd.iter_mut().enumerate() {
            *o = i as u8;
        }
        let mut inv = fwd;
        inv.swap(0, 1);
        assert_eq!(
            PriorityMap::from_tables(&fwd, &inv),
            Err(SecError::InvalidArgument)
        );
        fwd.swap(0, 1);
        assert!(PriorityMap::from_tables(&fwd, &inv).is_ok());
    }
}

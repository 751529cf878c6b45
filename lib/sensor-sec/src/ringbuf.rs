// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Trace ring owned by the security core.
//!
//! Every interesting thing the core does (events taken, phases entered,
//! commands dispatched, faults) lands here, tagged with the source line that
//! recorded it. A debugger can read it straight out of RAM; tests can walk it
//! with [`Ringbuf::iter`].
//!
//! Unlike a `static` ring this one lives inside the context that fills it, so
//! independent instances (for example one per test) never contend.
//!
//! An entry identical to the most recent one (same line and payload) bumps
//! that entry's `count` instead of taking a new slot, so a hot loop can't wipe
//! out the history that led up to it.

/// Records `payload` in the ring `buf`, tagged with the current line.
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        let p = $payload;
        $crate::ringbuf::Ringbuf::entry(&mut $buf, line!() as u16, p);
    }};
}
pub(crate) use ringbuf_entry;

#[derive(Debug, Copy, Clone)]
pub struct RingbufEntry<T: Copy + PartialEq> {
    pub line: u16,
    pub generation: u16,
    pub count: u32,
    pub payload: T,
}

#[derive(Debug)]
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    last: Option<usize>,
    buffer: [RingbufEntry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, N> {
    pub fn new(init: T) -> Self {
        Self {
            last: None,
            buffer: [RingbufEntry {
                line: 0,
                generation: 0,
                count: 0,
                payload: init,
            }; N],
        }
    }

    pub fn entry(&mut self, line: u16, payload: T) {
        // Treat "never written" as an out-of-range index so the first entry
        // lands in slot 0 and nothing gets merged into a blank slot.
        let last = self.last.unwrap_or(usize::MAX);

        if let Some(ent) = self.buffer.get_mut(last) {
            if ent.line == line && ent.payload == payload {
                if let Some(new_count) = ent.count.checked_add(1) {
                    ent.count = new_count;
                    return;
                }
            }
        }

        // No hardware divide on the smaller targets; wrap by comparison.
        let ndx = {
            let last_plus_1 = last.wrapping_add(1);
            if last_plus_1 >= self.buffer.len() {
                0
            } else {
                last_plus_1
            }
        };

        let ent = &mut self.buffer[ndx];
        *ent = RingbufEntry {
            line,
            payload,
            count: 1,
            generation: ent.generation.wrapping_add(1),
        };
        self.last = Some(ndx);
    }

    /// The most recently recorded entry, if any.
    pub fn last(&self) -> Option<&RingbufEntry<T>> {
        self.last.and_then(|i| self.buffer.get(i))
    }

    /// Walks recorded entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &RingbufEntry<T>> + '_ {
        let start = match self.last {
            None => N,
            Some(l) => l + 1,
        };
        let (newer, older) = self.buffer.split_at(start.min(N));
        older
            .iter()
            .chain(newer.iter())
            .filter(|e| e.count != 0)
    }

    /// True if any recorded entry satisfies `f`.
    pub fn contains(&self, f: impl Fn(&T) -> bool) -> bool {
        self.iter().any(|e| f(&e.payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_entry_lands_in_slot_zero() {
        let mut rb = Ringbuf::<u8, 4>::new(0);
        assert!(rb.last().is_none());
        rb.entry(10, 7);
        let last = rb.last().unwrap();
        assert_eq!((last.line, last.payload, last.count), (10, 7, 1));
        assert_eq!(rb.iter().count(), 1);
    }

    #[test]
    fn repeats_collapse() {
        let mut rb = Ringbuf::<u8, 4>::new(0);
        rb.entry(10, 7);
        rb.entry(10, 7);
        rb.entry(10, 7);
        assert_eq!(rb.iter().count(), 1);
        assert_eq!(rb.last().unwrap().count, 3);

        // Same payload from a different line is a different entry.
        rb.entry(11, 7);
        assert_eq!(rb.iter().count(), 2);
    }

    #[test]
    fn wraps_oldest_first() {
        let mut rb = Ringbuf::<u8, 4>::new(0);
        for p in 1..=6 {
            rb.entry(1, p);
        }
        let seen: Vec<u8> = rb.iter().map(|e| e.payload).collect();
        assert_eq!(seen, [3, 4, 5, 6]);
        // Slots 0 and 1 have been written twice.
        assert_eq!(rb.buffer[0].generation, 2);
        assert_eq!(rb.buffer[2].generation, 1);
    }
}

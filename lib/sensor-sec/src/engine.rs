// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Phase bookkeeping and event scheduling.
//!
//! The engine owns the current phase and the event ranking. The phase-entry
//! broadcast itself lives on [`crate::SensorSec`], since it has to reach
//! every component.

use drv_sensor_sec_api::{Event, Phase, SecError};

use crate::config::{DEFAULT_EVENT_ORDER, PHASE_HOOK_SLOTS};
use crate::events::{EventLatch, PriorityMap};

/// A phase-entry callback installed by a patch. Runs before any of the
/// built-in components hear about the new phase.
pub trait PhaseHook: Sync {
    fn on_phase_entry(&self, phase: Phase) -> Result<(), SecError>;
}

pub struct Engine<'a> {
    phase: Phase,
    latch: &'a EventLatch<'a>,
    priorities: PriorityMap,
    hooks: [Option<&'a dyn PhaseHook>; PHASE_HOOK_SLOTS],
    // A transition a command handler asked for, applied once the command
    // has been answered.
    requested: Option<Phase>,
    transitions: u32,
}

impl<'a> Engine<'a> {
    pub fn new(latch: &'a EventLatch<'a>) -> Self {
        Self {
            phase: Phase::Boot,
            latch,
            priorities: default_priorities(),
            hooks: [None; PHASE_HOOK_SLOTS],
            requested: None,
            transitions: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn latch(&self) -> &'a EventLatch<'a> {
        self.latch
    }

    /// Number of phase transitions since boot.
    pub fn transitions(&self) -> u32 {
        self.transitions
    }

    pub fn set_event(&self, id: u32) -> Result<(), SecError> {
        self.latch.set_event(id)
    }

    pub fn raise(&self, ev: Event) {
        self.latch.raise(ev)
    }

    pub fn clear_event(&self, id: u32) -> Result<(), SecError> {
        self.latch.clear_event(id)
    }

    pub fn next_event(&self) -> Option<Event> {
        self.latch.take_next(&self.priorities)
    }

    pub fn priority_map(&self) -> &PriorityMap {
        &self.priorities
    }

    pub fn set_priority_map(&mut self, map: PriorityMap) {
        self.priorities = map;
    }

    pub fn register_phase_hook(
        &mut self,
        hook: &'a dyn PhaseHook,
    ) -> Result<(), SecError> {
        let slot = self
            .hooks
            .iter_mut()
            .find(|h| h.is_none())
            .ok_or(SecError::NoSpace)?;
        *slot = Some(hook);
        Ok(())
    }

    pub(crate) fn hooks(
        &self,
    ) -> [Option<&'a dyn PhaseHook>; PHASE_HOOK_SLOTS] {
        self.hooks
    }

    /// Moves to `new`, which must lie strictly ahead of the current phase.
    /// Nobody is notified; that's the caller's job.
    pub(crate) fn set_phase(&mut self, new: Phase) -> Result<(), SecError> {
        if new <= self.phase || new > Phase::LAST {
            return Err(SecError::SystemError);
        }
        self.phase = new;
        Ok(())
    }

    pub(crate) fn request_phase(&mut self, phase: Phase) {
        self.requested = Some(phase);
    }

    pub(crate) fn take_phase_request(&mut self) -> Option<Phase> {
        self.requested.take()
    }

    /// The engine's own phase-entry callback.
    pub(crate) fn on_phase_entry(
        &mut self,
        phase: Phase,
    ) -> Result<(), SecError> {
        self.transitions = self.transitions.wrapping_add(1);
        if phase == Phase::Shutdown {
            // Nothing but a fatal error is worth serving from here on.
            self.requested = None;
            self.latch.retain(Event::FatalError.bit());
        }
        Ok(())
    }
}

fn default_priorities() -> PriorityMap {
    // The build script has already checked the order is a permutation.
    PriorityMap::from_order(&DEFAULT_EVENT_ORDER)
        .unwrap_or_else(|_| PriorityMap::identity())
}

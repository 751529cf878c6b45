// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The way out.
//!
//! Anything that finds the firmware unable to continue calls
//! [`SensorSec::fatal`], which records what happened and raises
//! [`Event::FatalError`]. Since that event outranks everything else by
//! default, the next trip around the loop lands in the terminal handler:
//! snapshot, Shutdown broadcast, fail the host's command, stop.

use drv_sensor_sec_api::{
    DiagnosticSnapshot, Event, FaultCode, Phase, SecError, RESPONSE_MASK,
};
use zerocopy::IntoBytes;

use crate::hw::{Checkpoint, CommandRegisters};
use crate::ringbuf::ringbuf_entry;
use crate::{SensorSec, Trace};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FaultReport {
    pub fault: FaultCode,
    pub context: u16,
    pub info: u32,
}

#[derive(Debug, Default)]
pub struct FatalState {
    report: Option<FaultReport>,
    terminated: bool,
}

impl FatalState {
    /// Keeps the first report; later ones are dropped. Returns whether
    /// `report` was the one kept.
    fn record(&mut self, report: FaultReport) -> bool {
        if self.report.is_some() {
            return false;
        }
        self.report = Some(report);
        true
    }

    pub fn report(&self) -> Option<FaultReport> {
        self.report
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }
}

impl<R: CommandRegisters> SensorSec<'_, R> {
    /// Reports an unrecoverable condition. Only the first report survives;
    /// every call raises [`Event::FatalError`].
    pub fn fatal(&mut self, fault: FaultCode, context: u16, info: u32) {
        let report = FaultReport {
            fault,
            context,
            info,
        };
        if self.fatal.record(report) {
            ringbuf_entry!(
                self.trace,
                Trace::Fatal {
                    fault,
                    context,
                    info
                }
            );
        } else {
            ringbuf_entry!(self.trace, Trace::FatalDropped(fault));
        }
        self.engine.raise(Event::FatalError);
    }

    /// What a post-mortem would want to know, as of right now.
    pub fn snapshot(&self) -> DiagnosticSnapshot {
        let report = self.fatal.report();
        DiagnosticSnapshot {
            phase: self.engine.phase() as u8,
            session_established: u8::from(self.session.is_established()),
            video_auth_active: u8::from(self.session.video().active),
            terminated: u8::from(self.fatal.is_terminated()),
            pending_events: self.engine.latch().pending(),
            fault: report.map_or(FaultCode::None, |r| r.fault) as u16,
            context: report.map_or(0, |r| r.context),
            info: report.map_or(0, |r| r.info),
        }
    }

    /// The terminal handler. Runs at most once; afterwards the loop only
    /// halts.
    pub(crate) fn terminate(&mut self) {
        if self.fatal.is_terminated() {
            return;
        }

        // A bad identifier handed to `set_event` raises FatalError without
        // a report of its own.
        if self.fatal.report().is_none() {
            if let Some(id) = self.engine.latch().take_rejected() {
                self.fatal.record(FaultReport {
                    fault: FaultCode::InvalidEvent,
                    context: id as u16,
                    info: id,
                });
            }
        }
        if let Some(r) = self.fatal.report() {
            self.platform
                .checkpoints
                .checkpoint(Checkpoint::Fatal, r.fault as u32);
        }

        // Shutdown wipes the session and the pending mask, so look first.
        let snapshot = self.snapshot();

        if self.engine.phase() != Phase::Shutdown {
            // Shutdown entry runs every callback regardless and can only
            // fail if we're already there.
            let _ = self.enter_phase(Phase::Shutdown);
        }

        if self.regs.is_command_in_progress() {
            let bytes = snapshot.as_bytes();
            let params = self.regs.params();
            let n = bytes.len().min(params.len());
            params[..n].copy_from_slice(&bytes[..n]);
            self.regs.set_response(
                u16::from(SecError::SystemError) & RESPONSE_MASK,
            );
            ringbuf_entry!(self.trace, Trace::Dumped(n as u16));
        }

        self.fatal.terminated = true;
        ringbuf_entry!(self.trace, Trace::Halt);
        self.platform
            .checkpoints
            .checkpoint(Checkpoint::Halt, u32::from(snapshot.fault));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(fault: FaultCode) -> FaultReport {
        FaultReport {
            fault,
            context: 1,
            info: 2,
        }
    }

    #[test]
    fn first_report_wins() {
        let mut st = FatalState::default();
        assert!(st.record(report(FaultCode::Driver)));
        assert!(!st.record(report(FaultCode::Command)));
        assert_eq!(st.report(), Some(report(FaultCode::Driver)));
        assert!(!st.is_terminated());
    }
}

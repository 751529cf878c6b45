// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Command routing.
//!
//! A command code is looked up first in a small overlay table that patches
//! append to, then in the firmware's built-in table. An overlay entry takes
//! its code over completely: if its phase mask rejects the current phase,
//! the command is refused even when a built-in entry would have accepted it.

use drv_sensor_sec_api::{BuiltinCommand, Phase, PhaseMask, SecError};
use static_assertions::const_assert;

use crate::handlers::CommandContext;

pub const OVERLAY_SLOTS: usize = 4;

/// A command implementation supplied by a patch.
pub trait CommandHandler: Sync {
    fn handle(
        &self,
        cx: &mut CommandContext<'_, '_>,
        code: u16,
        params: &mut [u8],
    ) -> Result<(), SecError>;
}

#[derive(Copy, Clone)]
pub enum Handler<'a> {
    Builtin(BuiltinCommand),
    Extension(&'a dyn CommandHandler),
}

#[derive(Copy, Clone)]
pub struct CommandEntry<'a> {
    pub code: u16,
    pub phases: PhaseMask,
    pub handler: Handler<'a>,
}

/// An entry as handed over by the patch loader. Code 0 and a missing
/// handler both count as null.
#[derive(Copy, Clone)]
pub struct OverlayEntry<'a> {
    pub code: u16,
    pub phases: PhaseMask,
    pub handler: Option<&'a dyn CommandHandler>,
}

const fn builtin(
    cmd: BuiltinCommand,
    phases: PhaseMask,
) -> CommandEntry<'static> {
    CommandEntry {
        code: cmd as u16,
        phases,
        handler: Handler::Builtin(cmd),
    }
}

pub static BUILTIN_COMMANDS: [CommandEntry<'static>; 7] = [
    builtin(BuiltinCommand::GetStatus, PhaseMask::OPERATIONAL),
    builtin(
        BuiltinCommand::Shutdown,
        PhaseMask::OPERATIONAL.union(PhaseMask::BOOT),
    ),
    builtin(BuiltinCommand::PatchBegin, PhaseMask::DEBUG),
    builtin(
        BuiltinCommand::PatchFinish,
        PhaseMask::DEBUG.union(PhaseMask::PATCH),
    ),
    builtin(BuiltinCommand::SetEphemeralSecret, PhaseMask::CONFIGURE),
    builtin(BuiltinCommand::SessionEstablish, PhaseMask::CONFIGURE),
    builtin(BuiltinCommand::ConfigVideoAuth, PhaseMask::SESSION),
];

const_assert!(OVERLAY_SLOTS <= 8);

pub struct Router<'a> {
    builtin: &'a [CommandEntry<'a>],
    overlay: [Option<CommandEntry<'a>>; OVERLAY_SLOTS],
}

impl<'a> Router<'a> {
    pub fn new(builtin: &'a [CommandEntry<'a>]) -> Self {
        Self {
            builtin,
            overlay: [None; OVERLAY_SLOTS],
        }
    }

    /// Appends `entry` to the overlay table. Entries are never removed
    /// except by re-entering the Initialize phase.
    pub fn add_command(
        &mut self,
        entry: OverlayEntry<'a>,
    ) -> Result<(), SecError> {
        if entry.code == 0 {
            return Err(SecError::InvalidArgument);
        }
        let Some(handler) = entry.handler else {
            return Err(SecError::InvalidArgument);
        };
        let slot = self
            .overlay
            .iter_mut()
            .find(|s| s.is_none())
            .ok_or(SecError::NoSpace)?;
        *slot = Some(CommandEntry {
            code: entry.code,
            phases: entry.phases,
            handler: Handler::Extension(handler),
        });
        Ok(())
    }

    /// Finds the handler for `code` in `phase`, or `None` if the command is
    /// unknown or not allowed right now.
    pub fn lookup(&self, code: u16, phase: Phase) -> Option<Handler<'a>> {
        let governing = self
            .overlay
            .iter()
            .flatten()
            .find(|e| e.code == code)
            .or_else(|| self.builtin.iter().find(|e| e.code == code))?;
        // Only the first entry carrying the code counts, whatever its
        // phase mask says.
        if governing.phases.allows(phase) {
            Some(governing.handler)
        } else {
            None
        }
    }

    pub fn overlay_len(&self) -> usize {
        self.overlay.iter().flatten().count()
    }

    /// Codes in the overlay table, in slot order.
    pub fn overlay_codes(&self) -> impl Iterator<Item = u16> + '_ {
        self.overlay.iter().flatten().map(|e| e.code)
    }

    pub(crate) fn on_phase_entry(
        &mut self,
        phase: Phase,
    ) -> Result<(), SecError> {
        if phase == Phase::Initialize {
            self.overlay = [None; OVERLAY_SLOTS];
        }
        Ok(())
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host stand-ins for the board, for tests and simulation.
//!
//! Each fake records what was asked of it and can be told to fail, so tests
//! can drive the error paths without hardware.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use drv_sensor_sec_api::{
    MacMode, Phase, RegionOfInterest, SecError, MASTER_SECRET_LEN,
};

use crate::hw::{
    Checkpoint, CheckpointSink, CommandRegisters, EntropySource, HealthMonitor,
    IrqControl, MacEngine, PatchManager, RngError, SecretStore,
};

#[derive(Default)]
pub struct FakeIrq {
    masked: AtomicBool,
    unmasks: AtomicU32,
    waits: AtomicU32,
}

impl FakeIrq {
    pub fn is_masked(&self) -> bool {
        self.masked.load(Ordering::Relaxed)
    }

    pub fn unmask_count(&self) -> u32 {
        self.unmasks.load(Ordering::Relaxed)
    }

    pub fn wait_count(&self) -> u32 {
        self.waits.load(Ordering::Relaxed)
    }
}

impl IrqControl for FakeIrq {
    fn mask(&self) {
        self.masked.store(true, Ordering::Relaxed);
    }

    fn unmask(&self) {
        self.masked.store(false, Ordering::Relaxed);
        self.unmasks.fetch_add(1, Ordering::Relaxed);
    }

    fn wait_for_interrupt(&self) {
        self.waits.fetch_add(1, Ordering::Relaxed);
    }

    fn halt(&self) -> ! {
        panic!("board halted");
    }
}

/// Command registers backed by plain memory. Writing a response completes
/// the command, as the hardware does.
pub struct FakeRegs {
    pub command: u16,
    pub params: Vec<u8>,
    pub in_progress: bool,
    pub responses: Vec<u16>,
    pub fail_init: bool,
}

impl FakeRegs {
    pub fn new(params_len: usize) -> Self {
        Self {
            command: 0,
            params: vec![0; params_len],
            in_progress: false,
            responses: Vec::new(),
            fail_init: false,
        }
    }

    /// Loads a command as the host would before ringing the doorbell.
    pub fn issue(&mut self, code: u16, params: &[u8]) {
        self.command = code;
        self.params.fill(0);
        self.params[..params.len()].copy_from_slice(params);
        self.in_progress = true;
    }
}

impl CommandRegisters for FakeRegs {
    fn init(&mut self) -> Result<(), SecError> {
        if self.fail_init {
            return Err(SecError::SystemError);
        }
        Ok(())
    }

    fn command(&self) -> u16 {
        self.command
    }

    fn params(&mut self) -> &mut [u8] {
        &mut self.params
    }

    fn set_response(&mut self, code: u16) {
        self.responses.push(code);
        self.in_progress = false;
    }

    fn is_command_in_progress(&self) -> bool {
        self.in_progress
    }
}

/// Counts upwards from `next`, byte by byte.
#[derive(Default)]
pub struct FakeEntropy {
    pub next: u8,
    pub fail: bool,
}

impl EntropySource for FakeEntropy {
    fn fill(&mut self, buf: &mut [u8]) -> Result<(), RngError> {
        if self.fail {
            return Err(RngError::PoweredOff);
        }
        for b in buf {
            *b = self.next;
            self.next = self.next.wrapping_add(1);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeSecrets {
    pub secret: Option<[u8; MASTER_SECRET_LEN]>,
}

impl SecretStore for FakeSecrets {
    fn master_secret(
        &mut self,
        out: &mut [u8; MASTER_SECRET_LEN],
    ) -> Result<(), SecError> {
        *out = self.secret.ok_or(SecError::AccessDenied)?;
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MacOp {
    Clock(bool),
    Key(MacMode, usize),
    Roi(RegionOfInterest),
    Start,
}

#[derive(Default)]
pub struct FakeMac {
    pub ops: Vec<MacOp>,
    pub clock: bool,
    pub fail_start: bool,
}

impl MacEngine for FakeMac {
    fn set_clock(&mut self, enabled: bool) -> Result<(), SecError> {
        self.ops.push(MacOp::Clock(enabled));
        self.clock = enabled;
        Ok(())
    }

    fn load_key(&mut self, mode: MacMode, key: &[u8]) -> Result<(), SecError> {
        self.ops.push(MacOp::Key(mode, key.len()));
        Ok(())
    }

    fn set_roi(&mut self, roi: &RegionOfInterest) -> Result<(), SecError> {
        self.ops.push(MacOp::Roi(*roi));
        Ok(())
    }

    fn start(&mut self) -> Result<(), SecError> {
        if self.fail_start {
            return Err(SecError::SystemError);
        }
        self.ops.push(MacOp::Start);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeHealth {
    pub seen: Vec<Phase>,
    pub fail_on: Option<Phase>,
    pub services: u32,
    pub fail_service: bool,
}

impl HealthMonitor for FakeHealth {
    fn on_phase_entry(&mut self, phase: Phase) -> Result<(), SecError> {
        self.seen.push(phase);
        if self.fail_on == Some(phase) {
            return Err(SecError::SystemError);
        }
        Ok(())
    }

    fn service_watchdog(&mut self) -> Result<(), SecError> {
        if self.fail_service {
            return Err(SecError::SystemError);
        }
        self.services += 1;
        Ok(())
    }
}

#[derive(Default)]
pub struct FakePatcher {
    pub seen: Vec<Phase>,
    pub begun: u32,
    pub finished: u32,
    pub fail_begin: bool,
}

impl PatchManager for FakePatcher {
    fn on_phase_entry(&mut self, phase: Phase) -> Result<(), SecError> {
        self.seen.push(phase);
        Ok(())
    }

    fn begin(&mut self) -> Result<(), SecError> {
        if self.fail_begin {
            return Err(SecError::NotExecutable);
        }
        self.begun += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SecError> {
        self.finished += 1;
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeCheckpoints {
    pub log: Vec<(Checkpoint, u32)>,
}

impl FakeCheckpoints {
    pub fn count(&self, cp: Checkpoint) -> usize {
        self.log.iter().filter(|(c, _)| *c == cp).count()
    }
}

impl CheckpointSink for FakeCheckpoints {
    fn checkpoint(&mut self, cp: Checkpoint, info: u32) {
        self.log.push((cp, info));
    }
}

/// Every fake collaborator besides the registers and the interrupt
/// controller, with a software AEAD.
#[cfg(feature = "soft-crypto")]
#[derive(Default)]
pub struct FakeBoard {
    pub entropy: FakeEntropy,
    pub aead: crate::soft::SoftAead,
    pub secrets: FakeSecrets,
    pub mac: FakeMac,
    pub health: FakeHealth,
    pub patcher: FakePatcher,
    pub checkpoints: FakeCheckpoints,
}

#[cfg(feature = "soft-crypto")]
impl FakeBoard {
    pub fn platform(&mut self) -> crate::hw::Platform<'_> {
        crate::hw::Platform {
            entropy: &mut self.entropy,
            aead: &mut self.aead,
            secrets: &mut self.secrets,
            mac: &mut self.mac,
            health: &mut self.health,
            patcher: &mut self.patcher,
            checkpoints: &mut self.checkpoints,
        }
    }
}

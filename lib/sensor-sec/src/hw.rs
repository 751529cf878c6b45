// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interfaces to everything the security core drives but does not implement:
//! registers, the crypto accelerator, storage, and the neighbouring firmware
//! components.

use drv_sensor_sec_api::{
    CipherMode, MacMode, Phase, RegionOfInterest, SecError, MASTER_SECRET_LEN,
    NONCE_LEN, TAG_LEN,
};

/// Interrupt delivery on the one core we run on.
///
/// Shared between interrupt handlers and the foreground loop, hence `Sync`.
pub trait IrqControl: Sync {
    /// Stops interrupt delivery. Interrupts that arrive meanwhile stay
    /// pending.
    fn mask(&self);
    /// Resumes interrupt delivery.
    fn unmask(&self);
    /// Sleeps until an interrupt is pending. Must wake even when interrupts
    /// are masked, so that it can be called from inside a critical section.
    fn wait_for_interrupt(&self);
    /// Stops the core for good.
    fn halt(&self) -> !;
}

/// The doorbell / shared-memory register pair through which the host
/// issues commands.
pub trait CommandRegisters {
    fn init(&mut self) -> Result<(), SecError>;
    /// Command code of the command in progress.
    fn command(&self) -> u16;
    /// Shared parameter region of the command in progress.
    fn params(&mut self) -> &mut [u8];
    /// Completes the command in progress. Only bits 0..=14 are meaningful;
    /// bit 15 belongs to the hardware.
    fn set_response(&mut self, code: u16);
    fn is_command_in_progress(&self) -> bool;
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RngError {
    BadArg,
    PoweredOff,
}

impl From<RngError> for SecError {
    fn from(e: RngError) -> Self {
        match e {
            RngError::BadArg => SecError::InvalidArgument,
            // The generator exists but can't serve us right now.
            RngError::PoweredOff => SecError::NotExecutable,
        }
    }
}

pub trait EntropySource {
    fn fill(&mut self, buf: &mut [u8]) -> Result<(), RngError>;
}

/// Authenticated decryption on the crypto accelerator.
pub trait AeadEngine {
    /// Decrypts `buf` in place and checks `tag` over it and `aad`. On a tag
    /// mismatch returns [`SecError::BadMessage`]; the contents of `buf` are
    /// then unspecified.
    fn open(
        &mut self,
        mode: CipherMode,
        key: &[u8],
        nonce: &[u8; NONCE_LEN],
        aad: &[u8],
        buf: &mut [u8],
        tag: &[u8; TAG_LEN],
    ) -> Result<(), SecError>;
}

/// Persisted (provisioned) key material.
pub trait SecretStore {
    /// Copies out the provisioned master secret, or fails with
    /// [`SecError::AccessDenied`] if there isn't one.
    fn master_secret(
        &mut self,
        out: &mut [u8; MASTER_SECRET_LEN],
    ) -> Result<(), SecError>;
}

/// The MAC engine that authenticates video frames.
pub trait MacEngine {
    /// Gates the engine's clock. Everything else requires it on.
    fn set_clock(&mut self, enabled: bool) -> Result<(), SecError>;
    fn load_key(&mut self, mode: MacMode, key: &[u8]) -> Result<(), SecError>;
    fn set_roi(&mut self, roi: &RegionOfInterest) -> Result<(), SecError>;
    fn start(&mut self) -> Result<(), SecError>;
}

/// Watchdog servicing and stack watermark checks.
pub trait HealthMonitor {
    fn on_phase_entry(&mut self, phase: Phase) -> Result<(), SecError>;
    fn service_watchdog(&mut self) -> Result<(), SecError>;
}

/// The patch loading pipeline.
pub trait PatchManager {
    fn on_phase_entry(&mut self, phase: Phase) -> Result<(), SecError>;
    fn begin(&mut self) -> Result<(), SecError>;
    fn finish(&mut self) -> Result<(), SecError>;
}

/// Black-box progress markers written to the checkpoint/info register pair.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u16)]
pub enum Checkpoint {
    Start = 0x100,
    PhaseEntry = 0x101,
    Dispatch = 0x102,
    SessionEstablished = 0x103,
    VideoAuthConfigured = 0x104,
    Fatal = 0x1f0,
    Halt = 0x1ff,
}

pub trait CheckpointSink {
    fn checkpoint(&mut self, cp: Checkpoint, info: u32);
}

/// Everything on the board besides the command registers and the interrupt
/// controller.
pub struct Platform<'a> {
    pub entropy: &'a mut dyn EntropySource,
    pub aead: &'a mut dyn AeadEngine,
    pub secrets: &'a mut dyn SecretStore,
    pub mac: &'a mut dyn MacEngine,
    pub health: &'a mut dyn HealthMonitor,
    pub patcher: &'a mut dyn PatchManager,
    pub checkpoints: &'a mut dyn CheckpointSink,
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared definitions for the image sensor security subsystem.
//!
//! Everything in here is visible to the host controller one way or another:
//! phase and event numbering, command codes, response codes, and the layout
//! of the parameter blocks that travel through the shared-memory region.

#![cfg_attr(target_os = "none", no_std)]

mod error;

pub use crate::error::{
    decode_response, response_code, FaultCode, SecError, SUCCESS,
};

use bitflags::bitflags;
use hubpack::SerializedSize;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Bit 15 of the response register is owned by the hardware and cleared by
/// the host; the firmware never writes it.
pub const DOORBELL: u16 = 1 << 15;

/// Mask applied to every value written to the response register.
pub const RESPONSE_MASK: u16 = !DOORBELL;

/// Operating phase. Phases only move forward, except that any phase may
/// go to `Shutdown`.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    PartialOrd,
    Ord,
    FromPrimitive,
    Serialize,
    Deserialize,
    SerializedSize,
)]
#[repr(u8)]
pub enum Phase {
    Boot = 0,
    Initialize = 1,
    Debug = 2,
    Patch = 3,
    Configure = 4,
    Session = 5,
    Shutdown = 6,
}

impl Phase {
    /// The terminal phase; nothing may be numbered above it.
    pub const LAST: Phase = Phase::Shutdown;

    pub fn from_raw(raw: u8) -> Result<Self, SecError> {
        Self::from_u8(raw).ok_or(SecError::Range)
    }

    /// The applicability bit for this phase in a command table entry.
    pub fn mask(self) -> PhaseMask {
        PhaseMask::from_bits_truncate(1 << self as u8)
    }
}

bitflags! {
    /// Set of phases in which a command may run.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct PhaseMask: u8 {
        const BOOT = 1 << 0;
        const INITIALIZE = 1 << 1;
        const DEBUG = 1 << 2;
        const PATCH = 1 << 3;
        const CONFIGURE = 1 << 4;
        const SESSION = 1 << 5;
        const SHUTDOWN = 1 << 6;

        /// Everywhere the host is allowed to talk to us.
        const OPERATIONAL = Self::INITIALIZE.bits()
            | Self::DEBUG.bits()
            | Self::PATCH.bits()
            | Self::CONFIGURE.bits()
            | Self::SESSION.bits();
    }
}

impl PhaseMask {
    pub fn allows(self, phase: Phase) -> bool {
        self.contains(phase.mask())
    }
}

/// Number of distinct events; one bit each in the pending mask.
pub const NUM_EVENTS: usize = 32;

/// Events that can become pending. The discriminant is the bit position in
/// the pending mask and, under the default priority table, also the
/// priority slot (0 is served first).
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    FromPrimitive,
    Serialize,
    Deserialize,
    SerializedSize,
)]
#[repr(u8)]
pub enum Event {
    FatalError = 0,
    ShutdownPending = 1,
    WatchdogTick = 2,
    DebugStart = 3,
    PatchLoadComplete = 4,
    SessionStart = 5,
    Doorbell = 6,
    CryptoDone = 7,
    OtpDone = 8,
    FlashDone = 9,
    MacEngineDone = 10,
    TimerExpired = 11,
    Reserved12 = 12,
    Reserved13 = 13,
    Reserved14 = 14,
    Reserved15 = 15,
    Reserved16 = 16,
    Reserved17 = 17,
    Reserved18 = 18,
    Reserved19 = 19,
    Reserved20 = 20,
    Reserved21 = 21,
    Reserved22 = 22,
    Reserved23 = 23,
    Reserved24 = 24,
    Reserved25 = 25,
    Reserved26 = 26,
    Reserved27 = 27,
    Reserved28 = 28,
    Reserved29 = 29,
    Reserved30 = 30,
    Reserved31 = 31,
}

impl Event {
    /// Looks up an event by its raw identifier, as an interrupt handler or
    /// patch would supply it.
    pub fn from_id(id: u32) -> Result<Self, SecError> {
        Self::from_u32(id).ok_or(SecError::Range)
    }

    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn bit(self) -> u32 {
        1 << self as u32
    }
}

/// Commands provided by the firmware itself. A patch can add more through
/// the overlay table, or shadow any of these.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u16)]
pub enum BuiltinCommand {
    GetStatus = 0x0001,
    Shutdown = 0x0002,
    PatchBegin = 0x0010,
    PatchFinish = 0x0011,
    SetEphemeralSecret = 0x0020,
    SessionEstablish = 0x0021,
    ConfigVideoAuth = 0x0030,
}

impl BuiltinCommand {
    pub fn code(self) -> u16 {
        self as u16
    }
}

/// Block cipher key sizes that can be negotiated for either channel.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u8)]
pub enum KeyType {
    Aes128 = 1,
    Aes256 = 2,
}

impl KeyType {
    pub fn key_len(self) -> usize {
        match self {
            KeyType::Aes128 => 16,
            KeyType::Aes256 => 32,
        }
    }
}

/// Control-channel authenticated encryption mode.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u8)]
pub enum CipherMode {
    AesGcm = 1,
}

/// Video authentication MAC mode.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u8)]
pub enum MacMode {
    /// Integrity only; once running it cannot be reconfigured.
    Gmac = 1,
    /// Region-of-interest may be updated while running.
    Cmac = 2,
}

/// Where the master secret for key derivation comes from.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u8)]
pub enum SecretSource {
    /// Set by a prior `SetEphemeralSecret` command.
    Ephemeral = 0,
    /// Provisioned into persisted storage.
    Persisted = 1,
}

pub const MASTER_SECRET_LEN: usize = 32;
pub const SALT_LEN: usize = 16;
pub const MAX_KEY_LEN: usize = 32;
pub const IV_FIXED_LEN: usize = 4;
pub const NONCE_LEN: usize = 12;
pub const COUNTER_LEN: usize = 8;
pub const TAG_LEN: usize = 16;

/// Size of the header in front of every encrypted parameter block: a
/// big-endian message counter followed by the AEAD tag.
pub const ENCRYPTED_HEADER_LEN: usize = COUNTER_LEN + TAG_LEN;

const_assert_eq!(IV_FIXED_LEN + COUNTER_LEN, NONCE_LEN);

/// Parameters of `SetEphemeralSecret`.
#[derive(Copy, Clone, Debug, Serialize, Deserialize, SerializedSize)]
pub struct EphemeralSecret {
    pub secret: [u8; MASTER_SECRET_LEN],
}

/// Parameters of `SessionEstablish`. The selections are raw so that an
/// unknown value is reported as a bad argument rather than a decode error.
#[derive(Copy, Clone, Debug, Serialize, Deserialize, SerializedSize)]
pub struct SessionRequest {
    pub control_mode: u8,
    pub control_key: u8,
    pub video_mode: u8,
    pub video_key: u8,
    pub secret_source: u8,
    pub host_salt: [u8; SALT_LEN],
}

/// Reply written into the parameter region by a successful
/// `SessionEstablish`.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, SerializedSize,
)]
pub struct SessionResponse {
    pub sensor_salt: [u8; SALT_LEN],
}

/// Plaintext parameters of `ConfigVideoAuth`, after decryption.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, SerializedSize,
)]
pub struct RegionOfInterest {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

impl RegionOfInterest {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Reply to `GetStatus`.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, SerializedSize,
)]
pub struct StatusBlock {
    pub phase: Phase,
    pub session_established: bool,
    pub video_auth_active: bool,
    pub pending_events: u32,
}

/// Post-mortem state copied into the parameter region when the firmware
/// dies with a host command in flight.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    Eq,
    PartialEq,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
)]
#[repr(C)]
pub struct DiagnosticSnapshot {
    pub phase: u8,
    pub session_established: u8,
    pub video_auth_active: u8,
    pub terminated: u8,
    pub pending_events: u32,
    pub fault: u16,
    pub context: u16,
    pub info: u32,
}

const_assert_eq!(core::mem::size_of::<DiagnosticSnapshot>(), 16);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_masks_line_up() {
        for raw in 0..=Phase::LAST as u8 {
            let phase = Phase::from_raw(raw).unwrap();
            assert_eq!(phase.mask().bits(), 1 << raw);
            assert!(!PhaseMask::empty().allows(phase));
            assert!(PhaseMask::all().allows(phase));
        }
        assert_eq!(Phase::from_raw(7), Err(SecError::Range));
        assert!(!PhaseMask::OPERATIONAL.allows(Phase::Boot));
        assert!(!PhaseMask::OPERATIONAL.allows(Phase::Shutdown));
    }

    #[test]
    fn every_event_id_is_named() {
        for id in 0..NUM_EVENTS as u32 {
            assert_eq!(Event::from_id(id).unwrap().id(), id);
        }
        assert_eq!(Event::from_id(32), Err(SecError::Range));
        assert_eq!(Event::Doorbell.bit(), 1 << 6);
    }

    #[test]
    fn session_request_fits_in_a_small_block() {
        assert_eq!(SessionRequest::MAX_SIZE, 5 + SALT_LEN);
    }
}

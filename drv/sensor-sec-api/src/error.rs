// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Errors and response codes for the sensor security subsystem

use hubpack::SerializedSize;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

/// Response code reported for a command that completed successfully.
pub const SUCCESS: u16 = 0;

/// Every failure the security subsystem can report, to its own callers or
/// to the host through the response register.
///
/// The discriminants are the host-visible response codes and must stay
/// below the doorbell bit.
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
#[repr(u16)]
pub enum SecError {
    /// A pointer, length or value supplied by the caller is unusable.
    InvalidArgument = 1,
    /// A value or identifier is outside its domain.
    Range = 2,
    /// The current phase or session state forbids the operation.
    AccessDenied = 3,
    /// A one-shot operation has already been performed.
    Already = 4,
    /// A fixed-capacity table is full.
    NoSpace = 5,
    /// Authentication or integrity verification failed.
    BadMessage = 6,
    /// An internal invariant was violated. Always fatal.
    SystemError = 7,
    /// Valid in general, but not in the current hardware configuration.
    NotExecutable = 8,
}

impl From<SecError> for u16 {
    fn from(e: SecError) -> Self {
        e as u16
    }
}

impl SecError {
    /// Errors which, when returned from a foreground handler, mean the
    /// firmware can no longer make progress safely.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SecError::SystemError)
    }
}

/// Converts a handler result into the value written to the response
/// register.
pub fn response_code(r: Result<(), SecError>) -> u16 {
    match r {
        Ok(()) => SUCCESS,
        Err(e) => e.into(),
    }
}

/// Host-side inverse of [`response_code`]. Returns `None` for codes the
/// firmware never produces.
pub fn decode_response(code: u16) -> Option<Result<(), SecError>> {
    if code == SUCCESS {
        Some(Ok(()))
    } else {
        SecError::from_u16(code).map(Err)
    }
}

/// What went wrong, as recorded by the fatal-error path.
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
#[repr(u16)]
pub enum FaultCode {
    None = 0,
    /// A phase-entry callback or phase transition failed.
    PhaseEntry = 1,
    /// An event with no registered handler became pending.
    UnexpectedEvent = 2,
    /// Someone tried to raise an event that does not exist.
    InvalidEvent = 3,
    /// A driver or collaborator reported a hardware failure.
    Driver = 4,
    /// A command handler reported a system error.
    Command = 5,
    /// Startup did not complete.
    Startup = 6,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_codes_leave_doorbell_clear() {
        for code in 1..=8u16 {
            let e = SecError::from_u16(code).unwrap();
            assert_eq!(u16::from(e) & crate::DOORBELL, 0);
            assert_eq!(decode_response(code), Some(Err(e)));
        }
        assert_eq!(decode_response(SUCCESS), Some(Ok(())));
        assert_eq!(decode_response(0x7000), None);
    }

    #[test]
    fn only_system_error_is_fatal() {
        assert!(SecError::SystemError.is_fatal());
        assert!(!SecError::BadMessage.is_fatal());
        assert!(!SecError::AccessDenied.is_fatal());
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Session key derivation.
//!
//! Both ends run this: the sensor when it establishes the session, the host
//! once it has the sensor's salt. HKDF-SHA256 with the master secret as
//! input keying material and `host salt || sensor salt` as the extract salt;
//! each key is an expansion under its own label.

use drv_sensor_sec_api::{
    KeyType, SecError, IV_FIXED_LEN, MASTER_SECRET_LEN, MAX_KEY_LEN, SALT_LEN,
};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

const CONTROL_LABEL: &[u8] = b"control";
const VIDEO_LABEL: &[u8] = b"video";
const IV_LABEL: &[u8] = b"iv";

#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    control: [u8; MAX_KEY_LEN],
    control_len: usize,
    video: [u8; MAX_KEY_LEN],
    video_len: usize,
    iv_fixed: [u8; IV_FIXED_LEN],
}

impl SessionKeys {
    pub(crate) fn empty() -> Self {
        Self {
            control: [0; MAX_KEY_LEN],
            control_len: 0,
            video: [0; MAX_KEY_LEN],
            video_len: 0,
            iv_fixed: [0; IV_FIXED_LEN],
        }
    }

    pub fn control_key(&self) -> &[u8] {
        &self.control[..self.control_len]
    }

    pub fn video_key(&self) -> &[u8] {
        &self.video[..self.video_len]
    }

    /// Leading, per-session part of every control-channel nonce.
    pub fn iv_fixed(&self) -> &[u8; IV_FIXED_LEN] {
        &self.iv_fixed
    }
}

impl PartialEq for SessionKeys {
    fn eq(&self, other: &Self) -> bool {
        self.control_key() == other.control_key()
            && self.video_key() == other.video_key()
            && self.iv_fixed == other.iv_fixed
    }
}

pub fn derive_session_keys(
    secret: &[u8; MASTER_SECRET_LEN],
    host_salt: &[u8; SALT_LEN],
    sensor_salt: &[u8; SALT_LEN],
    control: KeyType,
    video: KeyType,
) -> Result<SessionKeys, SecError> {
    let mut salt = [0u8; 2 * SALT_LEN];
    salt[..SALT_LEN].copy_from_slice(host_salt);
    salt[SALT_LEN..].copy_from_slice(sensor_salt);

    let hk = Hkdf::<Sha256>::new(Some(&salt), secret);
    let mut keys = SessionKeys::empty();
    keys.control_len = control.key_len();
    keys.video_len = video.key_len();

    // Expansion only fails for absurd output lengths.
    hk.expand(CONTROL_LABEL, &mut keys.control[..keys.control_len])
        .map_err(|_| SecError::SystemError)?;
    hk.expand(VIDEO_LABEL, &mut keys.video[..keys.video_len])
        .map_err(|_| SecError::SystemError)?;
    hk.expand(IV_LABEL, &mut keys.iv_fixed)
        .map_err(|_| SecError::SystemError)?;

    Ok(keys)
}

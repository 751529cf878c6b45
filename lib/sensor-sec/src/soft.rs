// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! AES-GCM in software.
//!
//! Stands in for the crypto accelerator on the host, and gives host-side
//! tooling the matching sealing operation.

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use drv_sensor_sec_api::{
    CipherMode, SecError, COUNTER_LEN, ENCRYPTED_HEADER_LEN, IV_FIXED_LEN,
    NONCE_LEN, TAG_LEN,
};

use crate::hw::AeadEngine;
use crate::kdf::SessionKeys;

#[derive(Copy, Clone, Debug, Default)]
pub struct SoftAead;

impl AeadEngine for SoftAead {
    fn open(
        &mut self,
        mode: CipherMode,
        key: &[u8],
        nonce: &[u8; NONCE_LEN],
        aad: &[u8],
        buf: &mut [u8],
        tag: &[u8; TAG_LEN],
    ) -> Result<(), SecError> {
        let CipherMode::AesGcm = mode;
        let r = match key.len() {
            16 => Aes128Gcm::new_from_slice(key)
                .map_err(|_| SecError::InvalidArgument)?
                .decrypt_in_place_detached(nonce.into(), aad, buf, tag.into()),
            32 => Aes256Gcm::new_from_slice(key)
                .map_err(|_| SecError::InvalidArgument)?
                .decrypt_in_place_detached(nonce.into(), aad, buf, tag.into()),
            _ => return Err(SecError::InvalidArgument),
        };
        r.map_err(|_| SecError::BadMessage)
    }
}

/// Encrypts `buf` in place under `key` and returns the tag.
pub fn seal(
    key: &[u8],
    nonce: &[u8; NONCE_LEN],
    aad: &[u8],
    buf: &mut [u8],
) -> Result<[u8; TAG_LEN], SecError> {
    let r = match key.len() {
        16 => Aes128Gcm::new_from_slice(key)
            .map_err(|_| SecError::InvalidArgument)?
            .encrypt_in_place_detached(nonce.into(), aad, buf),
        32 => Aes256Gcm::new_from_slice(key)
            .map_err(|_| SecError::InvalidArgument)?
            .encrypt_in_place_detached(nonce.into(), aad, buf),
        _ => return Err(SecError::InvalidArgument),
    };
    let tag = r.map_err(|_| SecError::SystemError)?;
    let mut out = [0u8; TAG_LEN];
    out.copy_from_slice(&tag);
    Ok(out)
}

/// Builds the encrypted parameter block for command `code` the way the host
/// does, writing it to the front of `out`. Returns the block's length.
pub fn encrypt_command_params(
    keys: &SessionKeys,
    code: u16,
    counter: u64,
    plain: &[u8],
    out: &mut [u8],
) -> Result<usize, SecError> {
    let len = ENCRYPTED_HEADER_LEN + plain.len();
    let block = out.get_mut(..len).ok_or(SecError::InvalidArgument)?;
    let (header, body) = block.split_at_mut(ENCRYPTED_HEADER_LEN);

    let mut nonce = [0u8; NONCE_LEN];
    nonce[..IV_FIXED_LEN].copy_from_slice(keys.iv_fixed());
    nonce[IV_FIXED_LEN..].copy_from_slice(&counter.to_be_bytes());

    body.copy_from_slice(plain);
    let tag = seal(keys.control_key(), &nonce, &code.to_le_bytes(), body)?;
    header[..COUNTER_LEN].copy_from_slice(&counter.to_be_bytes());
    header[COUNTER_LEN..].copy_from_slice(&tag);
    Ok(len)
}

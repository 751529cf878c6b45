// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Session establishment and the authenticated-parameter gate.
//!
//! A session is established at most once per boot. After that, any command
//! that wants confidential parameters sends them encrypted under the
//! control-channel key and recovers them with
//! [`Session::decrypt_command_params`]; nothing else in the firmware
//! decrypts.
//!
//! Encrypted parameter blocks look like
//!
//! ```text
//! +-------------+----------+-----------------+
//! | counter: 8  | tag: 16  | ciphertext: n   |
//! +-------------+----------+-----------------+
//! ```
//!
//! The counter is big-endian and must increase from one block to the next;
//! the nonce is the session's fixed IV field followed by the counter, and the
//! command code (little-endian) is the associated data.

use drv_sensor_sec_api::{
    CipherMode, KeyType, MacMode, Phase, RegionOfInterest, SecError,
    SecretSource, SessionRequest, SessionResponse, COUNTER_LEN,
    ENCRYPTED_HEADER_LEN, IV_FIXED_LEN, MASTER_SECRET_LEN, NONCE_LEN,
    SALT_LEN, TAG_LEN,
};
use num_traits::FromPrimitive;
use zeroize::{Zeroize, Zeroizing};

use crate::hw::{AeadEngine, EntropySource, MacEngine, SecretStore};
use crate::kdf::{derive_session_keys, SessionKeys};

/// Algorithms agreed on when the session was established.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Negotiated {
    pub control_mode: CipherMode,
    pub control_key: KeyType,
    pub video_mode: MacMode,
    pub video_key: KeyType,
}

impl Negotiated {
    fn from_request(req: &SessionRequest) -> Result<Self, SecError> {
        Ok(Self {
            control_mode: CipherMode::from_u8(req.control_mode)
                .ok_or(SecError::InvalidArgument)?,
            control_key: KeyType::from_u8(req.control_key)
                .ok_or(SecError::InvalidArgument)?,
            video_mode: MacMode::from_u8(req.video_mode)
                .ok_or(SecError::InvalidArgument)?,
            video_key: KeyType::from_u8(req.video_key)
                .ok_or(SecError::InvalidArgument)?,
        })
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct VideoAuthState {
    pub active: bool,
    pub roi: Option<RegionOfInterest>,
}

pub struct Session {
    negotiated: Option<Negotiated>,
    keys: SessionKeys,
    ephemeral: Option<Zeroizing<[u8; MASTER_SECRET_LEN]>>,
    last_counter: Option<u64>,
    video: VideoAuthState,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            negotiated: None,
            keys: SessionKeys::empty(),
            ephemeral: None,
            last_counter: None,
            video: VideoAuthState::default(),
        }
    }

    pub fn is_established(&self) -> bool {
        self.negotiated.is_some()
    }

    pub fn negotiated(&self) -> Option<Negotiated> {
        self.negotiated
    }

    pub fn video(&self) -> VideoAuthState {
        self.video
    }

    /// Forgets everything, wiping key material.
    fn destroy(&mut self) {
        self.keys.zeroize();
        self.ephemeral = None;
        self.negotiated = None;
        self.last_counter = None;
        self.video = VideoAuthState::default();
    }

    pub(crate) fn on_phase_entry(
        &mut self,
        phase: Phase,
    ) -> Result<(), SecError> {
        match phase {
            Phase::Initialize | Phase::Shutdown => self.destroy(),
            _ => (),
        }
        Ok(())
    }

    /// Stashes a master secret for the next establishment to consume.
    pub fn set_ephemeral_secret(
        &mut self,
        phase: Phase,
        secret: &[u8],
    ) -> Result<(), SecError> {
        if phase != Phase::Configure {
            return Err(SecError::AccessDenied);
        }
        if self.is_established() {
            return Err(SecError::Already);
        }
        if secret.len() != MASTER_SECRET_LEN {
            return Err(SecError::InvalidArgument);
        }
        let mut stash = Zeroizing::new([0u8; MASTER_SECRET_LEN]);
        stash.copy_from_slice(secret);
        self.ephemeral = Some(stash);
        Ok(())
    }

    /// Derives session keys from the selected master secret and fresh salts.
    /// On any failure the session stays unestablished.
    pub fn establish(
        &mut self,
        phase: Phase,
        req: &SessionRequest,
        entropy: &mut dyn EntropySource,
        secrets: &mut dyn SecretStore,
    ) -> Result<SessionResponse, SecError> {
        if self.is_established() {
            return Err(SecError::Already);
        }
        if phase != Phase::Configure {
            return Err(SecError::AccessDenied);
        }
        let negotiated = Negotiated::from_request(req)?;
        let source = SecretSource::from_u8(req.secret_source)
            .ok_or(SecError::InvalidArgument)?;

        let mut secret = Zeroizing::new([0u8; MASTER_SECRET_LEN]);
        match source {
            SecretSource::Ephemeral => {
                let stash =
                    self.ephemeral.as_ref().ok_or(SecError::AccessDenied)?;
                secret.copy_from_slice(&stash[..]);
            }
            SecretSource::Persisted => secrets.master_secret(&mut secret)?,
        }

        let mut sensor_salt = [0u8; SALT_LEN];
        entropy.fill(&mut sensor_salt)?;

        let keys = derive_session_keys(
            &secret,
            &req.host_salt,
            &sensor_salt,
            negotiated.control_key,
            negotiated.video_key,
        )?;

        self.keys = keys;
        self.negotiated = Some(negotiated);
        self.last_counter = None;
        if source == SecretSource::Ephemeral {
            self.ephemeral = None;
        }
        Ok(SessionResponse { sensor_salt })
    }

    /// Authenticates and decrypts the `size`-byte parameter block of command
    /// `code` from `encrypted_in` into `decrypted_out`.
    ///
    /// On [`SecError::BadMessage`] the output has been wiped and the session
    /// is left as it was; one corrupted transfer doesn't end the session.
    pub fn decrypt_command_params(
        &mut self,
        phase: Phase,
        aead: &mut dyn AeadEngine,
        code: u16,
        encrypted_in: &[u8],
        decrypted_out: &mut [u8],
        size: usize,
    ) -> Result<(), SecError> {
        if phase != Phase::Session {
            return Err(SecError::AccessDenied);
        }
        let negotiated = self.negotiated.ok_or(SecError::AccessDenied)?;

        let total = ENCRYPTED_HEADER_LEN
            .checked_add(size)
            .ok_or(SecError::InvalidArgument)?;
        let (header, rest) = encrypted_in
            .get(..total)
            .ok_or(SecError::InvalidArgument)?
            .split_at(ENCRYPTED_HEADER_LEN);
        let out = decrypted_out
            .get_mut(..size)
            .ok_or(SecError::InvalidArgument)?;

        let mut counter_bytes = [0u8; COUNTER_LEN];
        counter_bytes.copy_from_slice(&header[..COUNTER_LEN]);
        let counter = u64::from_be_bytes(counter_bytes);
        if matches!(self.last_counter, Some(last) if counter <= last) {
            return Err(SecError::BadMessage);
        }
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&header[COUNTER_LEN..]);

        let mut nonce = [0u8; NONCE_LEN];
        nonce[..IV_FIXED_LEN].copy_from_slice(self.keys.iv_fixed());
        nonce[IV_FIXED_LEN..].copy_from_slice(&counter_bytes);

        out.copy_from_slice(rest);
        let r = aead.open(
            negotiated.control_mode,
            self.keys.control_key(),
            &nonce,
            &code.to_le_bytes(),
            out,
            &tag,
        );
        match r {
            Ok(()) => {
                self.last_counter = Some(counter);
                Ok(())
            }
            Err(e) => {
                out.zeroize();
                Err(e)
            }
        }
    }

    /// Starts video authentication with region of interest `roi`, or moves
    /// the region if it is already running in CMAC mode.
    ///
    /// GMAC authentication can't be touched once it's running. If bringing
    /// the engine up fails partway, its clock is gated off again before the
    /// error is returned.
    pub fn config_video_auth(
        &mut self,
        phase: Phase,
        mac: &mut dyn MacEngine,
        roi: &RegionOfInterest,
    ) -> Result<(), SecError> {
        if phase != Phase::Session {
            return Err(SecError::AccessDenied);
        }
        let negotiated = self.negotiated.ok_or(SecError::AccessDenied)?;
        if roi.is_empty() {
            return Err(SecError::InvalidArgument);
        }

        if self.video.active {
            return match negotiated.video_mode {
                MacMode::Gmac => Err(SecError::NotExecutable),
                MacMode::Cmac => {
                    mac.set_roi(roi)?;
                    self.video.roi = Some(*roi);
                    Ok(())
                }
            };
        }

        mac.set_clock(true)?;
        let r = mac
            .load_key(negotiated.video_mode, self.keys.video_key())
            .and_then(|()| mac.set_roi(roi))
            .and_then(|()| mac.start());
        if let Err(e) = r {
            // Already failing; a second failure here changes nothing.
            let _ = mac.set_clock(false);
            return Err(e);
        }

        self.video = VideoAuthState {
            active: true,
            roi: Some(*roi),
        };
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn keys(&self) -> &SessionKeys {
        &self.keys
    }
}

#[cfg(all(test, feature = "soft-crypto"))]
mod tests {
    use super::*;
    use crate::fakes::{FakeEntropy, FakeMac, FakeSecrets, MacOp};
    use crate::soft::{encrypt_command_params, SoftAead};

    const SECRET: [u8; MASTER_SECRET_LEN] = [0x5a; MASTER_SECRET_LEN];

    fn request(source: SecretSource) -> SessionRequest {
        SessionRequest {
            control_mode: CipherMode::AesGcm as u8,
            control_key: KeyType::Aes256 as u8,
            video_mode: MacMode::Cmac as u8,
            video_key: KeyType::Aes128 as u8,
            secret_source: source as u8,
            host_salt: [0x11; SALT_LEN],
        }
    }

    fn established() -> Session {
        let mut s = Session::new();
        s.set_ephemeral_secret(Phase::Configure, &SECRET).unwrap();
        s.establish(
            Phase::Configure,
            &request(SecretSource::Ephemeral),
            &mut FakeEntropy::default(),
            &mut FakeSecrets::default(),
        )
        .unwrap();
        s
    }

    fn encrypt(
        s: &Session,
        code: u16,
        counter: u64,
        plain: &[u8],
    ) -> Vec<u8> {
        let mut block = vec![0u8; ENCRYPTED_HEADER_LEN + plain.len()];
        encrypt_command_params(s.keys(), code, counter, plain, &mut block)
            .unwrap();
        block
    }

    #[test]
    fn establishment_needs_configure_and_a_secret() {
        let mut s = Session::new();
        let req = request(SecretSource::Ephemeral);
        let mut rng = FakeEntropy::default();
        let mut store = FakeSecrets::default();

        assert_eq!(
            s.establish(Phase::Debug, &req, &mut rng, &mut store),
            Err(SecError::AccessDenied)
        );
        assert_eq!(
            s.establish(Phase::Configure, &req, &mut rng, &mut store),
            Err(SecError::AccessDenied)
        );
        let persisted = request(SecretSource::Persisted);
        assert_eq!(
            s.establish(Phase::Configure, &persisted, &mut rng, &mut store),
            Err(SecError::AccessDenied)
        );
        assert!(!s.is_established());

        store.secret = Some(SECRET);
        s.establish(Phase::Configure, &persisted, &mut rng, &mut store)
            .unwrap();
        assert!(s.is_established());
    }

    #[test]
    fn unknown_selections_are_bad_arguments() {
        let mut s = Session::new();
        s.set_ephemeral_secret(Phase::Configure, &SECRET).unwrap();
        let mut req = request(SecretSource::Ephemeral);
        req.video_mode = 9;
        assert_eq!(
            s.establish(
                Phase::Configure,
                &req,
                &mut FakeEntropy::default(),
                &mut FakeSecrets::default()
            ),
            Err(SecError::InvalidArgument)
        );
        req = request(SecretSource::Ephemeral);
        req.secret_source = 4;
        assert_eq!(
            s.establish(
                Phase::Configure,
                &req,
                &mut FakeEntropy::default(),
                &mut FakeSecrets::default()
            ),
            Err(SecError::InvalidArgument)
        );
        assert!(!s.is_established());
    }

    #[test]
    fn entropy_failure_leaves_session_unestablished() {
        let mut s = Session::new();
        s.set_ephemeral_secret(Phase::Configure, &SECRET).unwrap();
        let mut rng = FakeEntropy {
            fail: true,
            ..Default::default()
        };
        assert_eq!(
            s.establish(
                Phase::Configure,
                &request(SecretSource::Ephemeral),
                &mut rng,
                &mut FakeSecrets::default()
            ),
            Err(SecError::NotExecutable)
        );
        assert!(!s.is_established());
        assert!(s.keys().control_key().is_empty());
    }

    #[test]
    fn second_establishment_changes_nothing() {
        let mut s = established();
        let before = s.keys().clone();
        let negotiated = s.negotiated();

        s.set_ephemeral_secret(Phase::Configure, &[1; MASTER_SECRET_LEN])
            .unwrap_err();
        let mut again = request(SecretSource::Ephemeral);
        again.control_key = KeyType::Aes128 as u8;
        assert_eq!(
            s.establish(
                Phase::Configure,
                &again,
                &mut FakeEntropy::default(),
                &mut FakeSecrets::default()
            ),
            Err(SecError::Already)
        );
        assert!(s.keys() == &before);
        assert_eq!(s.negotiated(), negotiated);
    }

    #[test]
    fn ephemeral_secret_is_consumed() {
        let s = established();
        assert!(s.ephemeral.is_none());
    }

    #[test]
    fn decrypt_round_trip() {
        let mut s = established();
        let plain = *b"exposure=1/60;gain=4";
        let block = encrypt(&s, 0x0030, 1, &plain);
        let mut out = [0u8; 20];
        s.decrypt_command_params(
            Phase::Session,
            &mut SoftAead,
            0x0030,
            &block,
            &mut out,
            plain.len(),
        )
        .unwrap();
        assert_eq!(out, plain);
    }

    #[test]
    fn decrypt_requires_session_phase_and_session() {
        let mut s = Session::new();
        let mut out = [0u8; 4];
        let block = [0u8; ENCRYPTED_HEADER_LEN + 4];
        assert_eq!(
            s.decrypt_command_params(
                Phase::Session,
                &mut SoftAead,
                1,
                &block,
                &mut out,
                4
            ),
            Err(SecError::AccessDenied)
        );
        let mut s = established();
        assert_eq!(
            s.decrypt_command_params(
                Phase::Configure,
                &mut SoftAead,
                1,
                &block,
                &mut out,
                4
            ),
            Err(SecError::AccessDenied)
        );
    }

    #[test]
    fn short_buffers_are_bad_arguments() {
        let mut s = established();
        let block = encrypt(&s, 7, 1, &[1, 2, 3, 4]);
        let mut small = [0u8; 3];
        assert_eq!(
            s.decrypt_command_params(
                Phase::Session,
                &mut SoftAead,
                7,
                &block,
                &mut small,
                4
            ),
            Err(SecError::InvalidArgument)
        );
        let mut out = [0u8; 8];
        assert_eq!(
            s.decrypt_command_params(
                Phase::Session,
                &mut SoftAead,
                7,
                &block,
                &mut out,
                8
            ),
            Err(SecError::InvalidArgument)
        );
    }

    #[test]
    fn wrong_code_or_replay_is_a_bad_message() {
        let mut s = established();
        let block = encrypt(&s, 7, 5, &[9; 8]);
        let mut out = [0u8; 8];
        assert_eq!(
            s.decrypt_command_params(
                Phase::Session,
                &mut SoftAead,
                8,
                &block,
                &mut out,
                8
            ),
            Err(SecError::BadMessage)
        );
        assert_eq!(out, [0; 8]);
        s.decrypt_command_params(
            Phase::Session,
            &mut SoftAead,
            7,
            &block,
            &mut out,
            8,
        )
        .unwrap();
        assert_eq!(
            s.decrypt_command_params(
                Phase::Session,
                &mut SoftAead,
                7,
                &block,
                &mut out,
                8
            ),
            Err(SecError::BadMessage)
        );
        // Still usable afterwards.
        let next = encrypt(&s, 7, 6, &[3; 8]);
        s.decrypt_command_params(
            Phase::Session,
            &mut SoftAead,
            7,
            &next,
            &mut out,
            8,
        )
        .unwrap();
        assert_eq!(out, [3; 8]);
    }

    const ROI: RegionOfInterest = RegionOfInterest {
        x: 0,
        y: 0,
        width: 640,
        height: 480,
    };

    fn established_with(video_mode: MacMode) -> Session {
        let mut s = Session::new();
        s.set_ephemeral_secret(Phase::Configure, &SECRET).unwrap();
        let mut req = request(SecretSource::Ephemeral);
        req.video_mode = video_mode as u8;
        s.establish(
            Phase::Configure,
            &req,
            &mut FakeEntropy::default(),
            &mut FakeSecrets::default(),
        )
        .unwrap();
        s
    }

    #[test]
    fn gmac_cannot_be_reconfigured() {
        let mut s = established_with(MacMode::Gmac);
        let mut mac = FakeMac::default();
        s.config_video_auth(Phase::Session, &mut mac, &ROI).unwrap();
        assert!(s.video().active);
        assert_eq!(
            s.config_video_auth(Phase::Session, &mut mac, &ROI),
            Err(SecError::NotExecutable)
        );
        assert_eq!(
            mac.ops,
            [
                MacOp::Clock(true),
                MacOp::Key(MacMode::Gmac, 16),
                MacOp::Roi(ROI),
                MacOp::Start,
            ]
        );
    }

    #[test]
    fn cmac_roi_can_move_repeatedly() {
        let mut s = established_with(MacMode::Cmac);
        let mut mac = FakeMac::default();
        s.config_video_auth(Phase::Session, &mut mac, &ROI).unwrap();
        for x in 1..4 {
            let roi = RegionOfInterest { x, ..ROI };
            s.config_video_auth(Phase::Session, &mut mac, &roi).unwrap();
            assert_eq!(s.video().roi, Some(roi));
            assert_eq!(mac.ops.last(), Some(&MacOp::Roi(roi)));
        }
        assert_eq!(mac.ops.iter().filter(|o| **o == MacOp::Start).count(), 1);
    }

    #[test]
    fn failed_bringup_gates_clock_off() {
        let mut s = established_with(MacMode::Cmac);
        let mut mac = FakeMac {
            fail_start: true,
            ..Default::default()
        };
        assert_eq!(
            s.config_video_auth(Phase::Session, &mut mac, &ROI),
            Err(SecError::SystemError)
        );
        assert_eq!(mac.ops.last(), Some(&MacOp::Clock(false)));
        assert!(!mac.clock);
        assert!(!s.video().active);
    }

    #[test]
    fn video_auth_needs_session() {
        let mut s = Session::new();
        let mut mac = FakeMac::default();
        assert_eq!(
            s.config_video_auth(Phase::Session, &mut mac, &ROI),
            Err(SecError::AccessDenied)
        );
        let mut s = established();
        assert_eq!(
            s.config_video_auth(Phase::Configure, &mut mac, &ROI),
            Err(SecError::AccessDenied)
        );
        let empty = RegionOfInterest { width: 0, ..ROI };
        assert_eq!(
            s.config_video_auth(Phase::Session, &mut mac, &empty),
            Err(SecError::InvalidArgument)
        );
        assert!(mac.ops.is_empty());
    }

    #[test]
    fn shutdown_wipes_keys() {
        let mut s = established();
        s.on_phase_entry(Phase::Shutdown).unwrap();
        assert!(!s.is_established());
        assert!(s.keys().control_key().is_empty());
        assert_eq!(s.keys().iv_fixed(), &[0; IV_FIXED_LEN]);
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The firmware's own commands, and the view of the core that every command
//! handler (built-in or patched in) works through.

use drv_sensor_sec_api::{
    BuiltinCommand, EphemeralSecret, Event, Phase, RegionOfInterest,
    SecError, SessionRequest, StatusBlock,
};
use hubpack::SerializedSize;
use zeroize::Zeroize;

use crate::engine::Engine;
use crate::hw::{Checkpoint, Platform};
use crate::session::Session;

/// What a command handler may touch while it runs.
///
/// Phase changes asked for here take effect after the command has been
/// answered, so the response always reflects the phase the command ran in.
pub struct CommandContext<'c, 'a> {
    pub(crate) engine: &'c mut Engine<'a>,
    pub(crate) session: &'c mut Session,
    pub(crate) platform: &'c mut Platform<'a>,
}

impl<'c, 'a> CommandContext<'c, 'a> {
    pub fn phase(&self) -> Phase {
        self.engine.phase()
    }

    pub fn raise(&self, ev: Event) {
        self.engine.raise(ev)
    }

    pub fn request_phase(&mut self, phase: Phase) {
        self.engine.request_phase(phase)
    }

    pub fn session(&self) -> &Session {
        self.session
    }

    /// See [`Session::decrypt_command_params`].
    pub fn decrypt_command_params(
        &mut self,
        code: u16,
        encrypted_in: &[u8],
        decrypted_out: &mut [u8],
        size: usize,
    ) -> Result<(), SecError> {
        self.session.decrypt_command_params(
            self.engine.phase(),
            &mut *self.platform.aead,
            code,
            encrypted_in,
            decrypted_out,
            size,
        )
    }

    fn checkpoint(&mut self, cp: Checkpoint, info: u32) {
        self.platform.checkpoints.checkpoint(cp, info);
    }
}

pub(crate) fn run_builtin(
    cmd: BuiltinCommand,
    cx: &mut CommandContext<'_, '_>,
    params: &mut [u8],
) -> Result<(), SecError> {
    match cmd {
        BuiltinCommand::GetStatus => get_status(cx, params),
        BuiltinCommand::Shutdown => {
            cx.raise(Event::ShutdownPending);
            Ok(())
        }
        BuiltinCommand::PatchBegin => {
            cx.platform.patcher.begin()?;
            cx.request_phase(Phase::Patch);
            Ok(())
        }
        BuiltinCommand::PatchFinish => {
            cx.platform.patcher.finish()?;
            cx.raise(Event::PatchLoadComplete);
            Ok(())
        }
        BuiltinCommand::SetEphemeralSecret => set_ephemeral_secret(cx, params),
        BuiltinCommand::SessionEstablish => session_establish(cx, params),
        BuiltinCommand::ConfigVideoAuth => config_video_auth(cx, params),
    }
}

fn get_status(
    cx: &mut CommandContext<'_, '_>,
    params: &mut [u8],
) -> Result<(), SecError> {
    let video = cx.session.video();
    let status = StatusBlock {
        phase: cx.phase(),
        session_established: cx.session.is_established(),
        video_auth_active: video.active,
        pending_events: cx.engine.latch().pending(),
    };
    hubpack::serialize(params, &status).map_err(|_| SecError::NoSpace)?;
    Ok(())
}

fn set_ephemeral_secret(
    cx: &mut CommandContext<'_, '_>,
    params: &mut [u8],
) -> Result<(), SecError> {
    let (mut msg, _) = hubpack::deserialize::<EphemeralSecret>(params)
        .map_err(|_| SecError::InvalidArgument)?;
    let phase = cx.phase();
    let r = cx.session.set_ephemeral_secret(phase, &msg.secret);
    msg.secret.zeroize();
    // The host's copy is no business of whoever reads the region next.
    let n = params.len().min(EphemeralSecret::MAX_SIZE);
    params[..n].zeroize();
    r
}

fn session_establish(
    cx: &mut CommandContext<'_, '_>,
    params: &mut [u8],
) -> Result<(), SecError> {
    let (req, _) = hubpack::deserialize::<SessionRequest>(params)
        .map_err(|_| SecError::InvalidArgument)?;
    let phase = cx.phase();
    let reply = cx.session.establish(
        phase,
        &req,
        &mut *cx.platform.entropy,
        &mut *cx.platform.secrets,
    )?;
    hubpack::serialize(params, &reply).map_err(|_| SecError::NoSpace)?;
    cx.raise(Event::SessionStart);
    cx.checkpoint(Checkpoint::SessionEstablished, u32::from(req.video_mode));
    Ok(())
}

fn config_video_auth(
    cx: &mut CommandContext<'_, '_>,
    params: &mut [u8],
) -> Result<(), SecError> {
    let code = BuiltinCommand::ConfigVideoAuth.code();
    let mut plain = [0u8; RegionOfInterest::MAX_SIZE];
    cx.decrypt_command_params(
        code,
        params,
        &mut plain,
        RegionOfInterest::MAX_SIZE,
    )?;
    let (roi, _) = hubpack::deserialize::<RegionOfInterest>(&plain)
        .map_err(|_| SecError::InvalidArgument)?;

    let phase = cx.phase();
    cx.session.config_video_auth(phase, &mut *cx.platform.mac, &roi)?;
    cx.checkpoint(
        Checkpoint::VideoAuthConfigured,
        (u32::from(roi.width) << 16) | u32::from(roi.height),
    );
    Ok(())
}

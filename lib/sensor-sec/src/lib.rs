// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Security core for the image sensor.
//!
//! Everything the host can make the sensor do goes through here. The core is
//! a run-to-completion event loop: interrupt handlers set bits in an
//! [`EventLatch`], and [`SensorSec::step`] serves the highest-priority one.
//! The doorbell event routes a host command through the [`Router`], which
//! decides from the current [`Phase`] whether the command may run at all.
//!
//! The expected usage model is:
//!
//! - Put an [`EventLatch`] in a `static`, wired to the interrupt controller,
//!   and have interrupt handlers call [`EventLatch::set_event`].
//!
//! - Build a [`SensorSec`] from the latch, the command registers and the
//!   rest of the board ([`Platform`]).
//!
//! - Call [`SensorSec::start`], then [`SensorSec::run`], which never
//!   returns.
//!
//! Patches extend the core through [`SensorSec::add_command`],
//! [`SensorSec::register_phase_hook`] and [`SensorSec::set_priority_map`].

#![cfg_attr(target_os = "none", no_std)]

mod config {
    include!(concat!(env!("OUT_DIR"), "/sensor_sec_config.rs"));
}

pub mod engine;
pub mod events;
pub mod fatal;
pub mod handlers;
pub mod hw;
pub mod kdf;
pub mod ringbuf;
pub mod router;
pub mod session;

#[cfg(feature = "soft-crypto")]
pub mod soft;

#[cfg(not(target_os = "none"))]
pub mod fakes;

pub use crate::engine::{Engine, PhaseHook};
pub use crate::events::{CriticalSection, EventLatch, PriorityMap};
pub use crate::handlers::CommandContext;
pub use crate::hw::Platform;
pub use crate::router::{CommandHandler, OverlayEntry, Router};
pub use crate::session::Session;

pub use drv_sensor_sec_api::{Event, FaultCode, Phase, SecError};

use drv_sensor_sec_api::{response_code, RESPONSE_MASK};

use crate::config::TRACE_ENTRIES;
use crate::fatal::FatalState;
use crate::hw::{Checkpoint, CommandRegisters};
use crate::ringbuf::{ringbuf_entry, Ringbuf};
use crate::router::{Handler, BUILTIN_COMMANDS};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Trace {
    None,
    Start,
    Event(Event),
    Phase(Phase),
    PhaseEntryFailed { phase: Phase, err: SecError },
    Dispatch { code: u16, rc: u16 },
    Fatal {
        fault: FaultCode,
        context: u16,
        info: u32,
    },
    FatalDropped(FaultCode),
    Dumped(u16),
    Halt,
}

/// Outcome of one trip around the main loop.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Step {
    /// Nothing was pending; we slept until the next interrupt.
    Idle,
    Handled(Event),
    /// The terminal handler has run; only halting remains.
    Halted,
}

/// The security core. `R` is the command register block, owned so that
/// host-side tooling can play the host through [`Self::registers_mut`].
pub struct SensorSec<'a, R> {
    engine: Engine<'a>,
    router: Router<'a>,
    session: Session,
    fatal: FatalState,
    regs: R,
    platform: Platform<'a>,
    trace: Ringbuf<Trace, TRACE_ENTRIES>,
}

impl<'a, R: CommandRegisters> SensorSec<'a, R> {
    pub fn new(
        latch: &'a EventLatch<'a>,
        regs: R,
        platform: Platform<'a>,
    ) -> Self {
        Self {
            engine: Engine::new(latch),
            router: Router::new(&BUILTIN_COMMANDS),
            session: Session::new(),
            fatal: FatalState::default(),
            regs,
            platform,
            trace: Ringbuf::new(Trace::None),
        }
    }

    pub fn phase(&self) -> Phase {
        self.engine.phase()
    }

    pub fn engine(&self) -> &Engine<'a> {
        &self.engine
    }

    pub fn router(&self) -> &Router<'a> {
        &self.router
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn fatal_state(&self) -> &FatalState {
        &self.fatal
    }

    pub fn trace(&self) -> &Ringbuf<Trace, TRACE_ENTRIES> {
        &self.trace
    }

    pub fn registers(&self) -> &R {
        &self.regs
    }

    pub fn registers_mut(&mut self) -> &mut R {
        &mut self.regs
    }

    pub fn is_terminated(&self) -> bool {
        self.fatal.is_terminated()
    }

    pub fn add_command(
        &mut self,
        entry: OverlayEntry<'a>,
    ) -> Result<(), SecError> {
        self.router.add_command(entry)
    }

    pub fn register_phase_hook(
        &mut self,
        hook: &'a dyn PhaseHook,
    ) -> Result<(), SecError> {
        self.engine.register_phase_hook(hook)
    }

    pub fn set_priority_map(&mut self, map: PriorityMap) {
        self.engine.set_priority_map(map)
    }

    /// Brings the core up: command registers, Initialize, then queues the
    /// move to Debug. Any failure is fatal.
    pub fn start(&mut self) {
        ringbuf_entry!(self.trace, Trace::Start);
        self.platform.checkpoints.checkpoint(Checkpoint::Start, 0);

        if let Err(e) = self.regs.init() {
            self.fatal(FaultCode::Startup, 0, u32::from(u16::from(e)));
            return;
        }
        if let Err(e) = self.enter_phase(Phase::Initialize) {
            self.fatal(
                FaultCode::Startup,
                Phase::Initialize as u16,
                u32::from(u16::from(e)),
            );
            return;
        }
        self.engine.raise(Event::DebugStart);
    }

    /// Serves the highest-priority pending event, or sleeps if there is
    /// none.
    pub fn step(&mut self) -> Step {
        if self.is_terminated() {
            return Step::Halted;
        }
        let Some(ev) = self.engine.next_event() else {
            self.engine.latch().wait_if_idle();
            return Step::Idle;
        };
        ringbuf_entry!(self.trace, Trace::Event(ev));
        self.handle_event(ev);
        if self.is_terminated() {
            Step::Halted
        } else {
            Step::Handled(ev)
        }
    }

    pub fn run(mut self) -> ! {
        while self.step() != Step::Halted {}
        self.engine.latch().irq().halt()
    }

    fn handle_event(&mut self, ev: Event) {
        match ev {
            Event::FatalError => self.terminate(),
            Event::ShutdownPending => {
                if self.engine.phase() != Phase::Shutdown {
                    // Shutdown entry can't fail from any other phase.
                    let _ = self.enter_phase(Phase::Shutdown);
                }
                self.terminate();
            }
            Event::WatchdogTick => {
                if let Err(e) = self.platform.health.service_watchdog() {
                    self.fatal(
                        FaultCode::Driver,
                        ev.id() as u16,
                        u32::from(u16::from(e)),
                    );
                }
            }
            Event::DebugStart => self.advance(ev, Phase::Debug),
            Event::PatchLoadComplete => self.advance(ev, Phase::Configure),
            Event::SessionStart => self.advance(ev, Phase::Session),
            Event::Doorbell => {
                let code = self.regs.command();
                self.dispatch(code);
            }
            Event::CryptoDone
            | Event::OtpDone
            | Event::FlashDone
            | Event::MacEngineDone
            | Event::TimerExpired => (),
            _ => self.fatal(FaultCode::UnexpectedEvent, ev.id() as u16, 0),
        }
    }

    fn advance(&mut self, ev: Event, phase: Phase) {
        if let Err(e) = self.enter_phase(phase) {
            self.fatal(
                FaultCode::PhaseEntry,
                ev.id() as u16,
                (u32::from(phase as u8) << 16) | u32::from(u16::from(e)),
            );
        }
    }

    /// Moves to `new` and tells everyone: patch hooks first, then the
    /// engine, router, session, health monitor and patch manager.
    ///
    /// The first failing callback stops the broadcast and its error is
    /// returned, except on the way into Shutdown, where every callback runs
    /// and the transition always succeeds.
    pub fn enter_phase(&mut self, new: Phase) -> Result<(), SecError> {
        self.engine.set_phase(new)?;
        ringbuf_entry!(self.trace, Trace::Phase(new));
        self.platform
            .checkpoints
            .checkpoint(Checkpoint::PhaseEntry, u32::from(new as u8));

        for hook in self.engine.hooks().into_iter().flatten() {
            let r = hook.on_phase_entry(new);
            self.phase_callback(new, r)?;
        }
        let r = self.engine.on_phase_entry(new);
        self.phase_callback(new, r)?;
        let r = self.router.on_phase_entry(new);
        self.phase_callback(new, r)?;
        let r = self.session.on_phase_entry(new);
        self.phase_callback(new, r)?;
        let r = self.platform.health.on_phase_entry(new);
        self.phase_callback(new, r)?;
        let r = self.platform.patcher.on_phase_entry(new);
        self.phase_callback(new, r)
    }

    fn phase_callback(
        &mut self,
        phase: Phase,
        r: Result<(), SecError>,
    ) -> Result<(), SecError> {
        match r {
            Ok(()) => Ok(()),
            Err(err) => {
                ringbuf_entry!(
                    self.trace,
                    Trace::PhaseEntryFailed { phase, err }
                );
                if phase == Phase::Shutdown {
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Runs host command `code` against the parameter region and answers
    /// it. Returns the response code written.
    ///
    /// Exactly one response is written, whatever happens. A handler that
    /// reports a system error takes the firmware down after answering.
    pub fn dispatch(&mut self, code: u16) -> u16 {
        let phase = self.engine.phase();
        let r = match self.router.lookup(code, phase) {
            None => Err(SecError::AccessDenied),
            Some(handler) => {
                let params = self.regs.params();
                let mut cx = CommandContext {
                    engine: &mut self.engine,
                    session: &mut self.session,
                    platform: &mut self.platform,
                };
                match handler {
                    Handler::Builtin(cmd) => {
                        handlers::run_builtin(cmd, &mut cx, params)
                    }
                    Handler::Extension(h) => h.handle(&mut cx, code, params),
                }
            }
        };

        let rc = response_code(r) & RESPONSE_MASK;
        self.regs.set_response(rc);
        ringbuf_entry!(self.trace, Trace::Dispatch { code, rc });
        self.platform.checkpoints.checkpoint(
            Checkpoint::Dispatch,
            (u32::from(code) << 16) | u32::from(rc),
        );

        if matches!(r, Err(e) if e.is_fatal()) {
            self.fatal(FaultCode::Command, code, u32::from(rc));
            return rc;
        }
        if let Some(next) = self.engine.take_phase_request() {
            if let Err(e) = self.enter_phase(next) {
                self.fatal(
                    FaultCode::PhaseEntry,
                    code,
                    (u32::from(next as u8) << 16) | u32::from(u16::from(e)),
                );
            }
        }
        rc
    }
}

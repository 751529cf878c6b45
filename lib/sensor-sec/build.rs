// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::io::Write;
use std::path::PathBuf;

/// Event names in identifier order. Must match `drv_sensor_sec_api::Event`.
const EVENTS: [&str; 32] = [
    "FatalError",
    "ShutdownPending",
    "WatchdogTick",
    "DebugStart",
    "PatchLoadComplete",
    "SessionStart",
    "Doorbell",
    "CryptoDone",
    "OtpDone",
    "FlashDone",
    "MacEngineDone",
    "TimerExpired",
    "Reserved12",
    "Reserved13",
    "Reserved14",
    "Reserved15",
    "Reserved16",
    "Reserved17",
    "Reserved18",
    "Reserved19",
    "Reserved20",
    "Reserved21",
    "Reserved22",
    "Reserved23",
    "Reserved24",
    "Reserved25",
    "Reserved26",
    "Reserved27",
    "Reserved28",
    "Reserved29",
    "Reserved30",
    "Reserved31",
];

const CONFIG_VAR: &str = "SENSOR_SEC_CONFIG";

fn main() -> Result<()> {
    println!("cargo:rerun-if-env-changed={CONFIG_VAR}");

    let cfg: Config = match std::env::var(CONFIG_VAR) {
        Ok(text) => {
            println!("--- toml for ${CONFIG_VAR} ---");
            println!("{text}");
            toml::from_str(&text).context("parsing sensor-sec config")?
        }
        Err(_) => Config::default(),
    };

    if cfg.phase_hook_slots == 0 || cfg.phase_hook_slots > 8 {
        bail!("phase-hook-slots must be between 1 and 8");
    }
    if !cfg.trace_entries.is_power_of_two() || cfg.trace_entries > 256 {
        bail!("trace-entries must be a power of two no larger than 256");
    }

    let order = priority_order(&cfg.event_priority)?;

    let out_dir = PathBuf::from(std::env::var("OUT_DIR")?);
    let dest_path = out_dir.join("sensor_sec_config.rs");
    let mut out = std::fs::File::create(dest_path)
        .context("creating sensor_sec_config.rs")?;

    writeln!(out, "pub(crate) const DEFAULT_EVENT_ORDER: [u8; 32] = [")?;
    for id in order {
        writeln!(out, "    {id}, // {}", EVENTS[id as usize])?;
    }
    writeln!(out, "];")?;
    writeln!(
        out,
        "pub(crate) const PHASE_HOOK_SLOTS: usize = {};",
        cfg.phase_hook_slots
    )?;
    writeln!(
        out,
        "pub(crate) const TRACE_ENTRIES: usize = {};",
        cfg.trace_entries
    )?;

    Ok(())
}

/// Turns the configured list of event names, highest priority first, into a
/// full priority-to-event table. Events that aren't named keep their
/// relative identifier order after the named ones.
fn priority_order(names: &[String]) -> Result<Vec<u8>> {
    let mut order = Vec::with_capacity(EVENTS.len());
    for name in names {
        let Some(id) = EVENTS.iter().position(|e| e == name) else {
            bail!("unknown event {name:?} in event-priority");
        };
        if order.contains(&(id as u8)) {
            bail!("event {name:?} listed twice in event-priority");
        }
        order.push(id as u8);
    }
    for id in 0..EVENTS.len() as u8 {
        if !order.contains(&id) {
            order.push(id);
        }
    }
    Ok(order)
}

/// Build-time configuration for the security core.
#[derive(Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct Config {
    /// Events to serve first, highest priority first.
    #[serde(default)]
    event_priority: Vec<String>,
    /// Number of phase-entry hooks a patch may install.
    #[serde(default = "default_phase_hook_slots")]
    phase_hook_slots: usize,
    /// Depth of the in-memory trace ring.
    #[serde(default = "default_trace_entries")]
    trace_entries: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            event_priority: Vec::new(),
            phase_hook_slots: default_phase_hook_slots(),
            trace_entries: default_trace_entries(),
        }
    }
}

fn default_phase_hook_slots() -> usize {
    2
}

fn default_trace_entries() -> usize {
    32
}

//! Construction-time configuration (spec.md §6).

use serde::Serialize;

/// Per-link polarity knobs (spec.md §4.2): compensate for the optocoupler
/// / open-collector driver circuit common on OpenTherm interface hardware.
/// The link layer's logical semantics are always spec-direct; only the
/// electrical mapping changes.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    pub invert_tx: bool,
    pub invert_rx: bool,
}

/// GPIO assignment for both ports (spec.md §6 "Pin configuration").
#[derive(Debug, Copy, Clone)]
pub struct PinConfig {
    pub thermostat_rx: u32,
    pub thermostat_tx: u32,
    pub boiler_rx: u32,
    pub boiler_tx: u32,
    pub thermostat_link: LinkConfig,
    pub boiler_link: LinkConfig,
}

/// The three coordinator modes (spec.md §3, GLOSSARY).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Passthrough,
    Proxy,
    Control,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Proxy
    }
}

/// Coordinator construction parameters (spec.md §6 "Coordinator
/// configuration").
#[derive(Debug, Copy, Clone)]
pub struct CoordinatorConfig {
    pub mode: Mode,
    /// Intercept 1-in-N status requests; `0` is interpreted as `10`.
    pub intercept_rate: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Proxy,
            intercept_rate: 10,
        }
    }
}

impl CoordinatorConfig {
    /// Normalises `intercept_rate`, treating `0` as `10` (spec.md §6).
    pub fn effective_intercept_rate(&self) -> u32 {
        if self.intercept_rate == 0 {
            10
        } else {
            self.intercept_rate
        }
    }
}

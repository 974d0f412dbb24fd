//! External-control contract (spec.md §4.4, §6): the small struct the
//! coordinator *reads* (never writes) from the external MQTT-bridge
//! collaborator, plus the coordinator-owned enable/fallback state derived
//! from it.

/// Supplied by the external MQTT bridge collaborator. The coordinator only
/// reads this; spec.md §1 keeps MQTT itself out of scope.
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct ControlSnapshot {
    pub available: bool,
    pub tset_c: Option<f32>,
    pub ch_on: Option<bool>,
    pub last_update_ms: i64,
}

/// Coordinator-owned control state (part of `CoordinatorState` in spec.md
/// §3).
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct ControlState {
    pub enabled: bool,
    pub demand_tset_c: f32,
    pub demand_ch_on: bool,
    pub last_demand_ms: i64,
}

impl ControlState {
    /// `control.active = control.enabled ∧ available`.
    pub fn active(&self, snapshot: &ControlSnapshot) -> bool {
        self.enabled && snapshot.available
    }

    /// `fallback_active = control.enabled ∧ ¬available`: behaves as Proxy
    /// mode (still inject diagnostics) rather than blocking the thermostat.
    pub fn fallback_active(&self, snapshot: &ControlSnapshot) -> bool {
        self.enabled && !snapshot.available
    }

    /// Pull the latest demand out of a fresh snapshot.
    pub fn apply_snapshot(&mut self, snapshot: &ControlSnapshot) {
        if let Some(tset) = snapshot.tset_c {
            self.demand_tset_c = tset;
        }
        if let Some(ch_on) = snapshot.ch_on {
            self.demand_ch_on = ch_on;
        }
        self.last_demand_ms = snapshot.last_update_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_requires_enabled_and_available() {
        let state = ControlState {
            enabled: true,
            ..Default::default()
        };
        let available = ControlSnapshot {
            available: true,
            ..Default::default()
        };
        let unavailable = ControlSnapshot {
            available: false,
            ..Default::default()
        };
        assert!(state.active(&available));
        assert!(!state.active(&unavailable));
        assert!(!state.fallback_active(&available));
        assert!(state.fallback_active(&unavailable));
    }

    #[test]
    fn disabled_is_never_active_or_fallback() {
        let state = ControlState::default();
        let snapshot = ControlSnapshot {
            available: false,
            ..Default::default()
        };
        assert!(!state.active(&snapshot));
        assert!(!state.fallback_active(&snapshot));
    }

    #[test]
    fn apply_snapshot_only_overwrites_present_fields() {
        let mut state = ControlState {
            demand_tset_c: 40.0,
            demand_ch_on: true,
            ..Default::default()
        };
        state.apply_snapshot(&ControlSnapshot {
            available: true,
            tset_c: None,
            ch_on: Some(false),
            last_update_ms: 123,
        });
        assert_eq!(state.demand_tset_c, 40.0);
        assert!(!state.demand_ch_on);
        assert_eq!(state.last_demand_ms, 123);
    }
}

//! The interception coordinator (spec.md §4.4): the single cooperative
//! worker binding both ports, implementing passthrough / diagnostic
//! injection / control synthesis / manual-write policy.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender};

use serde::Serialize;

use crate::config::{CoordinatorConfig, Mode};
use crate::control::{ControlSnapshot, ControlState};
use crate::diagnostics::Diagnostics;
use crate::error::GatewayError;
use crate::frame::{Frame, MessageType};
use crate::port::{Port, PortStats};

/// Response turnaround deadline for any frame the coordinator forwards or
/// injects to the boiler (spec.md §5 "Cancellation & timeouts").
pub const RESPONSE_DEADLINE_MS: i64 = 900;
/// Manual-write caller-supplied deadline (spec.md §5).
pub const MANUAL_WRITE_DEADLINE_MS: i64 = 2_000;
/// Minimum interval between autonomous Control-mode diagnostic polls
/// (spec.md §4.4 scheduling model, step 4).
pub const DIAG_POLL_INTERVAL_MS: i64 = 1_000;

/// The fixed diagnostic rotation (spec.md §4.4): cycled in order on each
/// interception, and polled periodically in Control mode. Part of the
/// spec — must be exactly this set and order so the store fills
/// predictably.
pub const DIAG_ROTATION: [u8; 29] = [
    25, 28, 26, 1, 17, 18, 27, 33, 34, 19, 5, 115, 15, 35, 32, 31, 29, 30, 79, 84, 85, 116, 119,
    117, 118, 120, 123, 121, 122,
];

/// `loop_state` as a sum type (spec.md §9 "Tagged-variant loop state, not a
/// flag soup"): the fields a variant carries are exactly what that
/// `(request, response)` pair needs to resolve.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum LoopState {
    Idle,
    AwaitPassthroughResponse { deadline_ms: i64 },
    AwaitDiagnosticResponse { did: u8, deadline_ms: i64 },
    AwaitControlWriteResponse { deadline_ms: i64 },
}

/// spec.md §6 "Message callback" direction tag.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

/// spec.md §6 "Message callback" source tag. `ThermostatBoiler` marks a
/// frame that passes through unmodified end-to-end (passthrough);
/// `GatewayBoiler`/`ThermostatGateway` mark frames that only touch one
/// link segment (diagnostic injection, manual write, control synthesis).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Source {
    ThermostatBoiler,
    GatewayBoiler,
    ThermostatGateway,
}

pub type MessageCallback = dyn FnMut(Direction, Source, u32) + Send;

/// spec.md §6 "Status" output.
#[derive(Debug, Copy, Clone, Serialize)]
pub struct GatewayStatus {
    pub mode: Mode,
    pub control_enabled: bool,
    pub control_active: bool,
    pub fallback_active: bool,
    pub demand_tset_c: f32,
    pub demand_ch_on: bool,
    pub last_demand_ms: i64,
    pub spurious_count: u32,
    pub thermostat_stats: PortStats,
    pub boiler_stats: PortStats,
}

struct ManualWrite {
    frame: Frame,
    deadline_ms: i64,
    completer: SyncSender<Result<Frame, GatewayError>>,
}

/// Central state machine binding both ports (spec.md §3 "Coordinator
/// state"). Holds no hardware; `tick` is driven by an external scheduler
/// (spec.md §5 "only the coordinator loop ever sleeps").
pub struct Coordinator {
    mode: Mode,
    intercept_rate: u32,
    status_counter: u32,
    diag_cursor: usize,
    pub control: ControlState,
    control_snapshot: ControlSnapshot,
    pending_write: Option<ManualWrite>,
    loop_state: LoopState,
    diagnostics: Diagnostics,
    spurious_count: u32,
    last_diag_poll_ms: i64,
    message_callback: Option<Box<MessageCallback>>,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            mode: config.mode,
            intercept_rate: config.effective_intercept_rate(),
            status_counter: 0,
            diag_cursor: 0,
            control: ControlState::default(),
            control_snapshot: ControlSnapshot::default(),
            pending_write: None,
            loop_state: LoopState::Idle,
            diagnostics: Diagnostics::new(),
            spurious_count: 0,
            last_diag_poll_ms: i64::MIN / 2,
            message_callback: None,
        }
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    pub fn set_control_enabled(&mut self, enabled: bool) {
        self.control.enabled = enabled;
    }

    pub fn update_control_snapshot(&mut self, snapshot: ControlSnapshot) {
        self.control.apply_snapshot(&snapshot);
        self.control_snapshot = snapshot;
    }

    pub fn set_message_callback<F>(&mut self, callback: F)
    where
        F: FnMut(Direction, Source, u32) + Send + 'static,
    {
        self.message_callback = Some(Box::new(callback));
    }

    pub fn get_diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn spurious_count(&self) -> u32 {
        self.spurious_count
    }

    pub fn loop_state(&self) -> LoopState {
        self.loop_state
    }

    pub fn status(&self, thermostat: &Port, boiler: &Port) -> GatewayStatus {
        GatewayStatus {
            mode: self.mode,
            control_enabled: self.control.enabled,
            control_active: self.control.active(&self.control_snapshot),
            fallback_active: self.control.fallback_active(&self.control_snapshot),
            demand_tset_c: self.control.demand_tset_c,
            demand_ch_on: self.control.demand_ch_on,
            last_demand_ms: self.control.last_demand_ms,
            spurious_count: self.spurious_count,
            thermostat_stats: thermostat.stats(),
            boiler_stats: boiler.stats(),
        }
    }

    /// Submit a one-shot manual WRITE_DATA (spec.md §6 "Manual-write
    /// submission"). Returns the receiving end of a one-shot channel;
    /// fails fast if a write is already outstanding.
    pub fn submit_manual_write(
        &mut self,
        did: u8,
        dv: u16,
        now_ms: i64,
    ) -> Result<Receiver<Result<Frame, GatewayError>>, GatewayError> {
        if self.pending_write.is_some() {
            return Err(GatewayError::Busy);
        }
        let (tx, rx) = sync_channel(1);
        self.pending_write = Some(ManualWrite {
            frame: Frame::build(MessageType::WriteData, did, dv),
            deadline_ms: now_ms + MANUAL_WRITE_DEADLINE_MS,
            completer: tx,
        });
        Ok(rx)
    }

    /// Abort any in-flight manual write with `Cancelled` (spec.md §5
    /// "Stopping the coordinator").
    pub fn shutdown(&mut self) {
        if let Some(pw) = self.pending_write.take() {
            let _ = pw.completer.send(Err(GatewayError::Cancelled));
        }
    }

    fn emit(&mut self, direction: Direction, source: Source, frame: Frame) {
        if let Some(cb) = self.message_callback.as_mut() {
            cb(direction, source, frame.to_bits());
        }
    }

    fn next_diag_did(&mut self) -> u8 {
        let did = DIAG_ROTATION[self.diag_cursor];
        self.diag_cursor = (self.diag_cursor + 1) % DIAG_ROTATION.len();
        did
    }

    fn resolve_manual_write(&mut self, outcome: Result<Frame, GatewayError>) {
        if let Some(pw) = self.pending_write.take() {
            let _ = pw.completer.send(outcome);
        }
    }

    /// One coordinator tick (spec.md §4.4 "Scheduling model"), driven by an
    /// external scheduler nominally every 1ms or on port-readiness events.
    /// `now_ms` is supplied by the caller so the coordinator stays testable
    /// without a wall clock.
    pub fn tick(&mut self, thermostat: &mut Port, boiler: &mut Port, now_ms: i64) {
        if let Some(req) = thermostat.try_recv() {
            self.handle_thermostat_request(req, thermostat, boiler, now_ms);
        }

        if let Some(resp) = boiler.try_recv() {
            self.handle_boiler_response(resp, thermostat, now_ms);
        } else if matches!(self.loop_state, LoopState::AwaitControlWriteResponse { .. })
            && boiler.take_parity_failure()
        {
            self.resolve_manual_write(Err(GatewayError::InvalidCrc));
            self.loop_state = LoopState::Idle;
        }

        self.check_timeout(boiler, now_ms);

        if self.pending_write.is_some() && self.loop_state == LoopState::Idle {
            self.inject_manual_write(boiler, now_ms);
        }

        if self.mode == Mode::Control
            && self.loop_state == LoopState::Idle
            && now_ms - self.last_diag_poll_ms >= DIAG_POLL_INTERVAL_MS
        {
            self.send_diagnostic_query(boiler, now_ms);
        }
    }

    fn check_timeout(&mut self, boiler: &mut Port, now_ms: i64) {
        let expired = match self.loop_state {
            LoopState::Idle => None,
            LoopState::AwaitPassthroughResponse { deadline_ms }
            | LoopState::AwaitDiagnosticResponse { deadline_ms, .. }
            | LoopState::AwaitControlWriteResponse { deadline_ms } => {
                if now_ms > deadline_ms {
                    Some(())
                } else {
                    None
                }
            }
        };
        if expired.is_some() {
            boiler.record_timeout();
            if matches!(self.loop_state, LoopState::AwaitControlWriteResponse { .. }) {
                self.resolve_manual_write(Err(GatewayError::Timeout));
            }
            self.loop_state = LoopState::Idle;
        }
    }

    fn inject_manual_write(&mut self, boiler: &mut Port, now_ms: i64) {
        let pw_deadline = self.pending_write.as_ref().map(|pw| pw.deadline_ms);
        if let Some(deadline) = pw_deadline {
            if now_ms >= deadline {
                self.resolve_manual_write(Err(GatewayError::Timeout));
                return;
            }
        }
        let frame = match self.pending_write.as_ref() {
            Some(pw) => pw.frame,
            None => return,
        };
        if boiler.send(frame).is_ok() {
            self.emit(Direction::Request, Source::GatewayBoiler, frame);
            self.loop_state = LoopState::AwaitControlWriteResponse {
                deadline_ms: now_ms + RESPONSE_DEADLINE_MS,
            };
        }
    }

    fn send_diagnostic_query(&mut self, boiler: &mut Port, now_ms: i64) {
        let did = self.next_diag_did();
        let query = Frame::build(MessageType::ReadData, did, 0);
        if boiler.send(query).is_ok() {
            self.emit(Direction::Request, Source::GatewayBoiler, query);
            self.loop_state = LoopState::AwaitDiagnosticResponse {
                did,
                deadline_ms: now_ms + RESPONSE_DEADLINE_MS,
            };
            self.last_diag_poll_ms = now_ms;
        }
    }

    fn synthesize(&self, did: u8) -> Option<Frame> {
        let dv = match did {
            0 => {
                if self.control.demand_ch_on {
                    0b11u16
                } else {
                    0
                }
            }
            1 => Frame::f8_8_bits(self.control.demand_tset_c),
            3 => 0,
            17 => 0,
            _ => return None,
        };
        Some(Frame::build(MessageType::ReadAck, did, dv))
    }

    fn handle_thermostat_request(
        &mut self,
        req: Frame,
        thermostat: &mut Port,
        boiler: &mut Port,
        now_ms: i64,
    ) {
        let did = req.data_id();
        let control_active = self.control.active(&self.control_snapshot);

        // Row 1: Control-mode synthesis for the four demand-bearing DIDs.
        if self.mode == Mode::Control && control_active && matches!(did, 0 | 1 | 3 | 17) {
            if let Some(reply) = self.synthesize(did) {
                if thermostat.send(reply).is_ok() {
                    self.emit(Direction::Response, Source::ThermostatGateway, reply);
                }
                self.loop_state = LoopState::Idle;
                return;
            }
        }

        // Row 2: diagnostic interception piggybacked on the Status
        // heartbeat, in Proxy or Control mode (including Control-mode
        // fallback, which behaves like Proxy).
        if matches!(self.mode, Mode::Proxy | Mode::Control) && did == 0 {
            self.status_counter += 1;
            if self.status_counter >= self.intercept_rate {
                self.status_counter = 0;
                self.send_diagnostic_query(boiler, now_ms);
                return;
            }
        }

        // Row 3: passthrough.
        if boiler.send(req).is_ok() {
            self.emit(Direction::Request, Source::ThermostatBoiler, req);
            self.loop_state = LoopState::AwaitPassthroughResponse {
                deadline_ms: now_ms + RESPONSE_DEADLINE_MS,
            };
        }
    }

    fn handle_boiler_response(&mut self, resp: Frame, thermostat: &mut Port, now_ms: i64) {
        match self.loop_state {
            LoopState::AwaitPassthroughResponse { .. } => {
                if thermostat.send(resp).is_ok() {
                    self.emit(Direction::Response, Source::ThermostatBoiler, resp);
                }
                self.loop_state = LoopState::Idle;
            }
            LoopState::AwaitDiagnosticResponse { did, .. } => {
                if resp.data_id() == did {
                    self.diagnostics.update(did, resp.data_value(), now_ms);
                } else {
                    self.spurious_count += 1;
                }
                self.loop_state = LoopState::Idle;
            }
            LoopState::AwaitControlWriteResponse { .. } => {
                let outcome = match resp.message_type() {
                    MessageType::WriteAck => Ok(resp),
                    MessageType::DataInvalid | MessageType::UnknownDataId => {
                        Err(GatewayError::InvalidResponse)
                    }
                    _ => Err(GatewayError::InvalidResponse),
                };
                self.resolve_manual_write(outcome);
                self.loop_state = LoopState::Idle;
            }
            LoopState::Idle => {
                // Unexpected: forward anyway (spec.md §4.4).
                if thermostat.send(resp).is_ok() {
                    self.emit(Direction::Response, Source::GatewayBoiler, resp);
                }
                self.spurious_count += 1;
            }
        }
    }
}

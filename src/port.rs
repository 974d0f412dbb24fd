//! Port (spec.md §4.3): one side of the bus, role-tagged, owning the
//! single-slot inbox/pending-outgoing state the link layer and coordinator
//! rendezvous through (spec.md §5 "Shared resources").

use serde::Serialize;

use crate::error::GatewayError;
use crate::frame::Frame;

/// A *slave-facing* port expects to receive requests and send responses (it
/// plays boiler to the thermostat); a *master-facing* port does the
/// inverse. The port's frame-validity filter uses this expected role.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    SlaveFacing,
    MasterFacing,
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct PortStats {
    pub tx_count: u32,
    pub rx_count: u32,
    pub error_count: u32,
    pub timeout_count: u32,
}

/// One side of the dual-port proxy. `Port` itself owns no hardware; the
/// link layer (`crate::hal` on target, a test double in unit tests) drives
/// it through [`Port::deliver`]/[`Port::take_pending_outgoing`], and the
/// coordinator drives it through [`Port::try_recv`]/[`Port::send`]. No
/// port knows about the coordinator (spec.md §9 "no cyclic references").
pub struct Port {
    role: Role,
    inbox: Option<Frame>,
    pending_outgoing: Option<Frame>,
    tx_busy: bool,
    stats: PortStats,
    last_parity_failure: bool,
}

impl Port {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            inbox: None,
            pending_outgoing: None,
            tx_busy: false,
            stats: PortStats::default(),
            last_parity_failure: false,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn stats(&self) -> PortStats {
        self.stats
    }

    /// Non-blocking: drains the inbox single slot.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.inbox.take()
    }

    /// Non-blocking: queues at most one outgoing frame. Fails fast if an
    /// earlier TX is still in flight or already queued.
    pub fn send(&mut self, frame: Frame) -> Result<(), GatewayError> {
        if self.tx_busy || self.pending_outgoing.is_some() {
            return Err(GatewayError::Busy);
        }
        self.pending_outgoing = Some(frame);
        Ok(())
    }

    pub fn is_tx_busy(&self) -> bool {
        self.tx_busy
    }

    /// Link-RX side: hand a decoded, parity-clean frame to the port. The
    /// port applies its role filter (`WrongRole`); frames failing it are
    /// counted and dropped, never placed in the inbox.
    pub fn deliver(&mut self, frame: Frame) {
        let role_ok = match self.role {
            Role::SlaveFacing => frame.is_valid_request(),
            Role::MasterFacing => frame.is_valid_response(),
        };
        if !role_ok {
            self.stats.error_count += 1;
            self.last_parity_failure = !frame.parity_ok();
            return;
        }
        self.inbox = Some(frame);
        self.stats.rx_count += 1;
    }

    /// One-shot breadcrumb for a just-dropped, parity-failed frame. The
    /// coordinator's manual-write path is the only caller: it needs to
    /// distinguish `InvalidCrc` from a plain `Timeout`, even though the
    /// frame itself was already dropped here and never reached the inbox
    /// (spec.md §4.4 `AwaitControlWriteResponse`, §7 `InvalidCrc`).
    pub fn take_parity_failure(&mut self) -> bool {
        core::mem::replace(&mut self.last_parity_failure, false)
    }

    /// Count a link-layer rejection (`BadParity`, `ManchesterError`, etc.)
    /// that never produced a frame at all.
    pub fn record_link_error(&mut self) {
        self.stats.error_count += 1;
    }

    pub fn record_timeout(&mut self) {
        self.stats.timeout_count += 1;
    }

    /// Link-TX side: pull the next frame to physically transmit, marking
    /// the port busy until [`Port::tx_complete`].
    pub fn take_pending_outgoing(&mut self) -> Option<Frame> {
        let frame = self.pending_outgoing.take();
        if frame.is_some() {
            self.tx_busy = true;
        }
        frame
    }

    pub fn tx_complete(&mut self) {
        self.tx_busy = false;
        self.stats.tx_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::MessageType;

    #[test]
    fn slave_facing_accepts_requests_rejects_responses() {
        let mut port = Port::new(Role::SlaveFacing);
        port.deliver(Frame::build(MessageType::ReadData, 0, 0));
        assert!(port.try_recv().is_some());
        assert_eq!(port.stats().rx_count, 1);

        port.deliver(Frame::build(MessageType::ReadAck, 0, 0));
        assert!(port.try_recv().is_none());
        assert_eq!(port.stats().error_count, 1);
    }

    #[test]
    fn master_facing_accepts_responses_rejects_requests() {
        let mut port = Port::new(Role::MasterFacing);
        port.deliver(Frame::build(MessageType::ReadAck, 25, 0));
        assert!(port.try_recv().is_some());
        port.deliver(Frame::build(MessageType::WriteData, 1, 0));
        assert_eq!(port.stats().error_count, 1);
    }

    #[test]
    fn send_fails_fast_when_busy() {
        let mut port = Port::new(Role::MasterFacing);
        port.send(Frame::build(MessageType::ReadData, 0, 0)).unwrap();
        let err = port.send(Frame::build(MessageType::ReadData, 1, 0));
        assert_eq!(err, Err(GatewayError::Busy));
        let taken = port.take_pending_outgoing();
        assert!(taken.is_some());
        assert!(port.is_tx_busy());
        port.tx_complete();
        assert!(!port.is_tx_busy());
        assert_eq!(port.stats().tx_count, 1);
    }

    #[test]
    fn inbox_is_a_single_slot() {
        let mut port = Port::new(Role::SlaveFacing);
        port.deliver(Frame::build(MessageType::ReadData, 0, 1));
        port.deliver(Frame::build(MessageType::ReadData, 0, 2));
        let f = port.try_recv().unwrap();
        assert_eq!(f.data_value(), 2); // latest overwrites, single slot
        assert!(port.try_recv().is_none());
    }
}

//! Error taxonomy for the OpenTherm gateway core (spec.md §7).
//!
//! Link-layer errors never leave the link: they are counted on
//! [`crate::port::PortStats`] and dropped. Only the coordinator-observable
//! errors below are returned to callers (manual-write futures, `tick`).

use thiserror::Error;

/// Link-layer frame rejection reasons (spec.md §4.2 "Failure semantics").
/// Always counted, never surfaced as a frame to the coordinator.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("no transitions within the inter-frame gap")]
    NoFrame,
    #[error("fewer than 66 half-bits before idle")]
    FrameTooShort,
    #[error("no start bit found in half-bit vector")]
    Unsynced,
    #[error("more than one invalid Manchester pair")]
    ManchesterError,
    #[error("even-parity check failed")]
    BadParity,
    #[error("message type not valid for this port's role")]
    WrongRole,
}

/// Coordinator- and manual-write-observable errors (spec.md §7).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// TX requested while a previous TX is still in flight.
    #[error("link busy: previous transmission still in flight")]
    Busy,
    /// No response arrived within the applicable deadline (900ms coordinator
    /// turnaround, 2s manual-write deadline).
    #[error("timed out waiting for a response")]
    Timeout,
    /// Response parity was fine and the `DID` matched, but the message type
    /// was `DataInvalid`/`UnknownDataId`.
    #[error("boiler returned DataInvalid/UnknownDataId")]
    InvalidResponse,
    /// Response parity failed (manual-write only; coordinator passthrough
    /// drops these at the link layer).
    #[error("response failed parity check")]
    InvalidCrc,
    /// The coordinator was stopped while a manual write was outstanding.
    #[error("coordinator stopped with an operation outstanding")]
    Cancelled,
}

pub type GatewayResult<T> = Result<T, GatewayError>;

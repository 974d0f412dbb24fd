//! Core OpenTherm MITM gateway library: hardware-agnostic, testable on the
//! host. The `esp32` feature additionally pulls in [`hal`], the ESP-IDF
//! GPIO/timer glue used by the `opentherm-gateway` binary.

pub mod config;
pub mod control;
pub mod coordinator;
pub mod diagnostics;
pub mod error;
pub mod frame;
pub mod manchester;
pub mod port;

#[cfg(feature = "esp32")]
pub mod hal;

pub use config::{CoordinatorConfig, LinkConfig, Mode, PinConfig};
pub use control::{ControlSnapshot, ControlState};
pub use coordinator::{Coordinator, Direction, GatewayStatus, Source};
pub use diagnostics::{DiagnosticEntry, Diagnostics, SensorKey};
pub use error::{GatewayError, GatewayResult, LinkError};
pub use frame::{Frame, MessageType};
pub use port::{Port, PortStats, Role};

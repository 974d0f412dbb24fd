//! ESP32 GPIO/timer glue (spec.md §9 "ISR enqueues timestamp, decoder runs
//! later off-context"). Gated behind the `esp32` Cargo feature so the core
//! library (everything else in this crate) stays host-testable.
//!
//! Each bus pin gets a GPIO interrupt on both edges. The interrupt handler
//! does the absolute minimum: read `esp_timer_get_time()`, read the new
//! pin level, push `(timestamp_us, level)` onto a small lock-free-ish
//! queue. Nothing else runs in interrupt context — in particular, no
//! Manchester decoding and no shared mutable "status enum" a stale ISR
//! write could corrupt (spec.md §9, the defect this crate avoids
//! repeating). [`EdgeQueue::drain_into`] does the actual decode, called
//! from the regular tick loop in `main.rs`.

use std::sync::Arc;

use embedded_hal::digital::v2::OutputPin;
use esp_idf_hal::gpio::{Gpio, Input, InterruptType, Pull};
use esp_idf_hal::mutex::Mutex;
use esp_idf_sys::EspError;

use crate::error::LinkError;
use crate::manchester::{self, EdgeAccumulator, LinePulse};
use crate::port::Port;

const EDGE_QUEUE_CAPACITY: usize = 96;

/// A TX pin. `crate::manchester::transmit`/`activate_bus` already apply
/// [`manchester::to_electrical`] before calling [`LinePulse::set_level`],
/// so this impl is a dumb pass-through — `invert_tx` is kept only so
/// callers building a [`PortHal`] know which inversion to hand to those
/// functions (see [`activate_both`]).
pub struct TxPin<P: OutputPin> {
    pin: P,
    invert_tx: bool,
}

impl<P: OutputPin> TxPin<P> {
    pub fn new(pin: P, invert_tx: bool) -> Self {
        Self { pin, invert_tx }
    }
}

impl<P: OutputPin> LinePulse for TxPin<P> {
    fn set_level(&mut self, electrical_high: bool) {
        let _ = if electrical_high {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };
    }

    fn delay_us(&mut self, us: u32) {
        esp_idf_hal::delay::Ets::delay_us(us);
    }
}

/// One captured bus transition, timestamped by `esp_timer_get_time()`
/// (microsecond, monotonic, safe to call from interrupt context).
#[derive(Debug, Copy, Clone)]
struct Edge {
    timestamp_us: i64,
    level_electrical: bool,
}

/// Shared between the GPIO interrupt handler and the tick loop. The
/// interrupt only ever pushes; the tick loop only ever drains — no byte of
/// decode state is reachable from interrupt context.
struct EdgeQueueInner {
    edges: heapless::Deque<Edge, EDGE_QUEUE_CAPACITY>,
}

pub struct EdgeQueue {
    inner: Arc<Mutex<EdgeQueueInner>>,
    invert_rx: bool,
}

impl EdgeQueue {
    fn new(invert_rx: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(EdgeQueueInner {
                edges: heapless::Deque::new(),
            })),
            invert_rx,
        }
    }

    fn handle(&self) -> Arc<Mutex<EdgeQueueInner>> {
        self.inner.clone()
    }

    /// Drain every queued edge, replaying it through a fresh
    /// [`EdgeAccumulator`], decode the result, and hand a successful frame
    /// to `port.deliver`. Link-layer failures are counted on the port and
    /// otherwise ignored (spec.md §4.2 "failures are counted, never
    /// surfaced as a frame").
    ///
    /// Called once per tick from the non-interrupt main loop, after the
    /// idle gap (`manchester::FRAME_IDLE_GAP_US`) has elapsed with no new
    /// edges — the caller is responsible for that timing decision, since
    /// it alone knows the wall clock.
    pub fn drain_into(&self, port: &mut Port) {
        let edges: std::vec::Vec<Edge> = {
            let mut guard = self.inner.lock();
            let mut out = std::vec::Vec::new();
            while let Some(e) = guard.edges.pop_front() {
                out.push(e);
            }
            out
        };
        if edges.is_empty() {
            return;
        }
        let mut acc = EdgeAccumulator::new(self.invert_rx);
        let mut prev_ts: Option<i64> = None;
        for edge in &edges {
            let duration_us = prev_ts.map(|t| (edge.timestamp_us - t).max(0) as u32);
            if acc.on_edge(duration_us, edge.level_electrical).is_err() {
                port.record_link_error();
                return;
            }
            prev_ts = Some(edge.timestamp_us);
        }
        match acc.finalize() {
            Ok(samples) => match crate::manchester::decode_half_bits(&samples) {
                Ok(frame) => port.deliver(frame),
                Err(_) => port.record_link_error(),
            },
            Err(LinkError::NoFrame) => {}
            Err(_) => port.record_link_error(),
        }
    }
}

/// An RX pin with edge-triggered capture (spec.md §9). `subscribe` is
/// `unsafe` because the closure runs in interrupt context: it must not
/// allocate, block, or touch anything but the queue push below. The level
/// read uses the raw `gpio_get_level(pin_num)` FFI call rather than the
/// typed `Gpio<Input>` handle, since that handle is mutably borrowed to
/// register the interrupt itself and cannot also be touched from inside
/// the closure it owns.
pub struct RxPin {
    _pin: Gpio<Input>,
    queue: EdgeQueue,
}

impl RxPin {
    pub fn new(mut pin: Gpio<Input>, pin_num: i32, invert_rx: bool) -> Result<Self, EspError> {
        pin.set_pull(Pull::Up)?;
        pin.set_interrupt_type(InterruptType::AnyEdge)?;
        let queue = EdgeQueue::new(invert_rx);
        let handle = queue.handle();
        unsafe {
            pin.subscribe(move || {
                let timestamp_us = esp_idf_sys::esp_timer_get_time();
                let level_electrical = esp_idf_sys::gpio_get_level(pin_num) != 0;
                if let Some(mut guard) = handle.try_lock() {
                    if guard.edges.is_full() {
                        guard.edges.pop_front();
                    }
                    let _ = guard.edges.push_back(Edge {
                        timestamp_us,
                        level_electrical,
                    });
                }
            })?;
        }
        pin.enable_interrupt()?;
        Ok(Self { _pin: pin, queue })
    }

    pub fn queue(&self) -> &EdgeQueue {
        &self.queue
    }
}

/// Both GPIO halves of one OpenTherm port: TX pin plus an interrupt-driven
/// RX pin feeding a [`Port`]'s inbox via [`EdgeQueue::drain_into`].
pub struct PortHal<P: OutputPin> {
    pub tx: TxPin<P>,
    pub rx: RxPin,
}

impl<P: OutputPin> PortHal<P> {
    pub fn new(
        tx_pin: P,
        rx_pin: Gpio<Input>,
        rx_pin_num: i32,
        link: crate::config::LinkConfig,
    ) -> Result<Self, EspError> {
        Ok(Self {
            tx: TxPin::new(tx_pin, link.invert_tx),
            rx: RxPin::new(rx_pin, rx_pin_num, link.invert_rx)?,
        })
    }

    /// Pull the latest decoded frame (if any) into `port`, then bring the
    /// bus up for TX if `port.take_pending_outgoing()` has something
    /// queued.
    pub fn service(&mut self, port: &mut Port) {
        self.rx.queue().drain_into(port);
        if let Some(frame) = port.take_pending_outgoing() {
            manchester::transmit(&mut self.tx, frame, self.tx.invert_tx);
            port.tx_complete();
        }
    }
}

/// Hold both buses at logical HIGH for the mandatory bus-activation delay
/// before the first TX after boot (spec.md §4.2). `main.rs` calls this
/// once, after both [`PortHal`]s have been constructed from `PinConfig`.
pub fn activate_both<P: OutputPin>(thermostat: &mut PortHal<P>, boiler: &mut PortHal<P>) {
    let invert_tx = thermostat.tx.invert_tx;
    manchester::activate_bus(&mut thermostat.tx, invert_tx);
    let invert_tx = boiler.tx.invert_tx;
    manchester::activate_bus(&mut boiler.tx, invert_tx);
}

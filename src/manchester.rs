//! Manchester link layer (spec.md §4.2).
//!
//! This module is pure logic: it has no dependency on `esp-idf-hal` and
//! operates purely on timestamps/durations and logical bus levels, so it
//! builds and tests on the host. `crate::hal` wires it to real GPIO edges
//! on the ESP32 target.
//!
//! Levels here are always *logical* (spec-direct): a logical `1` is
//! low-then-high, a logical `0` is high-then-low, idle is logical HIGH.
//! [`to_electrical`]/[`to_logical`] are the only places polarity inversion
//! is applied — the decode/encode algorithms below never see a raw,
//! possibly-inverted electrical sample.

use crate::error::LinkError;
use crate::frame::Frame;
use heapless::Vec as HVec;

/// Duration of one half-bit, per spec.md §4.2.
pub const HALF_BIT_US: u32 = 500;
/// Per-half-bit timing budget (spec.md §4.2 "the timing budget per
/// half-bit is ±50 µs").
pub const HALF_BIT_TOLERANCE_US: u32 = 50;
/// Bus-activation hold time required before the very first TX after init.
pub const BUS_ACTIVATION_MS: u32 = 900;
/// No transition for this long marks the end of a frame capture.
pub const FRAME_IDLE_GAP_US: u32 = 2_000;
/// Durations shorter than this are rejected as electrical noise rather
/// than accepted as a half-bit (spec.md §9 Open Questions, resolved: see
/// DESIGN.md).
pub const NOISE_FLOOR_US: u32 = 200;

const MIN_HALF_BITS: usize = 66;
const CLEAN_HALF_BITS: usize = 68;

/// Apply the hardware polarity inversion when driving the TX pin: the
/// encoder only ever produces spec-direct logical levels.
pub fn to_electrical(logical_high: bool, invert: bool) -> bool {
    logical_high ^ invert
}

/// Undo the hardware polarity inversion on an RX sample, recovering the
/// spec-direct logical level the decoder expects.
pub fn to_logical(electrical_high: bool, invert: bool) -> bool {
    electrical_high ^ invert
}

/// Encode a 32-bit frame into the 34-symbol / 68-half-bit on-wire sequence:
/// start(`1`), 32 data bits MSB-first, stop(`1`). Values are logical levels
/// (`true` = spec HIGH); apply [`to_electrical`] before driving a pin.
pub fn encode_logical(frame: Frame) -> [bool; 68] {
    let mut out = [false; 68];
    let mut idx = 0;
    let mut push_bit = |bit: bool, out: &mut [bool; 68], idx: &mut usize| {
        // logical 1 = low-then-high, logical 0 = high-then-low
        if bit {
            out[*idx] = false;
            out[*idx + 1] = true;
        } else {
            out[*idx] = true;
            out[*idx + 1] = false;
        }
        *idx += 2;
    };
    push_bit(true, &mut out, &mut idx); // start bit
    let bits = frame.to_bits();
    for i in (0..32).rev() {
        push_bit((bits >> i) & 1 == 1, &mut out, &mut idx);
    }
    push_bit(true, &mut out, &mut idx); // stop bit
    debug_assert_eq!(idx, 68);
    out
}

enum DurationClass {
    Noise,
    Count(u8),
    Ambiguous,
}

fn classify_duration(duration_us: u32) -> DurationClass {
    if duration_us < NOISE_FLOOR_US {
        DurationClass::Noise
    } else if (350..=650).contains(&duration_us) {
        DurationClass::Count(1)
    } else if (850..=1150).contains(&duration_us) {
        DurationClass::Count(2)
    } else {
        // spec.md §9 Open Question #2: the source rounds ambiguous durations
        // to the nearest multiple; this crate instead rejects them (see
        // DESIGN.md for the rationale).
        DurationClass::Ambiguous
    }
}

/// Turns a stream of timestamped bus edges into the half-bit sample vector
/// spec.md §3 describes, debouncing sub-noise-floor glitches and applying
/// RX polarity inversion once, at the boundary.
///
/// The ISR (or `hal` equivalent) owns only: timestamp the edge, read the
/// new pin level, call [`EdgeAccumulator::on_edge`]. All decode logic runs
/// later, off the interrupt context (spec.md §9 "no ISR monkey-patching").
pub struct EdgeAccumulator {
    samples: HVec<bool, 80>,
    invert_rx: bool,
    last_level_electrical: Option<bool>,
    saw_edge: bool,
}

impl EdgeAccumulator {
    pub fn new(invert_rx: bool) -> Self {
        Self {
            samples: HVec::new(),
            invert_rx,
            last_level_electrical: None,
            saw_edge: false,
        }
    }

    /// Feed one bus edge. `duration_us` is the time since the previous edge
    /// (`None` for the first edge of a capture, before which there is
    /// nothing to classify). `new_level_electrical` is the raw pin level
    /// observed immediately after the edge.
    pub fn on_edge(
        &mut self,
        duration_us: Option<u32>,
        new_level_electrical: bool,
    ) -> Result<(), LinkError> {
        if let (Some(d), Some(prev_electrical)) = (duration_us, self.last_level_electrical) {
            match classify_duration(d) {
                DurationClass::Noise => return Ok(()), // debounce: ignore, level unchanged
                DurationClass::Count(n) => {
                    let logical = to_logical(prev_electrical, self.invert_rx);
                    for _ in 0..n {
                        let _ = self.samples.push(logical);
                    }
                }
                DurationClass::Ambiguous => return Err(LinkError::ManchesterError),
            }
        }
        self.last_level_electrical = Some(new_level_electrical);
        self.saw_edge = true;
        Ok(())
    }

    /// Call once no transition has occurred for [`FRAME_IDLE_GAP_US`]:
    /// finalizes the capture, appending the tail half-bit (the stop bit's
    /// trailing high, which never has a following edge of its own).
    pub fn finalize(self) -> Result<HVec<bool, 80>, LinkError> {
        if !self.saw_edge {
            return Err(LinkError::NoFrame);
        }
        let mut samples = self.samples;
        if let Some(last) = self.last_level_electrical {
            let _ = samples.push(to_logical(last, self.invert_rx));
        }
        if samples.len() < MIN_HALF_BITS {
            return Err(LinkError::FrameTooShort);
        }
        Ok(samples)
    }
}

enum FoldResult {
    Ok(u32, usize),
    Violation(usize),
    OutOfData,
}

fn try_fold(samples: &[bool], start: usize) -> FoldResult {
    let mut bits: u32 = 0;
    let mut idx = start + 2;
    for _ in 0..32 {
        if idx + 1 >= samples.len() {
            return FoldResult::OutOfData;
        }
        let (a, b) = (samples[idx], samples[idx + 1]);
        let bit = match (a, b) {
            (false, true) => 1u32,
            (true, false) => 0u32,
            _ => return FoldResult::Violation(idx),
        };
        bits = (bits << 1) | bit;
        idx += 2;
    }
    FoldResult::Ok(bits, idx)
}

/// Decode a half-bit sample vector into a [`Frame`] (spec.md §4.2 "Frame
/// extraction from half-bit vector", steps 1–5).
///
/// On a Manchester violation the decoder re-synchronises by advancing a
/// single half-bit and retrying the start-bit search — *not* by skipping
/// two, which the source implementation did and which permanently
/// misaligns the decoder after one glitch (spec.md §9, a defect this crate
/// corrects).
pub fn decode_half_bits(samples: &[bool]) -> Result<Frame, LinkError> {
    if samples.len() < MIN_HALF_BITS {
        return Err(LinkError::FrameTooShort);
    }
    let mut pos = 0usize;
    let mut tried_start = false;
    loop {
        if pos + 2 > samples.len() {
            return if tried_start {
                Err(LinkError::ManchesterError)
            } else {
                Err(LinkError::Unsynced)
            };
        }
        if !(!samples[pos] && samples[pos + 1]) {
            // Not a `(0,1)` pair: not a start bit at this position. (A
            // `(1,0)` pair would be an inverted-polarity start bit, but
            // polarity is already resolved before this function runs.)
            pos += 1;
            continue;
        }
        tried_start = true;
        match try_fold(samples, pos) {
            FoldResult::Ok(bits, final_idx) => {
                if final_idx + 1 < samples.len() {
                    let (a, b) = (samples[final_idx], samples[final_idx + 1]);
                    if !((!a && b) || (a && !b)) {
                        log::debug!("decoded frame without a clean trailing stop bit");
                    }
                }
                let frame = Frame::parse(bits);
                return if frame.parity_ok() {
                    Ok(frame)
                } else {
                    Err(LinkError::BadParity)
                };
            }
            FoldResult::Violation(idx) => {
                pos = idx + 1;
                continue;
            }
            FoldResult::OutOfData => return Err(LinkError::FrameTooShort),
        }
    }
}

/// Drives one half-bit's worth of pulses on a hardware pin. Implemented
/// by `crate::hal` over `esp-idf-hal` GPIO; a test double lives in this
/// module's test suite.
pub trait LinePulse {
    fn set_level(&mut self, high: bool);
    fn delay_us(&mut self, us: u32);
}

/// Hold the line at logical HIGH for the mandatory bus-activation delay
/// before the first TX after initialisation (spec.md §4.2).
pub fn activate_bus<P: LinePulse>(pin: &mut P, invert_tx: bool) {
    pin.set_level(to_electrical(true, invert_tx));
    pin.delay_us(BUS_ACTIVATION_MS * 1_000);
}

/// Hardware-timed TX of one frame (spec.md §4.2 "TX path"). A port must
/// not allow RX to observe its own transmission; see `crate::port`.
pub fn transmit<P: LinePulse>(pin: &mut P, frame: Frame, invert_tx: bool) {
    for logical in encode_logical(frame) {
        pin.set_level(to_electrical(logical, invert_tx));
        pin.delay_us(HALF_BIT_US);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::MessageType;

    struct RecordingPin {
        levels: std::vec::Vec<bool>,
    }
    impl RecordingPin {
        fn new() -> Self {
            Self {
                levels: std::vec::Vec::new(),
            }
        }
    }
    impl LinePulse for RecordingPin {
        fn set_level(&mut self, high: bool) {
            self.levels.push(high);
        }
        fn delay_us(&mut self, _us: u32) {}
    }

    /// Re-derives edges from a logical sample vector (as if a real bus had
    /// produced exactly these levels) and replays them through
    /// `EdgeAccumulator`, to exercise the same code path the hardware ISR
    /// would drive.
    fn feed_samples(samples: &[bool], invert_rx: bool) -> Result<Frame, LinkError> {
        let mut acc = EdgeAccumulator::new(invert_rx);
        let mut iter = samples.iter();
        let mut prev_level = match iter.next() {
            Some(&l) => l,
            None => return Err(LinkError::NoFrame),
        };
        acc.on_edge(None, to_electrical(prev_level, invert_rx)).unwrap();
        let mut run = 1u32;
        for &level in iter {
            if level == prev_level {
                run += 1;
            } else {
                acc.on_edge(Some(run * HALF_BIT_US), to_electrical(level, invert_rx))
                    .unwrap();
                prev_level = level;
                run = 1;
            }
        }
        let vec = acc.finalize()?;
        decode_half_bits(&vec)
    }

    #[test]
    fn self_loopback_round_trip() {
        let frame = Frame::build(MessageType::ReadData, 25, 0x0b80);
        let levels = encode_logical(frame);
        let decoded = feed_samples(&levels, false).unwrap();
        assert_eq!(decoded.to_bits(), frame.to_bits());
    }

    #[test]
    fn loopback_for_every_message_type() {
        for t in [
            MessageType::ReadData,
            MessageType::WriteData,
            MessageType::ReadAck,
            MessageType::WriteAck,
            MessageType::DataInvalid,
            MessageType::UnknownDataId,
        ] {
            let frame = Frame::build(t, 42, 0x1234);
            let levels = encode_logical(frame);
            let decoded = feed_samples(&levels, false).unwrap();
            assert_eq!(decoded.to_bits(), frame.to_bits());
        }
    }

    #[test]
    fn polarity_symmetry() {
        // encoding with invert_tx=true and decoding with invert_rx=true is
        // equivalent to both-false, provided the wire inversion is modeled:
        // here we model it explicitly via to_electrical/to_logical.
        let frame = Frame::build(MessageType::ReadAck, 1, 0x2d00);
        let logical_levels = encode_logical(frame);
        let electrical: std::vec::Vec<bool> = logical_levels
            .iter()
            .map(|&l| to_electrical(l, true))
            .collect();
        // Decoding must un-invert before reaching decode_half_bits.
        let logical_again: std::vec::Vec<bool> =
            electrical.iter().map(|&e| to_logical(e, true)).collect();
        assert_eq!(logical_again, logical_levels.to_vec());
        let decoded = decode_half_bits(&logical_again).unwrap();
        assert_eq!(decoded.to_bits(), frame.to_bits());
    }

    #[test]
    fn resync_recovers_from_single_spurious_edge() {
        // A spurious start-bit-like prefix followed by exactly one invalid
        // pair, immediately followed by the real frame's own encoding. The
        // true start bit sits at `violation_idx + 1`: advancing by one half
        // bit (not two, which the source did) lands on it directly.
        let frame = Frame::build(MessageType::ReadData, 25, 0x0b80);
        let real = encode_logical(frame);
        let mut samples: std::vec::Vec<bool> = std::vec::Vec::new();
        samples.push(false); // looks like a start bit...
        samples.push(true);
        samples.push(true); // ...but this pair is an invalid (1,1)
        samples.push(true); //    Manchester violation.
        samples.extend_from_slice(&real);

        let decoded = decode_half_bits(&samples).unwrap();
        assert_eq!(decoded.to_bits(), frame.to_bits());
    }

    #[test]
    fn rejects_noise_floor_glitch() {
        let mut acc = EdgeAccumulator::new(false);
        acc.on_edge(None, false).unwrap();
        // A 50us glitch is below the 200us noise floor: ignored.
        acc.on_edge(Some(50), true).unwrap();
        acc.on_edge(Some(500), false).unwrap();
        // Still only 2 edges counted toward real transitions (the 50us one
        // was swallowed), so very few samples accumulate; just assert no
        // error was raised for the glitch itself (already asserted via
        // `.unwrap()` above).
    }

    #[test]
    fn frame_too_short_is_rejected() {
        let samples = [false; 10];
        assert_eq!(decode_half_bits(&samples), Err(LinkError::FrameTooShort));
    }

    #[test]
    fn unsynced_when_no_start_bit_present() {
        // All-high half-bit vector (no low-to-high start pattern anywhere).
        let samples = [true; 70];
        assert_eq!(decode_half_bits(&samples), Err(LinkError::Unsynced));
    }

    #[test]
    fn transmit_drives_expected_level_count() {
        let mut pin = RecordingPin::new();
        transmit(&mut pin, Frame::build(MessageType::ReadData, 0, 0), false);
        assert_eq!(pin.levels.len(), 68);
    }
}

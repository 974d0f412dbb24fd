//! OpenTherm frame codec (spec.md §3, §4.1).
//!
//! Layout MSB→LSB: `P:1 | T:3 | S:4 | DID:8 | DV:16`. `P` is set so the
//! population count of the full 32 bits is even. `S` is always zero.

use core::fmt;

/// The 3-bit message-type field (spec.md §3 "Message-type encoding").
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MessageType {
    ReadData,
    WriteData,
    InvalidData,
    ReadAck,
    WriteAck,
    DataInvalid,
    UnknownDataId,
    /// Bit pattern `3`, reserved in the OpenTherm spec and never produced
    /// by this crate; kept so `from_bits` is total.
    Reserved,
}

impl MessageType {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b111 {
            0 => MessageType::ReadData,
            1 => MessageType::WriteData,
            2 => MessageType::InvalidData,
            3 => MessageType::Reserved,
            4 => MessageType::ReadAck,
            5 => MessageType::WriteAck,
            6 => MessageType::DataInvalid,
            7 => MessageType::UnknownDataId,
            _ => unreachable!("3-bit field"),
        }
    }

    pub fn to_bits(self) -> u8 {
        match self {
            MessageType::ReadData => 0,
            MessageType::WriteData => 1,
            MessageType::InvalidData => 2,
            MessageType::Reserved => 3,
            MessageType::ReadAck => 4,
            MessageType::WriteAck => 5,
            MessageType::DataInvalid => 6,
            MessageType::UnknownDataId => 7,
        }
    }

    pub fn is_request(self) -> bool {
        matches!(
            self,
            MessageType::ReadData | MessageType::WriteData | MessageType::InvalidData
        )
    }

    pub fn is_response(self) -> bool {
        matches!(
            self,
            MessageType::ReadAck
                | MessageType::WriteAck
                | MessageType::DataInvalid
                | MessageType::UnknownDataId
        )
    }
}

/// A 32-bit OpenTherm data frame (the data portion of the 34-bit on-wire
/// sequence; see GLOSSARY).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Frame(u32);

impl Frame {
    /// Assemble a frame and set the parity bit so the full 32 bits has an
    /// even population count (spec.md §4.1 `build`).
    pub fn build(msg_type: MessageType, did: u8, dv: u16) -> Self {
        let body = ((msg_type.to_bits() as u32) << 28) | ((did as u32) << 16) | (dv as u32);
        let parity = (body.count_ones() % 2) as u32;
        Frame(body | (parity << 31))
    }

    /// Parse raw 32 bits into a `Frame`. Total: never fails, callers check
    /// `parity_ok`/`is_valid_request`/`is_valid_response` afterwards.
    pub fn parse(bits: u32) -> Self {
        Frame(bits)
    }

    pub fn to_bits(self) -> u32 {
        self.0
    }

    pub fn parity_ok(self) -> bool {
        self.0.count_ones() % 2 == 0
    }

    pub fn message_type(self) -> MessageType {
        MessageType::from_bits(((self.0 >> 28) & 0b111) as u8)
    }

    pub fn data_id(self) -> u8 {
        ((self.0 >> 16) & 0xff) as u8
    }

    pub fn data_value(self) -> u16 {
        (self.0 & 0xffff) as u16
    }

    pub fn is_valid_request(self) -> bool {
        self.parity_ok() && self.message_type().is_request()
    }

    pub fn is_valid_response(self) -> bool {
        self.parity_ok() && self.message_type().is_response()
    }

    /// `f8.8`: signed 8.8 fixed point, value = `(i16)DV / 256`.
    pub fn as_f8_8(self) -> f32 {
        (self.data_value() as i16) as f32 / 256.0
    }

    pub fn as_u16(self) -> u16 {
        self.data_value()
    }

    pub fn as_s16(self) -> i16 {
        self.data_value() as i16
    }

    pub fn high_byte(self) -> u8 {
        (self.data_value() >> 8) as u8
    }

    pub fn low_byte(self) -> u8 {
        (self.data_value() & 0xff) as u8
    }

    /// Build an f8.8 payload from a float, truncating to the nearest 1/256th.
    pub fn f8_8_bits(value: f32) -> u16 {
        ((value * 256.0) as i16) as u16
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08x} (type={:?} did={} dv=0x{:04x})",
            self.0,
            self.message_type(),
            self.data_id(),
            self.data_value()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_sets_even_parity() {
        for did in [0u8, 1, 25, 255] {
            for dv in [0u16, 1, 0x0b80, 0xffff] {
                let f = Frame::build(MessageType::ReadData, did, dv);
                assert!(f.parity_ok(), "did={did} dv={dv:#x}");
            }
        }
    }

    #[test]
    fn parity_round_trip_proptest_style() {
        // spec.md §8 "Parity round-trip" invariant, deterministic sampling
        // of the space (full proptest coverage lives in the dev-dependency
        // proptest suite below).
        for t in [
            MessageType::ReadData,
            MessageType::WriteData,
            MessageType::InvalidData,
            MessageType::ReadAck,
            MessageType::WriteAck,
            MessageType::DataInvalid,
            MessageType::UnknownDataId,
        ] {
            for did in 0..=255u8 {
                let f = Frame::build(t, did, 0xBEEF);
                assert!(f.parity_ok());
            }
        }
    }

    #[test]
    fn scenario_status_request_wire_value() {
        // spec.md §8 scenario 1: READ_DATA DID=0 DV=0 on the wire is
        // 0x80000000 once parity is set.
        let f = Frame::build(MessageType::ReadData, 0, 0);
        assert_eq!(f.to_bits(), 0x8000_0000);
    }

    #[test]
    fn scenario_status_response_flame_on() {
        let f = Frame::parse(0x4000_0004);
        assert!(f.is_valid_response());
        assert_eq!(f.message_type(), MessageType::ReadAck);
        assert_eq!(f.data_id(), 0);
        assert_eq!(f.data_value(), 4);
    }

    #[test]
    fn f8_8_decodes_positive_and_negative() {
        let f = Frame::build(MessageType::ReadAck, 25, 0x0B80);
        assert!((f.as_f8_8() - 46.0).abs() < 1e-3);
        let neg = Frame::build(MessageType::ReadAck, 33, (-40i16 * 256) as u16);
        assert!((neg.as_f8_8() + 40.0).abs() < 1e-3);
    }

    #[test]
    fn high_low_byte_split() {
        let f = Frame::build(MessageType::ReadAck, 15, 0x1234);
        assert_eq!(f.high_byte(), 0x12);
        assert_eq!(f.low_byte(), 0x34);
    }

    #[test]
    fn request_response_role_checks() {
        let req = Frame::build(MessageType::ReadData, 0, 0);
        assert!(req.is_valid_request());
        assert!(!req.is_valid_response());
        let resp = Frame::build(MessageType::ReadAck, 0, 0);
        assert!(resp.is_valid_response());
        assert!(!resp.is_valid_request());
    }

    #[test]
    fn corrupted_parity_is_rejected() {
        // spec.md §8 scenario 6: flip bit 0 of a valid frame.
        let f = Frame::build(MessageType::ReadAck, 0, 4);
        let corrupted = Frame::parse(f.to_bits() ^ 0x1);
        assert!(!corrupted.parity_ok());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn parity_round_trip(did in 0u8..=255, dv in 0u16..=65535, t in 0u8..8) {
            let frame = Frame::build(MessageType::from_bits(t), did, dv);
            prop_assert!(frame.parity_ok());
        }
    }
}

//! Frame encoding/decoding
//!
//! Outbound (request) frame:
//! - 2 bytes: start marker `AA 55`
//! - 1 byte: command code
//! - 2 bytes: payload length (little-endian)
//! - N bytes: payload
//! - 1 byte: checksum
//!
//! Inbound (response) frame is the same without the command byte; the
//! protocol is strictly request/response, so the awaiting command decides
//! how the payload is read.
//!
//! The checksum makes every byte after the marker, checksum included, sum
//! to zero mod 256.

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use super::commands::{from_fixed, to_fixed, CommandKind, HUNDREDTHS, TENTHS};
use super::{Command, DecodeError, MAX_PAYLOAD_LEN, RESPONSE_HEADER_LEN, START_MARKER};
use crate::engine::{ProtectionStatus, RegulatorFlags};

/// Compact telemetry payload size
pub const COMPACT_TELEMETRY_LEN: usize = 12;

/// Extended telemetry payload size (with status bytes)
pub const EXTENDED_TELEMETRY_LEN: usize = 18;

/// Complete encoded packet, built once and never mutated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
}

impl Frame {
    /// Build a request frame for a command code and payload
    pub fn request(code: u8, payload: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(START_MARKER.len() + 3 + payload.len() + 1);
        bytes.extend_from_slice(&START_MARKER);
        bytes.push(code);
        bytes.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        bytes.extend_from_slice(payload);
        bytes.push(checksum(&bytes[START_MARKER.len()..]));
        Self { bytes }
    }

    /// Build a response frame, as the regulator would send it
    pub fn response(payload: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(RESPONSE_HEADER_LEN + payload.len() + 1);
        bytes.extend_from_slice(&START_MARKER);
        bytes.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        bytes.extend_from_slice(payload);
        bytes.push(checksum(&bytes[START_MARKER.len()..]));
        Self { bytes }
    }

    /// Encoded bytes, marker through checksum
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Take the encoded bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Encoded length in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Never true for a built frame
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Builder for payload bytes
#[derive(Debug, Default)]
pub struct FrameBuilder {
    payload: Vec<u8>,
}

impl FrameBuilder {
    /// Empty payload
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a single byte
    pub fn byte(mut self, b: u8) -> Self {
        self.payload.push(b);
        self
    }

    /// Add a 16-bit value (little-endian)
    pub fn u16_le(mut self, value: u16) -> Self {
        let mut bytes = [0u8; 2];
        LittleEndian::write_u16(&mut bytes, value);
        self.payload.extend_from_slice(&bytes);
        self
    }

    /// Finish without framing
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Wrap the payload into a request frame
    pub fn build_request(self, code: u8) -> Frame {
        Frame::request(code, &self.payload)
    }
}

/// Two's-complement additive checksum: `sum(data) + checksum == 0 (mod 256)`
pub fn checksum(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |acc, b| acc.wrapping_add(*b))
        .wrapping_neg()
}

/// Encode a command into its request frame
pub fn encode(command: &Command) -> Frame {
    Frame::request(command.code(), &command.payload())
}

/// Validate a response header and return the payload length it declares
pub fn parse_header(header: &[u8]) -> Result<usize, DecodeError> {
    if header.len() < RESPONSE_HEADER_LEN {
        return Err(DecodeError::Truncated {
            expected: RESPONSE_HEADER_LEN,
            actual: header.len(),
        });
    }
    if header[..2] != START_MARKER {
        return Err(DecodeError::MalformedHeader {
            found: header[..2].to_vec(),
        });
    }
    let length = LittleEndian::read_u16(&header[2..4]) as usize;
    if length == 0 || length > MAX_PAYLOAD_LEN {
        return Err(DecodeError::LengthOutOfRange(length));
    }
    Ok(length)
}

/// Telemetry as read from a `GetParameters` response
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    /// rpm
    pub engine_speed: u16,
    /// rpm
    pub turbo_speed: u16,
    /// bar
    pub oil_pressure: f64,
    /// bar
    pub boost_pressure: f64,
    /// °C
    pub oil_temperature: f64,
    /// mm
    pub rack_position: f64,
    /// Present only in the extended layout
    pub flags: Option<RegulatorFlags>,
}

impl TelemetryFrame {
    fn from_payload(payload: &[u8]) -> Result<Self, DecodeError> {
        let at = |i: usize| LittleEndian::read_u16(&payload[i..i + 2]);

        if payload.len() >= EXTENDED_TELEMETRY_LEN {
            return Ok(Self {
                engine_speed: at(0),
                rack_position: from_fixed(at(2), HUNDREDTHS),
                oil_temperature: from_fixed(at(4), TENTHS),
                turbo_speed: at(7),
                boost_pressure: from_fixed(at(9), HUNDREDTHS),
                oil_pressure: from_fixed(at(14), HUNDREDTHS),
                flags: Some(RegulatorFlags {
                    boost_limited: payload[6] != 0,
                    stopped: payload[11] != 0,
                    overspeed: payload[12] != 0,
                    oil_alarm: payload[13],
                    target_speed: at(16),
                }),
            });
        }

        if payload.len() >= COMPACT_TELEMETRY_LEN {
            return Ok(Self {
                engine_speed: at(0),
                turbo_speed: at(2),
                oil_pressure: from_fixed(at(4), HUNDREDTHS),
                boost_pressure: from_fixed(at(6), HUNDREDTHS),
                oil_temperature: from_fixed(at(8), TENTHS),
                rack_position: from_fixed(at(10), HUNDREDTHS),
                flags: None,
            });
        }

        Err(DecodeError::PayloadTooShort {
            kind: CommandKind::GetParameters,
            expected: COMPACT_TELEMETRY_LEN,
            actual: payload.len(),
        })
    }

    /// Serialize in the layout the regulator would use
    pub fn to_payload(&self) -> Vec<u8> {
        let builder = FrameBuilder::new();
        match self.flags {
            Some(flags) => builder
                .u16_le(self.engine_speed)
                .u16_le(to_fixed(self.rack_position, HUNDREDTHS))
                .u16_le(to_fixed(self.oil_temperature, TENTHS))
                .byte(u8::from(flags.boost_limited))
                .u16_le(self.turbo_speed)
                .u16_le(to_fixed(self.boost_pressure, HUNDREDTHS))
                .byte(u8::from(flags.stopped))
                .byte(u8::from(flags.overspeed))
                .byte(flags.oil_alarm)
                .u16_le(to_fixed(self.oil_pressure, HUNDREDTHS))
                .u16_le(flags.target_speed),
            None => builder
                .u16_le(self.engine_speed)
                .u16_le(self.turbo_speed)
                .u16_le(to_fixed(self.oil_pressure, HUNDREDTHS))
                .u16_le(to_fixed(self.boost_pressure, HUNDREDTHS))
                .u16_le(to_fixed(self.oil_temperature, TENTHS))
                .u16_le(to_fixed(self.rack_position, HUNDREDTHS)),
        }
        .into_payload()
    }
}

/// Setter acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Setter being acknowledged
    pub kind: CommandKind,
    /// 0 = success, anything else is a device error code
    pub status: u8,
}

impl Ack {
    /// Status byte is zero
    pub fn accepted(&self) -> bool {
        self.status == 0
    }
}

/// Decoded response, tagged by the command it answers
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedResponse {
    /// Answer to `GetParameters`
    Telemetry(TelemetryFrame),
    /// Answer to `GetProtectionStatus`
    Protection(ProtectionStatus),
    /// Answer to any setter
    Ack(Ack),
}

/// Decode a complete response frame for the command awaiting it.
///
/// `bytes` must hold exactly one frame: anything past the checksum byte
/// means the frame boundary is wrong and is rejected.
pub fn decode(bytes: &[u8], kind: CommandKind) -> Result<ParsedResponse, DecodeError> {
    let length = parse_header(bytes)?;
    let total = RESPONSE_HEADER_LEN + length + 1;
    if bytes.len() < total {
        return Err(DecodeError::Truncated {
            expected: total,
            actual: bytes.len(),
        });
    }
    if bytes.len() > total {
        return Err(DecodeError::TrailingBytes {
            expected: total,
            actual: bytes.len(),
        });
    }

    let expected = checksum(&bytes[START_MARKER.len()..total - 1]);
    let actual = bytes[total - 1];
    if expected != actual {
        return Err(DecodeError::ChecksumMismatch { expected, actual });
    }

    let payload = &bytes[RESPONSE_HEADER_LEN..total - 1];
    match kind {
        CommandKind::GetParameters => TelemetryFrame::from_payload(payload).map(ParsedResponse::Telemetry),
        CommandKind::GetProtectionStatus => {
            if payload.len() < ProtectionStatus::PAYLOAD_LEN {
                return Err(DecodeError::PayloadTooShort {
                    kind,
                    expected: ProtectionStatus::PAYLOAD_LEN,
                    actual: payload.len(),
                });
            }
            Ok(ParsedResponse::Protection(ProtectionStatus::from_status_bytes(
                payload[0], payload[1],
            )))
        }
        _ => Ok(ParsedResponse::Ack(Ack {
            kind,
            status: payload[0],
        })),
    }
}

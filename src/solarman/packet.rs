use crate::error::ProtocolError;
use crate::prelude::*;

use nom_derive::{Nom, Parse};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::convert::TryFrom;

pub const FRAME_START: u8 = 0xa5;
pub const FRAME_END: u8 = 0x15;
pub const FRAME_TYPE_INVERTER: u8 = 0x02;

// start(1) + length(2) + control(2) + sequence(2) + logger serial(4)
const HEADER_LEN: usize = 11;
// header + checksum + end; the length field counts everything else
const FRAMING_LEN: usize = 13;
// frame type(1) + sensor type(2) + delivery/power-on/offset times (3 x 4)
const REQUEST_DATA_FIELD_LEN: usize = 15;
// frame type(1) + status(1) + the same three time fields
const RESPONSE_DATA_FIELD_LEN: usize = 14;
const RESPONSE_PAYLOAD_OFFSET: usize = HEADER_LEN + RESPONSE_DATA_FIELD_LEN;
// unit + function + byte count + crc
const MIN_MODBUS_FRAME_LEN: usize = 5;

// {{{ ControlCode
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum ControlCode {
    Request = 0x4510,
    Response = 0x1510,
    // Heartbeat = 0x4710,
    // LoggerInfo = 0x4210,
}
// }}}

#[derive(Debug, Nom)]
#[nom(LittleEndian)]
struct FrameHeader {
    start: u8,
    length: u16,
    control_code: u16,
    sequence: u16,
    logger_serial: u32,
    frame_type: u8,
}

pub struct TcpFrameFactory;
impl TcpFrameFactory {
    /// Builds a client -> logger request frame around a Modbus RTU payload.
    pub fn wrap(payload: &[u8], logger_serial: u32, sequence: u8) -> Vec<u8> {
        let length = (REQUEST_DATA_FIELD_LEN + payload.len()) as u16;

        let mut r = Vec::with_capacity(FRAMING_LEN + length as usize);
        r.push(FRAME_START);
        r.extend_from_slice(&length.to_le_bytes());
        r.extend_from_slice(&u16::from(ControlCode::Request).to_le_bytes());
        r.extend_from_slice(&u16::from(sequence).to_le_bytes());
        r.extend_from_slice(&logger_serial.to_le_bytes());

        r.push(FRAME_TYPE_INVERTER);
        r.extend_from_slice(&[0; 2]); // sensor type
        r.extend_from_slice(&[0; 4]); // delivery time
        r.extend_from_slice(&[0; 4]); // power on time
        r.extend_from_slice(&[0; 4]); // offset time

        r.extend_from_slice(payload);

        r.push(0); // checksum placeholder
        r.push(FRAME_END);

        Self::apply_checksum(&mut r);

        r
    }

    /// Builds the logger -> client acknowledgment frame a real data logger
    /// sends back. Used by the fake logger in tests and for replaying captures.
    pub fn wrap_response(payload: &[u8], logger_serial: u32, sequence: u8) -> Vec<u8> {
        let length = (RESPONSE_DATA_FIELD_LEN + payload.len()) as u16;

        let mut r = Vec::with_capacity(FRAMING_LEN + length as usize);
        r.push(FRAME_START);
        r.extend_from_slice(&length.to_le_bytes());
        r.extend_from_slice(&u16::from(ControlCode::Response).to_le_bytes());
        r.extend_from_slice(&u16::from(sequence).to_le_bytes());
        r.extend_from_slice(&logger_serial.to_le_bytes());

        r.push(FRAME_TYPE_INVERTER);
        r.push(0x01); // status: ok
        r.extend_from_slice(&[0; 12]); // delivery, power on and offset times

        r.extend_from_slice(payload);

        r.push(0);
        r.push(FRAME_END);

        Self::apply_checksum(&mut r);

        r
    }

    /// Sum of every byte between the start marker and the checksum slot.
    pub fn checksum(frame: &[u8]) -> u8 {
        if frame.len() < 3 {
            return 0;
        }

        frame[1..frame.len() - 2]
            .iter()
            .fold(0u8, |acc, b| acc.wrapping_add(*b))
    }

    fn apply_checksum(frame: &mut [u8]) {
        let len = frame.len();
        frame[len - 2] = Self::checksum(frame);
    }
}

pub struct Parser;
impl Parser {
    /// Validates a logger response and returns the Modbus RTU frame it carries.
    ///
    /// `lenient` tolerates a length field that disagrees with the number of
    /// bytes received (the frame is clamped to the declared length) and a
    /// sequence number that does not echo the request. Every other check is
    /// always fatal.
    pub fn unwrap(
        frame: &[u8],
        expected_sequence: Option<u8>,
        logger_serial: u32,
        lenient: bool,
    ) -> Result<&[u8], ProtocolError> {
        if frame.len() < 3 {
            return Err(ProtocolError::LengthMismatch {
                actual: frame.len(),
                declared: 0,
            });
        }

        let declared = Utils::le_u16ify(frame, 1) as usize;
        let mut frame_len = frame.len();

        if frame_len != FRAMING_LEN + declared {
            let err = ProtocolError::LengthMismatch {
                actual: frame_len,
                declared,
            };
            // can only clamp down; a short read is unrecoverable
            if !lenient || FRAMING_LEN + declared > frame_len {
                return Err(err);
            }

            debug!("{}, clamping", err);
            frame_len = FRAMING_LEN + declared;
        }

        let frame = &frame[..frame_len];

        if frame[0] != FRAME_START || frame[frame_len - 1] != FRAME_END {
            return Err(ProtocolError::InvalidFraming);
        }

        let expected = TcpFrameFactory::checksum(frame);
        if frame[frame_len - 2] != expected {
            return Err(ProtocolError::ChecksumMismatch {
                got: frame[frame_len - 2],
                expected,
            });
        }

        let (_, header) = FrameHeader::parse(frame).map_err(|_| ProtocolError::LengthMismatch {
            actual: frame_len,
            declared,
        })?;
        debug_assert_eq!(header.start, FRAME_START);
        debug_assert_eq!(header.length as usize, declared);

        // only the low byte is echoed reliably
        let sequence = (header.sequence & 0xff) as u8;
        if expected_sequence != Some(sequence) && !lenient {
            return Err(ProtocolError::SequenceMismatch {
                got: sequence,
                expected: expected_sequence.unwrap_or(0),
            });
        }

        if header.logger_serial != logger_serial {
            return Err(ProtocolError::SerialMismatch {
                got: header.logger_serial,
            });
        }

        match ControlCode::try_from(header.control_code) {
            Ok(ControlCode::Response) => {}
            _ => return Err(ProtocolError::ControlCodeMismatch(header.control_code)),
        }

        if header.frame_type != FRAME_TYPE_INVERTER {
            return Err(ProtocolError::FrameTypeMismatch(header.frame_type));
        }

        let payload_end = frame_len - 2;
        let payload = if payload_end > RESPONSE_PAYLOAD_OFFSET {
            &frame[RESPONSE_PAYLOAD_OFFSET..payload_end]
        } else {
            &[]
        };

        if payload.len() < MIN_MODBUS_FRAME_LEN {
            return Err(ProtocolError::PayloadTooShort(payload.len()));
        }

        Ok(payload)
    }
}

/// Stateful wrapper remembering the logger serial and the last sequence
/// number sent, so a response can be matched to its request.
#[derive(Clone, Debug)]
pub struct TunnelCodec {
    logger_serial: u32,
    sequence: Option<u8>,
}

impl TunnelCodec {
    pub fn new(logger_serial: u32) -> Self {
        Self {
            logger_serial,
            sequence: None,
        }
    }

    /// Last sequence number handed out, if any.
    pub fn sequence(&self) -> Option<u8> {
        self.sequence
    }

    // 1..=255, never 0
    fn next_sequence(&mut self) -> u8 {
        let next = match self.sequence {
            None | Some(255) => 1,
            Some(n) => n + 1,
        };
        self.sequence = Some(next);
        next
    }

    pub fn wrap(&mut self, payload: &[u8]) -> Vec<u8> {
        let sequence = self.next_sequence();
        TcpFrameFactory::wrap(payload, self.logger_serial, sequence)
    }

    pub fn unwrap<'a>(&self, frame: &'a [u8], lenient: bool) -> Result<&'a [u8], ProtocolError> {
        Parser::unwrap(frame, self.sequence, self.logger_serial, lenient)
    }
}

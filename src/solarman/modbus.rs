use crate::error::ModbusError;
use crate::prelude::*;

use num_enum::{IntoPrimitive, TryFromPrimitive};

// Only holding register reads are ever sent.
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum FunctionCode {
    ReadHoldingRegisters = 0x03,
}

// unit + function + byte count
const RESPONSE_HEADER_LEN: usize = 3;

pub struct ModbusCodec;
impl ModbusCodec {
    /// Modbus RTU CRC16 (reflected 0xA001, init 0xFFFF).
    pub fn crc16(data: &[u8]) -> u16 {
        crc16::State::<crc16::MODBUS>::calculate(data)
    }

    pub fn build_read_holding_request(unit_id: u8, first_register: u16, last_register: u16) -> Vec<u8> {
        let count = last_register
            .saturating_sub(first_register)
            .saturating_add(1);

        let mut r = Vec::with_capacity(8);
        r.push(unit_id);
        r.push(FunctionCode::ReadHoldingRegisters.into());
        r.extend_from_slice(&first_register.to_be_bytes());
        r.extend_from_slice(&count.to_be_bytes());

        let crc = Self::crc16(&r);
        r.extend_from_slice(&crc.to_le_bytes());

        r
    }

    /// Pulls the register words out of a read-holding-registers response.
    /// The trailing CRC is not checked; see `parse_read_holding_response_strict`.
    pub fn parse_read_holding_response(frame: &[u8]) -> Result<Vec<u16>, ModbusError> {
        if frame.len() < RESPONSE_HEADER_LEN {
            return Err(ModbusError::Truncated {
                declared: 0,
                available: frame.len(),
            });
        }

        let byte_count = frame[2] as usize;
        let available = frame.len() - RESPONSE_HEADER_LEN;
        if byte_count > available {
            return Err(ModbusError::Truncated {
                declared: byte_count,
                available,
            });
        }

        let registers = frame[RESPONSE_HEADER_LEN..RESPONSE_HEADER_LEN + byte_count]
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();

        Ok(registers)
    }

    pub fn parse_read_holding_response_strict(frame: &[u8]) -> Result<Vec<u16>, ModbusError> {
        let registers = Self::parse_read_holding_response(frame)?;

        let crc_offset = RESPONSE_HEADER_LEN + frame[2] as usize;
        if frame.len() < crc_offset + 2 {
            return Err(ModbusError::Truncated {
                declared: frame[2] as usize + 2,
                available: frame.len() - RESPONSE_HEADER_LEN,
            });
        }

        let got = Utils::le_u16ify(frame, crc_offset);
        let expected = Self::crc16(&frame[..crc_offset]);
        if got != expected {
            return Err(ModbusError::CrcMismatch { got, expected });
        }

        Ok(registers)
    }

    /// Builds the response an inverter would give to a holding register read.
    pub fn build_read_holding_response(unit_id: u8, registers: &[u16]) -> Vec<u8> {
        let mut r = Vec::with_capacity(RESPONSE_HEADER_LEN + registers.len() * 2 + 2);
        r.push(unit_id);
        r.push(FunctionCode::ReadHoldingRegisters.into());
        r.push((registers.len() * 2) as u8);
        for register in registers {
            r.extend_from_slice(&register.to_be_bytes());
        }

        let crc = Self::crc16(&r);
        r.extend_from_slice(&crc.to_le_bytes());

        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc16_reference() {
        assert_eq!(ModbusCodec::crc16(&[0x01, 0x03, 0x00, 0x03, 0x00, 0x7e]), 0xea35);
        assert_eq!(ModbusCodec::crc16(&[0x01, 0x03, 0x02, 0x12, 0x34]), 0x33b5);
    }

    #[test]
    fn build_request_for_default_range() {
        assert_eq!(
            ModbusCodec::build_read_holding_request(1, 0x0003, 0x0080),
            vec![0x01, 0x03, 0x00, 0x03, 0x00, 0x7e, 0x35, 0xea]
        );
    }

    #[test]
    fn parse_response() {
        let frame = [0x01, 0x03, 0x04, 0x00, 0x10, 0x00, 0x20, 0xfa, 0x2e];
        assert_eq!(
            ModbusCodec::parse_read_holding_response(&frame).unwrap(),
            vec![0x0010, 0x0020]
        );
    }

    #[test]
    fn request_and_synthetic_response_agree() {
        let request = ModbusCodec::build_read_holding_request(1, 0x0003, 0x0080);
        let count = Utils::be_u16ify(&request, 4) as usize;

        let registers: Vec<u16> = (0..count as u16).map(|i| i.wrapping_mul(517)).collect();
        let response = ModbusCodec::build_read_holding_response(1, &registers);

        assert_eq!(response[2] as usize, count * 2);
        assert_eq!(
            ModbusCodec::parse_read_holding_response(&response).unwrap(),
            registers
        );
        assert_eq!(
            ModbusCodec::parse_read_holding_response_strict(&response).unwrap(),
            registers
        );
    }

    #[test]
    fn bad_crc_only_rejected_when_strict() {
        let mut frame = ModbusCodec::build_read_holding_response(1, &[0x1234]);
        let len = frame.len();
        frame[len - 1] ^= 0xff;

        assert_eq!(
            ModbusCodec::parse_read_holding_response(&frame).unwrap(),
            vec![0x1234]
        );
        assert_eq!(
            ModbusCodec::parse_read_holding_response_strict(&frame),
            Err(ModbusError::CrcMismatch {
                got: 0xccb5,
                expected: 0x33b5
            })
        );
    }

    #[test]
    fn truncated_response() {
        let frame = [0x01, 0x03, 0x08, 0x00, 0x01];
        assert_eq!(
            ModbusCodec::parse_read_holding_response(&frame),
            Err(ModbusError::Truncated {
                declared: 8,
                available: 2
            })
        );
    }
}

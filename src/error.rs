use thiserror::Error;

/// Creates an anyhow error with the current file and line number
#[macro_export]
macro_rules! file_error {
    ($($arg:tt)*) => {
        anyhow::anyhow!(
            "[{}:{}] {}",
            std::path::Path::new(file!())
                .file_name()
                .map(|f| f.to_string_lossy())
                .unwrap_or_default(),
            line!(),
            format!($($arg)*)
        )
    };
}

/// Failures unwrapping a Solarman V5 tunnel frame.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ProtocolError {
    #[error("Frame length does not match payload length (frame={actual}, declared={declared})")]
    LengthMismatch { actual: usize, declared: usize },
    #[error("Frame contains invalid start or end values.")]
    InvalidFraming,
    #[error("Frame contains invalid V5 checksum (got {got:#04x}, expected {expected:#04x}).")]
    ChecksumMismatch { got: u8, expected: u8 },
    #[error("Frame contains invalid sequence number (got {got}, expected {expected}).")]
    SequenceMismatch { got: u8, expected: u8 },
    #[error("Frame contains incorrect data logger serial number ({got}).")]
    SerialMismatch { got: u32 },
    #[error("Frame contains incorrect control code ({0:#06x}).")]
    ControlCodeMismatch(u16),
    #[error("Frame contains invalid frame type ({0:#04x}).")]
    FrameTypeMismatch(u8),
    #[error("Frame does not contain a valid Modbus RTU frame ({0} bytes).")]
    PayloadTooShort(usize),
}

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ModbusError {
    #[error("Modbus response truncated: byte count {declared} but only {available} bytes follow")]
    Truncated { declared: usize, available: usize },
    #[error("Modbus response CRC mismatch (got {got:#06x}, expected {expected:#06x})")]
    CrcMismatch { got: u16, expected: u16 },
}

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum DecodeError {
    #[error("register index {index} for {field} out of range ({len} registers)")]
    IndexError {
        field: &'static str,
        index: usize,
        len: usize,
    },
}

use crate::prelude::*;

pub struct Utils;

impl Utils {
    pub fn utc() -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }

    /// Rounds half away from zero at `decimals` places, working on the decimal
    /// representation (`"<v>e<d>"`) rather than the raw binary value so that
    /// e.g. 1.005 rounds to 1.01 at two places.
    pub fn round(value: f64, decimals: i32) -> f64 {
        if !value.is_finite() {
            return value;
        }

        let shifted: f64 = match format!("{}e{}", value, decimals).parse() {
            Ok(v) => v,
            Err(_) => return value,
        };

        format!("{}e-{}", shifted.round(), decimals)
            .parse()
            .unwrap_or(value)
    }

    pub fn hex(bytes: &[u8]) -> String {
        bytes
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn be_u16ify(input: &[u8], start: usize) -> u16 {
        u16::from_be_bytes([input[start], input[start + 1]])
    }

    pub fn le_u16ify(input: &[u8], start: usize) -> u16 {
        u16::from_le_bytes([input[start], input[start + 1]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_uses_decimal_representation() {
        assert_eq!(Utils::round(1.005, 2), 1.01);
        assert_eq!(Utils::round(0.1 * 3.0, 4), 0.3);
        assert_eq!(Utils::round(123.45675, 4), 123.4568);
    }

    #[test]
    fn round_half_away_from_zero() {
        assert_eq!(Utils::round(-0.00005, 4), -0.0001);
        assert_eq!(Utils::round(0.00005, 4), 0.0001);
        assert_eq!(Utils::round(-2.5, 0), -3.0);
    }

    #[test]
    fn hex_formats_bytes() {
        assert_eq!(Utils::hex(&[0xa5, 0x01, 0x15]), "a5 01 15");
    }
}

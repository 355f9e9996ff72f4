use crate::error::DecodeError;
use crate::prelude::*;

use serde::Serialize;

/// Number of registers a full read returns; the highest index in the map is 113.
pub const REGISTER_COUNT: usize = 114;

// first and last holding register requested from the inverter
pub const FIRST_REGISTER: u16 = 0x0003;
pub const LAST_REGISTER: u16 = 0x0080;

const DECIMALS: i32 = 4;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Encoding {
    Unsigned,
    Signed,
    String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Field {
    Id,
    StatusCode,
    TotalEnergy,
    TotalEnergyToday,
    AcPower,
    AcVoltage,
    AcCurrent,
    AcFrequency,
    Pv1Voltage,
    Pv1Current,
    Pv1TotalEnergy,
    Pv1TotalEnergyToday,
    Pv2Voltage,
    Pv2Current,
    Pv2TotalEnergy,
    Pv2TotalEnergyToday,
    Pv3Voltage,
    Pv3Current,
    Pv3TotalEnergy,
    Pv3TotalEnergyToday,
    Pv4Voltage,
    Pv4Current,
    Pv4TotalEnergy,
    Pv4TotalEnergyToday,
    Temperature,
    Uptime,
    OperatingPower,
}

#[derive(Clone, Copy, Debug)]
pub struct FieldDefinition {
    pub name: &'static str,
    pub field: Field,
    pub encoding: Encoding,
    pub registers: &'static [usize],
    pub scale: f64,
    pub offset: f64,
    pub unit: &'static str,
}

impl FieldDefinition {
    const fn new(
        name: &'static str,
        field: Field,
        encoding: Encoding,
        registers: &'static [usize],
        scale: f64,
        unit: &'static str,
    ) -> Self {
        Self {
            name,
            field,
            encoding,
            registers,
            scale,
            offset: 0.0,
            unit,
        }
    }

    const fn with_offset(self, offset: f64) -> Self {
        Self { offset, ..self }
    }
}

use Encoding::{Signed, Unsigned};

#[rustfmt::skip]
pub static REGISTER_MAP: [FieldDefinition; 27] = [
    FieldDefinition::new("id", Field::Id, Encoding::String, &[0, 1, 2, 3, 4], 1.0, ""),
    FieldDefinition::new("statusCode", Field::StatusCode, Unsigned, &[56], 1.0, ""),
    FieldDefinition::new("totalEnergy", Field::TotalEnergy, Unsigned, &[60, 61], 0.1, "kWh"),
    FieldDefinition::new("totalEnergyToday", Field::TotalEnergyToday, Unsigned, &[57], 0.1, "kWh"),
    FieldDefinition::new("acPower", Field::AcPower, Unsigned, &[83, 84], 0.1, "W"),
    FieldDefinition::new("acVoltage", Field::AcVoltage, Unsigned, &[70], 0.1, "V"),
    FieldDefinition::new("acCurrent", Field::AcCurrent, Signed, &[73], 0.1, "A"),
    FieldDefinition::new("acFrequency", Field::AcFrequency, Unsigned, &[76], 0.01, "Hz"),
    FieldDefinition::new("pv1Voltage", Field::Pv1Voltage, Unsigned, &[106], 0.1, "V"),
    FieldDefinition::new("pv1Current", Field::Pv1Current, Unsigned, &[107], 0.1, "A"),
    FieldDefinition::new("pv1TotalEnergy", Field::Pv1TotalEnergy, Unsigned, &[66, 67], 0.1, "kWh"),
    FieldDefinition::new("pv1TotalEnergyToday", Field::Pv1TotalEnergyToday, Unsigned, &[62], 0.1, "kWh"),
    FieldDefinition::new("pv2Voltage", Field::Pv2Voltage, Unsigned, &[108], 0.1, "V"),
    FieldDefinition::new("pv2Current", Field::Pv2Current, Unsigned, &[109], 0.1, "A"),
    FieldDefinition::new("pv2TotalEnergy", Field::Pv2TotalEnergy, Unsigned, &[68, 69], 0.1, "kWh"),
    FieldDefinition::new("pv2TotalEnergyToday", Field::Pv2TotalEnergyToday, Unsigned, &[63], 0.1, "kWh"),
    FieldDefinition::new("pv3Voltage", Field::Pv3Voltage, Unsigned, &[110], 0.1, "V"),
    FieldDefinition::new("pv3Current", Field::Pv3Current, Unsigned, &[111], 0.1, "A"),
    FieldDefinition::new("pv3TotalEnergy", Field::Pv3TotalEnergy, Unsigned, &[71, 72], 0.1, "kWh"),
    FieldDefinition::new("pv3TotalEnergyToday", Field::Pv3TotalEnergyToday, Unsigned, &[64], 0.1, "kWh"),
    FieldDefinition::new("pv4Voltage", Field::Pv4Voltage, Unsigned, &[112], 0.1, "V"),
    FieldDefinition::new("pv4Current", Field::Pv4Current, Unsigned, &[113], 0.1, "A"),
    FieldDefinition::new("pv4TotalEnergy", Field::Pv4TotalEnergy, Unsigned, &[74, 75], 0.1, "kWh"),
    FieldDefinition::new("pv4TotalEnergyToday", Field::Pv4TotalEnergyToday, Unsigned, &[65], 0.1, "kWh"),
    FieldDefinition::new("temperature", Field::Temperature, Unsigned, &[87], 0.01, "°C").with_offset(1000.0),
    FieldDefinition::new("uptime", Field::Uptime, Unsigned, &[59], 1.0, "m"),
    FieldDefinition::new("operatingPower", Field::OperatingPower, Unsigned, &[77], 0.1, "W"),
];

/// One decoded register read. Every numeric field defaults to 0; temperature
/// is `None` only after the runtime fields have been reset.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedReading {
    pub id: String,
    pub status_code: f64,
    pub total_energy: f64,
    pub total_energy_today: f64,
    pub ac_power: f64,
    pub ac_voltage: f64,
    pub ac_current: f64,
    pub ac_frequency: f64,
    pub pv1_voltage: f64,
    pub pv1_current: f64,
    pub pv1_total_energy: f64,
    pub pv1_total_energy_today: f64,
    pub pv2_voltage: f64,
    pub pv2_current: f64,
    pub pv2_total_energy: f64,
    pub pv2_total_energy_today: f64,
    pub pv3_voltage: f64,
    pub pv3_current: f64,
    pub pv3_total_energy: f64,
    pub pv3_total_energy_today: f64,
    pub pv4_voltage: f64,
    pub pv4_current: f64,
    pub pv4_total_energy: f64,
    pub pv4_total_energy_today: f64,
    pub temperature: Option<f64>,
    pub uptime: f64,
    pub operating_power: f64,
}

impl DecodedReading {
    fn set(&mut self, field: Field, value: f64) {
        let slot = match field {
            // strings are handled by the caller
            Field::Id => return,
            Field::StatusCode => &mut self.status_code,
            Field::TotalEnergy => &mut self.total_energy,
            Field::TotalEnergyToday => &mut self.total_energy_today,
            Field::AcPower => &mut self.ac_power,
            Field::AcVoltage => &mut self.ac_voltage,
            Field::AcCurrent => &mut self.ac_current,
            Field::AcFrequency => &mut self.ac_frequency,
            Field::Pv1Voltage => &mut self.pv1_voltage,
            Field::Pv1Current => &mut self.pv1_current,
            Field::Pv1TotalEnergy => &mut self.pv1_total_energy,
            Field::Pv1TotalEnergyToday => &mut self.pv1_total_energy_today,
            Field::Pv2Voltage => &mut self.pv2_voltage,
            Field::Pv2Current => &mut self.pv2_current,
            Field::Pv2TotalEnergy => &mut self.pv2_total_energy,
            Field::Pv2TotalEnergyToday => &mut self.pv2_total_energy_today,
            Field::Pv3Voltage => &mut self.pv3_voltage,
            Field::Pv3Current => &mut self.pv3_current,
            Field::Pv3TotalEnergy => &mut self.pv3_total_energy,
            Field::Pv3TotalEnergyToday => &mut self.pv3_total_energy_today,
            Field::Pv4Voltage => &mut self.pv4_voltage,
            Field::Pv4Current => &mut self.pv4_current,
            Field::Pv4TotalEnergy => &mut self.pv4_total_energy,
            Field::Pv4TotalEnergyToday => &mut self.pv4_total_energy_today,
            Field::Temperature => {
                self.temperature = Some(value);
                return;
            }
            Field::Uptime => &mut self.uptime,
            Field::OperatingPower => &mut self.operating_power,
        };
        *slot = value;
    }

    pub fn reset_daily_counters(&mut self) {
        self.total_energy_today = 0.0;
        self.pv1_total_energy_today = 0.0;
        self.pv2_total_energy_today = 0.0;
        self.pv3_total_energy_today = 0.0;
        self.pv4_total_energy_today = 0.0;
    }

    /// Zeroes everything that describes the inverter right now, leaving the
    /// energy counters and the id alone.
    pub fn reset_runtime_fields(&mut self) {
        self.pv1_voltage = 0.0;
        self.pv1_current = 0.0;
        self.pv2_voltage = 0.0;
        self.pv2_current = 0.0;
        self.pv3_voltage = 0.0;
        self.pv3_current = 0.0;
        self.pv4_voltage = 0.0;
        self.pv4_current = 0.0;
        self.ac_frequency = 0.0;
        self.ac_power = 0.0;
        self.ac_voltage = 0.0;
        self.ac_current = 0.0;
        self.uptime = 0.0;
        self.operating_power = 0.0;
        self.temperature = None;
    }
}

pub struct RegisterDecoder;
impl RegisterDecoder {
    pub fn decode(registers: &[u16]) -> Result<DecodedReading, DecodeError> {
        let mut reading = DecodedReading::default();

        for def in REGISTER_MAP.iter() {
            let value = match def.encoding {
                Encoding::String => {
                    reading.id = Self::string(registers, def)?;
                    trace!("{} = {:?}", def.name, reading.id);
                    continue;
                }
                Encoding::Unsigned => Self::unsigned(registers, def)?,
                Encoding::Signed => Self::signed(registers, def)?,
            };
            trace!("{} = {} {}", def.name, value, def.unit);
            reading.set(def.field, value);
        }

        Ok(reading)
    }

    // first listed register is the least significant word
    fn combine(registers: &[u16], def: &FieldDefinition) -> Result<u64, DecodeError> {
        let mut value = 0u64;
        for (i, index) in def.registers.iter().enumerate() {
            let word = Self::register(registers, def, *index)?;
            value |= (word as u64) << (16 * i);
        }
        Ok(value)
    }

    fn register(registers: &[u16], def: &FieldDefinition, index: usize) -> Result<u16, DecodeError> {
        registers.get(index).copied().ok_or(DecodeError::IndexError {
            field: def.name,
            index,
            len: registers.len(),
        })
    }

    fn unsigned(registers: &[u16], def: &FieldDefinition) -> Result<f64, DecodeError> {
        let value = Self::combine(registers, def)? as f64 - def.offset;
        Ok(Utils::round(value * def.scale, DECIMALS))
    }

    fn signed(registers: &[u16], def: &FieldDefinition) -> Result<f64, DecodeError> {
        let bits = 16 * def.registers.len() as u32;
        let maxint = (1u64 << bits) - 1;

        let mut value = Self::combine(registers, def)? as f64 - def.offset;
        if value > (maxint / 2) as f64 {
            value -= (maxint as f64) + 1.0;
        }

        Ok(Utils::round(value * def.scale, DECIMALS))
    }

    // NUL padding is dropped
    fn string(registers: &[u16], def: &FieldDefinition) -> Result<String, DecodeError> {
        let mut value = String::with_capacity(def.registers.len() * 2);
        for index in def.registers {
            let word = Self::register(registers, def, *index)?;
            for byte in word.to_be_bytes() {
                if byte != 0 {
                    value.push(char::from(byte));
                }
            }
        }
        Ok(value)
    }
}

use crate::prelude::*;

use chrono::{DateTime, Utc};
use serde::Serialize;

const DECIMALS: i32 = 4;

// Snapshot {{{
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PvString {
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
}

impl PvString {
    fn new(voltage: f64, current: f64) -> Self {
        Self {
            voltage,
            current,
            power: Utils::round(voltage * current, DECIMALS),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AcOutput {
    pub power: f64,
    pub voltage: f64,
    pub current: f64,
    pub frequency: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Counters {
    pub total_energy: f64,
    pub pv1_total_energy: f64,
    pub pv2_total_energy: f64,
    pub pv3_total_energy: f64,
    pub pv4_total_energy: f64,
    pub total_energy_today: f64,
    pub pv1_total_energy_today: f64,
    pub pv2_total_energy_today: f64,
    pub pv3_total_energy_today: f64,
    pub pv4_total_energy_today: f64,
}

/// What gets handed to consumers. Derived from the stored reading every time,
/// never kept.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub pv1: PvString,
    pub pv2: PvString,
    pub pv3: PvString,
    pub pv4: PvString,
    pub output: AcOutput,
    pub counters: Counters,
    pub temperature: Option<f64>,
    pub is_available: bool,
}

impl Snapshot {
    fn new(r: &DecodedReading, is_available: bool) -> Self {
        Self {
            pv1: PvString::new(r.pv1_voltage, r.pv1_current),
            pv2: PvString::new(r.pv2_voltage, r.pv2_current),
            pv3: PvString::new(r.pv3_voltage, r.pv3_current),
            pv4: PvString::new(r.pv4_voltage, r.pv4_current),
            output: AcOutput {
                power: r.ac_power,
                voltage: r.ac_voltage,
                current: r.ac_current,
                frequency: r.ac_frequency,
            },
            counters: Counters {
                total_energy: r.total_energy,
                pv1_total_energy: r.pv1_total_energy,
                pv2_total_energy: r.pv2_total_energy,
                pv3_total_energy: r.pv3_total_energy,
                pv4_total_energy: r.pv4_total_energy,
                total_energy_today: r.total_energy_today,
                pv1_total_energy_today: r.pv1_total_energy_today,
                pv2_total_energy_today: r.pv2_total_energy_today,
                pv3_total_energy_today: r.pv3_total_energy_today,
                pv4_total_energy_today: r.pv4_total_energy_today,
            },
            temperature: r.temperature,
            is_available,
        }
    }
} // }}}

/// Everything known about the one device being polled. Owned by the
/// scheduler task; sessions only ever report events to it.
#[derive(Clone, Debug)]
pub struct DeviceState {
    timeout: chrono::Duration,

    reading: Option<DecodedReading>,
    available: bool,
    updating: bool,
    connected: bool,

    last_connected_at: Option<DateTime<Utc>>,
    last_reading_at: Option<DateTime<Utc>>,
    last_connection_error_at: Option<DateTime<Utc>>,
    last_data_error_at: Option<DateTime<Utc>>,

    connection_error: Option<String>,
    data_error: Option<String>,
}

impl DeviceState {
    pub fn new(timeout: chrono::Duration) -> Self {
        Self {
            timeout,
            reading: None,
            available: true,
            updating: false,
            connected: false,
            last_connected_at: None,
            last_reading_at: None,
            last_connection_error_at: None,
            last_data_error_at: None,
            connection_error: None,
            data_error: None,
        }
    }

    pub fn is_updating(&self) -> bool {
        self.updating
    }

    pub fn set_updating(&mut self, updating: bool) {
        self.updating = updating;
        if updating {
            self.connected = false;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn last_connected_at(&self) -> Option<DateTime<Utc>> {
        self.last_connected_at
    }

    pub fn last_data_error_at(&self) -> Option<DateTime<Utc>> {
        self.last_data_error_at
    }

    pub fn set_connected(&mut self) {
        self.set_connected_at(Utils::utc())
    }

    pub fn set_connected_at(&mut self, now: DateTime<Utc>) {
        self.connected = true;
        self.last_connected_at = Some(now);
        self.available = true;
    }

    pub fn reading(&self) -> Option<&DecodedReading> {
        self.reading.as_ref()
    }

    pub fn last_reading_at(&self) -> Option<DateTime<Utc>> {
        self.last_reading_at
    }

    pub fn set_reading(&mut self, reading: DecodedReading) {
        self.set_reading_at(reading, Utils::utc())
    }

    /// Stores a fresh reading unless its lifetime energy went backwards, in
    /// which case the reading is dropped and the stored one kept.
    pub fn set_reading_at(&mut self, reading: DecodedReading, now: DateTime<Utc>) {
        if let Some(prior) = &self.reading {
            if reading.total_energy < prior.total_energy {
                debug!(
                    "discarding reading, total energy went from {} to {}",
                    prior.total_energy, reading.total_energy
                );
                return;
            }
        }

        self.reading = Some(reading);
        self.last_reading_at = Some(now);
        self.connection_error = None;
        self.data_error = None;
        self.available = true;
    }

    pub fn get_snapshot(&mut self) -> Option<Snapshot> {
        self.get_snapshot_at(Utils::utc())
    }

    /// `None` while there is nothing trustworthy to show. A connection error
    /// older than the device timeout zeroes the runtime values and marks the
    /// device unavailable in the returned snapshot.
    pub fn get_snapshot_at(&mut self, now: DateTime<Utc>) -> Option<Snapshot> {
        if self.reading.is_none() || self.data_error.is_some() || !self.available {
            return None;
        }

        if let (Some(_), Some(since)) = (&self.connection_error, self.last_connection_error_at) {
            if now - since > self.timeout {
                info!("connection error persisted since {}, marking unavailable", since);
                self.reset_runtime_fields();
                self.available = false;
            }
        }

        self.build_snapshot()
    }

    /// Snapshot of whatever is stored, carrying the real availability flag.
    pub fn build_snapshot(&self) -> Option<Snapshot> {
        self.reading
            .as_ref()
            .map(|r| Snapshot::new(r, self.available))
    }

    pub fn reset_daily_counters(&mut self) {
        if let Some(reading) = self.reading.as_mut() {
            reading.reset_daily_counters();
        }
    }

    pub fn reset_runtime_fields(&mut self) {
        if let Some(reading) = self.reading.as_mut() {
            reading.reset_runtime_fields();
        }
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn set_available(&mut self, available: bool) {
        self.available = available;
    }

    pub fn connection_error(&self) -> Option<&str> {
        self.connection_error.as_deref()
    }

    pub fn set_connection_error(&mut self, error: Option<String>) {
        self.set_connection_error_at(error, Utils::utc())
    }

    pub fn set_connection_error_at(&mut self, error: Option<String>, now: DateTime<Utc>) {
        // keep the first timestamp while the error persists
        match (&self.connection_error, &error) {
            (None, Some(_)) => self.last_connection_error_at = Some(now),
            (_, None) => self.last_connection_error_at = None,
            _ => {}
        }
        self.connection_error = error;
    }

    pub fn data_error(&self) -> Option<&str> {
        self.data_error.as_deref()
    }

    pub fn set_data_error(&mut self, error: Option<String>) {
        self.set_data_error_at(error, Utils::utc())
    }

    pub fn set_data_error_at(&mut self, error: Option<String>, now: DateTime<Utc>) {
        self.last_data_error_at = error.as_ref().map(|_| now);
        self.data_error = error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reading(total_energy: f64) -> DecodedReading {
        DecodedReading {
            total_energy,
            total_energy_today: 4.2,
            pv1_voltage: 301.5,
            pv1_current: 2.3,
            ac_power: 640.0,
            ac_voltage: 231.0,
            temperature: Some(31.5),
            ..Default::default()
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn empty_state_has_no_snapshot() {
        let mut state = DeviceState::new(chrono::Duration::minutes(30));
        assert!(state.is_available());
        assert_eq!(state.get_snapshot(), None);
        assert_eq!(state.build_snapshot(), None);
    }

    #[test]
    fn monotonic_guard() {
        let mut state = DeviceState::new(chrono::Duration::minutes(30));
        state.set_reading_at(reading(100.0), t0());

        state.set_reading_at(reading(90.0), t0());
        assert_eq!(state.reading().unwrap().total_energy, 100.0);

        let mut same = reading(100.0);
        same.ac_power = 1.0;
        state.set_reading_at(same, t0());
        assert_eq!(state.reading().unwrap().ac_power, 1.0);

        state.set_reading_at(reading(100.5), t0());
        assert_eq!(state.reading().unwrap().total_energy, 100.5);
    }

    #[test]
    fn snapshot_groups() {
        let mut state = DeviceState::new(chrono::Duration::minutes(30));
        state.set_reading_at(reading(100.0), t0());

        let snapshot = state.get_snapshot_at(t0()).unwrap();
        assert_eq!(snapshot.pv1.power, 693.45);
        assert_eq!(snapshot.pv2, PvString::default());
        assert_eq!(snapshot.output.power, 640.0);
        assert_eq!(snapshot.counters.total_energy, 100.0);
        assert_eq!(snapshot.counters.total_energy_today, 4.2);
        assert_eq!(snapshot.temperature, Some(31.5));
        assert!(snapshot.is_available);
    }

    #[test]
    fn snapshot_serialises_with_camel_case_keys() {
        let mut state = DeviceState::new(chrono::Duration::minutes(30));
        state.set_reading_at(reading(100.0), t0());

        let json = serde_json::to_value(state.get_snapshot_at(t0()).unwrap()).unwrap();
        assert_eq!(json["isAvailable"], true);
        assert_eq!(json["counters"]["pv1TotalEnergyToday"], 0.0);
        assert_eq!(json["output"]["voltage"], 231.0);
    }

    #[test]
    fn availability_decay() {
        let mut state = DeviceState::new(chrono::Duration::minutes(1));
        state.set_reading_at(reading(100.0), t0());
        state.set_connection_error_at(Some("Connection timed out".to_string()), t0());

        let snapshot = state
            .get_snapshot_at(t0() + chrono::Duration::seconds(30))
            .unwrap();
        assert_eq!(snapshot.pv1.voltage, 301.5);
        assert_eq!(snapshot.output.power, 640.0);
        assert!(snapshot.is_available);
        assert!(state.is_available());

        let snapshot = state
            .get_snapshot_at(t0() + chrono::Duration::seconds(61))
            .unwrap();
        assert_eq!(snapshot.pv1, PvString::default());
        assert_eq!(snapshot.output, AcOutput::default());
        assert_eq!(snapshot.temperature, None);
        assert_eq!(snapshot.counters.total_energy, 100.0);
        assert_eq!(snapshot.counters.total_energy_today, 4.2);
        assert!(!snapshot.is_available);
        assert!(!state.is_available());

        // and nothing further until a reading arrives
        assert_eq!(state.get_snapshot_at(t0() + chrono::Duration::seconds(62)), None);

        state.set_reading_at(reading(101.0), t0() + chrono::Duration::seconds(90));
        assert!(state.is_available());
        assert_eq!(state.connection_error(), None);
    }

    #[test]
    fn repeated_connection_errors_keep_first_timestamp() {
        let mut state = DeviceState::new(chrono::Duration::minutes(1));
        state.set_reading_at(reading(100.0), t0());
        state.set_connection_error_at(Some("refused".to_string()), t0());
        state.set_connection_error_at(
            Some("timed out".to_string()),
            t0() + chrono::Duration::seconds(50),
        );

        let snapshot = state
            .get_snapshot_at(t0() + chrono::Duration::seconds(61))
            .unwrap();
        assert!(!snapshot.is_available);
    }

    #[test]
    fn data_error_hides_snapshot() {
        let mut state = DeviceState::new(chrono::Duration::minutes(30));
        state.set_reading_at(reading(100.0), t0());
        state.set_data_error_at(Some("Frame contains invalid V5 checksum".to_string()), t0());

        assert_eq!(state.last_data_error_at(), Some(t0()));
        assert_eq!(state.get_snapshot_at(t0()), None);
        assert!(state.build_snapshot().is_some());

        state.set_reading_at(reading(100.0), t0());
        assert!(state.get_snapshot_at(t0()).is_some());
    }

    #[test]
    fn updating_clears_connected() {
        let mut state = DeviceState::new(chrono::Duration::minutes(30));
        state.set_available(false);
        state.set_connected_at(t0());
        assert!(state.is_connected());
        assert_eq!(state.last_connected_at(), Some(t0()));
        assert!(state.is_available());

        state.set_updating(true);
        assert!(state.is_updating());
        assert!(!state.is_connected());
    }

    #[test]
    fn resets() {
        let mut state = DeviceState::new(chrono::Duration::minutes(30));
        state.reset_daily_counters();
        state.reset_runtime_fields();

        state.set_reading_at(reading(100.0), t0());
        state.reset_daily_counters();
        assert_eq!(state.reading().unwrap().total_energy_today, 0.0);
        assert_eq!(state.reading().unwrap().pv1_voltage, 301.5);

        state.reset_runtime_fields();
        assert_eq!(state.reading().unwrap().pv1_voltage, 0.0);
        assert_eq!(state.reading().unwrap().temperature, None);
    }
}

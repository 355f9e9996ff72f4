use crate::actions::{Action, ActionOutput};
use crate::prelude::*;

/// Zeroes the "today" counters at midnight and publishes the result, even if
/// the device is currently offline.
#[derive(Clone, Copy, Debug, Default)]
pub struct DailyReset;

impl Action for DailyReset {
    fn execute(self, state: &mut DeviceState) -> ActionOutput {
        state.reset_daily_counters();

        match state.build_snapshot() {
            Some(snapshot) => ActionOutput {
                snapshot: Some(snapshot),
                status: Some(Status::info("daily reset")),
            },
            None => ActionOutput::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resets_counters_and_keeps_availability() {
        let mut state = DeviceState::new(chrono::Duration::minutes(30));
        state.set_reading(DecodedReading {
            total_energy: 1500.0,
            total_energy_today: 12.4,
            pv2_total_energy_today: 3.1,
            ..Default::default()
        });
        state.set_available(false);

        let out = DailyReset.execute(&mut state);
        let snapshot = out.snapshot.unwrap();

        assert_eq!(snapshot.counters.total_energy, 1500.0);
        assert_eq!(snapshot.counters.total_energy_today, 0.0);
        assert_eq!(snapshot.counters.pv2_total_energy_today, 0.0);
        assert!(!snapshot.is_available);
        assert!(!state.is_available());
        assert_eq!(out.status, Some(Status::info("daily reset")));
    }

    #[test]
    fn no_reading_no_output() {
        let mut state = DeviceState::new(chrono::Duration::minutes(30));
        assert_eq!(DailyReset.execute(&mut state), ActionOutput::default());
    }
}

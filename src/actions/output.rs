use crate::actions::{Action, ActionOutput};
use crate::prelude::*;

/// Ends a poll cycle: clears the updating flag and publishes whatever the
/// device state is willing to show. Errors win over the power reading in the
/// status line, data errors over connection errors.
#[derive(Clone, Copy, Debug, Default)]
pub struct Output;

impl Action for Output {
    fn execute(self, state: &mut DeviceState) -> ActionOutput {
        state.set_updating(false);

        let snapshot = state.get_snapshot();
        let mut status = snapshot
            .as_ref()
            .map(|s| Status::info(format!("{} W", s.output.power)));

        // a poll that never connected has already reported its outcome
        if let Some(error) = state.connection_error() {
            status = state.is_connected().then(|| Status::error(error));
        }
        if let Some(error) = state.data_error() {
            status = Some(Status::error(error));
        }

        ActionOutput { snapshot, status }
    }
}

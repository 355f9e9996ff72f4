use crate::actions::{Action, ActionOutput};
use crate::prelude::*;

#[derive(Clone, Copy, Debug, Default)]
pub struct Unavailable;

impl Action for Unavailable {
    fn execute(self, state: &mut DeviceState) -> ActionOutput {
        state.reset_runtime_fields();
        state.set_available(false);

        ActionOutput {
            snapshot: state.build_snapshot(),
            status: Some(Status::warning("unavailable")),
        }
    }
}

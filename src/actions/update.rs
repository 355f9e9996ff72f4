use crate::actions::{Action, ActionOutput};
use crate::deye::Session;
use crate::prelude::*;

/// Starts a poll. The session runs on its own task and reports back through
/// the session channel; the state is only marked as updating here.
pub struct Update {
    session: Session,
}

impl Update {
    pub fn new(session: Session) -> Self {
        Self { session }
    }
}

impl Action for Update {
    fn execute(self, state: &mut DeviceState) -> ActionOutput {
        state.set_updating(true);

        tokio::spawn(self.session.run());

        ActionOutput {
            snapshot: None,
            status: Some(Status::warning("updating")),
        }
    }
}

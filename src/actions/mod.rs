use crate::prelude::*;

use enum_dispatch::enum_dispatch;

pub mod daily_reset;
pub mod output;
pub mod unavailable;
pub mod update;

pub use daily_reset::DailyReset;
pub use output::Output;
pub use unavailable::Unavailable;
pub use update::Update;

/// What an action wants published: a snapshot on the output channel and/or a
/// status line. Either may be absent.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ActionOutput {
    pub snapshot: Option<Snapshot>,
    pub status: Option<Status>,
}

#[enum_dispatch]
pub trait Action {
    fn execute(self, state: &mut DeviceState) -> ActionOutput;
}

#[enum_dispatch(Action)]
pub enum Actions {
    Update(Update),
    Output(Output),
    DailyReset(DailyReset),
    Unavailable(Unavailable),
}

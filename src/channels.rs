use crate::prelude::*;

use crate::deye::inverter::ChannelData as SessionData;
use crate::scheduler::ChannelData as SchedulerData;

#[derive(Debug, Clone)]
pub struct Channels {
    pub to_scheduler: broadcast::Sender<SchedulerData>,
    pub from_session: broadcast::Sender<SessionData>,
    pub status: broadcast::Sender<Status>,
    pub output: broadcast::Sender<Snapshot>,
}

impl Default for Channels {
    fn default() -> Self {
        Self::new()
    }
}

impl Channels {
    pub fn new() -> Self {
        Self {
            to_scheduler: Self::channel(),
            from_session: Self::channel(),
            status: Self::channel(),
            output: Self::channel(),
        }
    }

    fn channel<T: Clone>() -> broadcast::Sender<T> {
        broadcast::channel(2048).0
    }
}

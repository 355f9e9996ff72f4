use crate::actions::{Action, ActionOutput, Actions, DailyReset, Output, Unavailable, Update};
use crate::config::UpdateMode;
use crate::deye::inverter::ChannelData as SessionData;
use crate::deye::Session;
use crate::prelude::*;
use crate::solarman::TunnelCodec;

use chrono::{DateTime, Local, TimeZone, Utc};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ChannelData {
    Command(Command),
    Shutdown,
}

// settle time after a slot boundary before polling
const SETTLE_MS: i64 = 1000;

/// Start of the next slot of `frequency_minutes`, plus the settle offset. A
/// time exactly on a boundary fires one second later.
pub fn next_aligned(now: DateTime<Utc>, frequency_minutes: u64) -> DateTime<Utc> {
    let slot_ms = (frequency_minutes.max(1) * 60_000) as i64;
    let now_ms = now.timestamp_millis();
    let boundary = (now_ms + slot_ms - 1).div_euclid(slot_ms) * slot_ms;

    Utc.timestamp_millis_opt(boundary + SETTLE_MS)
        .single()
        .unwrap_or(now + chrono::Duration::milliseconds(slot_ms))
}

/// The coming midnight in `now`'s time zone. Falls back to 24 hours ahead if
/// midnight does not exist on that day.
pub fn next_midnight<Tz: TimeZone>(now: &DateTime<Tz>) -> DateTime<Tz> {
    let fallback = now.clone() + chrono::Duration::hours(24);

    now.date_naive()
        .succ_opt()
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .and_then(|midnight| now.timezone().from_local_datetime(&midnight).earliest())
        .unwrap_or(fallback)
}

fn instant_in(delay: chrono::Duration) -> Instant {
    Instant::now() + delay.to_std().unwrap_or_default()
}

pub struct Scheduler {
    config: ConfigWrapper,
    channels: Channels,
    state: DeviceState,
    codec: TunnelCodec,
    available: watch::Sender<bool>,
    receivers: Option<(broadcast::Receiver<ChannelData>, broadcast::Receiver<SessionData>)>,

    update_at: Option<Instant>,
    daily_reset_at: Option<Instant>,
    unavailable_at: Option<Instant>,
}

impl Scheduler {
    pub fn new(config: ConfigWrapper, channels: Channels) -> Self {
        let device = config.device();
        // subscribe now so nothing sent before start() is lost
        let receivers = (
            channels.to_scheduler.subscribe(),
            channels.from_session.subscribe(),
        );

        Self {
            state: DeviceState::new(device.timeout()),
            codec: TunnelCodec::new(device.serial()),
            available: watch::channel(true).0,
            receivers: Some(receivers),
            update_at: None,
            daily_reset_at: None,
            unavailable_at: None,
            config,
            channels,
        }
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub async fn start(&mut self) -> Result<()> {
        let (mut to_scheduler, mut from_session) = match self.receivers.take() {
            Some(receivers) => receivers,
            None => bail!("scheduler already started"),
        };

        self.setup();

        loop {
            tokio::select! {
                message = to_scheduler.recv() => match message {
                    Ok(ChannelData::Command(command)) => self.handle_command(command),
                    Ok(ChannelData::Shutdown) => break,
                    Err(RecvError::Lagged(n)) => warn!("scheduler lagged, {} commands lost", n),
                    Err(RecvError::Closed) => break,
                },
                event = from_session.recv() => match event {
                    Ok(event) => self.handle_session(event),
                    Err(RecvError::Lagged(n)) => warn!("scheduler lagged, {} session events lost", n),
                    Err(RecvError::Closed) => break,
                },
                _ = Self::sleep_until(self.update_at) => self.on_update_timer(),
                _ = Self::sleep_until(self.daily_reset_at) => self.on_daily_reset_timer(),
                _ = Self::sleep_until(self.unavailable_at) => self.on_unavailable_timer(),
            }
        }

        self.teardown();

        Ok(())
    }

    async fn sleep_until(at: Option<Instant>) {
        match at {
            Some(at) => tokio::time::sleep_until(at).await,
            None => futures::future::pending().await,
        }
    }

    /// Arms the first update and daily reset, unless polling is manual.
    pub fn setup(&mut self) {
        let device = self.config.device();

        if device.update_mode() == UpdateMode::Never {
            self.publish_status(Status::warning("waiting for message"));
            return;
        }

        let now = Utils::utc();
        let first = next_aligned(now, device.update_frequency());
        self.update_at = Some(instant_in(first - now));

        let local = Local::now();
        self.daily_reset_at = Some(instant_in(next_midnight(&local) - local));

        let boundary = first - chrono::Duration::milliseconds(SETTLE_MS);
        self.publish_status(Status::warning(format!(
            "waiting until {}",
            boundary.with_timezone(&Local).format("%H:%M")
        )));
    }

    pub fn teardown(&mut self) {
        info!("scheduler stopping");
        self.update_at = None;
        self.daily_reset_at = None;
        self.unavailable_at = None;
    }

    pub fn handle_command(&mut self, command: Command) {
        debug!("command {:?}", command);

        match command {
            Command::Update => self.update(),
            Command::Output => self.output(),
            Command::DailyReset => self.execute(DailyReset.into()),
            Command::Unavailable => self.execute(Unavailable.into()),
            Command::None => {
                if self.state.is_updating() {
                    debug!("poll already running, ignoring message");
                    return;
                }
                self.reschedule_update();
                self.update();
            }
        }
    }

    pub fn handle_session(&mut self, event: SessionData) {
        match event {
            SessionData::Connected => self.state.set_connected(),
            SessionData::Reading(reading) => self.state.set_reading(reading),
            SessionData::DataError(error) => self.state.set_data_error(Some(error)),
            SessionData::ConnectionError(error) => self.state.set_connection_error(Some(error)),
            SessionData::Status(status) => self.publish_status(status),
            SessionData::Finished => self.output(),
        }
        self.publish_availability();
    }

    fn update(&mut self) {
        if self.state.is_updating() {
            info!("poll already running, dropping tick");
            return;
        }

        let session = Session::new(
            self.config.device(),
            self.channels.clone(),
            self.available.subscribe(),
            &mut self.codec,
        );
        self.execute(Update::new(session).into());
    }

    fn output(&mut self) {
        self.execute(Output.into());
        self.arm_unavailable();
    }

    fn execute(&mut self, action: Actions) {
        let output = action.execute(&mut self.state);
        self.publish_availability();
        self.publish(output);
    }

    fn on_update_timer(&mut self) {
        self.update_at = None;
        self.reschedule_update();
        self.handle_command(Command::Update);
    }

    fn on_daily_reset_timer(&mut self) {
        let local = Local::now();
        self.daily_reset_at = Some(instant_in(next_midnight(&local) - local));
        self.handle_command(Command::DailyReset);
    }

    fn on_unavailable_timer(&mut self) {
        self.unavailable_at = None;
        warn!(
            "no reading for {} minutes (last connected {:?}, last data error {:?})",
            self.config.device().timeout().num_minutes(),
            self.state.last_connected_at(),
            self.state.last_data_error_at()
        );
        self.handle_command(Command::Unavailable);
    }

    fn reschedule_update(&mut self) {
        let device = self.config.device();
        if device.update_mode() == UpdateMode::Never {
            return;
        }

        let now = Utils::utc();
        self.update_at = Some(instant_in(next_aligned(now, device.update_frequency()) - now));
    }

    // deadline is one device timeout after the last good reading
    fn arm_unavailable(&mut self) {
        self.unavailable_at = match self.state.last_reading_at() {
            Some(at) if self.state.is_available() => {
                let deadline = at + self.config.device().timeout();
                Some(instant_in(deadline - Utils::utc()))
            }
            _ => None,
        };
    }

    fn publish_availability(&self) {
        self.available.send_replace(self.state.is_available());
    }

    fn publish(&self, output: ActionOutput) {
        if let Some(snapshot) = output.snapshot {
            if self.channels.output.send(snapshot).is_err() {
                debug!("no output listeners");
            }
        }
        if let Some(status) = output.status {
            self.publish_status(status);
        }
    }

    fn publish_status(&self, status: Status) {
        info!("status: {}", status);
        if self.channels.status.send(status).is_err() {
            debug!("no status listeners");
        }
    }
}

use crate::prelude::*;
use crate::scheduler::ChannelData as SchedulerData;

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, LastWill, MqttOptions, Publish, QoS};
use tokio::sync::broadcast::error::RecvError;

// Message {{{
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub retain: bool,
    pub payload: String,
}

#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum TargetDevice {
    Serial(u32),
    All,
}

impl Message {
    pub fn for_status(serial: u32, status: &Status) -> Result<Message> {
        Ok(Message {
            topic: format!("{}/status", serial),
            retain: true,
            payload: serde_json::to_string(status)?,
        })
    }

    pub fn for_snapshot(serial: u32, property: &str, snapshot: &Snapshot) -> Result<Message> {
        Ok(Message {
            topic: format!("{}/{}", serial, property),
            retain: false,
            payload: serde_json::to_string(snapshot)?,
        })
    }

    // cmd/2712345678 => Serial(2712345678)
    pub fn target(&self) -> Result<TargetDevice> {
        let parts: Vec<&str> = self.topic.split('/').collect();

        // we only subscribe to cmd/<serial> and cmd/all
        match parts[..] {
            ["cmd", "all"] => Ok(TargetDevice::All),
            ["cmd", serial] => Ok(TargetDevice::Serial(serial.parse()?)),
            _ => bail!("ignoring badly formed MQTT topic: {}", self.topic),
        }
    }

    pub fn to_command(&self) -> Command {
        Command::from_payload(&self.payload)
    }
} // }}}

#[derive(Clone)]
pub struct Mqtt {
    config: ConfigWrapper,
    channels: Channels,
}

impl Mqtt {
    pub fn new(config: ConfigWrapper, channels: Channels) -> Self {
        Self { config, channels }
    }

    pub async fn start(&self) -> Result<()> {
        let c = &self.config;

        if !c.mqtt().enabled() {
            info!("mqtt disabled, skipping");
            return Ok(());
        }

        let client_id = format!("deye-bridge-{}", c.device().serial());
        let mut options = MqttOptions::new(client_id, c.mqtt().host(), c.mqtt().port());

        let will = LastWill {
            topic: self.lwt_topic(),
            message: bytes::Bytes::from("offline"),
            qos: QoS::AtLeastOnce,
            retain: true,
        };
        options.set_last_will(will);

        options.set_keep_alive(std::time::Duration::from_secs(60));
        if let (Some(u), Some(p)) = (c.mqtt().username(), c.mqtt().password()) {
            options.set_credentials(u, p);
        }

        info!(
            "initializing mqtt at {}:{}",
            c.mqtt().host(),
            c.mqtt().port()
        );

        let (client, eventloop) = AsyncClient::new(options, 10);

        futures::try_join!(
            self.setup(client.clone()),
            self.receiver(eventloop),
            self.sender(client)
        )?;

        Ok(())
    }

    async fn setup(&self, client: AsyncClient) -> Result<()> {
        let namespace = self.config.mqtt().namespace().to_owned();

        client
            .publish(self.lwt_topic(), QoS::AtLeastOnce, true, "online")
            .await?;

        client
            .subscribe(format!("{}/cmd/all", namespace), QoS::AtMostOnce)
            .await?;

        client
            .subscribe(
                format!("{}/cmd/{}", namespace, self.config.device().serial()),
                QoS::AtMostOnce,
            )
            .await?;

        Ok(())
    }

    // mqtt -> scheduler
    async fn receiver(&self, mut eventloop: EventLoop) -> Result<()> {
        let mut shutdown = self.channels.to_scheduler.subscribe();

        loop {
            tokio::select! {
                message = shutdown.recv() => {
                    if matches!(message, Ok(SchedulerData::Shutdown) | Err(RecvError::Closed)) {
                        break;
                    }
                }
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Incoming::Publish(publish))) => {
                        if let Err(e) = self.handle_message(publish) {
                            warn!("{}", e);
                        }
                    }
                    Err(e) => {
                        error!("{}", e);
                        info!("reconnecting in 5s");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    }
                    _ => {} // keepalives etc
                },
            }
        }

        info!("MQTT receiver loop exiting");
        Ok(())
    }

    fn handle_message(&self, publish: Publish) -> Result<()> {
        // remove the namespace, including the first /
        // doing it this way means we don't break if namespace happens to contain a /
        let namespace_len = self.config.mqtt().namespace().len() + 1;
        let topic = match publish.topic.get(namespace_len..) {
            Some(topic) => topic.to_owned(),
            None => bail!("ignoring badly formed MQTT topic: {}", publish.topic),
        };

        let message = Message {
            topic,
            retain: publish.retain,
            payload: String::from_utf8(publish.payload.to_vec())?,
        };
        debug!("RX: {:?}", message);

        match message.target()? {
            TargetDevice::All => {}
            TargetDevice::Serial(serial) if serial == self.config.device().serial() => {}
            TargetDevice::Serial(serial) => {
                debug!("ignoring command for {}", serial);
                return Ok(());
            }
        }

        if self
            .channels
            .to_scheduler
            .send(SchedulerData::Command(message.to_command()))
            .is_err()
        {
            bail!("send(to_scheduler) failed - channel closed?");
        }

        Ok(())
    }

    // scheduler -> mqtt
    async fn sender(&self, client: AsyncClient) -> Result<()> {
        let serial = self.config.device().serial();
        let property = self.config.output().property().to_owned();

        let mut shutdown = self.channels.to_scheduler.subscribe();
        let mut status = self.channels.status.subscribe();
        let mut output = self.channels.output.subscribe();

        loop {
            let message = tokio::select! {
                message = shutdown.recv() => {
                    if matches!(message, Ok(SchedulerData::Shutdown) | Err(RecvError::Closed)) {
                        let _ = client.disconnect().await;
                        break;
                    }
                    continue;
                }
                s = status.recv() => Message::for_status(serial, &s?)?,
                o = output.recv() => Message::for_snapshot(serial, &property, &o?)?,
            };

            self.publish(&client, message).await;
        }

        info!("MQTT sender loop exiting");
        Ok(())
    }

    async fn publish(&self, client: &AsyncClient, message: Message) {
        let topic = format!("{}/{}", self.config.mqtt().namespace(), message.topic);
        debug!("publishing: {} = {}", topic, message.payload);

        if let Err(err) = client
            .publish(&topic, QoS::AtLeastOnce, message.retain, message.payload)
            .await
        {
            error!("MQTT publish to {} failed: {:?}", topic, err);
        }
    }

    fn lwt_topic(&self) -> String {
        format!("{}/LWT", self.config.mqtt().namespace())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(topic: &str, payload: &str) -> Message {
        Message {
            topic: topic.to_owned(),
            retain: false,
            payload: payload.to_owned(),
        }
    }

    #[test]
    fn target() {
        assert_eq!(message("cmd/all", "").target().unwrap(), TargetDevice::All);
        assert_eq!(
            message("cmd/2712345678", "").target().unwrap(),
            TargetDevice::Serial(2_712_345_678)
        );
        assert!(message("cmd/abc", "").target().is_err());
        assert!(message("cmd/1/extra", "").target().is_err());
    }

    #[test]
    fn to_command() {
        assert_eq!(message("cmd/all", "update").to_command(), Command::Update);
        assert_eq!(message("cmd/all", "dailyReset").to_command(), Command::DailyReset);
        assert_eq!(message("cmd/all", "").to_command(), Command::None);
    }

    #[test]
    fn for_status() {
        let m = Message::for_status(42, &Status::warning("retry 2")).unwrap();
        assert_eq!(m.topic, "42/status");
        assert!(m.retain);
        assert_eq!(m.payload, r#"{"severity":"warning","text":"retry 2"}"#);
    }

    #[test]
    fn for_snapshot() {
        let m = Message::for_snapshot(42, "payload", &Snapshot::default()).unwrap();
        assert_eq!(m.topic, "42/payload");
        assert!(!m.retain);

        let json: serde_json::Value = serde_json::from_str(&m.payload).unwrap();
        assert_eq!(json["isAvailable"], false);
        assert_eq!(json["temperature"], serde_json::Value::Null);
    }
}

mod common;
use common::*;

use deye_bridge::scheduler::{ChannelData, Scheduler};
use std::time::Duration;
use tokio::time::timeout;

async fn next_status(status: &mut broadcast::Receiver<Status>, text: &str) -> Status {
    loop {
        let s = timeout(Duration::from_secs(5), status.recv())
            .await
            .expect("no status in time")
            .unwrap();
        if s.text == text {
            return s;
        }
    }
}

#[tokio::test]
async fn update_command_emits_snapshot() {
    common_setup();

    let logger = FakeLogger::new().await;
    let config = Factory::config(logger.port());
    let channels = Channels::new();
    let mut status = channels.status.subscribe();
    let mut output = channels.output.subscribe();

    let mut scheduler = Scheduler::new(config, channels.clone());
    let scheduler = tokio::spawn(async move { scheduler.start().await });
    let logger = tokio::spawn(logger.reply(Factory::response()));

    assert_eq!(
        next_status(&mut status, "waiting for message").await,
        Status::warning("waiting for message")
    );

    channels
        .to_scheduler
        .send(ChannelData::Command(Command::Update))
        .unwrap();

    let snapshot = timeout(Duration::from_secs(5), output.recv())
        .await
        .expect("no snapshot in time")
        .unwrap();
    assert!(snapshot.is_available);
    assert_eq!(snapshot.output.power, 1198.5);
    assert_eq!(snapshot.pv1.power, 656.04);

    assert_eq!(
        next_status(&mut status, "1198.5 W").await.severity,
        Severity::Info
    );

    assert_eq!(logger.await.unwrap().unwrap(), unhex(REQUEST));

    channels.to_scheduler.send(ChannelData::Shutdown).unwrap();
    scheduler.await.unwrap().unwrap();
}

#[tokio::test]
async fn failed_poll_reports_error_status() {
    common_setup();

    let config = Factory::config_with(closed_port().await, "  max_retries: 1\n");
    let channels = Channels::new();
    let mut status = channels.status.subscribe();

    let mut scheduler = Scheduler::new(config, channels.clone());
    let scheduler = tokio::spawn(async move { scheduler.start().await });

    channels
        .to_scheduler
        .send(ChannelData::Command(Command::None))
        .unwrap();

    next_status(&mut status, "updating").await;
    next_status(&mut status, "retry 1").await;

    // the final status carries the last connection error
    let last = loop {
        let s = timeout(Duration::from_secs(5), status.recv())
            .await
            .unwrap()
            .unwrap();
        if s.severity == Severity::Error {
            break s;
        }
    };
    assert!(!last.text.is_empty());

    channels.to_scheduler.send(ChannelData::Shutdown).unwrap();
    scheduler.await.unwrap().unwrap();
}

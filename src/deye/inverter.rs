use crate::deye::registers::{RegisterDecoder, FIRST_REGISTER, LAST_REGISTER};
use crate::prelude::*;
use crate::solarman::{ModbusCodec, TunnelCodec};

use {
    bytes::BytesMut,
    std::time::Duration,
    tokio::io::{AsyncReadExt, AsyncWriteExt},
    tokio::net::TcpStream,
    tokio::time::timeout,
};

/// Events a session reports back to the scheduler, in the order they happen.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelData {
    Connected,
    Reading(DecodedReading),
    DataError(String),
    ConnectionError(String),
    Status(Status),
    Finished,
}
pub type Sender = broadcast::Sender<ChannelData>;
pub type Receiver = broadcast::Receiver<ChannelData>;

const MAX_FRAME_SIZE: usize = 1024;

const TIMED_OUT: &str = "Connection timed out";
const CLOSED_BY_PEER: &str = "Connection closed by peer";

// RetryDecision {{{
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryDecision {
    /// the device is already known to be offline; stop quietly
    Unavailable,
    /// try again; this is attempt number n
    Retry(u32),
    GiveUp,
}

impl RetryDecision {
    pub fn new(available: bool, retry_count: u32, max_retries: u32) -> Self {
        if !available {
            RetryDecision::Unavailable
        } else if retry_count < max_retries {
            RetryDecision::Retry(retry_count + 1)
        } else {
            RetryDecision::GiveUp
        }
    }
} // }}}

// how a single connection attempt ended
enum Attempt {
    Connected,
    Failed(String),
}

/// One poll of the device: connect, send the read request, wait for the
/// answer, decode it. Only a failure to connect is retried.
pub struct Session {
    device: config::Device,
    channels: Channels,
    available: watch::Receiver<bool>,
    codec: TunnelCodec,
    request: Vec<u8>,
}

impl Session {
    /// Builds and wraps the request once; every retry resends the same bytes.
    pub fn new(
        device: config::Device,
        channels: Channels,
        available: watch::Receiver<bool>,
        codec: &mut TunnelCodec,
    ) -> Self {
        let modbus =
            ModbusCodec::build_read_holding_request(device.unit_id(), FIRST_REGISTER, LAST_REGISTER);
        let request = codec.wrap(&modbus);

        Self {
            device,
            channels,
            available,
            codec: codec.clone(),
            request,
        }
    }

    pub fn request(&self) -> &[u8] {
        &self.request
    }

    pub async fn run(self) {
        let mut retry_count = 0;

        loop {
            let error = match self.attempt().await {
                Attempt::Connected => break,
                Attempt::Failed(error) => error,
            };

            warn!("inverter {}: {}", self.device.serial(), error);
            self.send(ChannelData::ConnectionError(error.clone()));

            let available = *self.available.borrow();
            match RetryDecision::new(available, retry_count, self.device.max_retries()) {
                RetryDecision::Unavailable => {
                    self.send(ChannelData::Status(Status::warning("unavailable")));
                    break;
                }
                RetryDecision::Retry(n) => {
                    retry_count = n;
                    info!(
                        "inverter {}: retry {} in {:?}",
                        self.device.serial(),
                        n,
                        self.device.retry_delay()
                    );
                    self.send(ChannelData::Status(Status::warning(format!("retry {}", n))));
                    tokio::time::sleep(self.device.retry_delay()).await;
                }
                RetryDecision::GiveUp => {
                    self.send(ChannelData::Status(Status::error(error)));
                    break;
                }
            }
        }

        self.send(ChannelData::Finished);
    }

    async fn attempt(&self) -> Attempt {
        let device = &self.device;
        let inactivity = device.connect_timeout();

        debug!(
            "inverter {}: connecting to {}:{}",
            device.serial(),
            device.ip(),
            device.port()
        );

        let mut stream = match timeout(
            inactivity,
            TcpStream::connect((device.ip().to_owned(), device.port())),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Attempt::Failed(e.to_string()),
            Err(_) => return Attempt::Failed(TIMED_OUT.to_string()),
        };

        info!("inverter {}: connected", device.serial());
        self.send(ChannelData::Connected);

        match self.exchange(&mut stream, inactivity).await {
            Ok(frame) => self.handle_response(&frame),
            Err(error) => {
                warn!("inverter {}: {}", device.serial(), error);
                self.send(ChannelData::ConnectionError(error));
            }
        }

        if let Err(e) = stream.shutdown().await {
            debug!("inverter {}: shutdown failed: {}", device.serial(), e);
        }

        Attempt::Connected
    }

    // write the request, then read until a whole frame is buffered
    async fn exchange(
        &self,
        stream: &mut TcpStream,
        inactivity: Duration,
    ) -> std::result::Result<BytesMut, String> {
        debug!("TX {}", Utils::hex(&self.request));

        match timeout(inactivity, stream.write_all(&self.request)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e.to_string()),
            Err(_) => return Err(TIMED_OUT.to_string()),
        }

        let mut buf = BytesMut::with_capacity(MAX_FRAME_SIZE);

        loop {
            let len = match timeout(inactivity, stream.read_buf(&mut buf)).await {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(e.to_string()),
                Err(_) => return Err(TIMED_OUT.to_string()),
            };

            if len == 0 {
                if buf.is_empty() {
                    return Err(CLOSED_BY_PEER.to_string());
                }
                // let the codec complain about whatever arrived
                return Ok(buf);
            }

            if Self::frame_complete(&buf) || buf.len() >= MAX_FRAME_SIZE {
                debug!("RX {}", Utils::hex(&buf));
                return Ok(buf);
            }
        }
    }

    fn frame_complete(buf: &[u8]) -> bool {
        if buf.first().is_some_and(|b| *b != solarman::packet::FRAME_START) {
            return true;
        }
        buf.len() >= 3 && buf.len() >= 13 + Utils::le_u16ify(buf, 1) as usize
    }

    fn handle_response(&self, frame: &[u8]) {
        match self.decode(frame) {
            Ok(reading) => {
                debug!("inverter {}: {:?}", self.device.serial(), reading);
                self.send(ChannelData::Reading(reading))
            }
            Err(e) => {
                warn!("inverter {}: {}", self.device.serial(), e);
                self.send(ChannelData::DataError(e.to_string()))
            }
        }
    }

    fn decode(&self, frame: &[u8]) -> Result<DecodedReading> {
        let payload = self.codec.unwrap(frame, true)?;

        let registers = if self.device.strict_crc() {
            ModbusCodec::parse_read_holding_response_strict(payload)?
        } else {
            ModbusCodec::parse_read_holding_response(payload)?
        };

        Ok(RegisterDecoder::decode(&registers)?)
    }

    // the scheduler may be gone after teardown; the session still runs to the end
    fn send(&self, data: ChannelData) {
        if let Err(e) = self.channels.from_session.send(data) {
            debug!("inverter {}: nobody listening for {:?}", self.device.serial(), e.0);
        }
    }
}

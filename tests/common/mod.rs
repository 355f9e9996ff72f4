#![allow(dead_code)]

pub use deye_bridge::prelude::*;

use deye_bridge::deye::inverter::ChannelData;
use deye_bridge::solarman::{ModbusCodec, TcpFrameFactory};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub const SERIAL: u32 = 2_712_345_678;

/// Request for holding registers 0x0003-0x0080 from unit 1, sequence 1.
pub const REQUEST: &str = "a51700104501004e1caba102000000000000000000000000000001030003007e35eac915";

/// Logger acknowledgment carrying a full 126 register read, sequence 1.
pub const RESPONSE: [&str; 9] = [
    "a50f01101501004e1caba102010000000000000000000000000103fc32313036",
    "3038313233340000000000000000000000000000000000000000000000000000",
    "0000000000000000000000000000000000000000000000000000000000000000",
    "0000000000000000000000000000000000000000000000000000000000000000",
    "0000000000000000000000000002007b0000019c303900010050002b00000000",
    "9c40000093f90000090100000000003400000000138a2ee00000000000000000",
    "00002ed10000000000000db80000000000000000000000000000000000000000",
    "000000000000000000000000000000000c3400150bab00130000000000000000",
    "0000000000000000000000000000000000000000000000009a4b0115",
];

pub fn common_setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn unhex(s: &str) -> Vec<u8> {
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
        .collect()
}

pub struct Factory();
impl Factory {
    pub fn config(port: u16) -> ConfigWrapper {
        Self::config_with(port, "")
    }

    /// `extra` is appended to the device section, one `key: value` per line.
    pub fn config_with(port: u16, extra: &str) -> ConfigWrapper {
        let yaml = format!(
            "device:\n  ip: 127.0.0.1\n  serial: \"{}\"\n  port: {}\n  connect_timeout: 1\n  retry_delay: 0\n{}",
            SERIAL, port, extra
        );
        ConfigWrapper::from_config(Config::from_yaml(&yaml).unwrap())
    }

    pub fn response() -> Vec<u8> {
        unhex(&RESPONSE.concat())
    }

    pub fn registers() -> Vec<u16> {
        let frame = Self::response();
        let payload = solarman::Parser::unwrap(&frame, Some(1), SERIAL, false).unwrap();
        ModbusCodec::parse_read_holding_response(payload).unwrap()
    }

    /// A logger acknowledgment for `registers` echoing `sequence`.
    pub fn response_for(registers: &[u16], sequence: u8) -> Vec<u8> {
        let modbus = ModbusCodec::build_read_holding_response(1, registers);
        TcpFrameFactory::wrap_response(&modbus, SERIAL, sequence)
    }
}

/// A data logger on 127.0.0.1 that answers exactly one connection.
pub struct FakeLogger {
    listener: TcpListener,
}

impl FakeLogger {
    pub async fn new() -> Self {
        Self {
            listener: TcpListener::bind("127.0.0.1:0").await.unwrap(),
        }
    }

    pub fn port(&self) -> u16 {
        self.listener.local_addr().unwrap().port()
    }

    /// Reads one request and writes `reply` back, then closes. Returns the
    /// request bytes.
    pub async fn reply(self, reply: Vec<u8>) -> Result<Vec<u8>> {
        let (mut socket, _) = self.listener.accept().await?;
        let request = Self::read_request(&mut socket).await?;
        socket.write_all(&reply).await?;
        socket.flush().await?;
        Ok(request)
    }

    /// Reads one request and never answers.
    pub async fn silent(self, hold_for: std::time::Duration) -> Result<Vec<u8>> {
        let (mut socket, _) = self.listener.accept().await?;
        let request = Self::read_request(&mut socket).await?;
        tokio::time::sleep(hold_for).await;
        Ok(request)
    }

    /// Reads one request and hangs up.
    pub async fn hang_up(self) -> Result<Vec<u8>> {
        let (mut socket, _) = self.listener.accept().await?;
        let request = Self::read_request(&mut socket).await?;
        drop(socket);
        Ok(request)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> Result<Vec<u8>> {
        let mut buf = vec![0; 36];
        socket.read_exact(&mut buf).await?;
        Ok(buf)
    }
}

/// A port nothing listens on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

pub fn drain(receiver: &mut broadcast::Receiver<ChannelData>) -> Vec<ChannelData> {
    let mut r = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        r.push(event);
    }
    r
}

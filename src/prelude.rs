pub use anyhow::{anyhow, bail, Error, Result};
pub use log::{debug, error, info, trace, warn};
pub use std::io::Write;
pub use std::str::FromStr;
pub use tokio::sync::{broadcast, watch};

pub use crate::{
    channels::Channels,
    command::Command,
    config::{self, Config, ConfigWrapper},
    deye::{self, registers::DecodedReading},
    device_state::{DeviceState, Snapshot},
    options::Options,
    solarman,
    status::{Severity, Status},
    utils::Utils,
};

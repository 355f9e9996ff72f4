use crate::prelude::*;

use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub device: Device,

    #[serde(default)]
    pub output: Output,

    #[serde(default)]
    pub mqtt: Mqtt,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,

    /// Optional path to append emitted snapshots to, one JSON object per line
    pub datalog_file: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    /// only poll when told to
    #[default]
    Never,
    Periodic,
}

// Device {{{
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct Device {
    pub ip: String,
    #[serde_as(as = "DisplayFromStr")]
    pub serial: u32,

    /// minutes without a good reading before the device is marked unavailable
    #[serde(default = "Config::default_device_timeout")]
    pub timeout: u64,

    #[serde(default)]
    pub update_mode: UpdateMode,
    /// minutes
    #[serde(default = "Config::default_update_frequency")]
    pub update_frequency: u64,

    #[serde(default = "Config::default_device_port")]
    pub port: u16,
    #[serde(default = "Config::default_unit_id")]
    pub unit_id: u8,

    pub connect_timeout: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_delay: Option<u64>,
    pub strict_crc: Option<bool>,
}
impl Device {
    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.timeout as i64)
    }

    pub fn update_mode(&self) -> UpdateMode {
        self.update_mode
    }

    pub fn update_frequency(&self) -> u64 {
        self.update_frequency
    }

    // socket inactivity timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout.unwrap_or(5))
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries.unwrap_or(5)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay.unwrap_or(5))
    }

    pub fn strict_crc(&self) -> bool {
        self.strict_crc == Some(true)
    }
} // }}}

// Output {{{
/// Where consumers should put emitted data. Passed through untouched.
#[derive(Clone, Debug, Deserialize)]
pub struct Output {
    #[serde(default = "Config::default_output_target")]
    pub target: String,
    #[serde(default = "Config::default_output_property")]
    pub property: String,
}
impl Default for Output {
    fn default() -> Self {
        Self {
            target: Config::default_output_target(),
            property: Config::default_output_property(),
        }
    }
}
impl Output {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn property(&self) -> &str {
        &self.property
    }
} // }}}

// Mqtt {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Mqtt {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "Config::default_mqtt_host")]
    pub host: String,
    #[serde(default = "Config::default_mqtt_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,

    #[serde(default = "Config::default_mqtt_namespace")]
    pub namespace: String,
}
impl Default for Mqtt {
    fn default() -> Self {
        Self {
            enabled: false,
            host: Config::default_mqtt_host(),
            port: Config::default_mqtt_port(),
            username: None,
            password: None,
            namespace: Config::default_mqtt_namespace(),
        }
    }
}
impl Mqtt {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &Option<String> {
        &self.username
    }

    pub fn password(&self) -> &Option<String> {
        &self.password
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
} // }}}

pub struct ConfigWrapper {
    config: Arc<Mutex<Config>>,
}

impl Clone for ConfigWrapper {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
        }
    }
}

impl ConfigWrapper {
    pub fn new(file: String) -> Result<Self> {
        let config = Config::new(file)?;
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config: Arc::new(Mutex::new(config)),
        }
    }

    // nothing panics while holding the lock, so a poisoned one is still usable
    fn lock(&self) -> MutexGuard<'_, Config> {
        self.config.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn device(&self) -> Device {
        self.lock().device.clone()
    }

    pub fn output(&self) -> Output {
        self.lock().output.clone()
    }

    pub fn mqtt(&self) -> Mqtt {
        self.lock().mqtt.clone()
    }

    pub fn loglevel(&self) -> String {
        self.lock().loglevel.clone()
    }

    pub fn datalog_file(&self) -> Option<String> {
        self.lock().datalog_file.clone()
    }

    pub fn log_summary(&self) {
        self.lock().log_summary()
    }
}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        info!("Reading configuration from {}", file);
        let content = std::fs::read_to_string(&file)
            .map_err(|err| file_error!("error reading {}: {}", file, err))?;

        Self::from_yaml(&content)
    }

    /// Parses and validates a configuration document.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn log_summary(&self) {
        info!("Configuration loaded successfully:");
        info!("  Device:");
        info!("    IP: {}:{}", self.device.ip, self.device.port);
        info!("    Serial: {}", self.device.serial);
        info!("    Unit ID: {}", self.device.unit_id);
        info!("    Timeout: {}m", self.device.timeout);
        info!(
            "    Update Mode: {:?} (every {}m)",
            self.device.update_mode, self.device.update_frequency
        );
        info!("    Connect Timeout: {:?}", self.device.connect_timeout());
        info!(
            "    Retries: {} every {:?}",
            self.device.max_retries(),
            self.device.retry_delay()
        );
        info!("    Strict CRC: {}", self.device.strict_crc());
        info!("  Output: {}.{}", self.output.target, self.output.property);

        info!("  MQTT: {}", if self.mqtt.enabled { "enabled" } else { "disabled" });
        if self.mqtt.enabled {
            info!("    Host: {}", self.mqtt.host);
            info!("    Port: {}", self.mqtt.port);
            info!("    Namespace: {}", self.mqtt.namespace);
        }

        if let Some(file) = &self.datalog_file {
            info!("  Datalog File: {}", file);
        }
        info!("  Log Level: {}", self.loglevel);
    }

    fn validate(&self) -> Result<()> {
        let device = &self.device;

        if device.ip.is_empty() {
            return Err(file_error!("device.ip cannot be empty"));
        }
        if device.port == 0 {
            bail!("device.port must be between 1 and 65535");
        }
        if device.serial == 0 {
            return Err(file_error!("device.serial must be a non-zero number"));
        }
        if device.timeout == 0 {
            bail!("device.timeout must be at least 1 minute");
        }
        if device.update_frequency == 0 {
            bail!("device.update_frequency must be at least 1 minute");
        }
        if device.connect_timeout == Some(0) {
            return Err(file_error!("Invalid connect timeout: 0"));
        }

        if self.mqtt.enabled {
            if self.mqtt.port == 0 {
                bail!("mqtt.port must be between 1 and 65535");
            }
            if self.mqtt.host.is_empty() {
                return Err(file_error!("MQTT host cannot be empty"));
            }
        }

        Ok(())
    }

    fn default_device_timeout() -> u64 {
        30
    }

    fn default_update_frequency() -> u64 {
        5
    }

    fn default_device_port() -> u16 {
        8899
    }

    fn default_unit_id() -> u8 {
        1
    }

    fn default_output_target() -> String {
        "msg".to_string()
    }

    fn default_output_property() -> String {
        "payload".to_string()
    }

    fn default_mqtt_host() -> String {
        "localhost".to_string()
    }

    fn default_mqtt_port() -> u16 {
        1883
    }

    fn default_mqtt_namespace() -> String {
        "deye".to_string()
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = Config::from_yaml(
            r#"
device:
  ip: 192.168.1.50
  serial: "2712345678"
"#,
        )
        .unwrap();

        assert_eq!(config.device.serial(), 2_712_345_678);
        assert_eq!(config.device.port(), 8899);
        assert_eq!(config.device.unit_id(), 1);
        assert_eq!(config.device.update_mode(), UpdateMode::Never);
        assert_eq!(config.device.update_frequency(), 5);
        assert_eq!(config.device.timeout(), chrono::Duration::minutes(30));
        assert_eq!(config.device.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.device.max_retries(), 5);
        assert_eq!(config.device.retry_delay(), Duration::from_secs(5));
        assert!(!config.device.strict_crc());
        assert_eq!(config.output.target(), "msg");
        assert_eq!(config.output.property(), "payload");
        assert!(!config.mqtt.enabled());
        assert_eq!(config.mqtt.namespace(), "deye");
        assert_eq!(config.loglevel, "info");
    }

    #[test]
    fn periodic_mode() {
        let config = Config::from_yaml(
            r#"
device:
  ip: inverter.lan
  serial: "42"
  update_mode: periodic
  update_frequency: 1
  timeout: 10
"#,
        )
        .unwrap();

        assert_eq!(config.device.update_mode(), UpdateMode::Periodic);
        assert_eq!(config.device.update_frequency(), 1);
    }

    #[test]
    fn rejects_bad_serial() {
        assert!(Config::from_yaml("device:\n  ip: a\n  serial: \"abc\"\n").is_err());
        assert!(Config::from_yaml("device:\n  ip: a\n  serial: \"0\"\n").is_err());
    }

    #[test]
    fn rejects_zero_frequency() {
        let err = Config::from_yaml(
            "device:\n  ip: a\n  serial: \"1\"\n  update_frequency: 0\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("update_frequency"));
    }

    #[test]
    fn reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "device:\n  ip: 10.0.0.2\n  serial: \"7\"\nloglevel: debug").unwrap();

        let config = ConfigWrapper::new(file.path().to_string_lossy().to_string()).unwrap();
        assert_eq!(config.device().ip(), "10.0.0.2");
        assert_eq!(config.loglevel(), "debug");
        assert_eq!(config.datalog_file(), None);
    }
}

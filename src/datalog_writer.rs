use crate::prelude::*;
use crate::scheduler::ChannelData as SchedulerData;

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::RecvError;

/// Appends every emitted snapshot to a file, one JSON object per line.
#[derive(Debug, Clone)]
pub struct DatalogWriter {
    file: Arc<Mutex<std::fs::File>>,
    path: String,
    serial: u32,
    lines_written: Arc<Mutex<u64>>,
}

impl DatalogWriter {
    pub fn new(path: &str, serial: u32) -> Result<Self> {
        info!("Opening datalog file at {}", path);

        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = match OpenOptions::new().create(true).append(true).open(path) {
            Ok(f) => f,
            Err(e) => {
                error!("Failed to open datalog file {}: {}", path, e);
                return Err(e.into());
            }
        };

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644)) {
                error!("Failed to set permissions on datalog file {}: {}", path, e);
                return Err(e.into());
            }
        }

        Ok(Self {
            file: Arc::new(Mutex::new(file)),
            path: path.to_string(),
            serial,
            lines_written: Arc::new(Mutex::new(0)),
        })
    }

    pub async fn start(&self, channels: Channels) -> Result<()> {
        let mut shutdown = channels.to_scheduler.subscribe();
        let mut output = channels.output.subscribe();

        loop {
            tokio::select! {
                message = shutdown.recv() => {
                    if matches!(message, Ok(SchedulerData::Shutdown) | Err(RecvError::Closed)) {
                        break;
                    }
                }
                snapshot = output.recv() => match snapshot {
                    Ok(snapshot) => self.write_snapshot(&snapshot)?,
                    Err(RecvError::Lagged(n)) => warn!("datalog writer lagged, {} snapshots lost", n),
                    Err(RecvError::Closed) => break,
                },
            }
        }

        info!("datalog writer exiting");
        Ok(())
    }

    pub fn write_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let mut json_data = serde_json::Map::new();
        json_data.insert(
            "utc_timestamp".to_string(),
            serde_json::Value::Number(Utils::utc().timestamp().into()),
        );
        json_data.insert(
            "serial".to_string(),
            serde_json::Value::String(self.serial.to_string()),
        );
        json_data.insert("snapshot".to_string(), serde_json::to_value(snapshot)?);

        let json_string = serde_json::to_string(&serde_json::Value::Object(json_data))?;

        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow!("Failed to lock datalog file"))?;
        if let Err(e) = writeln!(file, "{}", json_string).and_then(|_| file.flush()) {
            error!("Failed to write to datalog file {}: {}", self.path, e);
            return Err(e.into());
        }

        let mut lines_written = self
            .lines_written
            .lock()
            .map_err(|_| anyhow!("Failed to lock line counter"))?;
        *lines_written += 1;
        debug!("{} snapshots stored in {}", *lines_written, self.path);

        Ok(())
    }
}

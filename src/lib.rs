#[macro_use]
pub mod error; // Error types and file:line error macros

pub mod actions; // Update / output / daily reset / unavailable
pub mod channels; // Inter-component communication channels
pub mod command; // Inbound host commands
pub mod config; // Configuration management
pub mod datalog_writer; // JSON-lines snapshot log
pub mod deye; // Deye register map and device session
pub mod device_state; // Latest reading, availability and error context
pub mod mqtt; // MQTT host bridge
pub mod options; // Command line options parsing
pub mod prelude; // Common imports and types
pub mod scheduler; // Poll, daily reset and unavailability timers
pub mod solarman; // Solarman V5 tunnel and Modbus RTU codecs
pub mod status; // Status lines for the host
pub mod utils; // Utility functions

// Get the package version from Cargo.toml
const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::datalog_writer::DatalogWriter;
use crate::mqtt::Mqtt;
use crate::prelude::*;
use crate::scheduler::{ChannelData as SchedulerData, Scheduler};

fn init_logging(default_level: &str) {
    let result = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_level),
    )
    .format(|buf, record| {
        writeln!(
            buf,
            "[{} {} {}] {}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
            record.level(),
            record.module_path().unwrap_or(""),
            record.args()
        )
    })
    .write_style(env_logger::WriteStyle::Never)
    .try_init();

    if let Err(e) = result {
        eprintln!("Failed to initialise logging: {}", e);
    }
}

/// Main application entry point: loads configuration, starts the scheduler
/// and the optional MQTT bridge and datalog writer, then runs until Ctrl-C
/// (or the runtime limit) and shuts them down again.
pub async fn app() -> Result<()> {
    let options = Options::new();

    let config = ConfigWrapper::new(options.config_file.clone())?;
    init_logging(&config.loglevel());

    info!(
        "deye-bridge {} starting with config file: {}",
        CARGO_PKG_VERSION, options.config_file
    );
    config.log_summary();

    run(config, options.runtime).await
}

/// Runs every component against an already loaded configuration.
pub async fn run(config: ConfigWrapper, runtime: Option<u64>) -> Result<()> {
    let channels = Channels::new();

    info!("Initializing components...");

    let mut scheduler = Scheduler::new(config.clone(), channels.clone());
    let scheduler_handle = tokio::spawn(async move {
        if let Err(e) = scheduler.start().await {
            error!("Scheduler task failed: {}", e);
        }
    });

    let mqtt = Mqtt::new(config.clone(), channels.clone());
    let mqtt_handle = tokio::spawn(async move {
        if let Err(e) = mqtt.start().await {
            error!("MQTT task failed: {}", e);
        }
    });

    let datalog_handle = match config.datalog_file() {
        Some(path) => {
            let writer = DatalogWriter::new(&path, config.device().serial())?;
            let channels = channels.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = writer.start(channels).await {
                    error!("Datalog writer task failed: {}", e);
                }
            }))
        }
        None => None,
    };

    wait_for_shutdown(runtime).await;

    info!("Shutdown signal received, stopping components...");
    if channels.to_scheduler.send(SchedulerData::Shutdown).is_err() {
        warn!("send(to_scheduler) failed - channel closed?");
    }

    if let Err(e) = scheduler_handle.await {
        error!("Error waiting for scheduler task: {}", e);
    }
    if let Err(e) = mqtt_handle.await {
        error!("Error waiting for MQTT task: {}", e);
    }
    if let Some(handle) = datalog_handle {
        if let Err(e) = handle.await {
            error!("Error waiting for datalog writer task: {}", e);
        }
    }

    info!("Application shutdown complete");
    Ok(())
}

async fn wait_for_shutdown(runtime: Option<u64>) {
    let limit = async {
        match runtime {
            Some(secs) => tokio::time::sleep(std::time::Duration::from_secs(secs)).await,
            None => futures::future::pending().await,
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for ctrl+c: {}", e);
            }
        }
        _ = limit => info!("runtime limit reached"),
    }
}

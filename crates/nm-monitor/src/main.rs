//! Device monitor
//!
//! Mirrors the given NetworkManager devices and logs every property change
//! until interrupted.

use std::path::PathBuf;
use std::rc::Rc;

use anyhow::Context;
use clap::Parser;
use nm_devices::{create_device, AnyDevice};
use nm_object::config::DEFAULT_CONFIG_PATH;
use nm_object::{init_logging, Connection, MirrorConfig, ObjectCache, ZbusBus};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "nm-monitor")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level, overriding the configuration file
    #[arg(short = 'l', long)]
    log_level: Option<String>,

    /// Device object paths to watch
    #[arg(required = true)]
    devices: Vec<String>,
}

impl Args {
    fn load_config(&self) -> anyhow::Result<MirrorConfig> {
        let mut config = MirrorConfig::load_or_default(&self.config)
            .with_context(|| format!("loading {}", self.config.display()))?;
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = args.load_config()?;
    init_logging(&config.logging)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building runtime")?;
    let local = tokio::task::LocalSet::new();

    match local.block_on(&runtime, run(config, args.devices)) {
        Ok(()) => {
            info!("nm-monitor: exiting normally");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "nm-monitor: exiting with error");
            Err(e)
        }
    }
}

async fn run(config: MirrorConfig, paths: Vec<String>) -> anyhow::Result<()> {
    let bus = ZbusBus::connect(&config.bus)
        .await
        .with_context(|| format!("connecting to {:?} bus", config.bus.kind))?;
    let connection = Connection::with_timeouts(Rc::new(bus), config.call_timeouts());
    let cache = ObjectCache::new();
    info!(service = %config.bus.service, connection = %connection.id(), "nm-monitor: connected");

    let mut devices = Vec::with_capacity(paths.len());
    for path in &paths {
        match create_device(&cache, &connection, path).await {
            Ok(device) => {
                watch(&device).await;
                devices.push(device);
            }
            Err(e) => warn!(path = %path, error = %e, "nm-monitor: skipping device"),
        }
    }
    if devices.is_empty() {
        anyhow::bail!("none of the {} device(s) could be mirrored", paths.len());
    }

    info!(count = devices.len(), "nm-monitor: watching devices");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for interrupt")?;
    info!("nm-monitor: received interrupt");

    for device in &devices {
        device.mirror().dispose();
    }
    Ok(())
}

async fn watch(device: &AnyDevice) {
    let base = device.device();
    info!(
        path = %base.path(),
        interface = %base.interface().await,
        kind = %base.kind().await,
        state = %base.state().await,
        "nm-monitor: device"
    );
    if let AnyDevice::Team(team) = device {
        info!(path = %base.path(), ports = ?team.slaves().await, "nm-monitor: team ports");
    }

    device.mirror().connect_notify(|mirror, property| {
        info!(path = %mirror.path(), property, "nm-monitor: property changed");
    });
}

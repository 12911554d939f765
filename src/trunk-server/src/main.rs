// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

mod active_segment;
mod audio_manager;
mod config;
mod duplicate;
mod listener;
mod recording;
mod repository;
mod retention;
mod traffic;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use trunk_app::{init_logging, ConfigFile};
use trunk_core::audio::AudioSegmentFactory;
use trunk_core::call::CallRepository;
use trunk_core::channel::TrafficChannelManager;
use trunk_core::schedule::Scheduler;
use trunk_core::DynResult;

use audio_manager::AudioManager;
use config::{ServerConfig, StorageBackend};
use listener::IngestContext;
use repository::{MemoryCallRepository, PickleCallRepository};
use traffic::{ChannelActivityLogger, TunerChannelModel};

const PKG_DESCRIPTION: &str = concat!(env!("CARGO_PKG_NAME"), " - trunked radio call server");
const SHUTDOWN_GRACE: Duration = Duration::from_millis(400);

#[derive(Debug, Parser)]
#[command(
    author = env!("CARGO_PKG_AUTHORS"),
    version = env!("CARGO_PKG_VERSION"),
    about = PKG_DESCRIPTION,
)]
struct Cli {
    /// Path to configuration file
    #[arg(long = "config", short = 'C', value_name = "FILE")]
    config: Option<PathBuf>,
    /// Print example configuration and exit
    #[arg(long = "print-config")]
    print_config: bool,
    /// IP address for the ingest listener
    #[arg(short = 'l', long = "listen")]
    listen: Option<IpAddr>,
    /// Port for the ingest listener
    #[arg(short = 'p', long = "port")]
    port: Option<u16>,
}

fn open_repository(cfg: &ServerConfig) -> Arc<dyn CallRepository> {
    match cfg.storage.backend {
        StorageBackend::Memory => {
            info!("Using in-memory call storage");
            Arc::new(MemoryCallRepository::new())
        }
        StorageBackend::Pickledb => {
            let repository = PickleCallRepository::open(&cfg.storage.path);
            info!("Using call storage at {}", repository.path().display());
            Arc::new(repository)
        }
    }
}

#[tokio::main]
async fn main() -> DynResult<()> {
    let cli = Cli::parse();

    if cli.print_config {
        println!("{}", ServerConfig::example_combined_toml());
        return Ok(());
    }

    let (cfg, config_path) = if let Some(ref path) = cli.config {
        let cfg = ServerConfig::load_from_file(path)?;
        (cfg, Some(path.clone()))
    } else {
        ServerConfig::load_from_default_paths()?
    };
    cfg.validate()
        .map_err(|e| format!("Invalid server configuration: {}", e))?;

    init_logging(cfg.general.log_level.as_deref());

    if let Some(ref path) = config_path {
        info!("Loaded configuration from {}", path.display());
    }
    info!(
        "Starting trunk-server (calls: {}, retention: {:?})",
        cfg.calls.directory.display(),
        cfg.retention.policy
    );

    let scheduler = Scheduler::try_current()?;
    let repository = open_repository(&cfg);
    let alias_list = Arc::new(cfg.alias_list.clone());

    let audio = Arc::new(AudioManager::new(
        &cfg,
        repository,
        scheduler.clone(),
        None,
    ));
    audio.start();

    let channels = Arc::new(
        TunerChannelModel::new(
            cfg.traffic.tuner_channels,
            cfg.traffic.call_timeout(),
            scheduler,
        )
        .with_listener(Arc::new(ChannelActivityLogger)),
    );
    let traffic = TrafficChannelManager::new(
        channels.clone(),
        alias_list.clone(),
        cfg.traffic.pool_size,
        cfg.monitor.do_not_monitor_priority,
    );
    traffic.add_listener(Arc::new(ChannelActivityLogger));

    let mut task_handles: Vec<JoinHandle<()>> = Vec::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    if cfg.listen.enabled {
        let listen_ip = cli.listen.unwrap_or(cfg.listen.listen);
        let listen_port = cli.port.unwrap_or(cfg.listen.port);
        let listen_addr = SocketAddr::from((listen_ip, listen_port));
        let ctx = Arc::new(IngestContext {
            audio: audio.clone(),
            factory: Arc::new(AudioSegmentFactory::new(alias_list)),
            traffic: traffic.clone(),
            channels,
        });
        let listener_shutdown_rx = shutdown_rx.clone();
        task_handles.push(tokio::spawn(async move {
            if let Err(e) = listener::run_listener(listen_addr, ctx, listener_shutdown_rx).await {
                error!("Listener error: {:?}", e);
            }
        }));
    }

    signal::ctrl_c().await?;
    info!("Ctrl+C received, shutting down");
    let _ = shutdown_tx.send(true);
    tokio::time::sleep(SHUTDOWN_GRACE).await;

    for handle in &task_handles {
        if !handle.is_finished() {
            handle.abort();
        }
    }
    for handle in task_handles {
        let _ = handle.await;
    }

    traffic.dispose();
    audio.shutdown();
    Ok(())
}

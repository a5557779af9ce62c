//! fcels daemon binary
//!
//! Loads configuration and runs one port against the simulated fabric.

use clap::Parser;
use fcels::{link_event_channel, AdminCommand, Config, Port, PortEvent, SimFabric};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

/// Fibre Channel ELS login engine
#[derive(Parser, Debug)]
#[command(name = "fcels", version, about)]
struct Args {
    /// Path to configuration file (overrides default search paths)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Exit after the first discovery pass completes
    #[arg(long)]
    once: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();

    info!("fcels starting");

    let (config, loaded_paths) = if let Some(config_path) = &args.config {
        match Config::load_file(config_path) {
            Ok(config) => (config, vec![config_path.clone()]),
            Err(e) => {
                error!("Failed to load configuration from {}: {}", config_path.display(), e);
                std::process::exit(1);
            }
        }
    } else {
        match Config::load() {
            Ok(result) => result,
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                std::process::exit(1);
            }
        }
    };

    if loaded_paths.is_empty() {
        info!("No config files found, using defaults");
    } else {
        for path in &loaded_paths {
            info!(path = %path.display(), "Loaded config file");
        }
    }

    let (link_tx, link_rx) = link_event_channel(config.buffers.link_channel);
    let mut sim = SimFabric::new(config.sim.clone(), config.port.wwpn, config.port.wwnn, link_tx);
    info!(
        topology = ?config.sim.topology,
        peers = config.sim.peers.len(),
        "Simulated fabric ready"
    );

    let (admin_tx, admin_rx) = mpsc::channel(config.buffers.admin_channel);
    let (events_tx, mut events_rx) = mpsc::channel(config.buffers.event_channel);

    if let Err(e) = sim.start() {
        error!("Failed to bring the link up: {}", e);
        std::process::exit(1);
    }

    let mut port = match Port::new(config, sim) {
        Ok(port) => port,
        Err(e) => {
            error!("Failed to create port: {}", e);
            std::process::exit(1);
        }
    };
    info!(wwpn = %port.wwpn(), wwnn = %port.wwnn(), "Port created");

    let once = args.once;
    let monitor = async move {
        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    let Some(event) = event else { break };
                    log_event(&event);
                    if once && event == PortEvent::DiscoveryComplete {
                        info!("Discovery complete, exiting");
                        break;
                    }
                }
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => info!("Shutdown signal received"),
                        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
                    }
                    break;
                }
            }
        }
        if admin_tx.send(AdminCommand::Shutdown).await.is_err() {
            warn!("Port already stopped");
        }
    };

    info!("fcels running, press Ctrl+C to exit");

    let (result, ()) = tokio::join!(port.run(link_rx, admin_rx, events_tx), monitor);
    if let Err(e) = result {
        warn!("Port stopped with error: {}", e);
    }

    info!(
        nodes = port.registry().len(),
        "fcels shutdown complete"
    );
}

fn log_event(event: &PortEvent) {
    match event {
        PortEvent::NodeMapped { did, wwpn, fc4 } => {
            info!(did = %did, wwpn = %wwpn, fc4 = ?fc4, "Remote port available")
        }
        PortEvent::NodeRemoved { did, wwpn } => {
            info!(did = %did, wwpn = %wwpn, "Remote port gone")
        }
        PortEvent::TopologyChanged {
            is_fabric,
            is_point_to_point,
        } => info!(
            is_fabric = *is_fabric,
            is_point_to_point = *is_point_to_point,
            "Topology settled"
        ),
        PortEvent::RscnReceived(payload) => {
            info!(pages = payload.pages.len(), "RSCN received")
        }
        PortEvent::DiscoveryComplete => info!("Discovery pass complete"),
        PortEvent::LinkReset => warn!("Link reset requested"),
    }
}

//! Tally Server Application
//!
//! Follows the mixer and multicasts the tally array until Ctrl+C.
//! Runs against the simulated mixer backend, placed at the configured
//! fallback address and cycling its sources. Subnet sweeps use the
//! system `ping`.

use anyhow::Result;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_tally_server::{
    api::ApiServer,
    config::{AppConfig, StateStore},
    controller::TallyController,
    device::SimulatedNetwork,
    discovery::SystemPinger,
    network::{BroadcastSettings, MulticastSink, TallyBroadcaster},
    reader::ReaderHealth,
};

/// How often the simulated mixer cuts to a new source
const DEMO_CUT_INTERVAL: Duration = Duration::from_secs(3);
const DEMO_SOURCES: u32 = 8;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting LAN Tally Server");

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load_or_default(&config_path)?;
    tracing::info!("Using config {}", config_path.display());

    let store = StateStore::open(config.state_file());
    tracing::info!("Using state file {}", store.path().display());

    let network = SimulatedNetwork::new();
    let demo_mixer = config.mixer.fallback_address;
    network.add_mixer(demo_mixer, "1", "2");

    let cancel = CancellationToken::new();
    let controller = Arc::new(TallyController::new(
        &config,
        network.clone(),
        SystemPinger,
        store,
        cancel.clone(),
    ));

    if config.api.enabled {
        ApiServer::new(config.api.clone(), controller.clone()).start_background(cancel.clone());
    }

    controller.start(config.discovery.scan_on_startup).await;
    tracing::info!("Mixer address: {:?}", controller.mixer_address());

    let sink = MulticastSink::from_config(&config.tally)?;
    let health: Arc<dyn ReaderHealth> = controller.supervisor();
    let broadcaster = TallyBroadcaster::new(
        sink,
        controller.state(),
        controller.stats(),
        BroadcastSettings::from(&config.tally),
    )
    .with_health_check(health);

    let demo = tokio::spawn(cycle_sources(network, demo_mixer, cancel.clone()));
    let broadcast = tokio::spawn(broadcaster.run(cancel.clone()));

    tracing::info!("Broadcasting tally - press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    cancel.cancel();
    if let Err(e) = broadcast.await {
        tracing::warn!("Broadcast task ended abnormally: {}", e);
    }
    let _ = demo.await;
    controller.shutdown().await;

    let stats = controller.snapshot().stats;
    tracing::info!(
        "Stats: {} packets sent, {} send failures, {} state changes, up {}s",
        stats.packets_sent,
        stats.send_failures,
        stats.state_changes,
        stats.uptime_seconds
    );
    Ok(())
}

/// Cut the simulated mixer's program to preview and pick a new preview
async fn cycle_sources(network: SimulatedNetwork, mixer: Ipv4Addr, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(DEMO_CUT_INTERVAL);
    let mut program: u32 = 1;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let preview = program % DEMO_SOURCES + 1;
        let (program_token, preview_token) = (program.to_string(), preview.to_string());
        network.set_sources(mixer, Some(program_token.as_str()), Some(preview_token.as_str()));
        program = preview;
    }
}

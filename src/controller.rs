//! Tally controller
//!
//! Wires the shared state, connection manager, supervised reader and
//! scanner together and exposes the operator-level operations used by the
//! binary and the control API.

use serde::Serialize;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, StateStore};
use crate::connection::{ConnectionManager, ConnectionSettings, ConnectionStatus};
use crate::device::DeviceFactory;
use crate::discovery::{Pinger, ScanOutcome, ScanSettings, Scanner, Subnet};
use crate::error::{Error, Result};
use crate::reader::{MixerReader, ReaderSettings, ReaderSupervisor};
use crate::stats::{RuntimeStats, StatsSnapshot};
use crate::tally::{Freshness, SharedAddress, SharedTallyState};

/// Point-in-time view of the whole system
#[derive(Debug, Clone, Serialize)]
pub struct TallySnapshot {
    pub live: u16,
    pub preview: u16,
    pub autolive: bool,
    pub active: bool,
    pub data_age_ms: Option<u64>,
    pub freshness: Freshness,
    pub mixer_address: Option<Ipv4Addr>,
    pub connection: ConnectionStatus,
    pub scanning: bool,
    pub reader_running: bool,
    pub stats: StatsSnapshot,
}

pub struct TallyController<F: DeviceFactory, P: Pinger> {
    state: Arc<SharedTallyState>,
    manager: Arc<ConnectionManager<F>>,
    supervisor: Arc<ReaderSupervisor<F>>,
    scanner: Scanner<P>,
    address: SharedAddress,
    store: StateStore,
    stats: Arc<RuntimeStats>,
    subnet: Option<String>,
    fallback_address: Ipv4Addr,
    stale_after: Duration,
    cancel: CancellationToken,
}

impl<F: DeviceFactory, P: Pinger> TallyController<F, P> {
    /// Build the system; the known-good address is seeded from `store`
    pub fn new(
        config: &AppConfig,
        factory: F,
        pinger: P,
        store: StateStore,
        cancel: CancellationToken,
    ) -> Self {
        let state = Arc::new(SharedTallyState::new());
        let stats = Arc::new(RuntimeStats::new());
        let address = SharedAddress::new(store.get().seed_address());

        let manager = Arc::new(ConnectionManager::new(
            factory,
            ConnectionSettings::from(&config.mixer),
        ));
        let reader = MixerReader::new(
            manager.clone(),
            state.clone(),
            address.clone(),
            stats.clone(),
            ReaderSettings::from(&config.mixer),
        );
        let supervisor = Arc::new(ReaderSupervisor::new(reader, cancel.clone()));
        let scanner = Scanner::new(
            pinger,
            ScanSettings::from(&config.discovery),
            address.clone(),
        );

        Self {
            state,
            manager,
            supervisor,
            scanner,
            address,
            store,
            stats,
            subnet: config.discovery.subnet.clone(),
            fallback_address: config.mixer.fallback_address,
            stale_after: config.tally.stale_after(),
            cancel,
        }
    }

    pub fn state(&self) -> Arc<SharedTallyState> {
        self.state.clone()
    }

    pub fn stats(&self) -> Arc<RuntimeStats> {
        self.stats.clone()
    }

    pub fn supervisor(&self) -> Arc<ReaderSupervisor<F>> {
        self.supervisor.clone()
    }

    pub fn mixer_address(&self) -> Option<Ipv4Addr> {
        self.address.get()
    }

    pub fn is_scanning(&self) -> bool {
        self.scanner.is_scanning()
    }

    /// Settle on a mixer address and start the reader
    ///
    /// Without a persisted address an opportunistic scan runs first; if that
    /// finds nothing the configured fallback is used for this run only.
    pub async fn start(&self, scan_on_startup: bool) {
        if self.address.get().is_none() && scan_on_startup {
            match self.trigger_scan(false).await {
                Ok(outcome) => tracing::info!("Startup scan finished: {:?}", outcome),
                Err(e) => tracing::warn!("Startup scan failed: {}", e),
            }
        }

        if self.address.get().is_none() {
            tracing::info!("No mixer address known, using fallback {}", self.fallback_address);
            self.address.set(Some(self.fallback_address));
        }

        self.supervisor.start();
    }

    /// Run a discovery scan and record what it finds
    pub async fn trigger_scan(&self, force: bool) -> Result<ScanOutcome> {
        self.stats.record_scan_request();
        let subnet = self.resolve_subnet()?;

        let outcome = self
            .scanner
            .scan(subnet, force, self.manager.as_ref(), &self.cancel)
            .await;

        let saved = match outcome {
            ScanOutcome::Found(ip) => self.store.update(|s| {
                s.atem_ip = Some(ip);
                s.last_successful_ip = Some(ip);
            }),
            ScanOutcome::Confirmed(ip) => self.store.update(|s| s.last_successful_ip = Some(ip)),
            _ => Ok(()),
        };
        if let Err(e) = saved {
            tracing::warn!("Failed to persist scan result: {}", e);
        }

        if force && outcome.address().is_some() {
            self.supervisor.restart().await;
        }
        Ok(outcome)
    }

    /// Manual override of the mixer address
    pub async fn set_mixer_address(&self, address: Ipv4Addr) -> Result<()> {
        let previous = self.address.set(Some(address));
        tracing::info!("Mixer address set to {} (was {:?})", address, previous);

        self.supervisor.restart().await;
        self.store.update(|s| s.atem_ip = Some(address))
    }

    pub async fn restart_reader(&self) {
        self.supervisor.restart().await;
    }

    pub fn set_active(&self, active: bool) {
        tracing::info!("Tally output {}", if active { "enabled" } else { "disabled" });
        self.state.set_active(active);
    }

    /// Stop the reader and drop the mixer connection
    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }

    pub fn snapshot(&self) -> TallySnapshot {
        let mixer = self.state.snapshot();
        let age = mixer.age(Instant::now());

        TallySnapshot {
            live: mixer.live,
            preview: mixer.preview,
            autolive: mixer.autolive,
            active: self.state.is_active(),
            data_age_ms: age.map(|a| a.as_millis() as u64),
            freshness: Freshness::classify(age, self.stale_after),
            mixer_address: self.address.get(),
            connection: self.manager.status(),
            scanning: self.scanner.is_scanning(),
            reader_running: self.supervisor.is_running(),
            stats: self.stats.snapshot(),
        }
    }

    fn resolve_subnet(&self) -> Result<Subnet> {
        match &self.subnet {
            Some(text) => text.parse::<Subnet>().map_err(Error::from),
            None => Subnet::local().map_err(Error::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PersistedState;
    use crate::device::SimulatedNetwork;
    use tempfile::TempDir;

    const MIXER: Ipv4Addr = Ipv4Addr::new(192, 168, 2, 50);

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.discovery.subnet = Some("192.168.2.0/24".to_string());
        config
    }

    fn controller(
        dir: &TempDir,
        network: &SimulatedNetwork,
    ) -> TallyController<SimulatedNetwork, SimulatedNetwork> {
        TallyController::new(
            &config(),
            network.clone(),
            network.clone(),
            StateStore::open(dir.path().join("tally_state.json")),
            CancellationToken::new(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_hit_persists_both_fields() {
        let dir = TempDir::new().unwrap();
        let network = SimulatedNetwork::new();
        network.add_mixer(MIXER, "3", "5");
        let controller = controller(&dir, &network);

        let outcome = controller.trigger_scan(false).await.unwrap();
        assert_eq!(outcome, ScanOutcome::Found(MIXER));
        assert_eq!(controller.mixer_address(), Some(MIXER));

        let saved = StateStore::open(dir.path().join("tally_state.json")).get();
        assert_eq!(saved.atem_ip, Some(MIXER));
        assert_eq!(saved.last_successful_ip, Some(MIXER));
        assert_eq!(controller.snapshot().stats.scan_requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmation_persists_last_successful_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tally_state.json");
        StateStore::open(&path)
            .update(|s| s.last_successful_ip = Some(MIXER))
            .unwrap();

        let network = SimulatedNetwork::new();
        network.add_mixer(MIXER, "1", "2");
        let controller = controller(&dir, &network);
        assert_eq!(controller.mixer_address(), Some(MIXER));

        let outcome = controller.trigger_scan(false).await.unwrap();
        assert_eq!(outcome, ScanOutcome::Confirmed(MIXER));
        assert_eq!(network.ping_count(), 0);

        let saved = StateStore::open(&path).get();
        assert_eq!(
            saved,
            PersistedState {
                atem_ip: None,
                wifi_ap_mode: false,
                last_successful_ip: Some(MIXER),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_without_mixer_uses_fallback() {
        let dir = TempDir::new().unwrap();
        let network = SimulatedNetwork::new();
        let controller = controller(&dir, &network);

        controller.start(true).await;
        assert_eq!(
            controller.mixer_address(),
            Some(config().mixer.fallback_address)
        );
        assert!(controller.snapshot().reader_running);

        // fallback is not persisted
        let saved = StateStore::open(dir.path().join("tally_state.json")).get();
        assert_eq!(saved.atem_ip, None);

        controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_mixer_address_restarts_reader() {
        let dir = TempDir::new().unwrap();
        let network = SimulatedNetwork::new();
        network.add_mixer(MIXER, "4", "6");
        let controller = controller(&dir, &network);

        controller.set_mixer_address(MIXER).await.unwrap();
        assert_eq!(controller.mixer_address(), Some(MIXER));
        assert_eq!(controller.snapshot().stats.reader_restarts, 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let snapshot = controller.snapshot();
        assert_eq!((snapshot.live, snapshot.preview), (4, 6));
        assert_eq!(snapshot.freshness, Freshness::Live);

        let saved = StateStore::open(dir.path().join("tally_state.json")).get();
        assert_eq!(saved.atem_ip, Some(MIXER));

        controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_scan_restarts_reader() {
        let dir = TempDir::new().unwrap();
        let network = SimulatedNetwork::new();
        network.add_mixer(MIXER, "1", "2");
        let controller = controller(&dir, &network);

        let outcome = controller.trigger_scan(true).await.unwrap();
        assert_eq!(outcome, ScanOutcome::Found(MIXER));
        assert_eq!(controller.snapshot().stats.reader_restarts, 1);
        assert!(controller.snapshot().reader_running);

        controller.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_reports_unknown_and_active_flag() {
        let dir = TempDir::new().unwrap();
        let network = SimulatedNetwork::new();
        let controller = controller(&dir, &network);

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.freshness, Freshness::Unknown);
        assert_eq!(snapshot.data_age_ms, None);
        assert!(snapshot.active);
        assert!(!snapshot.reader_running);

        controller.set_active(false);
        assert!(!controller.snapshot().active);
    }
}

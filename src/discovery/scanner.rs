//! Mixer discovery scanner
//!
//! A scan runs in up to three phases:
//!
//! 1. Fast path: re-probe the known-good address (skipped when forced).
//! 2. Liveness sweep: ping every host of the subnet through a bounded pool,
//!    within a fixed wall-clock budget.
//! 3. Probe sweep: open a protocol session against each responding host in
//!    turn until one answers as a mixer.
//!
//! Only one scan runs at a time; overlapping requests return
//! [`ScanOutcome::AlreadyRunning`] immediately.

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::DiscoveryConfig;
use crate::connection::MixerProbe;
use crate::discovery::ping::Pinger;
use crate::discovery::subnet::Subnet;
use crate::tally::SharedAddress;

/// Result of one scan request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "address", rename_all = "snake_case")]
pub enum ScanOutcome {
    /// The known-good address still answers
    Confirmed(Ipv4Addr),
    /// A mixer was found by sweeping the subnet
    Found(Ipv4Addr),
    NotFound,
    /// Another scan was in progress; nothing was done
    AlreadyRunning,
    Cancelled,
}

impl ScanOutcome {
    pub fn address(&self) -> Option<Ipv4Addr> {
        match self {
            Self::Confirmed(address) | Self::Found(address) => Some(*address),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub ping_timeout: Duration,
    pub concurrency: usize,
    pub sweep_budget: Duration,
}

impl From<&DiscoveryConfig> for ScanSettings {
    fn from(config: &DiscoveryConfig) -> Self {
        Self {
            ping_timeout: config.ping_timeout(),
            concurrency: config.concurrency.max(1),
            sweep_budget: config.sweep_budget(),
        }
    }
}

/// Clears the scan-in-progress flag when dropped
struct ScanGuard<'a>(&'a AtomicBool);

impl<'a> ScanGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Finds a responding mixer on a subnet
pub struct Scanner<P: Pinger> {
    pinger: P,
    settings: ScanSettings,
    known: SharedAddress,
    in_progress: AtomicBool,
}

impl<P: Pinger> Scanner<P> {
    pub fn new(pinger: P, settings: ScanSettings, known: SharedAddress) -> Self {
        Self {
            pinger,
            settings,
            known,
            in_progress: AtomicBool::new(false),
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Locate a mixer on `subnet`, updating the known-good address on success
    pub async fn scan<M: MixerProbe>(
        &self,
        subnet: Subnet,
        force: bool,
        prober: &M,
        cancel: &CancellationToken,
    ) -> ScanOutcome {
        let Some(_guard) = ScanGuard::acquire(&self.in_progress) else {
            tracing::info!("Scan already in progress, ignoring request");
            return ScanOutcome::AlreadyRunning;
        };

        tracing::info!("Searching for mixer on {}", subnet);

        if !force {
            if let Some(known) = self.known.get() {
                tracing::info!("Checking known address {}", known);
                let confirmed = tokio::select! {
                    _ = cancel.cancelled() => return ScanOutcome::Cancelled,
                    confirmed = prober.probe(known) => confirmed,
                };
                if confirmed {
                    tracing::info!("Mixer confirmed at {}", known);
                    return ScanOutcome::Confirmed(known);
                }
                tracing::info!("Known address not answering, starting full scan");
            }
        }

        let Some(alive) = self.sweep(subnet, cancel).await else {
            return ScanOutcome::Cancelled;
        };

        if alive.is_empty() {
            tracing::warn!("No host on {} answered ping", subnet);
            return ScanOutcome::NotFound;
        }

        for (i, host) in alive.iter().enumerate() {
            tracing::info!("Probing {} ({}/{})", host, i + 1, alive.len());
            let found = tokio::select! {
                _ = cancel.cancelled() => return ScanOutcome::Cancelled,
                found = prober.probe(*host) => found,
            };

            if found {
                self.known.set(Some(*host));
                tracing::info!("Mixer found at {}", host);
                return ScanOutcome::Found(*host);
            }
        }

        tracing::warn!("No mixer among {} responding hosts", alive.len());
        ScanOutcome::NotFound
    }

    /// Responding hosts in address order, `None` if cancelled
    async fn sweep(&self, subnet: Subnet, cancel: &CancellationToken) -> Option<Vec<Ipv4Addr>> {
        let total = subnet.host_count();
        let deadline = Instant::now() + self.settings.sweep_budget;
        let pinger = &self.pinger;
        let timeout = self.settings.ping_timeout;

        tracing::info!("Pinging {} hosts", total);

        let mut results = stream::iter(subnet.hosts())
            .map(move |host| async move { (host, pinger.ping(host, timeout).await) })
            .buffer_unordered(self.settings.concurrency.max(1));

        let mut alive = Vec::new();
        let mut completed = 0u64;

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return None,
                next = tokio::time::timeout_at(deadline, results.next()) => next,
            };

            match next {
                Ok(Some((host, true))) => {
                    completed += 1;
                    alive.push(host);
                    tracing::info!("Host {} answered ({}/{})", host, completed, total);
                }
                Ok(Some((_, false))) => {
                    completed += 1;
                    if completed % 50 == 0 {
                        tracing::debug!("Ping progress {}/{}", completed, total);
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        "Ping sweep budget exhausted after {}/{} hosts",
                        completed,
                        total
                    );
                    break;
                }
            }
        }

        tracing::info!("Ping sweep done, {} hosts alive", alive.len());
        alive.sort();
        Some(alive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionManager, ConnectionSettings};
    use crate::device::SimulatedNetwork;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn settings() -> ScanSettings {
        ScanSettings::from(&DiscoveryConfig::default())
    }

    fn subnet() -> Subnet {
        "192.168.10.0/24".parse().unwrap()
    }

    fn ip(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(192, 168, 10, last)
    }

    /// Answers for a fixed set of addresses and records every probe
    #[derive(Default)]
    struct RecordingProbe {
        mixers: HashSet<Ipv4Addr>,
        probed: Mutex<Vec<Ipv4Addr>>,
    }

    impl MixerProbe for RecordingProbe {
        async fn probe(&self, address: Ipv4Addr) -> bool {
            self.probed.lock().push(address);
            self.mixers.contains(&address)
        }
    }

    /// Every host answers, after a fixed delay
    struct SlowPinger(Duration);

    impl Pinger for SlowPinger {
        async fn ping(&self, _address: Ipv4Addr, _timeout: Duration) -> bool {
            tokio::time::sleep(self.0).await;
            true
        }
    }

    /// Accepts the connection but never answers the handshake
    struct UnresponsiveMixer;

    impl MixerProbe for UnresponsiveMixer {
        async fn probe(&self, _address: Ipv4Addr) -> bool {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            false
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_known_address_check() {
        let scanner = Arc::new(Scanner::new(
            SimulatedNetwork::new(),
            settings(),
            SharedAddress::new(Some(ip(42))),
        ));
        let cancel = CancellationToken::new();

        let scan = tokio::spawn({
            let scanner = scanner.clone();
            let cancel = cancel.clone();
            async move { scanner.scan(subnet(), false, &UnresponsiveMixer, &cancel).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(scanner.is_scanning());

        let started = tokio::time::Instant::now();
        cancel.cancel();
        assert_eq!(scan.await.unwrap(), ScanOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!scanner.is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn test_finds_single_mixer() {
        let network = SimulatedNetwork::new();
        network.add_host(ip(1));
        network.add_host(ip(20));
        network.add_mixer(ip(42), "input1", "input2");

        let manager = ConnectionManager::new(network.clone(), ConnectionSettings::default());
        let known = SharedAddress::new(None);
        let scanner = Scanner::new(network.clone(), settings(), known.clone());

        let outcome = scanner
            .scan(subnet(), false, &manager, &CancellationToken::new())
            .await;

        assert_eq!(outcome, ScanOutcome::Found(ip(42)));
        assert_eq!(known.get(), Some(ip(42)));
        assert_eq!(network.ping_count(), 254);
        assert!(!scanner.is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_ping_responders_skips_probes() {
        let network = SimulatedNetwork::new();
        let probe = RecordingProbe::default();
        let scanner = Scanner::new(network, settings(), SharedAddress::new(None));

        let outcome = scanner
            .scan(subnet(), true, &probe, &CancellationToken::new())
            .await;

        assert_eq!(outcome, ScanOutcome::NotFound);
        assert!(probe.probed.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_known_address_fast_path() {
        let network = SimulatedNetwork::new();
        let probe = RecordingProbe {
            mixers: HashSet::from([ip(7)]),
            ..Default::default()
        };
        let scanner = Scanner::new(network.clone(), settings(), SharedAddress::new(Some(ip(7))));

        let outcome = scanner
            .scan(subnet(), false, &probe, &CancellationToken::new())
            .await;

        assert_eq!(outcome, ScanOutcome::Confirmed(ip(7)));
        assert_eq!(network.ping_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_scan_skips_fast_path() {
        let network = SimulatedNetwork::new();
        network.add_host(ip(9));
        let probe = RecordingProbe {
            mixers: HashSet::from([ip(7), ip(9)]),
            ..Default::default()
        };
        let known = SharedAddress::new(Some(ip(7)));
        let scanner = Scanner::new(network, settings(), known.clone());

        let outcome = scanner
            .scan(subnet(), true, &probe, &CancellationToken::new())
            .await;

        assert_eq!(outcome, ScanOutcome::Found(ip(9)));
        assert_eq!(*probe.probed.lock(), vec![ip(9)]);
        assert_eq!(known.get(), Some(ip(9)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_respects_budget() {
        let probe = RecordingProbe::default();
        let settings = ScanSettings {
            ping_timeout: Duration::from_millis(500),
            concurrency: 2,
            sweep_budget: Duration::from_millis(2500),
        };
        let scanner = Scanner::new(
            SlowPinger(Duration::from_secs(1)),
            settings,
            SharedAddress::new(None),
        );

        let started = Instant::now();
        let outcome = scanner
            .scan(subnet(), true, &probe, &CancellationToken::new())
            .await;

        assert_eq!(outcome, ScanOutcome::NotFound);
        assert_eq!(probe.probed.lock().len(), 4);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_scan_is_rejected() {
        let scanner = Arc::new(Scanner::new(
            SlowPinger(Duration::from_secs(1)),
            settings(),
            SharedAddress::new(None),
        ));
        let probe = Arc::new(RecordingProbe::default());
        let cancel = CancellationToken::new();

        let first = {
            let scanner = scanner.clone();
            let probe = probe.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { scanner.scan(subnet(), true, &*probe, &cancel).await })
        };
        tokio::task::yield_now().await;
        assert!(scanner.is_scanning());

        let second = scanner.scan(subnet(), true, &*probe, &cancel).await;
        assert_eq!(second, ScanOutcome::AlreadyRunning);

        cancel.cancel();
        assert_eq!(first.await.unwrap(), ScanOutcome::Cancelled);
        assert!(!scanner.is_scanning());
    }
}

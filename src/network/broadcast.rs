//! Tally broadcast loop
//!
//! Runs at a fixed cadence independent of the reader: every cycle renders a
//! fresh array from the shared state and sends it, even when the data is
//! stale (in which case the array is all-Clear). Missed cycles are not
//! caught up.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::TallyConfig;
use crate::network::multicast::TallySink;
use crate::reader::ReaderHealth;
use crate::stats::RuntimeStats;
use crate::tally::{render, SharedTallyState, TallyArray};

#[derive(Debug, Clone)]
pub struct BroadcastSettings {
    pub send_interval: Duration,
    pub stale_after: Duration,
    pub health_check_interval: Duration,
}

impl From<&TallyConfig> for BroadcastSettings {
    fn from(config: &TallyConfig) -> Self {
        Self {
            send_interval: config.send_interval(),
            stale_after: config.stale_after(),
            health_check_interval: config.health_check_interval(),
        }
    }
}

/// Periodic renderer and sender of the tally array
pub struct TallyBroadcaster<S: TallySink> {
    sink: S,
    state: Arc<SharedTallyState>,
    stats: Arc<RuntimeStats>,
    health: Option<Arc<dyn ReaderHealth>>,
    settings: BroadcastSettings,
}

impl<S: TallySink> TallyBroadcaster<S> {
    pub fn new(
        sink: S,
        state: Arc<SharedTallyState>,
        stats: Arc<RuntimeStats>,
        settings: BroadcastSettings,
    ) -> Self {
        Self {
            sink,
            state,
            stats,
            health: None,
            settings,
        }
    }

    /// Check (and revive) the reader every health check interval
    pub fn with_health_check(mut self, health: Arc<dyn ReaderHealth>) -> Self {
        self.health = Some(health);
        self
    }

    /// Render the array for the current instant
    pub fn render_now(&self) -> TallyArray {
        render(
            &self.state.snapshot(),
            self.state.is_active(),
            Instant::now(),
            self.settings.stale_after,
        )
    }

    /// Broadcast until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!("Tally broadcast started");

        let mut ticker = tokio::time::interval(self.settings.send_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_health_check = Instant::now();
        let mut stale_warned = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let now = Instant::now();
            let snapshot = self.state.snapshot();

            match snapshot.age(now) {
                Some(age) if age > self.settings.stale_after => {
                    if !stale_warned {
                        tracing::warn!("Mixer data stale for {:.0}s", age.as_secs_f64());
                        stale_warned = true;
                    }
                }
                Some(_) if stale_warned => {
                    tracing::info!("Mixer data fresh again");
                    stale_warned = false;
                }
                _ => {}
            }

            let array = render(&snapshot, self.state.is_active(), now, self.settings.stale_after);
            let payload = array.to_bytes();

            match self.sink.send(&payload).await {
                Ok(()) => {
                    let sent = self.stats.record_packet_sent();
                    if sent % 100 == 0 {
                        tracing::debug!("Tally packet #{}, active: {:?}", sent, array.active());
                    }
                }
                Err(e) => {
                    self.stats.record_send_failure();
                    tracing::warn!("Failed to send tally packet: {}", e);
                }
            }

            if now.duration_since(last_health_check) >= self.settings.health_check_interval {
                last_health_check = now;
                if let Some(health) = &self.health {
                    health.ensure_running();
                }
            }
        }

        tracing::info!("Tally broadcast stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MixerConfig;
    use crate::connection::{ConnectionManager, ConnectionSettings};
    use crate::device::SimulatedNetwork;
    use crate::error::NetworkError;
    use crate::reader::{MixerReader, ReaderSettings};
    use crate::tally::SharedAddress;
    use parking_lot::Mutex;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingSink {
        packets: Mutex<Vec<Vec<u8>>>,
        failing: AtomicBool,
    }

    impl TallySink for RecordingSink {
        async fn send(&self, payload: &[u8]) -> Result<(), NetworkError> {
            if self.failing.load(Ordering::Relaxed) {
                return Err(NetworkError::SendFailed("unreachable".to_string()));
            }
            self.packets.lock().push(payload.to_vec());
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingHealth(AtomicUsize);

    impl ReaderHealth for CountingHealth {
        fn ensure_running(&self) -> bool {
            self.0.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    fn broadcaster(
        sink: &Arc<RecordingSink>,
        state: &Arc<SharedTallyState>,
    ) -> TallyBroadcaster<Arc<RecordingSink>> {
        TallyBroadcaster::new(
            sink.clone(),
            state.clone(),
            Arc::new(RuntimeStats::new()),
            BroadcastSettings::from(&TallyConfig::default()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_state_payload() {
        let sink = Arc::new(RecordingSink::default());
        let state = Arc::new(SharedTallyState::new());
        state.publish(3, 5, false, Instant::now());

        let cancel = CancellationToken::new();
        let task = tokio::spawn(broadcaster(&sink, &state).run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(900)).await;
        cancel.cancel();
        task.await.unwrap();

        let packets = sink.packets.lock();
        assert_eq!(packets.len(), 4);
        for packet in packets.iter() {
            assert_eq!(packet.len(), 256);
            assert_eq!(packet[2], 2);
            assert_eq!(packet[4], 1);
            assert_eq!(packet.iter().filter(|b| **b != 0).count(), 2);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_state_goes_clear() {
        let sink = Arc::new(RecordingSink::default());
        let state = Arc::new(SharedTallyState::new());
        state.publish(1, 2, false, Instant::now());

        let cancel = CancellationToken::new();
        let task = tokio::spawn(broadcaster(&sink, &state).run(cancel.clone()));
        tokio::time::sleep(Duration::from_secs(12)).await;
        cancel.cancel();
        task.await.unwrap();

        let packets = sink.packets.lock();
        assert!(packets.first().unwrap().iter().any(|b| *b != 0));
        assert!(packets.last().unwrap().iter().all(|b| *b == 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failures_do_not_stop_loop() {
        let sink = Arc::new(RecordingSink::default());
        sink.failing.store(true, Ordering::Relaxed);
        let state = Arc::new(SharedTallyState::new());
        let stats = Arc::new(RuntimeStats::new());

        let cancel = CancellationToken::new();
        let broadcaster = TallyBroadcaster::new(
            sink.clone(),
            state,
            stats.clone(),
            BroadcastSettings::from(&TallyConfig::default()),
        );
        let task = tokio::spawn(broadcaster.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(600)).await;
        sink.failing.store(false, Ordering::Relaxed);
        tokio::time::sleep(Duration::from_millis(500)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(stats.snapshot().send_failures, 3);
        assert!(!sink.packets.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_check_cadence() {
        let sink = Arc::new(RecordingSink::default());
        let state = Arc::new(SharedTallyState::new());
        let health = Arc::new(CountingHealth::default());

        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            broadcaster(&sink, &state)
                .with_health_check(health.clone())
                .run(cancel.clone()),
        );
        tokio::time::sleep(Duration::from_secs(25)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(health.0.load(Ordering::Relaxed), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_mixer_broadcasts_zeros() {
        let mixer = Ipv4Addr::new(192, 168, 2, 200);
        let network = SimulatedNetwork::new();
        let state = Arc::new(SharedTallyState::new());
        let stats = Arc::new(RuntimeStats::new());
        let manager = Arc::new(ConnectionManager::new(
            network.clone(),
            ConnectionSettings::default(),
        ));
        let reader = MixerReader::new(
            manager,
            state.clone(),
            SharedAddress::new(Some(mixer)),
            stats.clone(),
            ReaderSettings::from(&MixerConfig::default()),
        );
        let sink = Arc::new(RecordingSink::default());

        let cancel = CancellationToken::new();
        let reader_task = tokio::spawn(reader.run(cancel.clone()));
        let broadcast_task = tokio::spawn(broadcaster(&sink, &state).run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(60)).await;
        cancel.cancel();
        reader_task.await.unwrap();
        broadcast_task.await.unwrap();

        let packets = sink.packets.lock();
        assert!(packets.len() >= 200);
        assert!(packets.iter().all(|p| p.len() == 256 && p.iter().all(|b| *b == 0)));

        // the immediate first attempt, then one per 5s reconnect window over 60s
        assert!(network.connect_attempts_to(mixer) <= 13);
    }
}

//! Mixer reader loop and its supervisor
//!
//! The reader is the only writer of [`MixerState`](crate::tally::MixerState).
//! It drives the [`ConnectionManager`] through two modes:
//!
//! - disconnected: attempt a connect at most once per reconnect delay,
//!   otherwise idle in short sleeps;
//! - connected: read at a fixed interval and publish every valid reading.
//!
//! [`ReaderSupervisor`] owns the running task and restarts it on request or
//! when a health check finds it dead.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::MixerConfig;
use crate::connection::ConnectionManager;
use crate::device::{DeviceFactory, Sources};
use crate::error::ConnectionError;
use crate::stats::RuntimeStats;
use crate::tally::{SharedAddress, SharedTallyState};

/// How long a restart waits for the old task to finish
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ReaderSettings {
    pub reconnect_delay: Duration,
    pub read_interval: Duration,
    pub idle_poll: Duration,
    pub autolive: bool,
}

impl From<&MixerConfig> for ReaderSettings {
    fn from(config: &MixerConfig) -> Self {
        Self {
            reconnect_delay: config.reconnect_delay(),
            read_interval: config.read_interval(),
            idle_poll: config.idle_poll(),
            autolive: config.autolive,
        }
    }
}

/// Everything one reader incarnation needs
pub struct MixerReader<F: DeviceFactory> {
    manager: Arc<ConnectionManager<F>>,
    state: Arc<SharedTallyState>,
    address: SharedAddress,
    stats: Arc<RuntimeStats>,
    settings: ReaderSettings,
}

impl<F: DeviceFactory> Clone for MixerReader<F> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            state: self.state.clone(),
            address: self.address.clone(),
            stats: self.stats.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<F: DeviceFactory> MixerReader<F> {
    pub fn new(
        manager: Arc<ConnectionManager<F>>,
        state: Arc<SharedTallyState>,
        address: SharedAddress,
        stats: Arc<RuntimeStats>,
        settings: ReaderSettings,
    ) -> Self {
        Self {
            manager,
            state,
            address,
            stats,
            settings,
        }
    }

    /// Run until `cancel` fires, then disconnect
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!("Mixer reader started");

        let mut last_attempt: Option<Instant> = None;
        let mut ticker = tokio::time::interval(self.settings.read_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !cancel.is_cancelled() {
            if !self.manager.is_connected() {
                let due = last_attempt
                    .map_or(true, |at| at.elapsed() >= self.settings.reconnect_delay);

                if due {
                    if let Some(address) = self.address.get() {
                        last_attempt = Some(Instant::now());
                        tracing::info!("Connecting to mixer {}", address);

                        let result = tokio::select! {
                            _ = cancel.cancelled() => break,
                            result = self.manager.connect(address) => result,
                        };
                        match result {
                            Ok(sources) => {
                                self.publish(sources);
                                ticker.reset();
                            }
                            Err(e) => tracing::debug!("Reconnect attempt failed: {}", e),
                        }
                    }
                }

                if !self.manager.is_connected() {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.settings.idle_poll) => {}
                    }
                    continue;
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.manager.read().await {
                Ok(Some(sources)) => self.publish(sources),
                Ok(None) => {}
                Err(ConnectionError::TooManyFailures(n)) => {
                    tracing::error!("Mixer connection dropped after {} failed reads", n);
                    last_attempt = Some(Instant::now());
                }
                Err(ConnectionError::NotConnected) => {}
                Err(e) => tracing::warn!("Mixer read error: {}", e),
            }
        }

        self.manager.disconnect().await;
        tracing::info!("Mixer reader stopped");
    }

    fn publish(&self, sources: Sources) {
        let changed = self.state.publish(
            sources.live,
            sources.preview,
            self.settings.autolive,
            Instant::now(),
        );
        self.stats.record_data_update(changed);

        if changed {
            tracing::info!(
                "Mixer state updated - live: {}, preview: {}",
                sources.live,
                sources.preview
            );
        }
    }
}

/// Health hook the broadcast loop calls periodically
pub trait ReaderHealth: Send + Sync {
    /// Restart the reader if it has died; true if a restart happened
    fn ensure_running(&self) -> bool;
}

struct ReaderTask {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Owns the reader task and restarts it when needed
///
/// Restart and shutdown hold `lifecycle` for their whole stop/spawn
/// sequence, so at most one reader incarnation exists at a time.
pub struct ReaderSupervisor<F: DeviceFactory> {
    reader: MixerReader<F>,
    root: CancellationToken,
    task: Mutex<Option<ReaderTask>>,
    lifecycle: tokio::sync::Mutex<()>,
    stopped: AtomicBool,
}

impl<F: DeviceFactory> ReaderSupervisor<F> {
    /// Reader incarnations get child tokens of `root`
    pub fn new(reader: MixerReader<F>, root: CancellationToken) -> Self {
        Self {
            reader,
            root,
            task: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
            stopped: AtomicBool::new(false),
        }
    }

    /// Start the reader unless it is already running
    pub fn start(&self) {
        let Ok(_lifecycle) = self.lifecycle.try_lock() else {
            // a restart in progress spawns its own reader
            return;
        };
        self.stopped.store(false, Ordering::Release);

        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return;
        }
        *task = Some(self.spawn());
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// Stop the current reader, drop the mixer connection and start afresh
    pub async fn restart(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        if self.stopped.load(Ordering::Acquire) {
            tracing::debug!("Reader shut down, ignoring restart");
            return;
        }

        tracing::info!("Restarting mixer reader");
        self.stop_current().await;
        self.reader.manager.disconnect().await;

        if self.root.is_cancelled() {
            return;
        }
        self.reader.stats.record_reader_restart();
        *self.task.lock() = Some(self.spawn());
    }

    /// Stop the reader for good
    pub async fn shutdown(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.stopped.store(true, Ordering::Release);
        self.stop_current().await;
        self.reader.manager.disconnect().await;
    }

    async fn stop_current(&self) {
        let current = self.task.lock().take();
        if let Some(ReaderTask { handle, cancel }) = current {
            cancel.cancel();
            let abort = handle.abort_handle();
            match tokio::time::timeout(STOP_TIMEOUT, handle).await {
                Ok(Ok(())) => tracing::info!("Mixer reader stopped"),
                Ok(Err(e)) => tracing::warn!("Mixer reader ended abnormally: {}", e),
                Err(_) => {
                    tracing::warn!("Mixer reader did not stop within {:?}, aborting", STOP_TIMEOUT);
                    abort.abort();
                }
            }
        }
    }

    fn spawn(&self) -> ReaderTask {
        let cancel = self.root.child_token();
        let handle = tokio::spawn(self.reader.clone().run(cancel.clone()));
        ReaderTask { handle, cancel }
    }
}

impl<F: DeviceFactory> ReaderHealth for ReaderSupervisor<F> {
    fn ensure_running(&self) -> bool {
        if self.root.is_cancelled() || self.stopped.load(Ordering::Acquire) {
            return false;
        }
        let Ok(_lifecycle) = self.lifecycle.try_lock() else {
            // restart or shutdown in progress
            return false;
        };

        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return false;
        }

        tracing::error!("Mixer reader is not running, restarting");
        self.reader.stats.record_reader_restart();
        *task = Some(self.spawn());
        true
    }
}

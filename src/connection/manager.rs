//! Mixer connection manager
//!
//! Owns exactly one device handle and turns raw register reads into
//! validated [`Sources`]. The device session sits behind an async mutex so
//! connect, read and disconnect are mutually exclusive; the published
//! [`ConnectionStatus`] lives behind a separate lock so status queries never
//! wait for a slow handshake.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::future::Future;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::MixerConfig;
use crate::device::{DeviceFactory, MixerDevice, Sources};
use crate::error::ConnectionError;

/// Connection lifecycle as seen by the rest of the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Connected, but recent reads failed
    Failing,
}

/// Published connection status
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub address: Option<Ipv4Addr>,
    pub last_error: Option<String>,
    pub connected_since: Option<DateTime<Utc>>,
    pub connect_attempts: u64,
    pub successful_connects: u64,
}

/// Timing and failure policy for one manager
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub connect_timeout: Duration,
    pub stabilize_delay: Duration,
    pub failure_threshold: u32,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from(&MixerConfig::default())
    }
}

impl From<&MixerConfig> for ConnectionSettings {
    fn from(config: &MixerConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            stabilize_delay: config.stabilize_delay(),
            failure_threshold: config.failure_threshold.max(1),
        }
    }
}

/// Anything that can test whether a mixer answers at an address
pub trait MixerProbe: Send + Sync {
    fn probe(&self, address: Ipv4Addr) -> impl Future<Output = bool> + Send;
}

struct Session<D> {
    device: Option<D>,
    consecutive_failures: u32,
}

/// Owns the single live connection to the mixer
pub struct ConnectionManager<F: DeviceFactory> {
    factory: F,
    settings: ConnectionSettings,
    session: Mutex<Session<F::Device>>,
    status: RwLock<ConnectionStatus>,
}

impl<F: DeviceFactory> ConnectionManager<F> {
    pub fn new(factory: F, settings: ConnectionSettings) -> Self {
        Self {
            factory,
            settings,
            session: Mutex::new(Session {
                device: None,
                consecutive_failures: 0,
            }),
            status: RwLock::new(ConnectionStatus::default()),
        }
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.read().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.status.read().state
    }

    /// True in `Connected` and `Failing`
    pub fn is_connected(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Connected | ConnectionState::Failing
        )
    }

    /// Replace any existing connection with a new one to `address`.
    ///
    /// Succeeds only if the validation read returns both sources.
    pub async fn connect(&self, address: Ipv4Addr) -> Result<Sources, ConnectionError> {
        let mut session = self.session.lock().await;
        Self::teardown(&mut session).await;

        {
            let mut status = self.status.write();
            status.state = ConnectionState::Connecting;
            status.address = Some(address);
            status.connect_attempts += 1;
        }

        let mut device = self.factory.create();
        match self.establish(&mut device, address).await {
            Ok(sources) => {
                session.device = Some(device);
                let mut status = self.status.write();
                status.state = ConnectionState::Connected;
                status.last_error = None;
                status.connected_since = Some(Utc::now());
                status.successful_connects += 1;
                tracing::info!("Connected to mixer {}", address);
                Ok(sources)
            }
            Err(e) => {
                device.disconnect().await;
                let mut status = self.status.write();
                status.state = ConnectionState::Disconnected;
                status.last_error = Some(e.to_string());
                status.connected_since = None;
                tracing::warn!("Connection to mixer {} failed: {}", address, e);
                Err(e)
            }
        }
    }

    /// Read program and preview once.
    ///
    /// `Ok(None)` is a soft failure: the last known state should be kept.
    /// At the failure threshold the manager disconnects itself and returns
    /// [`ConnectionError::TooManyFailures`].
    pub async fn read(&self) -> Result<Option<Sources>, ConnectionError> {
        let mut session = self.session.lock().await;
        let result = match session.device.as_ref() {
            Some(device) => read_sources(device),
            None => return Err(ConnectionError::NotConnected),
        };

        let failure = match result {
            Ok(Some(sources)) => {
                session.consecutive_failures = 0;
                let mut status = self.status.write();
                if status.state == ConnectionState::Failing {
                    tracing::info!("Mixer reads recovered");
                    status.state = ConnectionState::Connected;
                }
                return Ok(Some(sources));
            }
            Ok(None) => ConnectionError::InvalidData,
            Err(e) => e,
        };

        session.consecutive_failures += 1;
        let failures = session.consecutive_failures;
        tracing::warn!("Mixer read failed ({} consecutive): {}", failures, failure);

        if failures >= self.settings.failure_threshold {
            tracing::error!("Too many consecutive read failures, dropping mixer connection");
            Self::teardown(&mut session).await;
            let error = ConnectionError::TooManyFailures(failures);
            let mut status = self.status.write();
            status.state = ConnectionState::Disconnected;
            status.last_error = Some(error.to_string());
            status.connected_since = None;
            return Err(error);
        }

        let mut status = self.status.write();
        status.state = ConnectionState::Failing;
        status.last_error = Some(failure.to_string());
        Ok(None)
    }

    /// Cheap liveness check, does not count toward the failure threshold
    pub async fn is_alive(&self) -> bool {
        let session = self.session.lock().await;
        session
            .device
            .as_ref()
            .is_some_and(|device| device.is_connected() && matches!(device.program_source(), Ok(Some(_))))
    }

    /// Idempotent
    pub async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        let had_device = session.device.is_some();
        Self::teardown(&mut session).await;

        let mut status = self.status.write();
        status.state = ConnectionState::Disconnected;
        status.connected_since = None;
        if had_device {
            tracing::info!("Disconnected from mixer");
        }
    }

    /// Connect and immediately disconnect with a throwaway handle.
    ///
    /// Leaves this manager's session and status untouched.
    pub async fn probe(&self, address: Ipv4Addr) -> bool {
        let mut device = self.factory.create();
        let result = self.establish(&mut device, address).await;
        device.disconnect().await;

        match result {
            Ok(sources) => {
                tracing::debug!("Probe of {} answered {:?}", address, sources);
                true
            }
            Err(e) => {
                tracing::debug!("Probe of {} failed: {}", address, e);
                false
            }
        }
    }

    async fn establish(
        &self,
        device: &mut F::Device,
        address: Ipv4Addr,
    ) -> Result<Sources, ConnectionError> {
        device.connect(address).await?;

        if !device.wait_for_ready(self.settings.connect_timeout).await {
            return Err(ConnectionError::Timeout(self.settings.connect_timeout, address));
        }

        tokio::time::sleep(self.settings.stabilize_delay).await;

        read_sources(device)?.ok_or(ConnectionError::InvalidData)
    }

    async fn teardown(session: &mut Session<F::Device>) {
        if let Some(mut device) = session.device.take() {
            device.disconnect().await;
        }
        session.consecutive_failures = 0;
    }
}

impl<F: DeviceFactory> MixerProbe for ConnectionManager<F> {
    async fn probe(&self, address: Ipv4Addr) -> bool {
        ConnectionManager::probe(self, address).await
    }
}

fn read_sources<D: MixerDevice>(device: &D) -> Result<Option<Sources>, ConnectionError> {
    let program = device.program_source()?;
    let preview = device.preview_source()?;
    Ok(Sources::from_tokens(program.as_deref(), preview.as_deref()))
}

//! In-memory simulated mixer network
//!
//! Hosts and mixers are registered by address. The network hands out
//! [`SimulatedDevice`] handles (as a [`DeviceFactory`]) and answers pings
//! (as a [`Pinger`]), and records every connection attempt and teardown so
//! callers can assert on connect and probe traffic.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use crate::device::{DeviceFactory, MixerDevice};
use crate::discovery::ping::Pinger;
use crate::error::DeviceError;

/// Registers of one simulated mixer
#[derive(Debug, Clone)]
pub struct SimulatedMixer {
    pub program: Option<String>,
    pub preview: Option<String>,
    /// Completes the handshake when true
    pub ready: bool,
    /// Register reads raise an error when true
    pub read_failure: bool,
}

#[derive(Default)]
struct NetworkInner {
    hosts: HashSet<Ipv4Addr>,
    mixers: HashMap<Ipv4Addr, SimulatedMixer>,
    connect_log: Vec<Ipv4Addr>,
    disconnects: usize,
    pings: usize,
}

/// Shared handle to a simulated LAN
#[derive(Clone, Default)]
pub struct SimulatedNetwork {
    inner: Arc<Mutex<NetworkInner>>,
}

impl SimulatedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// A host that answers ping but is not a mixer
    pub fn add_host(&self, address: Ipv4Addr) {
        self.inner.lock().hosts.insert(address);
    }

    /// A pingable mixer with the given source tokens
    pub fn add_mixer(&self, address: Ipv4Addr, program: &str, preview: &str) {
        let mut inner = self.inner.lock();
        inner.hosts.insert(address);
        inner.mixers.insert(
            address,
            SimulatedMixer {
                program: Some(program.to_string()),
                preview: Some(preview.to_string()),
                ready: true,
                read_failure: false,
            },
        );
    }

    /// Takes the mixer and its host off the network
    pub fn remove_mixer(&self, address: Ipv4Addr) {
        let mut inner = self.inner.lock();
        inner.mixers.remove(&address);
        inner.hosts.remove(&address);
    }

    pub fn set_sources(&self, address: Ipv4Addr, program: Option<&str>, preview: Option<&str>) {
        if let Some(mixer) = self.inner.lock().mixers.get_mut(&address) {
            mixer.program = program.map(str::to_string);
            mixer.preview = preview.map(str::to_string);
        }
    }

    pub fn set_ready(&self, address: Ipv4Addr, ready: bool) {
        if let Some(mixer) = self.inner.lock().mixers.get_mut(&address) {
            mixer.ready = ready;
        }
    }

    pub fn set_read_failure(&self, address: Ipv4Addr, failing: bool) {
        if let Some(mixer) = self.inner.lock().mixers.get_mut(&address) {
            mixer.read_failure = failing;
        }
    }

    /// Total protocol connection attempts against any address
    pub fn connect_attempts(&self) -> usize {
        self.inner.lock().connect_log.len()
    }

    pub fn connect_attempts_to(&self, address: Ipv4Addr) -> usize {
        self.inner
            .lock()
            .connect_log
            .iter()
            .filter(|a| **a == address)
            .count()
    }

    /// Device handles torn down after a connect
    pub fn disconnect_count(&self) -> usize {
        self.inner.lock().disconnects
    }

    pub fn ping_count(&self) -> usize {
        self.inner.lock().pings
    }

    fn mixer(&self, address: Ipv4Addr) -> Option<SimulatedMixer> {
        self.inner.lock().mixers.get(&address).cloned()
    }
}

impl DeviceFactory for SimulatedNetwork {
    type Device = SimulatedDevice;

    fn create(&self) -> SimulatedDevice {
        SimulatedDevice {
            network: self.clone(),
            address: None,
            connected: false,
        }
    }
}

impl Pinger for SimulatedNetwork {
    async fn ping(&self, address: Ipv4Addr, _timeout: Duration) -> bool {
        let mut inner = self.inner.lock();
        inner.pings += 1;
        inner.hosts.contains(&address)
    }
}

/// Device handle bound to a [`SimulatedNetwork`]
pub struct SimulatedDevice {
    network: SimulatedNetwork,
    address: Option<Ipv4Addr>,
    connected: bool,
}

impl SimulatedDevice {
    fn read_register(
        &self,
        select: impl FnOnce(&SimulatedMixer) -> Option<String>,
    ) -> Result<Option<String>, DeviceError> {
        let address = match (self.connected, self.address) {
            (true, Some(address)) => address,
            _ => return Err(DeviceError::ConnectionLost),
        };

        match self.network.mixer(address) {
            None => Err(DeviceError::ConnectionLost),
            Some(mixer) if mixer.read_failure => {
                Err(DeviceError::Read("simulated register failure".to_string()))
            }
            Some(mixer) => Ok(select(&mixer)),
        }
    }
}

impl MixerDevice for SimulatedDevice {
    async fn connect(&mut self, address: Ipv4Addr) -> Result<(), DeviceError> {
        let reachable = {
            let mut inner = self.network.inner.lock();
            inner.connect_log.push(address);
            inner.hosts.contains(&address)
        };

        self.connected = false;
        if !reachable {
            self.address = None;
            return Err(DeviceError::Handshake(address, "host unreachable".to_string()));
        }
        self.address = Some(address);
        Ok(())
    }

    async fn wait_for_ready(&mut self, timeout: Duration) -> bool {
        let ready = self
            .address
            .and_then(|address| self.network.mixer(address))
            .is_some_and(|mixer| mixer.ready);

        if ready {
            self.connected = true;
        } else {
            tokio::time::sleep(timeout).await;
        }
        ready
    }

    fn program_source(&self) -> Result<Option<String>, DeviceError> {
        self.read_register(|mixer| mixer.program.clone())
    }

    fn preview_source(&self) -> Result<Option<String>, DeviceError> {
        self.read_register(|mixer| mixer.preview.clone())
    }

    async fn disconnect(&mut self) {
        if self.address.take().is_some() {
            self.network.inner.lock().disconnects += 1;
        }
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
            && self
                .address
                .is_some_and(|address| self.network.mixer(address).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIXER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);

    #[tokio::test(start_paused = true)]
    async fn test_device_reads_registers() {
        let network = SimulatedNetwork::new();
        network.add_mixer(MIXER, "input1", "input2");

        let mut device = network.create();
        device.connect(MIXER).await.unwrap();
        assert!(device.wait_for_ready(Duration::from_secs(5)).await);
        assert_eq!(device.program_source().unwrap().as_deref(), Some("input1"));
        assert_eq!(device.preview_source().unwrap().as_deref(), Some("input2"));

        network.remove_mixer(MIXER);
        assert!(!device.is_connected());
        assert_eq!(device.program_source(), Err(DeviceError::ConnectionLost));
    }

    #[tokio::test(start_paused = true)]
    async fn test_plain_host_never_ready() {
        let network = SimulatedNetwork::new();
        network.add_host(MIXER);
        let mut device = network.create();

        device.connect(MIXER).await.unwrap();
        assert!(!device.wait_for_ready(Duration::from_secs(5)).await);
        assert_eq!(network.connect_attempts_to(MIXER), 1);

        device.disconnect().await;
        device.disconnect().await;
        assert_eq!(network.disconnect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_address_fails_handshake() {
        let network = SimulatedNetwork::new();
        let mut device = network.create();

        assert!(matches!(
            device.connect(MIXER).await,
            Err(DeviceError::Handshake(addr, _)) if addr == MIXER
        ));
        assert!(!device.is_connected());
        assert_eq!(network.connect_attempts_to(MIXER), 1);
        assert_eq!(network.disconnect_count(), 0);
    }
}

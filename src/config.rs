//! Configuration
//!
//! Two files back the server:
//!
//! - `tally.toml`: operator settings ([`AppConfig`]), read once at startup.
//! - `tally_state.json`: the persisted mixer address record
//!   ([`PersistedState`]), rewritten whenever discovery or a manual override
//!   establishes an address.

use directories::ProjectDirs;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};

/// Top-level settings file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mixer: MixerConfig,
    pub discovery: DiscoveryConfig,
    pub tally: TallyConfig,
    pub api: ApiConfig,
    /// Location of the persisted address record
    pub state_file: Option<PathBuf>,
}

impl AppConfig {
    /// Parse a TOML settings file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load from `path`, or defaults when the file does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            let config = Self::load(path)?;
            tracing::info!("Loaded configuration from {}", path.display());
            Ok(config)
        } else {
            tracing::info!("No configuration at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn default_path() -> PathBuf {
        project_dirs()
            .map(|dirs| dirs.config_dir().join("tally.toml"))
            .unwrap_or_else(|| PathBuf::from("tally.toml"))
    }

    pub fn state_file(&self) -> PathBuf {
        self.state_file.clone().unwrap_or_else(|| {
            project_dirs()
                .map(|dirs| dirs.data_dir().join("tally_state.json"))
                .unwrap_or_else(|| PathBuf::from("tally_state.json"))
        })
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "lan-tally-server")
}

/// Mixer connection and reader settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    /// Used when nothing is persisted and discovery finds nothing
    pub fallback_address: Ipv4Addr,
    pub connect_timeout_ms: u64,
    /// Pause between handshake and validation read
    pub stabilize_ms: u64,
    pub reconnect_delay_ms: u64,
    pub read_interval_ms: u64,
    /// Sleep granularity while waiting to reconnect
    pub idle_poll_ms: u64,
    pub failure_threshold: u32,
    pub autolive: bool,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            fallback_address: DEFAULT_FALLBACK_ADDRESS,
            connect_timeout_ms: 5000,
            stabilize_ms: 500,
            reconnect_delay_ms: 5000,
            read_interval_ms: 100,
            idle_poll_ms: 1000,
            failure_threshold: 5,
            autolive: false,
        }
    }
}

impl MixerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn stabilize_delay(&self) -> Duration {
        Duration::from_millis(self.stabilize_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn read_interval(&self) -> Duration {
        Duration::from_millis(self.read_interval_ms.max(1))
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms.max(1))
    }
}

/// Network discovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// CIDR to scan, detected from the local interface when absent
    pub subnet: Option<String>,
    pub ping_timeout_ms: u64,
    /// Concurrent pings during the liveness sweep
    pub concurrency: usize,
    /// Wall-clock budget for the liveness sweep
    pub sweep_budget_ms: u64,
    pub scan_on_startup: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            subnet: None,
            ping_timeout_ms: 500,
            concurrency: 100,
            sweep_budget_ms: 10_000,
            scan_on_startup: true,
        }
    }
}

impl DiscoveryConfig {
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn sweep_budget(&self) -> Duration {
        Duration::from_millis(self.sweep_budget_ms)
    }
}

/// Tally broadcast settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TallyConfig {
    pub group: Ipv4Addr,
    pub port: u16,
    pub ttl: u32,
    pub send_interval_ms: u64,
    pub stale_after_ms: u64,
    pub health_check_interval_ms: u64,
}

impl Default for TallyConfig {
    fn default() -> Self {
        Self {
            group: DEFAULT_MULTICAST_GROUP,
            port: DEFAULT_MULTICAST_PORT,
            ttl: DEFAULT_MULTICAST_TTL,
            send_interval_ms: 250,
            stale_after_ms: 10_000,
            health_check_interval_ms: 10_000,
        }
    }
}

impl TallyConfig {
    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms.max(1))
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms.max(1))
    }
}

/// Control API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub http_port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0".to_string(),
            http_port: DEFAULT_HTTP_PORT,
        }
    }
}

/// Persisted mixer address record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    pub atem_ip: Option<Ipv4Addr>,
    pub wifi_ap_mode: bool,
    pub last_successful_ip: Option<Ipv4Addr>,
}

impl PersistedState {
    /// Address to try first at startup
    pub fn seed_address(&self) -> Option<Ipv4Addr> {
        self.atem_ip.or(self.last_successful_ip)
    }
}

/// File-backed [`PersistedState`]
pub struct StateStore {
    path: PathBuf,
    state: Mutex<PersistedState>,
}

impl StateStore {
    /// Read the record at `path`; a missing or unreadable file yields defaults
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable state file {}: {}", path.display(), e);
                PersistedState::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PersistedState::default(),
            Err(e) => {
                tracing::warn!("Failed to read state file {}: {}", path.display(), e);
                PersistedState::default()
            }
        };

        Self {
            path,
            state: Mutex::new(state),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> PersistedState {
        self.state.lock().clone()
    }

    /// Apply `update` and write the result to disk
    pub fn update(&self, update: impl FnOnce(&mut PersistedState)) -> Result<()> {
        let mut state = self.state.lock();
        update(&mut state);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(&*state)
            .map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(&self.path, json)?;
        tracing::info!("Saved state to {}", self.path.display());
        Ok(())
    }
}

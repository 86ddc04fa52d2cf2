//! Shared tally state
//!
//! [`SharedTallyState`] is the single source of truth between the reader
//! loop (the only writer of [`MixerState`]) and the broadcast loop. Live,
//! preview and autolive are always read and written together under one lock.

use parking_lot::RwLock;
use serde::Serialize;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Last validated mixer reading
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MixerState {
    /// Program channel, 0 = none
    pub live: u16,
    /// Preview channel, 0 = none
    pub preview: u16,
    pub autolive: bool,
    pub last_updated_at: Option<Instant>,
}

impl MixerState {
    /// Time since the last successful read, `None` if never updated
    pub fn age(&self, now: Instant) -> Option<Duration> {
        self.last_updated_at
            .map(|at| now.saturating_duration_since(at))
    }
}

/// How current the mixer data is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    /// Updated within the last second
    Live,
    /// Within the staleness threshold
    Recent,
    Stale,
    /// No data ever received
    Unknown,
}

impl Freshness {
    pub fn classify(age: Option<Duration>, stale_after: Duration) -> Self {
        match age {
            None => Self::Unknown,
            Some(age) if age < Duration::from_secs(1) => Self::Live,
            Some(age) if age <= stale_after => Self::Recent,
            Some(_) => Self::Stale,
        }
    }
}

/// Lock-guarded mixer state plus the system active flag
pub struct SharedTallyState {
    mixer: RwLock<MixerState>,
    active: AtomicBool,
}

impl SharedTallyState {
    pub fn new() -> Self {
        Self {
            mixer: RwLock::new(MixerState::default()),
            active: AtomicBool::new(true),
        }
    }

    /// Consistent copy of the mixer state
    pub fn snapshot(&self) -> MixerState {
        *self.mixer.read()
    }

    /// Store a validated reading and refresh its timestamp.
    ///
    /// Returns true when live, preview or autolive changed.
    pub fn publish(&self, live: u16, preview: u16, autolive: bool, now: Instant) -> bool {
        let mut mixer = self.mixer.write();
        let changed = mixer.live != live || mixer.preview != preview || mixer.autolive != autolive;
        *mixer = MixerState {
            live,
            preview,
            autolive,
            last_updated_at: Some(now),
        };
        changed
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }
}

impl Default for SharedTallyState {
    fn default() -> Self {
        Self::new()
    }
}

/// Known-good mixer address, single writer at a time, many readers
#[derive(Clone, Default)]
pub struct SharedAddress {
    inner: Arc<RwLock<Option<Ipv4Addr>>>,
}

impl SharedAddress {
    pub fn new(address: Option<Ipv4Addr>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(address)),
        }
    }

    pub fn get(&self) -> Option<Ipv4Addr> {
        *self.inner.read()
    }

    /// Returns the previous address
    pub fn set(&self, address: Option<Ipv4Addr>) -> Option<Ipv4Addr> {
        std::mem::replace(&mut *self.inner.write(), address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_detects_changes() {
        let state = SharedTallyState::new();
        let now = Instant::now();

        assert!(state.publish(3, 5, false, now));
        assert!(!state.publish(3, 5, false, now + Duration::from_millis(100)));
        assert!(state.publish(4, 5, false, now + Duration::from_millis(200)));

        let snapshot = state.snapshot();
        assert_eq!(snapshot.live, 4);
        assert_eq!(snapshot.preview, 5);
        assert_eq!(snapshot.last_updated_at, Some(now + Duration::from_millis(200)));
    }

    #[test]
    fn test_unchanged_publish_refreshes_timestamp() {
        let state = SharedTallyState::new();
        let now = Instant::now();
        state.publish(1, 2, false, now);
        state.publish(1, 2, false, now + Duration::from_secs(30));

        let age = state.snapshot().age(now + Duration::from_secs(31));
        assert_eq!(age, Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_freshness() {
        let stale = Duration::from_secs(10);
        assert_eq!(Freshness::classify(None, stale), Freshness::Unknown);
        assert_eq!(Freshness::classify(Some(Duration::from_millis(200)), stale), Freshness::Live);
        assert_eq!(Freshness::classify(Some(Duration::from_secs(5)), stale), Freshness::Recent);
        assert_eq!(Freshness::classify(Some(Duration::from_secs(11)), stale), Freshness::Stale);
    }

    #[test]
    fn test_shared_address() {
        let address = SharedAddress::new(None);
        let reader = address.clone();
        let ip = Ipv4Addr::new(192, 168, 1, 10);

        assert_eq!(address.set(Some(ip)), None);
        assert_eq!(reader.get(), Some(ip));
    }
}

//! Process-lifetime counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters shared by the loops and the controller
pub struct RuntimeStats {
    started_at: Instant,
    packets_sent: AtomicU64,
    send_failures: AtomicU64,
    data_updates: AtomicU64,
    state_changes: AtomicU64,
    scan_requests: AtomicU64,
    reader_restarts: AtomicU64,
}

impl RuntimeStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            packets_sent: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            data_updates: AtomicU64::new(0),
            state_changes: AtomicU64::new(0),
            scan_requests: AtomicU64::new(0),
            reader_restarts: AtomicU64::new(0),
        }
    }

    /// Returns the new total
    pub fn record_packet_sent(&self) -> u64 {
        self.packets_sent.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_data_update(&self, changed: bool) {
        self.data_updates.fetch_add(1, Ordering::Relaxed);
        if changed {
            self.state_changes.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_scan_request(&self) {
        self.scan_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reader_restart(&self) {
        self.reader_restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uptime_seconds: self.started_at.elapsed().as_secs(),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            data_updates: self.data_updates.load(Ordering::Relaxed),
            state_changes: self.state_changes.load(Ordering::Relaxed),
            scan_requests: self.scan_requests.load(Ordering::Relaxed),
            reader_restarts: self.reader_restarts.load(Ordering::Relaxed),
        }
    }
}

impl Default for RuntimeStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub uptime_seconds: u64,
    pub packets_sent: u64,
    pub send_failures: u64,
    pub data_updates: u64,
    pub state_changes: u64,
    pub scan_requests: u64,
    pub reader_restarts: u64,
}

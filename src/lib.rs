//! # LAN Tally Server
//!
//! Reads program/preview sources from a video mixer and broadcasts a tally
//! array to every tally light on the LAN over UDP multicast.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                           TALLY SERVER                               │
//! │                                                                      │
//! │  ┌────────────────┐  known-good   ┌──────────────────────────────┐   │
//! │  │    Scanner     │───address────▶│   Reader (supervised task)   │   │
//! │  │  (discovery)   │               │  connect / read every 100ms  │   │
//! │  └───────┬────────┘               └──────────────┬───────────────┘   │
//! │          │ probe                                 │                   │
//! │          ▼                                       ▼                   │
//! │  ┌──────────────────────────────────────────────────────────────┐    │
//! │  │           Connection Manager (connection::manager)           │    │
//! │  │     one device session: connect / read / failure count       │    │
//! │  └──────────────────────────────────────────────────────────────┘    │
//! │                                                  │ live, preview     │
//! │                                                  ▼                   │
//! │                              ┌──────────────────────────────────┐    │
//! │                              │  Shared Tally State (tally)      │    │
//! │                              │  live | preview | autolive | ts  │    │
//! │                              └────────────────┬─────────────────┘    │
//! │                                               │ every 250ms          │
//! │                                               ▼                      │
//! │                              ┌──────────────────────────────────┐    │
//! │                              │  Broadcaster (network::broadcast)│    │
//! │                              │  render 256-byte array, send     │    │
//! │                              └────────────────┬─────────────────┘    │
//! └───────────────────────────────────────────────┼──────────────────────┘
//!                                                 │ UDP 224.0.0.20:3000
//!                                                 ▼
//!                                   tally lights (channel N = byte N-1)
//! ```

pub mod api;
pub mod config;
pub mod connection;
pub mod controller;
pub mod device;
pub mod discovery;
pub mod error;
pub mod network;
pub mod reader;
pub mod stats;
pub mod tally;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    use std::net::Ipv4Addr;

    /// Number of tally channels, and the payload length in bytes
    pub const TALLY_CHANNELS: usize = 256;

    /// Default multicast group for tally packets
    pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 20);

    /// Default UDP port for tally packets
    pub const DEFAULT_MULTICAST_PORT: u16 = 3000;

    /// Packets may cross at most one router
    pub const DEFAULT_MULTICAST_TTL: u32 = 2;

    /// Mixer address used when nothing is persisted or discovered
    pub const DEFAULT_FALLBACK_ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 168, 2, 200);

    /// Default port for the control API
    pub const DEFAULT_HTTP_PORT: u16 = 8080;
}

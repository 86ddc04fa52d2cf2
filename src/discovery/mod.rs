//! Mixer discovery on the local network

pub mod ping;
pub mod scanner;
pub mod subnet;

pub use ping::{Pinger, SystemPinger};
pub use scanner::{ScanOutcome, ScanSettings, Scanner};
pub use subnet::Subnet;

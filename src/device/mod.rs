//! Mixer device capability
//!
//! The mixer wire protocol lives behind [`MixerDevice`]. Any backend that can
//! connect, report readiness and read the program/preview source tokens is
//! interchangeable; the rest of the crate never sees the wire format.

pub mod sim;

use serde::Serialize;
use std::future::Future;
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::constants::TALLY_CHANNELS;
use crate::error::DeviceError;

pub use sim::{SimulatedDevice, SimulatedNetwork};

/// One connection to one mixer
pub trait MixerDevice: Send + 'static {
    /// Start the protocol handshake with the mixer at `address`
    fn connect(&mut self, address: Ipv4Addr) -> impl Future<Output = Result<(), DeviceError>> + Send;

    /// Wait until the handshake completes, false on timeout
    fn wait_for_ready(&mut self, timeout: Duration) -> impl Future<Output = bool> + Send;

    /// Current program (live) source token
    fn program_source(&self) -> Result<Option<String>, DeviceError>;

    /// Current preview source token
    fn preview_source(&self) -> Result<Option<String>, DeviceError>;

    fn disconnect(&mut self) -> impl Future<Output = ()> + Send;

    fn is_connected(&self) -> bool;
}

/// Creates fresh, unconnected device handles
pub trait DeviceFactory: Send + Sync + 'static {
    type Device: MixerDevice;

    fn create(&self) -> Self::Device;
}

/// Parse a source token into a channel number.
///
/// `"input0"` means no input and maps to 0, `"inputN"` and bare digits map
/// to N. Anything else, including malformed numbers, maps to 0.
pub fn parse_source(token: &str) -> u32 {
    let token = token.trim();
    let digits = token.strip_prefix("input").unwrap_or(token);

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return 0;
    }

    digits.parse().unwrap_or(0)
}

/// Clamp a parsed channel number into `0..=256`
pub fn clamp_channel(channel: u32) -> u16 {
    channel.min(TALLY_CHANNELS as u32) as u16
}

/// Validated program/preview channels from one read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Sources {
    pub live: u16,
    pub preview: u16,
}

impl Sources {
    /// Returns `None` unless both tokens are present and non-empty
    pub fn from_tokens(program: Option<&str>, preview: Option<&str>) -> Option<Self> {
        match (program, preview) {
            (Some(program), Some(preview))
                if !program.trim().is_empty() && !preview.trim().is_empty() =>
            {
                Some(Self {
                    live: clamp_channel(parse_source(program)),
                    preview: clamp_channel(parse_source(preview)),
                })
            }
            _ => None,
        }
    }
}

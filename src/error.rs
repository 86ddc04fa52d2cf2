//! Error types for the tally server

use std::net::Ipv4Addr;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a mixer device backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Handshake with {0} failed: {1}")]
    Handshake(Ipv4Addr, String),

    #[error("Register read failed: {0}")]
    Read(String),

    #[error("Connection lost")]
    ConnectionLost,
}

/// Connection manager errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Not connected")]
    NotConnected,

    #[error("Timed out after {0:?} waiting for {1}")]
    Timeout(Duration, Ipv4Addr),

    #[error("Mixer returned no source data")]
    InvalidData,

    #[error("Too many consecutive read failures: {0}")]
    TooManyFailures(u32),

    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Discovery errors
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Invalid subnet: {0}")]
    InvalidSubnet(String),

    #[error("Local address unavailable: {0}")]
    LocalAddress(String),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket setup failed: {0}")]
    SocketSetup(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Short send: {sent} of {expected} bytes")]
    ShortSend { sent: usize, expected: usize },

    #[error("Bind failed: {0}")]
    BindFailed(String),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;

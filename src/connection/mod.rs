//! Mixer connection management

pub mod manager;

pub use manager::{
    ConnectionManager, ConnectionSettings, ConnectionState, ConnectionStatus, MixerProbe,
};

//! Network subsystem for tally transport

pub mod broadcast;
pub mod multicast;

pub use broadcast::{BroadcastSettings, TallyBroadcaster};
pub use multicast::{create_multicast_socket, MulticastSink, TallySink};

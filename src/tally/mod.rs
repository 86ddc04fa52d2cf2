//! Tally state and rendering

pub mod array;
pub mod state;

pub use array::{render, TallyArray, TallyChannel, TallyLight};
pub use state::{Freshness, MixerState, SharedAddress, SharedTallyState};

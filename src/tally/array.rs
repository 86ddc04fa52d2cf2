//! Tally array rendering
//!
//! The tally array is the 256-byte payload sent to every receiver. It is
//! rebuilt from scratch on every broadcast cycle from a [`MixerState`]
//! snapshot; nothing carries over between cycles.

use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use crate::constants::TALLY_CHANNELS;
use crate::tally::state::MixerState;

/// State of a single tally light, encoded as one byte on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TallyLight {
    #[default]
    Clear = 0,
    Preview = 1,
    Live = 2,
}

impl TallyLight {
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A physical input/camera number in `1..=256`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TallyChannel(u16);

impl TallyChannel {
    /// Returns `None` for 0 ("no channel") and anything above 256
    pub fn new(channel: u16) -> Option<Self> {
        if (1..=TALLY_CHANNELS as u16).contains(&channel) {
            Some(Self(channel))
        } else {
            None
        }
    }

    pub fn get(self) -> u16 {
        self.0
    }

    /// Position of this channel in the tally array
    pub fn index(self) -> usize {
        usize::from(self.0) - 1
    }
}

impl fmt::Display for TallyChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fixed-size array of tally states, index `i` is channel `i + 1`
#[derive(Clone, PartialEq, Eq)]
pub struct TallyArray {
    lights: [TallyLight; TALLY_CHANNELS],
}

impl TallyArray {
    /// All channels clear
    pub fn clear() -> Self {
        Self {
            lights: [TallyLight::Clear; TALLY_CHANNELS],
        }
    }

    pub fn set(&mut self, channel: TallyChannel, light: TallyLight) {
        self.lights[channel.index()] = light;
    }

    pub fn get(&self, channel: TallyChannel) -> TallyLight {
        self.lights[channel.index()]
    }

    pub fn is_clear(&self) -> bool {
        self.lights.iter().all(|l| *l == TallyLight::Clear)
    }

    /// Channels that are not clear, in channel order
    pub fn active(&self) -> Vec<(TallyChannel, TallyLight)> {
        self.lights
            .iter()
            .enumerate()
            .filter(|(_, l)| **l != TallyLight::Clear)
            .filter_map(|(i, l)| TallyChannel::new(i as u16 + 1).map(|c| (c, *l)))
            .collect()
    }

    /// Wire payload: one byte per channel, no header
    pub fn to_bytes(&self) -> [u8; TALLY_CHANNELS] {
        let mut bytes = [0u8; TALLY_CHANNELS];
        for (byte, light) in bytes.iter_mut().zip(self.lights.iter()) {
            *byte = light.as_byte();
        }
        bytes
    }
}

impl Default for TallyArray {
    fn default() -> Self {
        Self::clear()
    }
}

impl fmt::Debug for TallyArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TallyArray")
            .field("active", &self.active())
            .finish()
    }
}

/// Render the tally array for one broadcast cycle.
///
/// Stale or never-updated state renders all-Clear. Preview is written
/// before Live, so Live wins when both point at the same channel.
pub fn render(state: &MixerState, active: bool, now: Instant, stale_after: Duration) -> TallyArray {
    let mut array = TallyArray::clear();

    if !active {
        return array;
    }

    match state.age(now) {
        Some(age) if age <= stale_after => {}
        _ => return array,
    }

    if !state.autolive {
        if let Some(preview) = TallyChannel::new(state.preview) {
            array.set(preview, TallyLight::Preview);
        }
    }

    if let Some(live) = TallyChannel::new(state.live) {
        array.set(live, TallyLight::Live);
    }

    array
}

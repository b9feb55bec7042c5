//! File playback: a paced loop with a play/pause/stop/seek transport

pub mod pacing;
pub mod player;

use serde::Serialize;

pub use player::{Player, PlayerOptions};

/// Transport state of a [`Player`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

//! framewire - media player coordination core
//!
//! Thread-affine command dispatch, a callback-driven playback state machine,
//! zero-copy frame handoff to a compositor and an ordered event stream.

// Core (dispatch, player, events)
pub mod core;

// Frame handoff
pub mod video;

// App modules
pub mod cli;
pub mod config;
pub mod error;

// Re-export commonly used types
pub use crate::core::{
    AffinityDispatcher, AffinityToken, Command, EventBridge, PlaybackState, Player, PlayerContext, PlayerEvent,
    PlayerHandle, TaskQueue,
};
pub use crate::error::{HandoffError, PlayerError};
pub use crate::video::FrameHandoffChannel;

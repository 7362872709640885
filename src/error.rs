//! Error types for the command path and the frame handoff path.
//!
//! Asynchronous engine failures are NOT errors here: they arrive as
//! `PlaybackState::Error` on the event stream. These types only cover what
//! can be reported synchronously to a caller.

use thiserror::Error;

/// Synchronous command-path failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlayerError {
    /// Engine refused the operation (not attached, bad state, etc.)
    #[error("engine rejected {op}")]
    CommandRejected { op: &'static str },

    /// Dispatcher or queue already shut down
    #[error("dispatcher terminated")]
    Terminated,

    /// Command presented a token minted by another dispatcher
    #[error("command issued off the player's affinity thread")]
    AffinityViolation,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Engine could not be created by its factory
    #[error("engine error: {0}")]
    Engine(String),
}

impl PlayerError {
    pub(crate) fn rejected(op: &'static str) -> Self {
        PlayerError::CommandRejected { op }
    }
}

/// GPU resource failures during frame-surface negotiation.
///
/// Reported to the engine's format callback only; never touches playback state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandoffError {
    #[error("device creation failed: {0}")]
    DeviceCreation(String),

    #[error("texture creation failed: {0}")]
    TextureCreation(String),

    #[error("shared handle creation failed: {0}")]
    SharedHandle(String),

    #[error("opening shared resource failed: {0}")]
    OpenSharedResource(String),

    /// Channel was torn down; no further negotiation possible
    #[error("frame channel shut down")]
    ShutDown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(PlayerError::rejected("play").to_string(), "engine rejected play");
        assert_eq!(PlayerError::Terminated.to_string(), "dispatcher terminated");
        assert_eq!(
            HandoffError::TextureCreation("E_OUTOFMEMORY".into()).to_string(),
            "texture creation failed: E_OUTOFMEMORY"
        );
    }
}

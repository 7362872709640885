//! Playback state and the externally published event types.
//!
//! `PlayerEvent` is what leaves the core: EventBridge emits it and an RPC
//! layer can forward the serialized form verbatim (`{"type": ..., "playerId": ...}`).

use serde::{Deserialize, Serialize};
use std::fmt;

use super::media::{Media, PlaybackPosition};

/// Engine lifecycle state. Changed only by engine callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlaybackState {
    #[default]
    None,
    Opening,
    Buffering,
    Playing,
    Paused,
    Stopped,
    Ended,
    Error,
}

impl PlaybackState {
    /// Engine accepts seeks only while playing or paused.
    pub fn can_seek(self) -> bool {
        matches!(self, PlaybackState::Playing | PlaybackState::Paused)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlaybackState::None => "none",
            PlaybackState::Opening => "opening",
            PlaybackState::Buffering => "buffering",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Stopped => "stopped",
            PlaybackState::Ended => "ended",
            PlaybackState::Error => "error",
        }
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event payloads
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventKind {
    Initialized,
    PositionChanged {
        position: f64,
        duration: i64,
    },
    PlaybackStateChanged {
        state: PlaybackState,
    },
    MediaChanged {
        media: Media,
    },
    RateChanged {
        value: f64,
    },
    VolumeChanged {
        value: f64,
    },
    MuteChanged {
        value: bool,
    },
    VideoDimensionsChanged {
        width: u32,
        height: u32,
    },
    IsSeekableChanged {
        value: bool,
    },
    Error {
        message: String,
    },
}

impl EventKind {
    pub fn position(position: PlaybackPosition) -> Self {
        EventKind::PositionChanged {
            position: position.position,
            duration: position.duration,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Initialized => "initialized",
            EventKind::PositionChanged { .. } => "positionChanged",
            EventKind::PlaybackStateChanged { .. } => "playbackStateChanged",
            EventKind::MediaChanged { .. } => "mediaChanged",
            EventKind::RateChanged { .. } => "rateChanged",
            EventKind::VolumeChanged { .. } => "volumeChanged",
            EventKind::MuteChanged { .. } => "muteChanged",
            EventKind::VideoDimensionsChanged { .. } => "videoDimensionsChanged",
            EventKind::IsSeekableChanged { .. } => "isSeekableChanged",
            EventKind::Error { .. } => "error",
        }
    }
}

/// One published notification for one player.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerEvent {
    pub player_id: i64,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl PlayerEvent {
    pub fn new(player_id: i64, kind: EventKind) -> Self {
        Self { player_id, kind }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_seek() {
        assert!(PlaybackState::Playing.can_seek());
        assert!(PlaybackState::Paused.can_seek());
        for state in [
            PlaybackState::None,
            PlaybackState::Opening,
            PlaybackState::Buffering,
            PlaybackState::Stopped,
            PlaybackState::Ended,
            PlaybackState::Error,
        ] {
            assert!(!state.can_seek(), "{} must not be seekable", state);
        }
    }

    #[test]
    fn test_event_json_shape() {
        let event = PlayerEvent::new(7, EventKind::PlaybackStateChanged { state: PlaybackState::Playing });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "playbackStateChanged");
        assert_eq!(json["playerId"], 7);
        assert_eq!(json["state"], "playing");

        let media = PlayerEvent::new(1, EventKind::MediaChanged { media: Media::file("a.mp4") });
        let json = serde_json::to_value(&media).unwrap();
        assert_eq!(json["media"]["type"], "file");
        assert_eq!(json["media"]["resource"], "a.mp4");
    }

    #[test]
    fn test_name_matches_tag() {
        let kind = EventKind::VideoDimensionsChanged { width: 8, height: 8 };
        let json = serde_json::to_value(PlayerEvent::new(0, kind.clone())).unwrap();
        assert_eq!(json["type"], kind.name());
    }
}

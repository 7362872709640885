//! Media descriptors and playback mode value types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a media resource comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MediaKind {
    File,
    Network,
    DirectShow,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::File => "file",
            MediaKind::Network => "network",
            MediaKind::DirectShow => "directShow",
        }
    }
}

/// Media descriptor: what to open, independent of any engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Media {
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub resource: String,
}

impl Media {
    pub fn new(kind: MediaKind, resource: impl Into<String>) -> Self {
        Self {
            kind,
            resource: resource.into(),
        }
    }

    pub fn file(path: impl Into<String>) -> Self {
        Self::new(MediaKind::File, path)
    }

    pub fn network(url: impl Into<String>) -> Self {
        Self::new(MediaKind::Network, url)
    }

    pub fn direct_show(resource: impl Into<String>) -> Self {
        Self::new(MediaKind::DirectShow, resource)
    }

    /// Guess the kind from a CLI argument: `scheme://` means network.
    pub fn from_uri(uri: &str) -> Self {
        match uri.split_once("://") {
            Some(("file", path)) => Self::file(path.trim_start_matches('/')),
            Some((scheme, _)) if scheme == "dshow" => Self::direct_show(uri),
            Some(_) => Self::network(uri),
            None => Self::file(uri),
        }
    }

    /// Engine-facing location (MRL).
    pub fn location(&self) -> String {
        match self.kind {
            MediaKind::File => format!("file:///{}", self.resource),
            MediaKind::Network | MediaKind::DirectShow => self.resource.clone(),
        }
    }
}

impl fmt::Display for Media {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.resource)
    }
}

/// Whether playback restarts after a stop.
///
/// `LastValue` is a conversion sentinel: indices at or past it are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LoopMode {
    #[default]
    Off,
    Loop,
    LastValue,
}

impl LoopMode {
    /// Convert a wire index. `None` for `LastValue` and beyond.
    pub fn from_index(value: i32) -> Option<Self> {
        match value {
            0 => Some(LoopMode::Off),
            1 => Some(LoopMode::Loop),
            _ => None,
        }
    }

    pub fn playlist_mode(self) -> PlaylistMode {
        match self {
            LoopMode::Off => PlaylistMode::Single,
            LoopMode::Loop => PlaylistMode::Loop,
            LoopMode::LastValue => PlaylistMode::LastValue,
        }
    }
}

/// Playlist navigation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlaylistMode {
    #[default]
    Single,
    Loop,
    Repeat,
    LastValue,
}

/// Position fraction (0..1) plus duration in ms (0 if unknown).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlaybackPosition {
    pub position: f64,
    pub duration: i64,
}

impl PlaybackPosition {
    pub fn time_ms(&self) -> i64 {
        (self.position * self.duration as f64).round() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location() {
        assert_eq!(Media::file("C:/clips/a.mp4").location(), "file:///C:/clips/a.mp4");
        assert_eq!(Media::network("rtsp://cam/1").location(), "rtsp://cam/1");
        assert_eq!(Media::direct_show("dshow://").location(), "dshow://");
    }

    #[test]
    fn test_from_uri() {
        assert_eq!(Media::from_uri("clip.mov").kind, MediaKind::File);
        assert_eq!(Media::from_uri("https://host/a.m3u8").kind, MediaKind::Network);
        assert_eq!(Media::from_uri("file:///tmp/a.mp4"), Media::file("tmp/a.mp4"));
        assert_eq!(Media::from_uri("dshow://").kind, MediaKind::DirectShow);
    }

    #[test]
    fn test_loop_mode_conversion() {
        assert_eq!(LoopMode::from_index(0), Some(LoopMode::Off));
        assert_eq!(LoopMode::from_index(1), Some(LoopMode::Loop));
        assert_eq!(LoopMode::from_index(2), None);
        assert_eq!(LoopMode::from_index(-1), None);
        assert_eq!(LoopMode::Off.playlist_mode(), PlaylistMode::Single);
        assert_eq!(LoopMode::Loop.playlist_mode(), PlaylistMode::Loop);
    }

    #[test]
    fn test_media_serde_tag() {
        let json = serde_json::to_string(&Media::network("udp://x")).unwrap();
        assert_eq!(json, r#"{"type":"network","resource":"udp://x"}"#);
        let back: Media = serde_json::from_str(r#"{"type":"directShow","resource":"cam"}"#).unwrap();
        assert_eq!(back, Media::direct_show("cam"));
    }

    #[test]
    fn test_position_time() {
        let p = PlaybackPosition { position: 0.25, duration: 4000 };
        assert_eq!(p.time_ms(), 1000);
        assert_eq!(PlaybackPosition::default().time_ms(), 0);
    }
}

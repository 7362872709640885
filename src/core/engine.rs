//! Engine boundary: the opaque, single-threaded media backend.
//!
//! Commands are synchronous accept/reject calls and must come from the
//! player's affinity thread. Outcomes arrive later as [`EngineEvent`]s on
//! threads the engine owns, through the registered [`EngineEventSink`].

use std::fmt;
use std::sync::Arc;

use super::events::PlaybackState;
use super::media::Media;
use crate::error::PlayerError;
use crate::video::gpu::{PixelFormat, RenderTargetId};

/// Identity of the engine's native media object.
///
/// Compared against the player's "currently open" media to reject stale
/// media-changed callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeMediaId(pub u64);

impl fmt::Display for NativeMediaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "media#{}", self.0)
    }
}

/// Asynchronous notification from the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    StateChanged(PlaybackState),
    /// Engine switched media. `duration` is -1 when not yet known.
    MediaChanged {
        media: Option<NativeMediaId>,
        duration: i64,
    },
    LengthChanged(i64),
    PositionChanged(f64),
    SeekableChanged(bool),
    /// Engine volume, 0..1
    VolumeChanged(f32),
    MuteChanged(bool),
}

pub type EngineEventSink = Arc<dyn Fn(EngineEvent) + Send + Sync>;

/// Output format chosen during frame negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputConfig {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub full_range: bool,
}

/// Render-output callbacks the engine drives from its decode thread.
pub trait VideoOutputCallbacks: Send + Sync {
    /// Decode device setup
    fn setup(&self) -> bool;
    /// Format negotiation: (re)allocate surfaces for `width` x `height`.
    fn update_output(&self, width: u32, height: u32) -> Option<OutputConfig>;
    /// Render target for `plane`; only packed plane 0 is supported.
    fn select_plane(&self, plane: u32) -> Option<RenderTargetId>;
    /// Frame finished rendering
    fn swap(&self);
    fn cleanup(&self);
}

/// Single-threaded media backend.
///
/// `Send` so it can be created on one thread and moved to its affinity
/// thread, but never called concurrently.
pub trait Engine: Send {
    fn create_media(&mut self, media: &Media) -> Option<NativeMediaId>;
    fn set_media(&mut self, media: Option<NativeMediaId>) -> bool;
    fn play(&mut self) -> bool;
    fn pause(&mut self) -> bool;
    /// Asynchronous stop; `Stopped` arrives later through the sink.
    fn stop(&mut self) -> bool;
    fn set_time(&mut self, time_ms: i64) -> bool;
    fn set_position(&mut self, position: f64) -> bool;
    fn set_rate(&mut self, rate: f32) -> bool;
    /// Volume in percent (0..100)
    fn set_volume(&mut self, percent: i32) -> bool;
    fn set_mute(&mut self, muted: bool) -> bool;
    fn volume(&self) -> i32;
    fn is_muted(&self) -> bool;
    fn set_event_sink(&mut self, sink: Option<EngineEventSink>);
    fn set_video_output(&mut self, output: Option<Arc<dyn VideoOutputCallbacks>>) -> bool;
}

/// Creates engines for one environment (shared engine instance, plugins, args).
pub trait EngineFactory: Send + Sync {
    fn name(&self) -> &str;
    fn create(&self, args: &[String]) -> Result<Box<dyn Engine>, PlayerError>;
}

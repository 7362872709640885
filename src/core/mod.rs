//! Playback coordination core - dispatch, player state machine, events
//!
//! Independent of any GPU or compositor; video plumbing lives in `crate::video`.

pub mod bridge;
pub mod context;
pub mod dispatcher;
pub mod engine;
pub mod event_bus;
pub mod events;
pub mod media;
pub mod player;
pub mod registry;
pub mod sim;
pub mod workers;

// Re-exports for convenience
pub use bridge::EventBridge;
pub use context::{Environment, PlayerContext, PlayerEntry};
pub use dispatcher::{AffinityDispatcher, AffinityThread, AffinityToken, WakeSignal};
pub use engine::{Engine, EngineEvent, EngineEventSink, EngineFactory, NativeMediaId, OutputConfig, VideoOutputCallbacks};
pub use event_bus::{EventStream, SubscriptionId};
pub use events::{EventKind, PlaybackState, PlayerEvent};
pub use media::{LoopMode, Media, MediaKind, PlaybackPosition, PlaylistMode};
pub use player::{
    Command, MediaState, PendingSeek, Player, PlayerEventDelegate, PlayerHandle, PlayerState, StopOutcome,
};
pub use registry::ResourceRegistry;
pub use sim::{EngineCall, EngineProbe, ScriptedEngine, ScriptedEngineFactory, SimScript};
pub use workers::TaskQueue;

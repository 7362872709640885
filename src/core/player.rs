//! Playback state machine wrapping one engine instance
//!
//! **Architecture**: Player owns the engine and binds it to one
//! [`AffinityDispatcher`]. Every command takes an [`AffinityToken`] minted by
//! that dispatcher, so engine calls can only happen on its owner thread.
//! Foreign threads go through [`PlayerHandle`], which marshals [`Command`]s.
//!
//! **Used by**: `PlayerContext` (lifecycle), `EventBridge` (as the event
//! delegate), `PlayerHandle` (remote commands).
//!
//! # Command / Event Split
//!
//! Commands are acceptance checks: `Ok(())` means the engine accepted the
//! request, never that it completed. Outcomes arrive as engine callbacks on
//! engine-owned threads and are reconciled into [`MediaState`] here.
//! Playback state changes ONLY through those callbacks.
//!
//! # Locking
//!
//! - `engine`: only ever locked on the affinity thread. Callbacks never touch it.
//! - `media_state`: held briefly to mutate the snapshot, released before any
//!   delegate call (delegates may re-enter the player).
//!
//! Anything a callback wants the engine to do (pending seek replay, loop
//! restart, audio resync) is POSTED to the dispatcher, never called inline:
//! the engine does not support reentrant calls from its own callbacks.
//!
//! # Pending Seek
//!
//! Seeks while the engine is not `Playing`/`Paused` are stored (latest wins)
//! and replayed once on the next `Playing` transition.
//!
//! # Loop Restart
//!
//! A `Stopped` transition with `LoopMode::Loop` posts exactly one `play()`,
//! unless the stream has errored. Only a fresh `open()` clears the error.
//!
//! # Media Races
//!
//! Media-changed callbacks carry the engine's native media id. If it is not
//! the media opened last, the callback is stale and dropped entirely.

use crossbeam_channel::Receiver;
use log::{debug, info, trace, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock, TryLockError, Weak};
use std::time::Duration;

use super::dispatcher::{AffinityDispatcher, AffinityToken};
use super::engine::{Engine, EngineEvent, EngineEventSink, NativeMediaId, VideoOutputCallbacks};
use super::events::PlaybackState;
use super::media::{LoopMode, Media, PlaybackPosition, PlaylistMode};
use crate::error::PlayerError;
use crate::video::handoff::FrameHandoffChannel;

static NEXT_PLAYER_ID: AtomicI64 = AtomicI64::new(1);

/// Seek deferred until the engine can seek again.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum PendingSeek {
    /// Milliseconds
    Time(i64),
    /// Fraction 0..1, kept only while the duration is unknown
    Position(f64),
}

impl PendingSeek {
    /// Convert a fraction to a time once the duration is known.
    fn resolve(self, duration: Option<i64>) -> Self {
        match (self, duration) {
            (PendingSeek::Position(p), Some(d)) if d > 0 => PendingSeek::Time((p * d as f64).round() as i64),
            _ => self,
        }
    }
}

/// Snapshot of what the engine last reported, plus local estimates.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaState {
    media: Option<Media>,
    #[serde(skip)]
    native_media: Option<NativeMediaId>,
    playback_state: PlaybackState,
    duration: Option<i64>,
    position: f64,
    is_seekable: bool,
    is_mute: bool,
    volume: f64,
    rate: f64,
    pending_seek: Option<PendingSeek>,
    has_error: bool,
}

impl Default for MediaState {
    fn default() -> Self {
        Self {
            media: None,
            native_media: None,
            playback_state: PlaybackState::None,
            duration: None,
            position: 0.0,
            is_seekable: false,
            is_mute: false,
            volume: 0.0,
            rate: 1.0,
            pending_seek: None,
            has_error: false,
        }
    }
}

impl MediaState {
    pub fn media(&self) -> Option<&Media> {
        self.media.as_ref()
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.playback_state
    }

    /// Duration in ms, `None` until the engine reports it
    pub fn duration(&self) -> Option<i64> {
        self.duration
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn playback_position(&self) -> PlaybackPosition {
        PlaybackPosition {
            position: self.position,
            duration: self.duration.unwrap_or(0),
        }
    }

    pub fn is_seekable(&self) -> bool {
        self.is_seekable
    }

    pub fn is_mute(&self) -> bool {
        self.is_mute
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn pending_seek(&self) -> Option<PendingSeek> {
        self.pending_seek
    }

    pub fn has_error(&self) -> bool {
        self.has_error
    }

    /// Install the media being opened. Returns the fields it replaced.
    fn reset_for_open(&mut self, media: Option<Media>, native_media: Option<NativeMediaId>) -> MediaState {
        let previous = self.clone();
        self.media = media;
        self.native_media = native_media;
        self.duration = None;
        self.position = 0.0;
        self.pending_seek = None;
        self.has_error = false;
        previous
    }

    /// Undo [`reset_for_open`](Self::reset_for_open) after the engine refused the media.
    fn restore_rejected_open(&mut self, previous: MediaState) {
        self.media = previous.media;
        self.native_media = previous.native_media;
        self.duration = previous.duration;
        self.pending_seek = previous.pending_seek;
        self.has_error = previous.has_error;
    }
}

/// Affinity-side settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    pub loop_mode: LoopMode,
}

impl PlayerState {
    pub fn playlist_mode(&self) -> PlaylistMode {
        self.loop_mode.playlist_mode()
    }
}

/// One playback operation, executed exactly once on the affinity thread.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Open { media: Option<Media>, autostart: bool },
    Play,
    Pause,
    Stop,
    SeekPosition(f64),
    SeekTime(i64),
    SetRate(f64),
    SetLoopMode(LoopMode),
    SetVolume(f64),
    SetMute(bool),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Open { .. } => "open",
            Command::Play => "play",
            Command::Pause => "pause",
            Command::Stop => "stop",
            Command::SeekPosition(_) => "seek_position",
            Command::SeekTime(_) => "seek_time",
            Command::SetRate(_) => "set_rate",
            Command::SetLoopMode(_) => "set_loop_mode",
            Command::SetVolume(_) => "set_volume",
            Command::SetMute(_) => "set_mute",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Engine reported `Stopped` (or nothing was playing)
    Stopped,
    /// No `Stopped` in time; treated as stopped anyway
    TimedOut,
    /// Engine refused the stop
    Rejected,
}

/// Receives reconciled state changes. Called on engine threads, no locks held.
pub trait PlayerEventDelegate: Send + Sync {
    fn on_media_changed(&self, _media: &Media) {}
    fn on_playback_state_changed(&self, _state: PlaybackState) {}
    fn on_seekable_changed(&self, _seekable: bool) {}
    fn on_position_changed(&self, _position: PlaybackPosition) {}
    fn on_rate_changed(&self, _rate: f64) {}
    fn on_volume_changed(&self, _volume: f64) {}
    fn on_mute_changed(&self, _muted: bool) {}
    fn on_video_dimensions_changed(&self, _width: u32, _height: u32) {}
}

/// Volumes travel through the engine as whole percents.
fn quantize_volume(volume: f64) -> f64 {
    (volume.clamp(0.0, 1.0) * 100.0).round() / 100.0
}

pub struct Player {
    id: i64,
    dispatcher: Arc<AffinityDispatcher>,
    engine: Mutex<Box<dyn Engine>>,
    media_state: Mutex<MediaState>,
    player_state: Mutex<PlayerState>,
    delegate: RwLock<Option<Arc<dyn PlayerEventDelegate>>>,
    video: Mutex<Option<FrameHandoffChannel>>,
    stopped: Mutex<bool>,
    stopped_cond: Condvar,
    weak_self: Weak<Player>,
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("id", &self.id)
            .field("dispatcher", &self.dispatcher.id())
            .field("state", &self.playback_state())
            .finish()
    }
}

impl Player {
    /// Wrap `engine` and bind it to `dispatcher`'s thread.
    ///
    /// The event sink is installed here, before the engine is shared.
    pub fn new(mut engine: Box<dyn Engine>, dispatcher: Arc<AffinityDispatcher>) -> Arc<Self> {
        let id = NEXT_PLAYER_ID.fetch_add(1, Ordering::Relaxed);
        Arc::new_cyclic(|weak: &Weak<Player>| {
            let target = weak.clone();
            let sink: EngineEventSink = Arc::new(move |event| {
                if let Some(player) = target.upgrade() {
                    player.handle_engine_event(event);
                }
            });
            engine.set_event_sink(Some(sink));
            info!("Player {} created on dispatcher {}", id, dispatcher.id());

            Player {
                id,
                dispatcher,
                engine: Mutex::new(engine),
                media_state: Mutex::new(MediaState::default()),
                player_state: Mutex::new(PlayerState::default()),
                delegate: RwLock::new(None),
                video: Mutex::new(None),
                stopped: Mutex::new(true),
                stopped_cond: Condvar::new(),
                weak_self: weak.clone(),
            }
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn dispatcher(&self) -> &Arc<AffinityDispatcher> {
        &self.dispatcher
    }

    /// Thread-safe command entry point for this player.
    pub fn handle(&self) -> PlayerHandle {
        PlayerHandle {
            id: self.id,
            player: self.weak_self.clone(),
            dispatcher: Arc::clone(&self.dispatcher),
        }
    }

    pub fn set_event_delegate(&self, delegate: Option<Arc<dyn PlayerEventDelegate>>) {
        *self.delegate.write().unwrap_or_else(|e| e.into_inner()) = delegate;
    }

    // ========== Commands (affinity thread) ==========

    /// Run one [`Command`].
    pub fn execute(&self, token: &AffinityToken, command: Command) -> Result<(), PlayerError> {
        match command {
            Command::Open { media, autostart } => {
                self.open(token, media)?;
                if autostart {
                    self.play(token)?;
                }
                Ok(())
            }
            Command::Play => self.play(token),
            Command::Pause => self.pause(token),
            Command::Stop => self.stop(token),
            Command::SeekPosition(position) => self.seek_position(token, position),
            Command::SeekTime(time_ms) => self.seek_time(token, time_ms),
            Command::SetRate(rate) => self.set_rate(token, rate),
            Command::SetLoopMode(mode) => self.set_loop_mode(token, mode),
            Command::SetVolume(volume) => self.set_volume(token, volume),
            Command::SetMute(muted) => self.set_mute(token, muted),
        }
    }

    /// Load `media` (or unload with `None`).
    ///
    /// Clears error, duration, position and any pending seek, stops the
    /// current media and hands the new one to the engine. `Ok` means the
    /// engine accepted the media, not that playback started.
    pub fn open(&self, token: &AffinityToken, media: Option<Media>) -> Result<(), PlayerError> {
        self.check_affinity(token)?;
        info!(
            "Player {}: open {}",
            self.id,
            media.as_ref().map(|m| m.to_string()).unwrap_or_else(|| "<none>".into())
        );

        self.with_engine("open", |engine| {
            let native = match &media {
                Some(m) => Some(engine.create_media(m).ok_or(PlayerError::rejected("open"))?),
                None => None,
            };
            // Installed before set_media: callbacks for the new media may arrive during the call
            let previous = self.lock_media_state().reset_for_open(media, native);
            if previous.native_media.is_some() {
                engine.stop();
            }
            if !engine.set_media(native) {
                warn!("Player {}: engine refused media, keeping {:?}", self.id, previous.media);
                self.lock_media_state().restore_rejected_open(previous);
                return Err(PlayerError::rejected("open"));
            }
            Ok(())
        })?
    }

    pub fn play(&self, token: &AffinityToken) -> Result<(), PlayerError> {
        self.check_affinity(token)?;
        self.run_command("play", |engine| engine.play())
    }

    pub fn pause(&self, token: &AffinityToken) -> Result<(), PlayerError> {
        self.check_affinity(token)?;
        self.run_command("pause", |engine| engine.pause())
    }

    /// Request an asynchronous stop. `Stopped` arrives as an event.
    pub fn stop(&self, token: &AffinityToken) -> Result<(), PlayerError> {
        self.check_affinity(token)?;
        self.run_command("stop", |engine| engine.stop())
    }

    /// Stop and block the calling thread until `Stopped` or `timeout`.
    ///
    /// On timeout the player is forced into the stopped condition rather
    /// than waiting forever.
    pub fn stop_sync(&self, token: &AffinityToken, timeout: Duration) -> Result<StopOutcome, PlayerError> {
        self.check_affinity(token)?;
        let state = self.playback_state();
        if matches!(state, PlaybackState::None | PlaybackState::Stopped) {
            return Ok(StopOutcome::Stopped);
        }

        *self.stopped.lock().unwrap_or_else(|e| e.into_inner()) = false;
        if !self.with_engine("stop", |engine| engine.stop())? {
            return Ok(StopOutcome::Rejected);
        }

        let stopped = self.stopped.lock().unwrap_or_else(|e| e.into_inner());
        let (mut stopped, _) = self
            .stopped_cond
            .wait_timeout_while(stopped, timeout, |stopped| !*stopped)
            .unwrap_or_else(|e| e.into_inner());
        if *stopped {
            return Ok(StopOutcome::Stopped);
        }
        *stopped = true;
        warn!("Player {}: no Stopped from engine after {:?}, forcing stop", self.id, timeout);
        Ok(StopOutcome::TimedOut)
    }

    /// Seek to a fraction of the duration.
    pub fn seek_position(&self, token: &AffinityToken, position: f64) -> Result<(), PlayerError> {
        self.check_affinity(token)?;
        if !position.is_finite() {
            return Err(PlayerError::InvalidArgument(format!("seek position {}", position)));
        }
        self.seek(PendingSeek::Position(position.clamp(0.0, 1.0)))
    }

    /// Seek to `time_ms` milliseconds.
    pub fn seek_time(&self, token: &AffinityToken, time_ms: i64) -> Result<(), PlayerError> {
        self.check_affinity(token)?;
        if time_ms < 0 {
            return Err(PlayerError::InvalidArgument(format!("seek time {}", time_ms)));
        }
        self.seek(PendingSeek::Time(time_ms))
    }

    pub fn set_rate(&self, token: &AffinityToken, rate: f64) -> Result<(), PlayerError> {
        self.check_affinity(token)?;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(PlayerError::InvalidArgument(format!("rate {}", rate)));
        }
        self.run_command("set_rate", |engine| engine.set_rate(rate as f32))?;

        let changed = {
            let mut state = self.lock_media_state();
            let changed = state.rate != rate;
            state.rate = rate;
            changed
        };
        if changed {
            self.notify(|d| d.on_rate_changed(rate));
        }
        Ok(())
    }

    pub fn set_loop_mode(&self, token: &AffinityToken, mode: LoopMode) -> Result<(), PlayerError> {
        self.check_affinity(token)?;
        if mode == LoopMode::LastValue {
            return Err(PlayerError::InvalidArgument("loop mode LastValue".into()));
        }
        self.player_state.lock().unwrap_or_else(|e| e.into_inner()).loop_mode = mode;
        debug!("Player {}: loop mode {:?}", self.id, mode);
        Ok(())
    }

    /// Set volume (0..1, clamped). Publishes only when the stored value changes.
    pub fn set_volume(&self, token: &AffinityToken, volume: f64) -> Result<(), PlayerError> {
        self.check_affinity(token)?;
        if volume.is_nan() {
            return Err(PlayerError::InvalidArgument("volume NaN".into()));
        }
        let volume = quantize_volume(volume);
        self.run_command("set_volume", |engine| engine.set_volume((volume * 100.0).round() as i32))?;
        self.apply_volume(volume);
        Ok(())
    }

    pub fn set_mute(&self, token: &AffinityToken, muted: bool) -> Result<(), PlayerError> {
        self.check_affinity(token)?;
        self.run_command("set_mute", |engine| engine.set_mute(muted))?;
        self.apply_mute(muted);
        Ok(())
    }

    /// Route engine video output into `channel`.
    ///
    /// A previously attached channel is torn down after the engine switched.
    pub fn set_video_output(&self, token: &AffinityToken, channel: FrameHandoffChannel) -> Result<(), PlayerError> {
        self.check_affinity(token)?;

        let weak = self.weak_self.clone();
        channel.on_dimensions_changed(move |dimensions| {
            if let Some(player) = weak.upgrade() {
                player.notify(|d| d.on_video_dimensions_changed(dimensions.width, dimensions.height));
            }
        });

        let output: Arc<dyn VideoOutputCallbacks> = Arc::new(channel.clone());
        if !self.with_engine("set_video_output", |engine| engine.set_video_output(Some(output)))? {
            channel.clear_dimensions_listener();
            return Err(PlayerError::rejected("set_video_output"));
        }

        let previous = self.video.lock().unwrap_or_else(|e| e.into_inner()).replace(channel);
        if let Some(previous) = previous {
            previous.clear_dimensions_listener();
            previous.teardown();
        }
        Ok(())
    }

    /// Detach from the engine first, then tear the channel down.
    ///
    /// Returns `false` if no channel was attached.
    pub fn detach_video_output(&self, token: &AffinityToken) -> Result<bool, PlayerError> {
        self.check_affinity(token)?;
        let Some(channel) = self.video.lock().unwrap_or_else(|e| e.into_inner()).take() else {
            return Ok(false);
        };
        self.with_engine("detach_video_output", |engine| engine.set_video_output(None))?;
        channel.clear_dimensions_listener();
        channel.teardown();
        Ok(true)
    }

    pub fn video_output(&self) -> Option<FrameHandoffChannel> {
        self.video.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Final teardown on the affinity thread: video, playback, callbacks.
    pub fn shutdown(&self, token: &AffinityToken) -> Result<(), PlayerError> {
        self.detach_video_output(token)?;
        let playing = self.lock_media_state().native_media.is_some();
        self.with_engine("shutdown", |engine| {
            if playing {
                engine.stop();
            }
            engine.set_event_sink(None);
        })?;
        self.set_event_delegate(None);
        debug!("Player {} shut down", self.id);
        Ok(())
    }

    // ========== Queries ==========

    pub fn snapshot(&self) -> MediaState {
        self.lock_media_state().clone()
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.lock_media_state().playback_state
    }

    /// Last known duration in ms, 0 if unknown
    pub fn duration(&self) -> i64 {
        self.lock_media_state().duration.unwrap_or(0)
    }

    pub fn position(&self) -> PlaybackPosition {
        self.lock_media_state().playback_position()
    }

    pub fn pending_seek(&self) -> Option<PendingSeek> {
        self.lock_media_state().pending_seek
    }

    /// Pending seek as a time, if one is stored in that form
    pub fn pending_seek_time(&self) -> Option<i64> {
        match self.pending_seek()? {
            PendingSeek::Time(t) => Some(t),
            PendingSeek::Position(_) => None,
        }
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.player_state.lock().unwrap_or_else(|e| e.into_inner()).loop_mode
    }

    pub fn playlist_mode(&self) -> PlaylistMode {
        self.player_state.lock().unwrap_or_else(|e| e.into_inner()).playlist_mode()
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ========== Internals ==========

    fn check_affinity(&self, token: &AffinityToken) -> Result<(), PlayerError> {
        if token.dispatcher_id() != self.dispatcher.id() {
            warn!(
                "Player {}: token from dispatcher {} rejected (bound to {})",
                self.id,
                token.dispatcher_id(),
                self.dispatcher.id()
            );
            return Err(PlayerError::AffinityViolation);
        }
        Ok(())
    }

    fn lock_media_state(&self) -> MutexGuard<'_, MediaState> {
        self.media_state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `f` with the engine. Only the affinity thread locks it, so a busy
    /// lock means a delegate re-entered while an engine call is in progress.
    fn with_engine<R>(&self, op: &'static str, f: impl FnOnce(&mut dyn Engine) -> R) -> Result<R, PlayerError> {
        let mut engine = match self.engine.try_lock() {
            Ok(engine) => engine,
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
            Err(TryLockError::WouldBlock) => {
                warn!("Player {}: reentrant {} while engine busy, rejected", self.id, op);
                return Err(PlayerError::rejected(op));
            }
        };
        Ok(f(&mut **engine))
    }

    fn run_command(&self, op: &'static str, f: impl FnOnce(&mut dyn Engine) -> bool) -> Result<(), PlayerError> {
        let accepted = self.with_engine(op, f)?;
        Self::accept(op, accepted)
    }

    fn accept(op: &'static str, accepted: bool) -> Result<(), PlayerError> {
        if accepted {
            Ok(())
        } else {
            debug!("Engine rejected {}", op);
            Err(PlayerError::rejected(op))
        }
    }

    fn seek(&self, target: PendingSeek) -> Result<(), PlayerError> {
        {
            // Decide and store under one lock: a Playing transition in between
            // would otherwise miss the pending seek
            let mut state = self.lock_media_state();
            if !state.playback_state.can_seek() {
                let pending = target.resolve(state.duration);
                state.pending_seek = Some(pending);
                drop(state);
                debug!("Player {}: engine not seekable, deferring {:?}", self.id, pending);
                return Ok(());
            }
        }
        self.apply_seek("seek", target)
    }

    fn apply_seek(&self, op: &'static str, target: PendingSeek) -> Result<(), PlayerError> {
        let duration = self.lock_media_state().duration;
        let accepted = self.with_engine(op, |engine| match target.resolve(duration) {
            PendingSeek::Time(t) => engine.set_time(t),
            PendingSeek::Position(p) => engine.set_position(p),
        })?;
        Self::accept(op, accepted)?;

        // Engine does not report position while paused: estimate locally
        let update = {
            let mut state = self.lock_media_state();
            let estimate = match target {
                PendingSeek::Time(t) => state
                    .duration
                    .filter(|d| *d > 0)
                    .map(|d| (t as f64 / d as f64).clamp(0.0, 1.0)),
                PendingSeek::Position(p) => Some(p),
            };
            match estimate {
                Some(position) if position != state.position => {
                    state.position = position;
                    Some(state.playback_position())
                }
                _ => None,
            }
        };
        if let Some(position) = update {
            self.notify(|d| d.on_position_changed(position));
        }
        Ok(())
    }

    fn notify(&self, f: impl FnOnce(&dyn PlayerEventDelegate)) {
        let delegate = self.delegate.read().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(delegate) = delegate {
            f(delegate.as_ref());
        }
    }

    /// Queue work for the affinity thread. Skipped if the player is gone.
    fn post_task<F>(&self, what: &'static str, task: F)
    where
        F: FnOnce(&Player, &AffinityToken) -> Result<(), PlayerError> + Send + 'static,
    {
        let weak = self.weak_self.clone();
        let id = self.id;
        let queued = self.dispatcher.post(move |token| {
            let Some(player) = weak.upgrade() else {
                return;
            };
            if let Err(e) = task(&player, token) {
                warn!("Player {}: {} failed: {}", id, what, e);
            }
        });
        if !queued {
            debug!("Player {}: dispatcher terminated, dropped {}", id, what);
        }
    }

    // ========== Engine callbacks (engine threads) ==========

    fn handle_engine_event(&self, event: EngineEvent) {
        trace!("Player {}: engine event {:?}", self.id, event);
        match event {
            EngineEvent::StateChanged(state) => self.handle_state(state),
            EngineEvent::MediaChanged { media, duration } => self.handle_media_changed(media, duration),
            EngineEvent::LengthChanged(length) => self.handle_length_changed(length),
            EngineEvent::PositionChanged(position) => self.handle_position_changed(position),
            EngineEvent::SeekableChanged(seekable) => self.handle_seekable_changed(seekable),
            EngineEvent::VolumeChanged(volume) => self.apply_volume(volume as f64),
            EngineEvent::MuteChanged(muted) => self.apply_mute(muted),
        }
    }

    fn handle_state(&self, state: PlaybackState) {
        let loop_mode = self.loop_mode();

        let (changed, restart, pending, position) = {
            let mut media_state = self.lock_media_state();
            if media_state.playback_state == state {
                (false, false, None, media_state.playback_position())
            } else {
                media_state.playback_state = state;
                let mut restart = false;
                let mut pending = None;
                match state {
                    PlaybackState::Stopped => {
                        media_state.position = 0.0;
                        // Errored streams never auto-loop
                        restart = !media_state.has_error && loop_mode == LoopMode::Loop;
                    }
                    PlaybackState::Ended => media_state.position = 0.0,
                    PlaybackState::Error => {
                        media_state.position = 0.0;
                        media_state.duration = None;
                        media_state.has_error = true;
                    }
                    PlaybackState::Playing => pending = media_state.pending_seek.take(),
                    _ => {}
                }
                (true, restart, pending, media_state.playback_position())
            }
        };

        match state {
            PlaybackState::Stopped => self.set_stopped(true),
            PlaybackState::Opening | PlaybackState::Buffering | PlaybackState::Playing | PlaybackState::Paused => {
                self.set_stopped(false)
            }
            _ => {}
        }

        if !changed {
            return;
        }
        debug!("Player {}: state {}", self.id, state);

        if state == PlaybackState::Playing {
            if let Some(seek) = pending {
                debug!("Player {}: replaying pending {:?}", self.id, seek);
                self.post_task("pending seek", move |player, _| player.apply_seek("pending seek", seek));
            }
            self.post_task("audio sync", |player, _| player.sync_audio_state());
        }

        self.notify(|d| d.on_playback_state_changed(state));
        self.notify(|d| d.on_position_changed(position));

        if restart {
            info!("Player {}: loop restart", self.id);
            self.post_task("loop restart", |player, token| player.play(token));
        }
    }

    fn set_stopped(&self, stopped: bool) {
        *self.stopped.lock().unwrap_or_else(|e| e.into_inner()) = stopped;
        if stopped {
            self.stopped_cond.notify_all();
        }
    }

    /// Pull engine volume/mute into the snapshot after playback starts.
    fn sync_audio_state(&self) -> Result<(), PlayerError> {
        let (volume, muted) = self.with_engine("audio sync", |engine| (engine.volume(), engine.is_muted()))?;
        self.apply_mute(muted);
        self.apply_volume(volume as f64 / 100.0);
        Ok(())
    }

    fn handle_media_changed(&self, media: Option<NativeMediaId>, duration: i64) {
        let current = {
            let mut state = self.lock_media_state();
            if state.native_media != media {
                warn!(
                    "Player {}: media changed again ({:?} superseded by {:?}), callback dropped",
                    self.id, media, state.native_media
                );
                return;
            }
            state.duration = (duration >= 0).then_some(duration);
            state.position = 0.0;
            let position = state.playback_position();
            state.media.clone().map(|m| (m, position))
        };

        if let Some((media, position)) = current {
            self.notify(|d| d.on_media_changed(&media));
            self.notify(|d| d.on_position_changed(position));
        }
    }

    fn handle_length_changed(&self, length: i64) {
        let position = {
            let mut state = self.lock_media_state();
            state.duration = (length >= 0).then_some(length);
            state.playback_position()
        };
        self.notify(|d| d.on_position_changed(position));
    }

    fn handle_position_changed(&self, position: f64) {
        let position = {
            let mut state = self.lock_media_state();
            state.position = position.clamp(0.0, 1.0);
            state.playback_position()
        };
        self.notify(|d| d.on_position_changed(position));
    }

    fn handle_seekable_changed(&self, seekable: bool) {
        let changed = {
            let mut state = self.lock_media_state();
            let changed = state.is_seekable != seekable;
            state.is_seekable = seekable;
            changed
        };
        if changed {
            self.notify(|d| d.on_seekable_changed(seekable));
        }
    }

    fn apply_volume(&self, volume: f64) {
        let volume = quantize_volume(volume);
        let changed = {
            let mut state = self.lock_media_state();
            let changed = state.volume != volume;
            state.volume = volume;
            changed
        };
        if changed {
            self.notify(|d| d.on_volume_changed(volume));
        }
    }

    fn apply_mute(&self, muted: bool) {
        let changed = {
            let mut state = self.lock_media_state();
            let changed = state.is_mute != muted;
            state.is_mute = muted;
            changed
        };
        if changed {
            self.notify(|d| d.on_mute_changed(muted));
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        trace!("Player {} dropped", self.id);
    }
}

/// Cloneable, `Send` command submitter for one player.
#[derive(Clone)]
pub struct PlayerHandle {
    id: i64,
    player: Weak<Player>,
    dispatcher: Arc<AffinityDispatcher>,
}

impl std::fmt::Debug for PlayerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerHandle").field("id", &self.id).finish()
    }
}

impl PlayerHandle {
    pub fn player_id(&self) -> i64 {
        self.id
    }

    /// Fire-and-forget. `false` if the dispatcher is terminated.
    pub fn submit(&self, command: Command) -> bool {
        let player = self.player.clone();
        let id = self.id;
        self.dispatcher.dispatch(move |token| {
            let name = command.name();
            match player.upgrade() {
                Some(player) => {
                    if let Err(e) = player.execute(token, command) {
                        warn!("Player {}: {} failed: {}", id, name, e);
                    }
                }
                None => debug!("Player {} gone, {} dropped", id, name),
            }
        })
    }

    /// Submit and receive the acceptance result once it ran.
    ///
    /// Fails with `Terminated` immediately if the dispatcher is shut down.
    pub fn request(&self, command: Command) -> Receiver<Result<(), PlayerError>> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let reply = tx.clone();
        let player = self.player.clone();
        let queued = self.dispatcher.dispatch(move |token| {
            let result = match player.upgrade() {
                Some(player) => player.execute(token, command),
                None => Err(PlayerError::Terminated),
            };
            let _ = reply.send(result);
        });
        if !queued {
            let _ = tx.send(Err(PlayerError::Terminated));
        }
        rx
    }
}

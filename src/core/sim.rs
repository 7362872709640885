//! Scripted engine for tests and the demo binary.
//!
//! Two modes:
//! - manual ([`ScriptedEngine::new`]): records calls, emits nothing on its own.
//!   The paired [`EngineProbe`] injects events on the calling thread, which
//!   makes callback ordering fully deterministic in tests.
//! - auto ([`ScriptedEngine::auto`]): a `framewire-engine` thread plays a
//!   fake clip of `duration_ms`, reporting states, positions and, when a
//!   video output is attached, driving negotiation and frame swaps.
//!
//! Either mode honors [`EngineProbe::reject`] to refuse individual commands.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, trace, warn};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::engine::{Engine, EngineEvent, EngineEventSink, EngineFactory, NativeMediaId, VideoOutputCallbacks};
use super::events::PlaybackState;
use super::media::Media;
use crate::error::PlayerError;

/// One recorded engine command.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    CreateMedia(Media),
    SetMedia(Option<NativeMediaId>),
    Play,
    Pause,
    Stop,
    SetTime(i64),
    SetPosition(f64),
    SetRate(f32),
    SetVolume(i32),
    SetMute(bool),
    /// `true` when an output was attached, `false` on detach
    SetVideoOutput(bool),
}

impl EngineCall {
    pub fn op(&self) -> &'static str {
        match self {
            EngineCall::CreateMedia(_) => "create_media",
            EngineCall::SetMedia(_) => "set_media",
            EngineCall::Play => "play",
            EngineCall::Pause => "pause",
            EngineCall::Stop => "stop",
            EngineCall::SetTime(_) => "set_time",
            EngineCall::SetPosition(_) => "set_position",
            EngineCall::SetRate(_) => "set_rate",
            EngineCall::SetVolume(_) => "set_volume",
            EngineCall::SetMute(_) => "set_mute",
            EngineCall::SetVideoOutput(_) => "set_video_output",
        }
    }
}

/// Fake clip played in auto mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimScript {
    pub duration_ms: i64,
    pub tick_ms: u64,
    /// Decoded frame size; `None` for audio-only
    pub video: Option<(u32, u32)>,
}

impl Default for SimScript {
    fn default() -> Self {
        Self {
            duration_ms: 2000,
            tick_ms: 40,
            video: Some((640, 360)),
        }
    }
}

struct SimShared {
    calls: Mutex<Vec<EngineCall>>,
    rejected: Mutex<HashSet<&'static str>>,
    sink: RwLock<Option<EngineEventSink>>,
    media: Mutex<Option<NativeMediaId>>,
    output: Mutex<Option<Arc<dyn VideoOutputCallbacks>>>,
    volume: AtomicI32,
    muted: AtomicBool,
    next_media: AtomicU64,
}

impl SimShared {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            rejected: Mutex::new(HashSet::new()),
            sink: RwLock::new(None),
            media: Mutex::new(None),
            output: Mutex::new(None),
            volume: AtomicI32::new(100),
            muted: AtomicBool::new(false),
            next_media: AtomicU64::new(1),
        })
    }

    /// Record `call`; `false` if its op is currently rejected.
    fn record(&self, call: EngineCall) -> bool {
        let accepted = !self.rejected.lock().unwrap_or_else(|e| e.into_inner()).contains(call.op());
        trace!("ScriptedEngine: {:?} -> {}", call, if accepted { "accepted" } else { "rejected" });
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(call);
        accepted
    }

    fn emit(&self, event: EngineEvent) {
        let sink = self.sink.read().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(sink) = sink {
            sink(event);
        }
    }

    fn output(&self) -> Option<Arc<dyn VideoOutputCallbacks>> {
        self.output.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Test-side view of a [`ScriptedEngine`].
#[derive(Clone)]
pub struct EngineProbe {
    shared: Arc<SimShared>,
}

impl EngineProbe {
    /// Deliver `event` through the engine's sink on the calling thread.
    pub fn emit(&self, event: EngineEvent) {
        self.shared.emit(event);
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.shared.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count(&self, pred: impl Fn(&EngineCall) -> bool) -> usize {
        self.shared
            .calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|c| pred(c))
            .count()
    }

    pub fn clear_calls(&self) {
        self.shared.calls.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Refuse every future call of `op` (see [`EngineCall::op`]).
    pub fn reject(&self, op: &'static str) {
        self.shared.rejected.lock().unwrap_or_else(|e| e.into_inner()).insert(op);
    }

    pub fn accept(&self, op: &'static str) {
        self.shared.rejected.lock().unwrap_or_else(|e| e.into_inner()).remove(op);
    }

    /// Media last passed to `set_media`
    pub fn current_media(&self) -> Option<NativeMediaId> {
        *self.shared.media.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn video_output(&self) -> Option<Arc<dyn VideoOutputCallbacks>> {
        self.shared.output()
    }

    /// Change what the engine reports for volume (percent) and mute.
    pub fn set_engine_audio(&self, volume: i32, muted: bool) {
        self.shared.volume.store(volume, Ordering::SeqCst);
        self.shared.muted.store(muted, Ordering::SeqCst);
    }

    pub fn has_sink(&self) -> bool {
        self.shared.sink.read().unwrap_or_else(|e| e.into_inner()).is_some()
    }
}

enum SimControl {
    SetMedia(Option<NativeMediaId>),
    Play,
    Pause,
    Stop,
    SeekTime(i64),
    SeekPosition(f64),
    Rate(f32),
    Output(Option<Arc<dyn VideoOutputCallbacks>>, Sender<()>),
    Shutdown,
}

/// Engine thread state in auto mode.
struct SimClock {
    script: SimScript,
    media: Option<NativeMediaId>,
    state: PlaybackState,
    time_ms: f64,
    rate: f64,
    output: Option<Arc<dyn VideoOutputCallbacks>>,
    negotiated: bool,
    last_tick: Instant,
}

impl SimClock {
    fn new(script: SimScript) -> Self {
        Self {
            script,
            media: None,
            state: PlaybackState::None,
            time_ms: 0.0,
            rate: 1.0,
            output: None,
            negotiated: false,
            last_tick: Instant::now(),
        }
    }

    fn set_state(&mut self, shared: &SimShared, state: PlaybackState) {
        if self.state != state {
            self.state = state;
            shared.emit(EngineEvent::StateChanged(state));
        }
    }

    fn fraction(&self) -> f64 {
        if self.script.duration_ms > 0 {
            (self.time_ms / self.script.duration_ms as f64).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    fn apply(&mut self, shared: &SimShared, control: SimControl) {
        match control {
            SimControl::SetMedia(media) => {
                if self.state.can_seek() || self.state == PlaybackState::Buffering {
                    self.set_state(shared, PlaybackState::Stopped);
                }
                self.media = media;
                self.time_ms = 0.0;
                self.state = PlaybackState::None;
                shared.emit(EngineEvent::MediaChanged {
                    media,
                    duration: if media.is_some() { self.script.duration_ms } else { -1 },
                });
            }
            SimControl::Play => self.play(shared),
            SimControl::Pause => {
                if self.state == PlaybackState::Playing {
                    self.set_state(shared, PlaybackState::Paused);
                }
            }
            SimControl::Stop => {
                if self.state != PlaybackState::None && self.state != PlaybackState::Stopped {
                    self.time_ms = 0.0;
                    self.set_state(shared, PlaybackState::Stopped);
                }
            }
            SimControl::SeekTime(t) => {
                self.time_ms = t.clamp(0, self.script.duration_ms.max(0)) as f64;
                shared.emit(EngineEvent::PositionChanged(self.fraction()));
            }
            SimControl::SeekPosition(p) => {
                self.time_ms = p.clamp(0.0, 1.0) * self.script.duration_ms as f64;
                shared.emit(EngineEvent::PositionChanged(self.fraction()));
            }
            SimControl::Rate(rate) => self.rate = rate as f64,
            SimControl::Output(output, ack) => {
                if let Some(old) = self.output.take() {
                    old.cleanup();
                }
                self.output = output;
                self.negotiated = false;
                let _ = ack.send(());
            }
            SimControl::Shutdown => {}
        }
    }

    fn play(&mut self, shared: &SimShared) {
        if self.media.is_none() {
            return;
        }
        match self.state {
            PlaybackState::Paused => self.set_state(shared, PlaybackState::Playing),
            PlaybackState::Playing => {}
            _ => {
                self.time_ms = 0.0;
                self.set_state(shared, PlaybackState::Opening);
                self.set_state(shared, PlaybackState::Buffering);
                shared.emit(EngineEvent::LengthChanged(self.script.duration_ms));
                shared.emit(EngineEvent::SeekableChanged(true));
                self.set_state(shared, PlaybackState::Playing);
            }
        }
        self.last_tick = Instant::now();
    }

    fn render(&mut self) {
        let (Some(output), Some((width, height))) = (self.output.clone(), self.script.video) else {
            return;
        };
        if !self.negotiated {
            if !output.setup() {
                return;
            }
            if output.update_output(width, height).is_none() {
                warn!("ScriptedEngine: output negotiation {}x{} failed", width, height);
                return;
            }
            self.negotiated = true;
        }
        if output.select_plane(0).is_some() {
            output.swap();
        }
    }

    fn tick(&mut self, shared: &SimShared) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_tick);
        if elapsed < Duration::from_millis(self.script.tick_ms) {
            return;
        }
        self.last_tick = now;
        if self.state != PlaybackState::Playing {
            return;
        }

        self.time_ms += elapsed.as_secs_f64() * 1000.0 * self.rate;
        if self.time_ms >= self.script.duration_ms as f64 {
            self.time_ms = 0.0;
            shared.emit(EngineEvent::PositionChanged(1.0));
            self.set_state(shared, PlaybackState::Ended);
            self.set_state(shared, PlaybackState::Stopped);
            return;
        }
        shared.emit(EngineEvent::PositionChanged(self.fraction()));
        self.render();
    }
}

/// Deterministic [`Engine`] implementation.
pub struct ScriptedEngine {
    shared: Arc<SimShared>,
    control: Option<Sender<SimControl>>,
    thread: Option<JoinHandle<()>>,
}

impl ScriptedEngine {
    /// Manual mode: nothing happens unless the probe emits it.
    pub fn new() -> (Self, EngineProbe) {
        let shared = SimShared::new();
        let probe = EngineProbe {
            shared: Arc::clone(&shared),
        };
        (
            Self {
                shared,
                control: None,
                thread: None,
            },
            probe,
        )
    }

    /// Auto mode: plays `script` on a `framewire-engine` thread.
    pub fn auto(script: SimScript) -> (Self, EngineProbe) {
        let (mut engine, probe) = Self::new();
        let (tx, rx) = crossbeam_channel::unbounded();
        let shared = Arc::clone(&engine.shared);
        let spawned = thread::Builder::new()
            .name("framewire-engine".into())
            .spawn(move || Self::run(shared, script, rx));
        match spawned {
            Ok(handle) => {
                engine.control = Some(tx);
                engine.thread = Some(handle);
            }
            Err(e) => warn!("ScriptedEngine: failed to spawn engine thread: {}, staying manual", e),
        }
        (engine, probe)
    }

    fn run(shared: Arc<SimShared>, script: SimScript, rx: Receiver<SimControl>) {
        trace!("framewire-engine started");
        let mut clock = SimClock::new(script);
        let tick = Duration::from_millis(script.tick_ms.max(1));
        loop {
            match rx.recv_timeout(tick) {
                Ok(SimControl::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(control) => clock.apply(&shared, control),
                Err(RecvTimeoutError::Timeout) => {}
            }
            clock.tick(&shared);
        }
        if let Some(output) = clock.output.take() {
            output.cleanup();
        }
        trace!("framewire-engine stopped");
    }

    fn send(&self, control: SimControl) {
        if let Some(tx) = &self.control {
            let _ = tx.send(control);
        }
    }
}

impl Engine for ScriptedEngine {
    fn create_media(&mut self, media: &Media) -> Option<NativeMediaId> {
        if !self.shared.record(EngineCall::CreateMedia(media.clone())) {
            return None;
        }
        Some(NativeMediaId(self.shared.next_media.fetch_add(1, Ordering::Relaxed)))
    }

    fn set_media(&mut self, media: Option<NativeMediaId>) -> bool {
        if !self.shared.record(EngineCall::SetMedia(media)) {
            return false;
        }
        *self.shared.media.lock().unwrap_or_else(|e| e.into_inner()) = media;
        self.send(SimControl::SetMedia(media));
        true
    }

    fn play(&mut self) -> bool {
        let accepted = self.shared.record(EngineCall::Play);
        if accepted {
            self.send(SimControl::Play);
        }
        accepted
    }

    fn pause(&mut self) -> bool {
        let accepted = self.shared.record(EngineCall::Pause);
        if accepted {
            self.send(SimControl::Pause);
        }
        accepted
    }

    fn stop(&mut self) -> bool {
        let accepted = self.shared.record(EngineCall::Stop);
        if accepted {
            self.send(SimControl::Stop);
        }
        accepted
    }

    fn set_time(&mut self, time_ms: i64) -> bool {
        let accepted = self.shared.record(EngineCall::SetTime(time_ms));
        if accepted {
            self.send(SimControl::SeekTime(time_ms));
        }
        accepted
    }

    fn set_position(&mut self, position: f64) -> bool {
        let accepted = self.shared.record(EngineCall::SetPosition(position));
        if accepted {
            self.send(SimControl::SeekPosition(position));
        }
        accepted
    }

    fn set_rate(&mut self, rate: f32) -> bool {
        let accepted = self.shared.record(EngineCall::SetRate(rate));
        if accepted {
            self.send(SimControl::Rate(rate));
        }
        accepted
    }

    fn set_volume(&mut self, percent: i32) -> bool {
        let accepted = self.shared.record(EngineCall::SetVolume(percent));
        if accepted {
            self.shared.volume.store(percent.clamp(0, 100), Ordering::SeqCst);
        }
        accepted
    }

    fn set_mute(&mut self, muted: bool) -> bool {
        let accepted = self.shared.record(EngineCall::SetMute(muted));
        if accepted {
            self.shared.muted.store(muted, Ordering::SeqCst);
        }
        accepted
    }

    fn volume(&self) -> i32 {
        self.shared.volume.load(Ordering::SeqCst)
    }

    fn is_muted(&self) -> bool {
        self.shared.muted.load(Ordering::SeqCst)
    }

    fn set_event_sink(&mut self, sink: Option<EngineEventSink>) {
        *self.shared.sink.write().unwrap_or_else(|e| e.into_inner()) = sink;
    }

    /// Synchronous: once this returns, the previous output gets no more calls.
    fn set_video_output(&mut self, output: Option<Arc<dyn VideoOutputCallbacks>>) -> bool {
        if !self.shared.record(EngineCall::SetVideoOutput(output.is_some())) {
            return false;
        }
        *self.shared.output.lock().unwrap_or_else(|e| e.into_inner()) = output.clone();

        let Some(tx) = &self.control else {
            return true;
        };
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        if tx.send(SimControl::Output(output, ack_tx)).is_ok()
            && ack_rx.recv_timeout(Duration::from_secs(2)).is_err()
        {
            warn!("ScriptedEngine: engine thread did not acknowledge output switch");
        }
        true
    }
}

impl Drop for ScriptedEngine {
    fn drop(&mut self) {
        self.send(SimControl::Shutdown);
        if let Some(handle) = self.thread.take() {
            // The last reference can drop on the engine thread itself
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

/// Factory handing out scripted engines; keeps every probe it created.
pub struct ScriptedEngineFactory {
    script: Option<SimScript>,
    probes: Mutex<Vec<EngineProbe>>,
}

impl ScriptedEngineFactory {
    /// Manual-mode engines
    pub fn manual() -> Self {
        Self {
            script: None,
            probes: Mutex::new(Vec::new()),
        }
    }

    /// Auto-mode engines playing `script`
    pub fn auto(script: SimScript) -> Self {
        Self {
            script: Some(script),
            probes: Mutex::new(Vec::new()),
        }
    }

    pub fn last_probe(&self) -> Option<EngineProbe> {
        self.probes.lock().unwrap_or_else(|e| e.into_inner()).last().cloned()
    }

    pub fn created(&self) -> usize {
        self.probes.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl EngineFactory for ScriptedEngineFactory {
    fn name(&self) -> &str {
        if self.script.is_some() { "scripted-auto" } else { "scripted" }
    }

    /// `--fail` in `args` makes creation fail.
    fn create(&self, args: &[String]) -> Result<Box<dyn Engine>, PlayerError> {
        if args.iter().any(|a| a == "--fail") {
            return Err(PlayerError::Engine("scripted engine told to fail".into()));
        }
        let (engine, probe) = match self.script {
            Some(script) => ScriptedEngine::auto(script),
            None => ScriptedEngine::new(),
        };
        debug!("{}: engine created (args: {:?})", self.name(), args);
        self.probes.lock().unwrap_or_else(|e| e.into_inner()).push(probe);
        Ok(Box::new(engine))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collecting_sink() -> (EngineEventSink, Receiver<EngineEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let sink: EngineEventSink = Arc::new(move |event| {
            let _ = tx.send(event);
        });
        (sink, rx)
    }

    #[test]
    fn test_manual_records_and_rejects() {
        let (mut engine, probe) = ScriptedEngine::new();
        let media = engine.create_media(&Media::file("a.mp4")).unwrap();
        assert!(engine.set_media(Some(media)));
        probe.reject("play");
        assert!(!engine.play());
        probe.accept("play");
        assert!(engine.play());

        assert_eq!(probe.current_media(), Some(media));
        assert_eq!(probe.count(|c| *c == EngineCall::Play), 2);
    }

    #[test]
    fn test_auto_plays_to_end() {
        let script = SimScript {
            duration_ms: 120,
            tick_ms: 10,
            video: None,
        };
        let (mut engine, _probe) = ScriptedEngine::auto(script);
        let (sink, rx) = collecting_sink();
        engine.set_event_sink(Some(sink));

        let media = engine.create_media(&Media::file("clip.mp4")).unwrap();
        engine.set_media(Some(media));
        engine.play();

        let mut states = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Ok(EngineEvent::StateChanged(state)) = rx.recv_timeout(Duration::from_millis(100)) {
                states.push(state);
                if state == PlaybackState::Stopped {
                    break;
                }
            }
        }
        assert_eq!(
            states,
            vec![
                PlaybackState::Opening,
                PlaybackState::Buffering,
                PlaybackState::Playing,
                PlaybackState::Ended,
                PlaybackState::Stopped,
            ]
        );
    }

    #[test]
    fn test_factory_failure() {
        let factory = ScriptedEngineFactory::manual();
        assert!(factory.create(&["--fail".to_string()]).is_err());
        assert!(factory.create(&[]).is_ok());
        assert_eq!(factory.created(), 1);
        assert!(factory.last_probe().is_some());
    }
}

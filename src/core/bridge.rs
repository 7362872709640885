//! Republishes one player's delegate callbacks as an ordered `PlayerEvent` stream.
//!
//! Callbacks arrive on engine threads. The bridge never emits inline: every
//! event is enqueued on a shared serial [`TaskQueue`], so a slow or reentrant
//! subscriber cannot stall the engine and all subscribers see one order.
//!
//! Position updates are deduplicated against the last value queued for
//! publication.

use crossbeam_channel::Receiver;
use log::{debug, trace};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::event_bus::{EventStream, SubscriptionId};
use super::events::{EventKind, PlaybackState, PlayerEvent};
use super::media::{Media, PlaybackPosition};
use super::player::PlayerEventDelegate;
use super::workers::TaskQueue;

const ERROR_MESSAGE: &str = "engine reported a playback error";

pub struct EventBridge {
    player_id: i64,
    queue: Arc<TaskQueue>,
    stream: EventStream<PlayerEvent>,
    last_position: Mutex<Option<PlaybackPosition>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for EventBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBridge")
            .field("player_id", &self.player_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl EventBridge {
    /// Bridge publishing through `queue` (normally the context's serial events queue).
    pub fn new(player_id: i64, queue: Arc<TaskQueue>, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            player_id,
            queue,
            stream: EventStream::with_capacity(capacity),
            last_position: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub fn player_id(&self) -> i64 {
        self.player_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Attach a callback. Its first event is always `Initialized`.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&PlayerEvent) + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        let ready = Arc::new(AtomicBool::new(false));

        // Gated until Initialized went out in queue order
        let gate = Arc::clone(&ready);
        let live = Arc::clone(&callback);
        let id = self.stream.subscribe(move |event| {
            if gate.load(Ordering::Acquire) {
                live(event);
            }
        });

        let initialized = PlayerEvent::new(self.player_id, EventKind::Initialized);
        let queued = self.queue.enqueue(move || {
            callback(&initialized);
            ready.store(true, Ordering::Release);
        });
        if !queued {
            debug!("EventBridge {}: events queue terminated, subscriber never initialized", self.player_id);
        }
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.stream.unsubscribe(id)
    }

    /// Subscriber backed by an unbounded channel.
    pub fn subscribe_channel(&self) -> Receiver<PlayerEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribe(move |event| {
            let _ = tx.send(event.clone());
        });
        rx
    }

    /// Events published since the last poll (capped at the stream capacity).
    pub fn poll(&self) -> Vec<PlayerEvent> {
        self.stream.poll()
    }

    /// Block until everything queued so far has been published.
    pub fn flush(&self, timeout: Duration) -> bool {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.queue.enqueue(move || {
            let _ = tx.send(());
        }) && rx.recv_timeout(timeout).is_ok()
    }

    /// Stop publishing. Already queued events are still delivered, then
    /// subscribers are dropped.
    pub fn terminate(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("EventBridge {} terminated", self.player_id);
        let stream = self.stream.clone();
        let clear = stream.clone();
        if !self.queue.enqueue(move || clear.clear()) {
            stream.clear();
        }
    }

    fn publish(&self, kind: EventKind) {
        if self.is_closed() {
            return;
        }
        trace!("EventBridge {}: {}", self.player_id, kind.name());
        let stream = self.stream.clone();
        let event = PlayerEvent::new(self.player_id, kind);
        self.queue.enqueue(move || stream.emit(event));
    }
}

impl PlayerEventDelegate for EventBridge {
    fn on_media_changed(&self, media: &Media) {
        self.publish(EventKind::MediaChanged { media: media.clone() });
    }

    fn on_playback_state_changed(&self, state: PlaybackState) {
        self.publish(EventKind::PlaybackStateChanged { state });
        if state == PlaybackState::Error {
            self.publish(EventKind::Error {
                message: ERROR_MESSAGE.to_string(),
            });
        }
    }

    fn on_seekable_changed(&self, seekable: bool) {
        self.publish(EventKind::IsSeekableChanged { value: seekable });
    }

    fn on_position_changed(&self, position: PlaybackPosition) {
        // Held across enqueue so the dedupe order matches publication order
        let mut last = self.last_position.lock().unwrap_or_else(|e| e.into_inner());
        if *last == Some(position) {
            return;
        }
        *last = Some(position);
        self.publish(EventKind::position(position));
    }

    fn on_rate_changed(&self, rate: f64) {
        self.publish(EventKind::RateChanged { value: rate });
    }

    fn on_volume_changed(&self, volume: f64) {
        self.publish(EventKind::VolumeChanged { value: volume });
    }

    fn on_mute_changed(&self, muted: bool) {
        self.publish(EventKind::MuteChanged { value: muted });
    }

    fn on_video_dimensions_changed(&self, width: u32, height: u32) {
        self.publish(EventKind::VideoDimensionsChanged { width, height });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const WAIT: Duration = Duration::from_secs(2);

    fn bridge() -> Arc<EventBridge> {
        EventBridge::new(3, Arc::new(TaskQueue::serial("test-events")), 1000)
    }

    fn kinds(rx: &Receiver<PlayerEvent>) -> Vec<EventKind> {
        rx.try_iter().map(|e| e.kind).collect()
    }

    #[test]
    fn test_initialized_first() {
        let bridge = bridge();
        bridge.on_playback_state_changed(PlaybackState::Opening);
        let rx = bridge.subscribe_channel();
        bridge.on_playback_state_changed(PlaybackState::Playing);
        assert!(bridge.flush(WAIT));

        assert_eq!(
            kinds(&rx),
            vec![
                EventKind::Initialized,
                EventKind::PlaybackStateChanged { state: PlaybackState::Playing },
            ]
        );
    }

    #[test]
    fn test_position_deduplicated() {
        let bridge = bridge();
        let rx = bridge.subscribe_channel();
        let p = PlaybackPosition { position: 0.5, duration: 1000 };
        bridge.on_position_changed(p);
        bridge.on_position_changed(p);
        bridge.on_position_changed(PlaybackPosition { position: 0.6, duration: 1000 });
        assert!(bridge.flush(WAIT));

        let positions = kinds(&rx)
            .into_iter()
            .filter(|k| matches!(k, EventKind::PositionChanged { .. }))
            .count();
        assert_eq!(positions, 2);
    }

    #[test]
    fn test_error_state_adds_error_event() {
        let bridge = bridge();
        bridge.on_playback_state_changed(PlaybackState::Error);
        assert!(bridge.flush(WAIT));
        let names: Vec<_> = bridge.poll().iter().map(|e| e.kind.name()).collect();
        assert_eq!(names, vec!["playbackStateChanged", "error"]);
    }

    #[test]
    fn test_publication_off_callback_thread() {
        let bridge = bridge();
        let (tx, rx) = crossbeam_channel::unbounded();
        bridge.subscribe(move |_| {
            let _ = tx.send(thread::current().name().map(str::to_string));
        });
        bridge.on_mute_changed(true);
        assert!(bridge.flush(WAIT));
        for name in rx.try_iter() {
            assert_eq!(name.as_deref(), Some("test-events-0"));
        }
    }

    #[test]
    fn test_terminate_stops_publication() {
        let bridge = bridge();
        let rx = bridge.subscribe_channel();
        bridge.on_volume_changed(0.5);
        bridge.terminate();
        bridge.on_volume_changed(0.7);
        // Queue still runs; nothing new after terminate
        let queue_alive = bridge.flush(WAIT);
        assert!(queue_alive);
        assert_eq!(
            kinds(&rx),
            vec![EventKind::Initialized, EventKind::VolumeChanged { value: 0.5 }]
        );
        assert!(bridge.poll().len() <= 1);
    }
}

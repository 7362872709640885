//! Compositor-facing texture registrations.
//!
//! A registration is monotonic: `Registered -> Unregistering -> Unregistered`.
//! Unregistration completes asynchronously on the compositor's thread; GPU
//! resources backing the texture must outlive that completion.

use log::{debug, trace, warn};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::Duration;

use super::handoff::FrameLease;
use crate::core::registry::ResourceRegistry;

/// Source of frames for one registered texture (compositor side pulls).
pub trait SurfaceProducer: Send + Sync {
    /// Current frame, if any, held until the lease drops.
    fn acquire_surface(&self, width: u32, height: u32) -> Option<FrameLease>;
}

/// Host compositor boundary.
pub trait Compositor: Send + Sync {
    fn register(&self, producer: Arc<dyn SurfaceProducer>) -> i64;
    fn mark_frame_available(&self, texture_id: i64);
    /// Asynchronous; `on_done` runs on the compositor's thread.
    fn unregister(&self, texture_id: i64, on_done: Box<dyn FnOnce() + Send>);
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Registered = 0,
    Unregistering = 1,
    Unregistered = 2,
}

impl RegistrationState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RegistrationState::Registered,
            1 => RegistrationState::Unregistering,
            _ => RegistrationState::Unregistered,
        }
    }
}

type LiveTextures = ResourceRegistry<i64, Arc<TextureRegistration>>;

pub struct TextureRegistration {
    texture_id: i64,
    state: AtomicU8,
    compositor: Arc<dyn Compositor>,
    live: Weak<LiveTextures>,
    done: Mutex<bool>,
    done_cond: Condvar,
}

impl std::fmt::Debug for TextureRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureRegistration")
            .field("texture_id", &self.texture_id)
            .field("state", &self.state())
            .finish()
    }
}

impl TextureRegistration {
    pub fn texture_id(&self) -> i64 {
        self.texture_id
    }

    pub fn state(&self) -> RegistrationState {
        RegistrationState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_valid(&self) -> bool {
        self.state() == RegistrationState::Registered
    }

    /// No-op unless still registered.
    pub fn mark_frame_available(&self) {
        if self.is_valid() {
            self.compositor.mark_frame_available(self.texture_id);
        }
    }

    /// Start unregistration; `callback` runs once the compositor confirms.
    ///
    /// Only the first call has any effect. Returns whether this call started it.
    pub fn unregister(self: &Arc<Self>, callback: impl FnOnce() + Send + 'static) -> bool {
        if self
            .state
            .compare_exchange(
                RegistrationState::Registered as u8,
                RegistrationState::Unregistering as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return false;
        }

        debug!("Unregistering texture {}", self.texture_id);
        let this = Arc::clone(self);
        self.compositor.unregister(
            self.texture_id,
            Box::new(move || {
                this.state.store(RegistrationState::Unregistered as u8, Ordering::Release);
                if let Some(live) = this.live.upgrade() {
                    live.remove(&this.texture_id);
                }
                *this.done.lock().unwrap_or_else(|e| e.into_inner()) = true;
                this.done_cond.notify_all();
                trace!("Texture {} unregistered", this.texture_id);
                callback();
            }),
        );
        true
    }

    /// Block until unregistration completed or `timeout` elapsed.
    pub fn wait_unregistered(&self, timeout: Duration) -> bool {
        let done = self.done.lock().unwrap_or_else(|e| e.into_inner());
        let (done, _) = self
            .done_cond
            .wait_timeout_while(done, timeout, |done| !*done)
            .unwrap_or_else(|e| e.into_inner());
        *done
    }
}

/// Owns every live registration for one compositor.
pub struct TextureRegistry {
    compositor: Arc<dyn Compositor>,
    live: Arc<LiveTextures>,
}

impl TextureRegistry {
    pub fn new(compositor: Arc<dyn Compositor>) -> Self {
        Self {
            compositor,
            live: Arc::new(ResourceRegistry::new()),
        }
    }

    pub fn register(&self, producer: Arc<dyn SurfaceProducer>) -> Arc<TextureRegistration> {
        let texture_id = self.compositor.register(producer);
        let registration = Arc::new(TextureRegistration {
            texture_id,
            state: AtomicU8::new(RegistrationState::Registered as u8),
            compositor: Arc::clone(&self.compositor),
            live: Arc::downgrade(&self.live),
            done: Mutex::new(false),
            done_cond: Condvar::new(),
        });
        self.live.insert(texture_id, Arc::clone(&registration));
        debug!("Registered texture {}", texture_id);
        registration
    }

    pub fn get(&self, texture_id: i64) -> Option<Arc<TextureRegistration>> {
        self.live.get(&texture_id)
    }

    /// Registrations not yet confirmed unregistered
    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Unregister everything still live and wait for each completion.
    ///
    /// Returns how many registrations did not complete within `timeout`.
    pub fn drain(&self, timeout: Duration) -> usize {
        let mut pending = Vec::new();
        self.live.remove_all(|_, registration| {
            registration.unregister(|| {});
            pending.push(registration);
        });
        let stuck = pending.iter().filter(|r| !r.wait_unregistered(timeout)).count();
        if stuck > 0 {
            warn!("TextureRegistry: {} registrations still pending after {:?}", stuck, timeout);
        }
        stuck
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::software::LoopbackCompositor;
    use std::sync::atomic::AtomicUsize;

    struct NoFrames;
    impl SurfaceProducer for NoFrames {
        fn acquire_surface(&self, _: u32, _: u32) -> Option<FrameLease> {
            None
        }
    }

    #[test]
    fn test_lifecycle_monotonic() {
        let compositor = Arc::new(LoopbackCompositor::new());
        let registry = TextureRegistry::new(compositor.clone());
        let registration = registry.register(Arc::new(NoFrames));
        assert_eq!(registration.state(), RegistrationState::Registered);
        assert_eq!(registry.len(), 1);

        let calls = Arc::new(AtomicUsize::new(0));
        let c1 = Arc::clone(&calls);
        let c2 = Arc::clone(&calls);
        assert!(registration.unregister(move || {
            c1.fetch_add(1, Ordering::SeqCst);
        }));
        // Second call must not restart or reverse anything
        assert!(!registration.unregister(move || {
            c2.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(registration.wait_unregistered(Duration::from_secs(2)));
        assert_eq!(registration.state(), RegistrationState::Unregistered);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_frame_available_ignored_after_unregister() {
        let compositor = Arc::new(LoopbackCompositor::new());
        let registry = TextureRegistry::new(compositor.clone());
        let registration = registry.register(Arc::new(NoFrames));

        registration.mark_frame_available();
        registration.unregister(|| {});
        registration.mark_frame_available();
        assert!(registration.wait_unregistered(Duration::from_secs(2)));
        compositor.flush();
        assert_eq!(compositor.frame_signals(), 1);
    }

    #[test]
    fn test_wait_times_out_when_compositor_holds() {
        let compositor = Arc::new(LoopbackCompositor::new());
        compositor.hold_unregistrations(true);
        let registry = TextureRegistry::new(compositor.clone());
        let registration = registry.register(Arc::new(NoFrames));

        registration.unregister(|| {});
        assert!(!registration.wait_unregistered(Duration::from_millis(50)));
        assert_eq!(registration.state(), RegistrationState::Unregistering);

        compositor.hold_unregistrations(false);
        assert!(registration.wait_unregistered(Duration::from_secs(2)));
    }

    #[test]
    fn test_drain_unregisters_all() {
        let compositor = Arc::new(LoopbackCompositor::new());
        let registry = TextureRegistry::new(compositor.clone());
        let a = registry.register(Arc::new(NoFrames));
        let b = registry.register(Arc::new(NoFrames));
        assert_ne!(a.texture_id(), b.texture_id());

        assert_eq!(registry.drain(Duration::from_secs(2)), 0);
        assert_eq!(a.state(), RegistrationState::Unregistered);
        assert_eq!(b.state(), RegistrationState::Unregistered);
    }
}

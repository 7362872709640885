//! Zero-copy frame handoff between the decode device and the compositor.
//!
//! Negotiation allocates a shareable render target on the decode device,
//! exports an OS handle for it and imports that handle on the compositor
//! device. The decode thread renders into the imported alias and signals
//! "frame available"; the compositor then pulls a [`FrameLease`].
//!
//! A lease is the only way to read the surface. While one is outstanding
//! the channel will not resize or release anything: negotiation and teardown
//! wait for it to drop. The lease also holds a reference on the texture, so
//! the memory stays valid even if teardown gives up waiting.
//!
//! Handle ordering: on renegotiation the new handle is created BEFORE the
//! previous one is closed, so the OS can never hand the same numeric value
//! back while the compositor may still have the old one cached.
//!
//! Lock order: never negotiate or tear down from a thread holding a lease.

use log::{debug, trace, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;

use super::gpu::{GpuDevice, PixelFormat, RenderTargetId, SharedHandle, SurfaceDesc, TextureRef, VideoDimensions};
use super::texture_registry::{SurfaceProducer, TextureRegistration, TextureRegistry};
use crate::core::engine::{OutputConfig, VideoOutputCallbacks};
use crate::error::HandoffError;

/// Negotiation limits, taken from `CoreConfig`.
#[derive(Debug, Clone, Copy)]
pub struct HandoffConfig {
    pub min_dimension: u32,
    pub unregister_timeout: Duration,
    pub format: PixelFormat,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            min_dimension: 8,
            unregister_timeout: Duration::from_millis(5000),
            format: PixelFormat::Bgra8,
        }
    }
}

/// What the compositor needs to sample the current surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameSurfaceDescriptor {
    pub handle: SharedHandle,
    pub width: u32,
    pub height: u32,
    pub visible_width: u32,
    pub visible_height: u32,
    pub format: PixelFormat,
    /// Bumped on every successful negotiation
    pub generation: u64,
}

type DimensionsListener = Arc<dyn Fn(VideoDimensions) + Send + Sync>;

#[derive(Default)]
struct SurfaceState {
    /// Decode-device allocation owning the memory
    texture: Option<TextureRef>,
    /// Aliased import bound as render target
    render_target: Option<TextureRef>,
    shared_handle: Option<SharedHandle>,
    descriptor: Option<FrameSurfaceDescriptor>,
    generation: u64,
    handout_active: bool,
}

struct HandoffShared {
    decode_device: Arc<dyn GpuDevice>,
    compositor_device: Arc<dyn GpuDevice>,
    config: HandoffConfig,
    surface: Mutex<SurfaceState>,
    handout_released: Condvar,
    registration: Mutex<Option<Arc<TextureRegistration>>>,
    torn_down: AtomicBool,
    dimensions: Mutex<VideoDimensions>,
    dimensions_listener: RwLock<Option<DimensionsListener>>,
    frames_presented: AtomicU64,
}

/// Exclusive read access to the current frame surface.
///
/// Dropping it is the release: the channel may resize or tear down again.
pub struct FrameLease {
    shared: Arc<HandoffShared>,
    descriptor: FrameSurfaceDescriptor,
    texture: TextureRef,
}

impl FrameLease {
    pub fn descriptor(&self) -> &FrameSurfaceDescriptor {
        &self.descriptor
    }

    pub fn texture(&self) -> &TextureRef {
        &self.texture
    }
}

impl std::fmt::Debug for FrameLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameLease").field("descriptor", &self.descriptor).finish()
    }
}

impl Drop for FrameLease {
    fn drop(&mut self) {
        let mut surface = self.shared.surface.lock().unwrap_or_else(|e| e.into_inner());
        surface.handout_active = false;
        drop(surface);
        self.shared.handout_released.notify_all();
    }
}

/// Decode-side end of the handoff, also the engine's video output.
///
/// Cheap to clone; clones share one surface.
#[derive(Clone)]
pub struct FrameHandoffChannel {
    shared: Arc<HandoffShared>,
}

impl std::fmt::Debug for FrameHandoffChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameHandoffChannel")
            .field("texture_id", &self.texture_id())
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}

impl FrameHandoffChannel {
    /// Create the channel and register its texture with the compositor.
    pub fn new(
        decode_device: Arc<dyn GpuDevice>,
        compositor_device: Arc<dyn GpuDevice>,
        textures: &TextureRegistry,
        config: HandoffConfig,
    ) -> Self {
        let shared = Arc::new(HandoffShared {
            decode_device,
            compositor_device,
            config,
            surface: Mutex::new(SurfaceState::default()),
            handout_released: Condvar::new(),
            registration: Mutex::new(None),
            torn_down: AtomicBool::new(false),
            dimensions: Mutex::new(VideoDimensions::default()),
            dimensions_listener: RwLock::new(None),
            frames_presented: AtomicU64::new(0),
        });

        // Compositor keeps only a weak producer; no ownership cycle
        let registration = textures.register(Arc::new(WeakProducer(Arc::downgrade(&shared))));
        *shared.registration.lock().unwrap_or_else(|e| e.into_inner()) = Some(registration);

        Self { shared }
    }

    pub fn texture_id(&self) -> Option<i64> {
        self.shared.registration().map(|r| r.texture_id())
    }

    pub fn registration(&self) -> Option<Arc<TextureRegistration>> {
        self.shared.registration()
    }

    pub fn is_torn_down(&self) -> bool {
        self.shared.torn_down.load(Ordering::Acquire)
    }

    pub fn dimensions(&self) -> VideoDimensions {
        *self.shared.dimensions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Listener called (on the decode thread) whenever negotiation changes size.
    pub fn on_dimensions_changed(&self, listener: impl Fn(VideoDimensions) + Send + Sync + 'static) {
        *self.shared.dimensions_listener.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(listener));
    }

    pub fn clear_dimensions_listener(&self) {
        *self.shared.dimensions_listener.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Handle currently exported to the compositor.
    pub fn current_handle(&self) -> Option<SharedHandle> {
        self.shared.lock_surface().shared_handle
    }

    pub fn frames_presented(&self) -> u64 {
        self.shared.frames_presented.load(Ordering::Relaxed)
    }

    /// (Re)allocate the shared surface for `width` x `height`.
    ///
    /// Zero extents are clamped to the configured minimum. Blocks while a
    /// lease is outstanding.
    pub fn negotiate(&self, width: u32, height: u32) -> Result<FrameSurfaceDescriptor, HandoffError> {
        self.shared.negotiate(width, height)
    }

    /// Decode thread finished a frame.
    pub fn present(&self) {
        if self.is_torn_down() {
            return;
        }
        self.shared.frames_presented.fetch_add(1, Ordering::Relaxed);
        if let Some(registration) = self.shared.registration() {
            registration.mark_frame_available();
        }
    }

    /// Wait for any outstanding lease, then take the current frame.
    pub fn acquire_frame(&self) -> Option<FrameLease> {
        self.shared.acquire(true)
    }

    /// Current frame, or `None` if another lease is outstanding.
    pub fn try_acquire_frame(&self) -> Option<FrameLease> {
        self.shared.acquire(false)
    }

    /// Unregister the texture, wait for the compositor, release GPU resources.
    ///
    /// Idempotent: returns `false` if already torn down. Detach the channel
    /// from the engine before calling this so no further frames arrive.
    pub fn teardown(&self) -> bool {
        self.shared.teardown()
    }
}

impl HandoffShared {
    fn lock_surface(&self) -> MutexGuard<'_, SurfaceState> {
        self.surface.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Surface lock with no lease outstanding.
    fn lock_idle(&self, timeout: Option<Duration>) -> (MutexGuard<'_, SurfaceState>, bool) {
        let surface = self.lock_surface();
        match timeout {
            None => {
                let surface = self
                    .handout_released
                    .wait_while(surface, |s| s.handout_active)
                    .unwrap_or_else(|e| e.into_inner());
                (surface, true)
            }
            Some(timeout) => {
                let (surface, result) = self
                    .handout_released
                    .wait_timeout_while(surface, timeout, |s| s.handout_active)
                    .unwrap_or_else(|e| e.into_inner());
                (surface, !result.timed_out())
            }
        }
    }

    fn registration(&self) -> Option<Arc<TextureRegistration>> {
        self.registration.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn allocate(&self, desc: &SurfaceDesc) -> Result<(TextureRef, SharedHandle, TextureRef), HandoffError> {
        let texture = self.decode_device.create_texture(desc)?;
        let handle = self.decode_device.create_shared_handle(&texture)?;
        match self.compositor_device.open_shared_resource(handle) {
            Ok(alias) => Ok((texture, handle, alias)),
            Err(e) => {
                self.decode_device.close_shared_handle(handle);
                Err(e)
            }
        }
    }

    fn negotiate(&self, width: u32, height: u32) -> Result<FrameSurfaceDescriptor, HandoffError> {
        if self.torn_down.load(Ordering::Acquire) {
            return Err(HandoffError::ShutDown);
        }
        let desc = SurfaceDesc::new(width, height, self.config.format).clamped(self.config.min_dimension);

        let result = match desc.bytes_per_row() {
            Some(bytes_per_row) => self.replace_surface(&desc).map(|d| (d, bytes_per_row)),
            None => Err(HandoffError::TextureCreation(format!(
                "{}x{} exceeds the addressable row size",
                desc.width, desc.height
            ))),
        };

        match result {
            Ok((descriptor, bytes_per_row)) => {
                debug!(
                    "Negotiated {}x{} surface, handle {} (generation {})",
                    descriptor.width, descriptor.height, descriptor.handle, descriptor.generation
                );
                self.set_dimensions(VideoDimensions::new(desc.width, desc.height, bytes_per_row));
                Ok(descriptor)
            }
            Err(HandoffError::ShutDown) => {
                debug!("Negotiation {}x{} dropped, channel torn down", desc.width, desc.height);
                Err(HandoffError::ShutDown)
            }
            Err(e) => {
                warn!("Frame surface negotiation {}x{} failed: {}", desc.width, desc.height, e);
                self.set_dimensions(VideoDimensions::default());
                Err(e)
            }
        }
    }

    fn replace_surface(&self, desc: &SurfaceDesc) -> Result<FrameSurfaceDescriptor, HandoffError> {
        let (mut surface, _) = self.lock_idle(None);
        // Teardown may have run while we waited for a lease
        if self.torn_down.load(Ordering::Acquire) {
            return Err(HandoffError::ShutDown);
        }
        // No frame is valid until the new surface exists.
        // The previous handle stays open until its replacement is created.
        surface.descriptor = None;
        surface.render_target = None;
        surface.texture = None;

        let (texture, handle, alias) = self.allocate(desc)?;
        if let Some(previous) = surface.shared_handle.replace(handle) {
            if previous != handle {
                self.decode_device.close_shared_handle(previous);
            } else {
                warn!("Shared handle {} reused while still open", handle);
            }
        }
        surface.generation += 1;
        let descriptor = FrameSurfaceDescriptor {
            handle,
            width: desc.width,
            height: desc.height,
            visible_width: desc.width,
            visible_height: desc.height,
            format: desc.format,
            generation: surface.generation,
        };
        surface.texture = Some(texture);
        surface.render_target = Some(alias);
        surface.descriptor = Some(descriptor);
        Ok(descriptor)
    }

    fn set_dimensions(&self, dimensions: VideoDimensions) {
        {
            let mut current = self.dimensions.lock().unwrap_or_else(|e| e.into_inner());
            if *current == dimensions {
                return;
            }
            *current = dimensions;
        }
        let listener = self.dimensions_listener.read().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(listener) = listener {
            listener(dimensions);
        }
    }

    fn acquire(self: &Arc<Self>, wait: bool) -> Option<FrameLease> {
        if self.torn_down.load(Ordering::Acquire) {
            return None;
        }
        let mut surface = if wait {
            self.lock_idle(None).0
        } else {
            let surface = self.lock_surface();
            if surface.handout_active {
                return None;
            }
            surface
        };

        let descriptor = surface.descriptor?;
        let texture = surface.texture.clone()?;
        surface.handout_active = true;
        Some(FrameLease {
            shared: Arc::clone(self),
            descriptor,
            texture,
        })
    }

    fn teardown(&self) -> bool {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return false;
        }

        let timeout = self.config.unregister_timeout;
        if let Some(registration) = self.registration() {
            let texture_id = registration.texture_id();
            registration.unregister(move || trace!("Texture {} released by compositor", texture_id));
            if !registration.wait_unregistered(timeout) {
                warn!("Texture {} unregistration not confirmed after {:?}", texture_id, timeout);
            }
        }

        let (mut surface, idle) = self.lock_idle(Some(timeout));
        if !idle {
            warn!("Frame lease still held after {:?}, releasing surface anyway", timeout);
        }
        surface.descriptor = None;
        surface.render_target = None;
        surface.texture = None;
        if let Some(handle) = surface.shared_handle.take() {
            self.decode_device.close_shared_handle(handle);
        }
        drop(surface);

        self.set_dimensions(VideoDimensions::default());
        debug!("Frame handoff channel torn down");
        true
    }
}

impl Drop for HandoffShared {
    fn drop(&mut self) {
        if *self.torn_down.get_mut() {
            return;
        }
        // Dropped without teardown: GPU state must outlive the compositor's
        // unregistration, so it moves into the completion callback.
        let surface = std::mem::take(self.surface.get_mut().unwrap_or_else(|e| e.into_inner()));
        let device = Arc::clone(&self.decode_device);
        let release = move || {
            if let Some(handle) = surface.shared_handle {
                device.close_shared_handle(handle);
            }
            drop(surface);
        };
        match self.registration.get_mut().unwrap_or_else(|e| e.into_inner()).take() {
            Some(registration) if registration.is_valid() => {
                registration.unregister(release);
            }
            _ => release(),
        }
    }
}

struct WeakProducer(Weak<HandoffShared>);

impl SurfaceProducer for WeakProducer {
    fn acquire_surface(&self, _width: u32, _height: u32) -> Option<FrameLease> {
        // Compositor thread never waits on the decode side
        self.0.upgrade()?.acquire(false)
    }
}

impl VideoOutputCallbacks for FrameHandoffChannel {
    fn setup(&self) -> bool {
        !self.is_torn_down()
    }

    fn update_output(&self, width: u32, height: u32) -> Option<OutputConfig> {
        let descriptor = self.negotiate(width, height).ok()?;
        Some(OutputConfig {
            width: descriptor.width,
            height: descriptor.height,
            format: descriptor.format,
            full_range: true,
        })
    }

    fn select_plane(&self, plane: u32) -> Option<RenderTargetId> {
        // Single packed RGBA plane
        if plane != 0 || self.is_torn_down() {
            return None;
        }
        self.shared.lock_surface().render_target.as_ref().map(|t| t.render_target())
    }

    fn swap(&self) {
        self.present();
    }

    fn cleanup(&self) {
        trace!("Engine released video output {:?}", self.texture_id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::software::{GpuFault, LoopbackCompositor, SoftwareGpu};
    use crate::video::texture_registry::RegistrationState;
    use std::collections::HashSet;
    use std::thread;

    fn channel_with(compositor: &Arc<LoopbackCompositor>) -> (FrameHandoffChannel, Arc<SoftwareGpu>, TextureRegistry) {
        let (decode, host) = SoftwareGpu::pair("decode", "compositor");
        let textures = TextureRegistry::new(compositor.clone());
        let channel = FrameHandoffChannel::new(decode.clone(), host, &textures, HandoffConfig::default());
        (channel, decode, textures)
    }

    #[test]
    fn test_zero_dimensions_clamped() {
        let compositor = Arc::new(LoopbackCompositor::new());
        let (channel, _, _textures) = channel_with(&compositor);
        let descriptor = channel.negotiate(0, 0).unwrap();
        assert_eq!((descriptor.width, descriptor.height), (8, 8));
        assert_eq!(channel.dimensions(), VideoDimensions::new(8, 8, 32));
    }

    #[test]
    fn test_renegotiation_never_reuses_live_handle() {
        let compositor = Arc::new(LoopbackCompositor::new());
        let (channel, decode, _textures) = channel_with(&compositor);

        let mut previous = channel.negotiate(640, 360).unwrap().handle;
        for i in 0..20 {
            let next = channel.negotiate(640 + i, 360).unwrap().handle;
            assert_ne!(next, previous);
            // Exactly one handle open after each renegotiation
            assert_eq!(decode.live_handles(), vec![next]);
            previous = next;
        }
        assert!(decode.peak_live_handles() <= 2);
    }

    #[test]
    fn test_negotiation_failure_reported() {
        let compositor = Arc::new(LoopbackCompositor::new());
        let (channel, decode, _textures) = channel_with(&compositor);
        channel.negotiate(320, 240).unwrap();

        decode.fail_next(GpuFault::Texture);
        let err = channel.negotiate(1920, 1080).unwrap_err();
        assert!(matches!(err, HandoffError::TextureCreation(_)));
        assert_eq!(channel.dimensions(), VideoDimensions::default());
        assert!(channel.try_acquire_frame().is_none());

        // Channel recovers on the next negotiation
        assert!(channel.negotiate(1920, 1080).is_ok());
        assert!(channel.try_acquire_frame().is_some());
    }

    #[test]
    fn test_open_failure_closes_new_handle() {
        let compositor = Arc::new(LoopbackCompositor::new());
        let (decode, host) = SoftwareGpu::pair("decode", "compositor");
        let textures = TextureRegistry::new(compositor.clone());
        let channel = FrameHandoffChannel::new(decode.clone(), host.clone(), &textures, HandoffConfig::default());

        let first = channel.negotiate(64, 64).unwrap().handle;
        host.fail_next(GpuFault::OpenShared);
        assert!(matches!(channel.negotiate(128, 128), Err(HandoffError::OpenSharedResource(_))));
        // Previous handle still open, failed one closed
        assert_eq!(decode.live_handles(), vec![first]);
    }

    #[test]
    fn test_single_outstanding_lease() {
        let compositor = Arc::new(LoopbackCompositor::new());
        let (channel, _, _textures) = channel_with(&compositor);
        channel.negotiate(100, 100).unwrap();

        let lease = channel.try_acquire_frame().unwrap();
        assert_eq!(lease.descriptor().width, 100);
        assert!(channel.try_acquire_frame().is_none());
        drop(lease);
        assert!(channel.try_acquire_frame().is_some());
    }

    #[test]
    fn test_negotiate_waits_for_lease() {
        let compositor = Arc::new(LoopbackCompositor::new());
        let (channel, _, _textures) = channel_with(&compositor);
        let first = channel.negotiate(100, 100).unwrap();

        let lease = channel.try_acquire_frame().unwrap();
        let decode_side = channel.clone();
        let resize = thread::spawn(move || decode_side.negotiate(200, 200).unwrap());

        thread::sleep(Duration::from_millis(50));
        // Resize is blocked: the surface the lease describes is still current
        assert!(!resize.is_finished());
        assert_eq!(channel.current_handle(), Some(first.handle));

        drop(lease);
        let second = resize.join().unwrap();
        assert_eq!(second.width, 200);
        assert_eq!(second.generation, first.generation + 1);
    }

    #[test]
    fn test_teardown_idempotent() {
        let compositor = Arc::new(LoopbackCompositor::new());
        let (channel, decode, textures) = channel_with(&compositor);
        channel.negotiate(32, 32).unwrap();
        let registration = channel.registration().unwrap();

        assert!(channel.teardown());
        assert!(!channel.teardown());
        assert_eq!(registration.state(), RegistrationState::Unregistered);
        assert!(decode.live_handles().is_empty());
        assert!(textures.is_empty());
        assert!(matches!(channel.negotiate(32, 32), Err(HandoffError::ShutDown)));
        assert!(channel.try_acquire_frame().is_none());
    }

    #[test]
    fn test_teardown_during_blocked_negotiation_leaks_nothing() {
        let compositor = Arc::new(LoopbackCompositor::new());
        let (decode, host) = SoftwareGpu::pair("decode", "compositor");
        let textures = TextureRegistry::new(compositor.clone());
        let config = HandoffConfig {
            unregister_timeout: Duration::from_millis(50),
            ..HandoffConfig::default()
        };
        let channel = FrameHandoffChannel::new(decode.clone(), host, &textures, config);
        channel.negotiate(64, 64).unwrap();

        let lease = channel.try_acquire_frame().unwrap();
        let decode_side = channel.clone();
        let resize = thread::spawn(move || decode_side.negotiate(128, 128));
        thread::sleep(Duration::from_millis(30));

        // Lease outlives the unregister timeout, teardown releases anyway
        assert!(channel.teardown());
        assert!(decode.live_handles().is_empty());

        drop(lease);
        assert!(matches!(resize.join().unwrap(), Err(HandoffError::ShutDown)));
        assert!(decode.live_handles().is_empty());
        drop(channel);
        assert!(decode.live_handles().is_empty());
    }

    #[test]
    fn test_oversized_width_rejected() {
        let compositor = Arc::new(LoopbackCompositor::new());
        let (channel, decode, _textures) = channel_with(&compositor);
        let first = channel.negotiate(64, 64).unwrap().handle;

        let err = channel.negotiate(2_000_000_000, 1).unwrap_err();
        assert!(matches!(err, HandoffError::TextureCreation(_)));
        assert_eq!(channel.dimensions(), VideoDimensions::default());
        // Nothing allocated for the rejected size
        assert_eq!(decode.live_handles(), vec![first]);
        assert!(channel.negotiate(64, 64).is_ok());
    }

    #[test]
    fn test_teardown_survives_stuck_compositor() {
        let compositor = Arc::new(LoopbackCompositor::new());
        compositor.hold_unregistrations(true);
        let (decode, host) = SoftwareGpu::pair("decode", "compositor");
        let textures = TextureRegistry::new(compositor.clone());
        let config = HandoffConfig {
            unregister_timeout: Duration::from_millis(50),
            ..HandoffConfig::default()
        };
        let channel = FrameHandoffChannel::new(decode.clone(), host, &textures, config);
        channel.negotiate(16, 16).unwrap();

        assert!(channel.teardown());
        assert!(decode.live_handles().is_empty());
        compositor.hold_unregistrations(false);
    }

    #[test]
    fn test_present_reaches_compositor() {
        let compositor = Arc::new(LoopbackCompositor::new());
        let (channel, _, _textures) = channel_with(&compositor);

        let mut handles = HashSet::new();
        for size in [64, 128, 256] {
            handles.insert(channel.negotiate(size, size).unwrap().handle);
            channel.present();
            compositor.flush();
        }
        assert_eq!(channel.frames_presented(), 3);
        assert_eq!(compositor.frames_composed(), 3);
        assert_eq!(compositor.seen_handles().into_iter().collect::<HashSet<_>>(), handles);
    }

    #[test]
    fn test_dimensions_listener() {
        let compositor = Arc::new(LoopbackCompositor::new());
        let (channel, _, _textures) = channel_with(&compositor);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        channel.on_dimensions_changed(move |d| s.lock().unwrap().push((d.width, d.height)));

        channel.negotiate(640, 480).unwrap();
        channel.negotiate(640, 480).unwrap();
        channel.negotiate(0, 480).unwrap();
        // Unchanged size reported once
        assert_eq!(*seen.lock().unwrap(), vec![(640, 480), (8, 480)]);
    }

    #[test]
    fn test_output_callbacks() {
        let compositor = Arc::new(LoopbackCompositor::new());
        let (channel, _, _textures) = channel_with(&compositor);
        assert!(channel.setup());
        assert!(channel.select_plane(0).is_none());

        let config = channel.update_output(1280, 720).unwrap();
        assert_eq!((config.width, config.height, config.format), (1280, 720, PixelFormat::Bgra8));
        assert!(channel.select_plane(0).is_some());
        assert!(channel.select_plane(1).is_none());
    }
}

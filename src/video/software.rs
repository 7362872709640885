//! Software stand-ins for the GPU and the host compositor.
//!
//! `SoftwareGpu` models an OS handle table the way real drivers behave:
//! closed handle values are handed out again, lowest first. That makes handle
//! reuse bugs observable without a GPU. `LoopbackCompositor` runs a raster
//! thread that pulls a frame lease for every "frame available" signal.

use crossbeam_channel::{Receiver, Sender};
use log::{trace, warn};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use super::gpu::{GpuDevice, GpuTexture, SharedHandle, SurfaceDesc, TextureRef};
use super::texture_registry::{Compositor, SurfaceProducer};
use crate::error::HandoffError;

const HANDLE_BASE: u64 = 0x100;
const HANDLE_STEP: u64 = 4;

static NEXT_TEXTURE_ID: AtomicU64 = AtomicU64::new(1);

/// Injectable failure for the next matching call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuFault {
    Texture,
    SharedHandle,
    OpenShared,
}

#[derive(Default)]
struct HandleTable {
    live: BTreeMap<SharedHandle, SurfaceDesc>,
    freed: BTreeSet<u64>,
    next: u64,
    peak_live: usize,
}

impl HandleTable {
    fn allocate(&mut self, desc: SurfaceDesc) -> SharedHandle {
        let value = match self.freed.pop_first() {
            Some(value) => value,
            None => {
                let value = HANDLE_BASE + self.next * HANDLE_STEP;
                self.next += 1;
                value
            }
        };
        let handle = SharedHandle(value);
        self.live.insert(handle, desc);
        self.peak_live = self.peak_live.max(self.live.len());
        handle
    }

    fn close(&mut self, handle: SharedHandle) -> bool {
        if self.live.remove(&handle).is_some() {
            self.freed.insert(handle.raw());
            true
        } else {
            false
        }
    }
}

#[derive(Debug)]
struct SoftwareTexture {
    id: u64,
    desc: SurfaceDesc,
    live: Arc<AtomicUsize>,
}

impl GpuTexture for SoftwareTexture {
    fn id(&self) -> u64 {
        self.id
    }

    fn desc(&self) -> SurfaceDesc {
        self.desc
    }
}

impl Drop for SoftwareTexture {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}

/// CPU-only device. Devices made by `pair()` share one handle table.
pub struct SoftwareGpu {
    name: String,
    handles: Arc<Mutex<HandleTable>>,
    live_textures: Arc<AtomicUsize>,
    fault: Mutex<Option<GpuFault>>,
}

impl SoftwareGpu {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_table(name, Arc::new(Mutex::new(HandleTable::default())))
    }

    fn with_table(name: impl Into<String>, handles: Arc<Mutex<HandleTable>>) -> Self {
        Self {
            name: name.into(),
            handles,
            live_textures: Arc::new(AtomicUsize::new(0)),
            fault: Mutex::new(None),
        }
    }

    /// Decode and compositor devices on one machine (shared handle namespace).
    pub fn pair(decode: &str, compositor: &str) -> (Arc<Self>, Arc<Self>) {
        let handles = Arc::new(Mutex::new(HandleTable::default()));
        (
            Arc::new(Self::with_table(decode, Arc::clone(&handles))),
            Arc::new(Self::with_table(compositor, handles)),
        )
    }

    pub fn fail_next(&self, fault: GpuFault) {
        *self.fault.lock().unwrap_or_else(|e| e.into_inner()) = Some(fault);
    }

    /// Open handles, ascending
    pub fn live_handles(&self) -> Vec<SharedHandle> {
        self.handles.lock().unwrap_or_else(|e| e.into_inner()).live.keys().copied().collect()
    }

    pub fn peak_live_handles(&self) -> usize {
        self.handles.lock().unwrap_or_else(|e| e.into_inner()).peak_live
    }

    /// Textures allocated on this device and not yet released
    pub fn live_textures(&self) -> usize {
        self.live_textures.load(Ordering::Acquire)
    }

    fn take_fault(&self, kind: GpuFault) -> bool {
        let mut fault = self.fault.lock().unwrap_or_else(|e| e.into_inner());
        if *fault == Some(kind) {
            *fault = None;
            return true;
        }
        false
    }

    fn new_texture(&self, desc: SurfaceDesc) -> TextureRef {
        self.live_textures.fetch_add(1, Ordering::AcqRel);
        Arc::new(SoftwareTexture {
            id: NEXT_TEXTURE_ID.fetch_add(1, Ordering::Relaxed),
            desc,
            live: Arc::clone(&self.live_textures),
        })
    }
}

impl GpuDevice for SoftwareGpu {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_texture(&self, desc: &SurfaceDesc) -> Result<TextureRef, HandoffError> {
        if self.take_fault(GpuFault::Texture) {
            return Err(HandoffError::TextureCreation(format!(
                "{}: out of memory for {}x{}",
                self.name, desc.width, desc.height
            )));
        }
        Ok(self.new_texture(*desc))
    }

    fn create_shared_handle(&self, texture: &TextureRef) -> Result<SharedHandle, HandoffError> {
        if self.take_fault(GpuFault::SharedHandle) {
            return Err(HandoffError::SharedHandle(format!("{}: access denied", self.name)));
        }
        let handle = self.handles.lock().unwrap_or_else(|e| e.into_inner()).allocate(texture.desc());
        trace!("{}: exported texture {} as {}", self.name, texture.id(), handle);
        Ok(handle)
    }

    fn open_shared_resource(&self, handle: SharedHandle) -> Result<TextureRef, HandoffError> {
        if self.take_fault(GpuFault::OpenShared) {
            return Err(HandoffError::OpenSharedResource(format!("{}: device removed", self.name)));
        }
        let desc = self
            .handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .live
            .get(&handle)
            .copied()
            .ok_or_else(|| HandoffError::OpenSharedResource(format!("{}: unknown handle {}", self.name, handle)))?;
        Ok(self.new_texture(desc))
    }

    fn close_shared_handle(&self, handle: SharedHandle) {
        if !self.handles.lock().unwrap_or_else(|e| e.into_inner()).close(handle) {
            warn!("{}: close of unknown handle {}", self.name, handle);
        }
    }
}

type UnregisterDone = Box<dyn FnOnce() + Send>;

fn complete(producers: &mut HashMap<i64, Arc<dyn SurfaceProducer>>, id: i64, on_done: UnregisterDone) {
    // Producer (and any lease it could hand out) goes first
    producers.remove(&id);
    on_done();
}

enum RasterCommand {
    Register(i64, Arc<dyn SurfaceProducer>),
    FrameAvailable(i64),
    Unregister(i64, UnregisterDone),
    ReleaseHeld,
    Flush(Sender<()>),
    Shutdown,
}

#[derive(Default)]
struct CompositorStats {
    frame_signals: AtomicU64,
    frames_composed: AtomicU64,
    seen_handles: Mutex<Vec<SharedHandle>>,
}

/// In-process compositor with its own raster thread.
pub struct LoopbackCompositor {
    tx: Sender<RasterCommand>,
    next_id: AtomicI64,
    hold: Arc<AtomicBool>,
    stats: Arc<CompositorStats>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Default for LoopbackCompositor {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackCompositor {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        let hold = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(CompositorStats::default());

        let thread_hold = Arc::clone(&hold);
        let thread_stats = Arc::clone(&stats);
        let handle = thread::Builder::new()
            .name("framewire-raster".into())
            .spawn(move || Self::raster_loop(rx, &thread_hold, &thread_stats))
            .map_err(|e| log::error!("Failed to spawn raster thread: {}", e))
            .ok();

        Self {
            tx,
            next_id: AtomicI64::new(1),
            hold,
            stats,
            handle: Mutex::new(handle),
        }
    }

    fn raster_loop(rx: Receiver<RasterCommand>, hold: &AtomicBool, stats: &CompositorStats) {
        trace!("Raster thread started");
        let mut producers: HashMap<i64, Arc<dyn SurfaceProducer>> = HashMap::new();
        let mut held: Vec<(i64, UnregisterDone)> = Vec::new();

        for command in rx.iter() {
            match command {
                RasterCommand::Register(id, producer) => {
                    producers.insert(id, producer);
                }
                RasterCommand::FrameAvailable(id) => {
                    stats.frame_signals.fetch_add(1, Ordering::Relaxed);
                    let lease = producers.get(&id).and_then(|p| p.acquire_surface(0, 0));
                    if let Some(lease) = lease {
                        stats.frames_composed.fetch_add(1, Ordering::Relaxed);
                        stats
                            .seen_handles
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .push(lease.descriptor().handle);
                    }
                }
                RasterCommand::Unregister(id, on_done) => {
                    if hold.load(Ordering::Acquire) {
                        held.push((id, on_done));
                    } else {
                        complete(&mut producers, id, on_done);
                    }
                }
                RasterCommand::ReleaseHeld => {
                    for (id, on_done) in held.drain(..) {
                        complete(&mut producers, id, on_done);
                    }
                }
                RasterCommand::Flush(done) => {
                    let _ = done.send(());
                }
                RasterCommand::Shutdown => break,
            }
        }

        // Nobody may wait forever on a compositor that is gone
        for (id, on_done) in held.drain(..) {
            complete(&mut producers, id, on_done);
        }
        trace!("Raster thread stopped");
    }

    /// Park unregistrations until called again with `false`.
    pub fn hold_unregistrations(&self, hold: bool) {
        self.hold.store(hold, Ordering::Release);
        if !hold {
            let _ = self.tx.send(RasterCommand::ReleaseHeld);
        }
    }

    /// Wait until every command sent so far has been processed.
    pub fn flush(&self) -> bool {
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        if self.tx.send(RasterCommand::Flush(done_tx)).is_err() {
            return false;
        }
        done_rx.recv_timeout(Duration::from_secs(2)).is_ok()
    }

    pub fn frame_signals(&self) -> u64 {
        self.stats.frame_signals.load(Ordering::Relaxed)
    }

    pub fn frames_composed(&self) -> u64 {
        self.stats.frames_composed.load(Ordering::Relaxed)
    }

    /// Distinct handles sampled, in first-seen order
    pub fn seen_handles(&self) -> Vec<SharedHandle> {
        let seen = self.stats.seen_handles.lock().unwrap_or_else(|e| e.into_inner());
        let mut distinct: Vec<SharedHandle> = Vec::new();
        for handle in seen.iter() {
            if !distinct.contains(handle) {
                distinct.push(*handle);
            }
        }
        distinct
    }

    pub fn wait_for_frames(&self, count: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.frames_composed() < count {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }
}

impl Compositor for LoopbackCompositor {
    fn register(&self, producer: Arc<dyn SurfaceProducer>) -> i64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let _ = self.tx.send(RasterCommand::Register(id, producer));
        id
    }

    fn mark_frame_available(&self, texture_id: i64) {
        let _ = self.tx.send(RasterCommand::FrameAvailable(texture_id));
    }

    fn unregister(&self, texture_id: i64, on_done: Box<dyn FnOnce() + Send>) {
        if let Err(e) = self.tx.send(RasterCommand::Unregister(texture_id, on_done)) {
            // Raster thread gone: complete inline
            if let RasterCommand::Unregister(_, on_done) = e.into_inner() {
                on_done();
            }
        }
    }
}

impl Drop for LoopbackCompositor {
    fn drop(&mut self) {
        let _ = self.tx.send(RasterCommand::Shutdown);
        let handle = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::gpu::PixelFormat;

    fn desc(w: u32, h: u32) -> SurfaceDesc {
        SurfaceDesc::new(w, h, PixelFormat::Bgra8)
    }

    #[test]
    fn test_closed_handles_are_reused() {
        let gpu = SoftwareGpu::new("test");
        let texture: TextureRef = gpu.create_texture(&desc(4, 4)).unwrap();
        let a = gpu.create_shared_handle(&texture).unwrap();
        gpu.close_shared_handle(a);
        let b = gpu.create_shared_handle(&texture).unwrap();
        // Same value comes back, exactly like a real handle table
        assert_eq!(a, b);
    }

    #[test]
    fn test_open_unknown_handle_fails() {
        let (decode, host) = SoftwareGpu::pair("d", "c");
        let texture = decode.create_texture(&desc(8, 8)).unwrap();
        let handle = decode.create_shared_handle(&texture).unwrap();
        let alias = host.open_shared_resource(handle).unwrap();
        assert_eq!(alias.desc(), desc(8, 8));

        decode.close_shared_handle(handle);
        assert!(host.open_shared_resource(handle).is_err());
    }

    #[test]
    fn test_texture_refcount() {
        let gpu = SoftwareGpu::new("test");
        let texture = gpu.create_texture(&desc(2, 2)).unwrap();
        let extra = Arc::clone(&texture);
        assert_eq!(gpu.live_textures(), 1);
        drop(texture);
        assert_eq!(gpu.live_textures(), 1);
        drop(extra);
        assert_eq!(gpu.live_textures(), 0);
    }

    #[test]
    fn test_fault_injection_one_shot() {
        let gpu = SoftwareGpu::new("test");
        gpu.fail_next(GpuFault::Texture);
        assert!(gpu.create_texture(&desc(1, 1)).is_err());
        assert!(gpu.create_texture(&desc(1, 1)).is_ok());
    }

    #[test]
    fn test_compositor_completes_on_raster_thread() {
        let compositor = LoopbackCompositor::new();
        let (tx, rx) = crossbeam_channel::bounded(1);
        compositor.unregister(
            42,
            Box::new(move || {
                let _ = tx.send(thread::current().name().map(str::to_owned));
            }),
        );
        let name = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(name.as_deref(), Some("framewire-raster"));
    }
}

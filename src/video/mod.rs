//! GPU frame handoff between an engine's decode device and a host compositor.

pub mod gpu;
pub mod handoff;
pub mod software;
pub mod texture_registry;

pub use gpu::{GpuDevice, GpuTexture, PixelFormat, RenderTargetId, SharedHandle, SurfaceDesc, TextureRef, VideoDimensions};
pub use handoff::{FrameHandoffChannel, FrameLease, FrameSurfaceDescriptor, HandoffConfig};
pub use software::{GpuFault, LoopbackCompositor, SoftwareGpu};
pub use texture_registry::{Compositor, RegistrationState, SurfaceProducer, TextureRegistration, TextureRegistry};

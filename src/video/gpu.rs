//! Platform-neutral GPU boundary for the frame handoff.
//!
//! A `GpuDevice` allocates render-target textures, exports them through
//! OS-level shareable handles and imports handles exported by another device.
//! Textures are reference counted through `Arc`: cloning a [`TextureRef`] is
//! the "add ref" of the underlying resource.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::error::HandoffError;

/// Pixel layout of a surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    #[default]
    Bgra8,
    Rgba8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => 4,
        }
    }
}

/// OS-level handle value. Numeric identity matters: compositors cache by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SharedHandle(pub u64);

impl SharedHandle {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SharedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Texture bound as a render target on its device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderTargetId(pub u64);

/// Texture allocation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceDesc {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl SurfaceDesc {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self { width, height, format }
    }

    /// Replace zero extents with `min` (engines report 0 before the first frame).
    pub fn clamped(self, min: u32) -> Self {
        let fix = |v: u32| if v == 0 { min } else { v };
        Self {
            width: fix(self.width),
            height: fix(self.height),
            format: self.format,
        }
    }

    /// `None` when the row size does not fit in `u32`.
    pub fn bytes_per_row(&self) -> Option<u32> {
        self.width.checked_mul(self.format.bytes_per_pixel())
    }
}

/// Size of the video currently produced. All zeros means "no video".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct VideoDimensions {
    pub width: u32,
    pub height: u32,
    pub bytes_per_row: u32,
}

impl VideoDimensions {
    pub fn new(width: u32, height: u32, bytes_per_row: u32) -> Self {
        Self {
            width,
            height,
            bytes_per_row,
        }
    }
}

/// GPU-resident texture. Dropping the last `Arc` releases it.
pub trait GpuTexture: Send + Sync + fmt::Debug {
    fn id(&self) -> u64;
    fn desc(&self) -> SurfaceDesc;

    fn render_target(&self) -> RenderTargetId {
        RenderTargetId(self.id())
    }
}

pub type TextureRef = Arc<dyn GpuTexture>;

/// One GPU device (decode side or compositor side).
pub trait GpuDevice: Send + Sync {
    fn name(&self) -> &str;

    /// Allocate a shareable render-target texture.
    fn create_texture(&self, desc: &SurfaceDesc) -> Result<TextureRef, HandoffError>;

    /// Export a new OS handle for `texture`. Each call yields a fresh handle.
    fn create_shared_handle(&self, texture: &TextureRef) -> Result<SharedHandle, HandoffError>;

    /// Import a handle exported by another device as an aliased texture.
    fn open_shared_resource(&self, handle: SharedHandle) -> Result<TextureRef, HandoffError>;

    /// Close a handle previously returned by `create_shared_handle`.
    fn close_shared_handle(&self, handle: SharedHandle);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamped_zero_dimensions() {
        let desc = SurfaceDesc::new(0, 720, PixelFormat::Bgra8).clamped(8);
        assert_eq!((desc.width, desc.height), (8, 720));
        let desc = SurfaceDesc::new(0, 0, PixelFormat::Bgra8).clamped(8);
        assert_eq!((desc.width, desc.height), (8, 8));
        assert_eq!(desc.bytes_per_row(), Some(32));
    }

    #[test]
    fn test_bytes_per_row_overflow() {
        assert_eq!(SurfaceDesc::new(u32::MAX / 4, 1, PixelFormat::Bgra8).bytes_per_row(), Some(u32::MAX / 4 * 4));
        assert_eq!(SurfaceDesc::new(u32::MAX / 4 + 1, 1, PixelFormat::Bgra8).bytes_per_row(), None);
    }

    #[test]
    fn test_handle_display() {
        assert_eq!(SharedHandle(0x1f4).to_string(), "0x1f4");
    }
}

//! GPU capability seam.
//!
//! The capture path needs six operations from the graphics API: open a
//! cross-process texture by handle, describe it, create a CPU-readable
//! staging texture, copy, map, and unmap. [`GpuDevice`] is that surface; the
//! Direct3D 11 backend implements it on Windows and tests use a mock.

use cspgrab_core::{CaptureError, TextureDesc};

/// CPU view of a mapped staging texture (subresource 0).
#[derive(Debug)]
pub struct MappedTexture<'a> {
    /// Mapped bytes, at least `row_pitch * (height - 1) + width * bpp` long.
    pub data: &'a [u8],
    /// Stride between rows, `>= width * bpp` (hardware alignment).
    pub row_pitch: u32,
}

/// The graphics device and its immediate context. Every texture it returns
/// is owned by the caller until handed back through [`GpuDevice::release`].
///
/// All operations are synchronous on the calling thread.
pub trait GpuDevice {
    type Texture;

    /// Open a texture another process shared, by its numeric handle.
    fn open_shared(&mut self, handle: u32) -> Result<Self::Texture, CaptureError>;

    fn describe(&self, texture: &Self::Texture) -> TextureDesc;

    /// Create a staging texture matching `desc`: staging usage, CPU read
    /// access, no bind or misc flags.
    fn create_staging(&mut self, desc: &TextureDesc) -> Result<Self::Texture, CaptureError>;

    /// Full-resource copy from `src` into `dst`.
    fn copy(&mut self, dst: &Self::Texture, src: &Self::Texture) -> Result<(), CaptureError>;

    /// Map `texture` for reading. Must be paired with [`GpuDevice::unmap`]
    /// once the returned view is dropped.
    fn map<'a>(&'a mut self, texture: &'a Self::Texture) -> Result<MappedTexture<'a>, CaptureError>;

    fn unmap(&mut self, texture: &Self::Texture);

    fn release(&mut self, texture: Self::Texture) {
        drop(texture);
    }
}

/// Creates the device at session initialization.
pub trait DeviceFactory {
    type Device: GpuDevice;

    fn create(&self) -> Result<Self::Device, CaptureError>;
}

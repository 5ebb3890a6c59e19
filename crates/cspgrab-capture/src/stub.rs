//! Non-Windows stand-ins so the crate builds and tests everywhere. Creating a
//! device or opening a mapping always fails.

use std::convert::Infallible;

use cspgrab_core::{CaptureError, TextureDesc};
use tracing::warn;

use crate::channel::{MappingOpener, SharedMapping};
use crate::gpu::{DeviceFactory, GpuDevice, MappedTexture};

/// `E_NOTIMPL`.
const E_NOTIMPL: u32 = 0x8000_4001;
/// `ERROR_NOT_SUPPORTED`.
const ERROR_NOT_SUPPORTED: u32 = 50;

/// Never constructed.
pub enum StubDevice {}

impl GpuDevice for StubDevice {
    type Texture = Infallible;

    fn open_shared(&mut self, _handle: u32) -> Result<Infallible, CaptureError> {
        match *self {}
    }

    fn describe(&self, texture: &Infallible) -> TextureDesc {
        match *texture {}
    }

    fn create_staging(&mut self, _desc: &TextureDesc) -> Result<Infallible, CaptureError> {
        match *self {}
    }

    fn copy(&mut self, dst: &Infallible, _src: &Infallible) -> Result<(), CaptureError> {
        match *dst {}
    }

    fn map<'a>(&'a mut self, texture: &'a Infallible) -> Result<MappedTexture<'a>, CaptureError> {
        match *texture {}
    }

    fn unmap(&mut self, texture: &Infallible) {
        match *texture {}
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StubDeviceFactory;

impl DeviceFactory for StubDeviceFactory {
    type Device = StubDevice;

    fn create(&self) -> Result<StubDevice, CaptureError> {
        warn!("Shared-texture capture needs Direct3D 11; not available on this platform");
        Err(CaptureError::DeviceCreationFailed { code: E_NOTIMPL })
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StubMappingOpener;

impl MappingOpener for StubMappingOpener {
    fn open(&self, name: &str) -> Result<Box<dyn SharedMapping>, CaptureError> {
        Err(CaptureError::MappingUnavailable { name: name.to_owned(), code: ERROR_NOT_SUPPORTED })
    }
}

//! Shared texture resolution and the staging mirror.
//!
//! The producer may swap which texture backs a source at any time; it then
//! publishes a new handle. Rotation is detected by raw handle equality only.
//! The staging texture follows the shared texture's description: it is
//! created on first use and recreated when a rotated texture no longer
//! matches it (unless `restage_on_change` is off, which keeps the first
//! staging texture for the whole session).

use cspgrab_core::{CaptureError, TextureDesc};
use tracing::{debug, info, warn};

use crate::gpu::GpuDevice;

/// `E_INVALIDARG`, reported for a null shared handle.
const E_INVALIDARG: u32 = 0x8007_0057;

pub struct TextureBridge<T> {
    current_handle: u32,
    shared: Option<T>,
    shared_desc: Option<TextureDesc>,
    staging: Option<T>,
    staging_desc: Option<TextureDesc>,
    restage_on_change: bool,
}

impl<T> TextureBridge<T> {
    pub fn new(restage_on_change: bool) -> Self {
        Self {
            current_handle: 0,
            shared: None,
            shared_desc: None,
            staging: None,
            staging_desc: None,
            restage_on_change,
        }
    }

    /// Handle of the currently opened shared texture, 0 when none.
    pub fn current_handle(&self) -> u32 {
        self.current_handle
    }

    pub fn shared_desc(&self) -> Option<TextureDesc> {
        self.shared_desc
    }

    pub fn staging_desc(&self) -> Option<TextureDesc> {
        self.staging_desc
    }

    /// Open the texture behind `handle`, unless it is the one already open.
    /// Returns `true` when a (re)open happened.
    pub fn resolve<D>(&mut self, device: &mut D, handle: u32) -> Result<bool, CaptureError>
    where
        D: GpuDevice<Texture = T>,
    {
        if handle == 0 {
            return Err(CaptureError::OpenSharedResourceFailed { handle, code: E_INVALIDARG });
        }
        if handle == self.current_handle && self.shared.is_some() {
            return Ok(false);
        }

        if let Some(old) = self.shared.take() {
            info!("Shared texture rotated 0x{:08X} → 0x{:08X}", self.current_handle, handle);
            device.release(old);
        }
        self.current_handle = 0;
        self.shared_desc = None;

        let texture = device.open_shared(handle)?;
        let desc = device.describe(&texture);
        debug!("Opened shared texture 0x{:08X}: {}", handle, desc);

        if !self.restage_on_change {
            if let Some(staged) = self.staging_desc.filter(|staged| *staged != desc) {
                warn!("Shared texture is now {} but staging stays {}; frames will be stale", desc, staged);
            }
        }

        self.shared = Some(texture);
        self.shared_desc = Some(desc);
        self.current_handle = handle;
        Ok(true)
    }

    /// Make sure a staging texture matching the shared texture exists.
    /// Returns `true` when one was (re)created.
    pub fn ensure_staging<D>(&mut self, device: &mut D) -> Result<bool, CaptureError>
    where
        D: GpuDevice<Texture = T>,
    {
        let desc = self.shared_desc.ok_or(CaptureError::NotInitialized)?;
        if self.staging.is_some() {
            let matches = self.staging_desc == Some(desc);
            if matches || !self.restage_on_change {
                return Ok(false);
            }
        }

        if let Some(old) = self.staging.take() {
            device.release(old);
        }
        self.staging_desc = None;

        let staging = device.create_staging(&desc)?;
        debug!("Created staging texture {}", desc);
        self.staging = Some(staging);
        self.staging_desc = Some(desc);
        Ok(true)
    }

    /// Copy the whole shared texture into the staging texture. Refused when
    /// their descriptions differ, since the runtime would drop the copy and
    /// leave the previous contents in place.
    pub fn copy_to_staging<D>(&mut self, device: &mut D) -> Result<(), CaptureError>
    where
        D: GpuDevice<Texture = T>,
    {
        if self.shared_desc != self.staging_desc {
            return Err(CaptureError::CopyFailed { code: E_INVALIDARG });
        }
        match (&self.shared, &self.staging) {
            (Some(shared), Some(staging)) => device.copy(staging, shared),
            _ => Err(CaptureError::NotInitialized),
        }
    }

    /// The staging texture and its description, once created.
    pub fn staging(&self) -> Option<(&T, TextureDesc)> {
        self.staging.as_ref().zip(self.staging_desc)
    }

    /// Release staging, then shared. Safe to call repeatedly.
    pub fn release<D>(&mut self, device: &mut D)
    where
        D: GpuDevice<Texture = T>,
    {
        if let Some(staging) = self.staging.take() {
            device.release(staging);
        }
        if let Some(shared) = self.shared.take() {
            device.release(shared);
        }
        self.reset();
    }

    /// Drop every texture without a device, for teardown after the device
    /// is already gone.
    pub fn discard(&mut self) {
        self.staging = None;
        self.shared = None;
        self.reset();
    }

    fn reset(&mut self) {
        self.current_handle = 0;
        self.shared_desc = None;
        self.staging_desc = None;
    }
}

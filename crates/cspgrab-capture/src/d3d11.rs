//! Direct3D 11 backend for [`GpuDevice`].

use std::ffi::c_void;

use cspgrab_core::{CaptureError, TextureDesc};
use tracing::{debug, info};
use windows::Win32::Foundation::{HANDLE, HMODULE};
use windows::Win32::Graphics::Direct3D::{
    D3D_DRIVER_TYPE_HARDWARE, D3D_FEATURE_LEVEL, D3D_FEATURE_LEVEL_10_0, D3D_FEATURE_LEVEL_10_1,
    D3D_FEATURE_LEVEL_11_0, D3D_FEATURE_LEVEL_11_1,
};
use windows::Win32::Graphics::Direct3D11::{
    D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D, D3D11_CPU_ACCESS_READ,
    D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_MAPPED_SUBRESOURCE, D3D11_MAP_READ, D3D11_SDK_VERSION,
    D3D11_TEXTURE2D_DESC, D3D11_USAGE_STAGING,
};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT, DXGI_SAMPLE_DESC};

use crate::gpu::{DeviceFactory, GpuDevice, MappedTexture};

/// `E_FAIL`, for calls that succeed but hand back nothing.
const E_FAIL: u32 = 0x8000_4005;

pub struct D3d11Device {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
}

impl D3d11Device {
    /// Hardware device on the default adapter, BGRA support enabled.
    pub fn create() -> Result<Self, CaptureError> {
        let feature_levels = [
            D3D_FEATURE_LEVEL_11_1,
            D3D_FEATURE_LEVEL_11_0,
            D3D_FEATURE_LEVEL_10_1,
            D3D_FEATURE_LEVEL_10_0,
        ];
        let mut device = None;
        let mut context = None;
        let mut feature_level = D3D_FEATURE_LEVEL::default();

        // SAFETY: every out-pointer refers to a live local.
        unsafe {
            D3D11CreateDevice(
                None,
                D3D_DRIVER_TYPE_HARDWARE,
                HMODULE::default(),
                D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                Some(&feature_levels),
                D3D11_SDK_VERSION,
                Some(&mut device),
                Some(&mut feature_level),
                Some(&mut context),
            )
        }
        .map_err(|err| CaptureError::DeviceCreationFailed { code: hresult(&err) })?;

        let (Some(device), Some(context)) = (device, context) else {
            return Err(CaptureError::DeviceCreationFailed { code: E_FAIL });
        };
        info!("Direct3D 11 device created (feature level 0x{:X})", feature_level.0);
        Ok(Self { device, context })
    }
}

impl GpuDevice for D3d11Device {
    type Texture = ID3D11Texture2D;

    fn open_shared(&mut self, handle: u32) -> Result<ID3D11Texture2D, CaptureError> {
        // Legacy shared handles are 32-bit values valid in any process.
        let shared = HANDLE(handle as usize as *mut c_void);
        // SAFETY: the handle is only interpreted by the runtime; a stale one
        // yields an error, not UB.
        unsafe { self.device.OpenSharedResource::<ID3D11Texture2D>(shared) }
            .map_err(|err| CaptureError::OpenSharedResourceFailed { handle, code: hresult(&err) })
    }

    fn describe(&self, texture: &ID3D11Texture2D) -> TextureDesc {
        let mut desc = D3D11_TEXTURE2D_DESC::default();
        // SAFETY: `desc` is a valid out-pointer.
        unsafe { texture.GetDesc(&mut desc) };
        TextureDesc {
            width: desc.Width,
            height: desc.Height,
            format: desc.Format.0 as u32,
            mip_levels: desc.MipLevels,
            array_size: desc.ArraySize,
            sample_count: desc.SampleDesc.Count,
        }
    }

    fn create_staging(&mut self, desc: &TextureDesc) -> Result<ID3D11Texture2D, CaptureError> {
        let staging_desc = D3D11_TEXTURE2D_DESC {
            Width: desc.width,
            Height: desc.height,
            MipLevels: desc.mip_levels,
            ArraySize: desc.array_size,
            Format: DXGI_FORMAT(desc.format as i32),
            SampleDesc: DXGI_SAMPLE_DESC { Count: desc.sample_count, Quality: 0 },
            Usage: D3D11_USAGE_STAGING,
            BindFlags: 0,
            CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
            MiscFlags: 0,
        };
        let mut staging = None;
        // SAFETY: descriptor and out-pointer are live locals.
        unsafe { self.device.CreateTexture2D(&staging_desc, None, Some(&mut staging)) }
            .map_err(|err| CaptureError::StagingCreateFailed { code: hresult(&err) })?;
        staging.ok_or(CaptureError::StagingCreateFailed { code: E_FAIL })
    }

    fn copy(&mut self, dst: &ID3D11Texture2D, src: &ID3D11Texture2D) -> Result<(), CaptureError> {
        // SAFETY: both are live textures of this device. CopyResource reports
        // nothing; mismatched resources are dropped by the runtime.
        unsafe { self.context.CopyResource(dst, src) };
        Ok(())
    }

    fn map<'a>(&'a mut self, texture: &'a ID3D11Texture2D) -> Result<MappedTexture<'a>, CaptureError> {
        let desc = self.describe(texture);
        let bpp = desc
            .pixel_format()
            .bytes_per_pixel()
            .ok_or(CaptureError::UnsupportedFormat { format: desc.format })?;

        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        // SAFETY: staging texture created with CPU read access.
        unsafe { self.context.Map(texture, 0, D3D11_MAP_READ, 0, Some(&mut mapped)) }
            .map_err(|err| CaptureError::MapFailed { code: hresult(&err) })?;
        if mapped.pData.is_null() {
            // SAFETY: the map above succeeded.
            unsafe { self.context.Unmap(texture, 0) };
            return Err(CaptureError::MapFailed { code: E_FAIL });
        }

        let rows = desc.height.saturating_sub(1) as usize;
        let len = mapped.RowPitch as usize * rows + desc.width as usize * bpp;
        debug!("Mapped staging {} pitch={}", desc, mapped.RowPitch);
        // SAFETY: the runtime guarantees `RowPitch * (height - 1) + row`
        // readable bytes until Unmap, which needs `&mut self` and so cannot
        // happen while this borrow lives.
        let data = unsafe { std::slice::from_raw_parts(mapped.pData as *const u8, len) };
        Ok(MappedTexture { data, row_pitch: mapped.RowPitch })
    }

    fn unmap(&mut self, texture: &ID3D11Texture2D) {
        // SAFETY: paired with a successful `map`.
        unsafe { self.context.Unmap(texture, 0) };
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct D3d11Factory;

impl DeviceFactory for D3d11Factory {
    type Device = D3d11Device;

    fn create(&self) -> Result<D3d11Device, CaptureError> {
        D3d11Device::create()
    }
}

fn hresult(err: &windows::core::Error) -> u32 {
    err.code().0 as u32
}

//! One capture cycle: request, copy, map, compact, unmap.
//!
//! ```text
//! heartbeat ─► needs_data = request ─► resolve handle ─► ensure staging
//!                                                            │
//!   Frame ◄── unmap ◄── compact rows ◄── map staging ◄── CopyResource
//! ```

use std::time::Duration;

use cspgrab_core::{
    CaptureConfig, CaptureError, Frame, SourceDescriptor, BYTES_PER_PIXEL,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::bridge::TextureBridge;
use crate::channel::SharedChannel;
use crate::gpu::GpuDevice;
use crate::wait::Poller;

#[derive(Debug, Clone)]
pub struct FrameReader {
    request_code: u16,
    poll_interval: Duration,
    timeout: Option<Duration>,
}

impl FrameReader {
    pub fn new(request_code: u16, poll_interval: Duration, timeout: Option<Duration>) -> Self {
        Self { request_code, poll_interval, timeout }
    }

    pub fn from_config(config: &CaptureConfig) -> Self {
        Self::new(config.request_code, config.frame_poll_interval(), config.frame_timeout())
    }

    /// Read the current contents of `source` without waiting for the
    /// producer to render a new image.
    pub fn read_frame<D>(
        &self,
        channel: &SharedChannel,
        source: &SourceDescriptor,
        bridge: &mut TextureBridge<D::Texture>,
        device: &mut D,
    ) -> Result<Frame, CaptureError>
    where
        D: GpuDevice,
    {
        channel.heartbeat();
        let slot = channel
            .table()?
            .slot(source.index)
            .ok_or(CaptureError::InvalidArgument("source index outside the table"))?;
        slot.set_needs_data(self.request_code);

        let width = u32::from(slot.width());
        let height = u32::from(slot.height());
        let flags = slot.flags();

        bridge.resolve(device, slot.handle())?;
        bridge.ensure_staging(device)?;
        bridge.copy_to_staging(device)?;

        let (staging, desc) = bridge.staging().ok_or(CaptureError::NotInitialized)?;
        let format = desc.pixel_format();
        if format.bytes_per_pixel() != Some(BYTES_PER_PIXEL) {
            return Err(CaptureError::UnsupportedFormat { format: desc.format });
        }

        let (data, row_pitch) = {
            let mapped = device.map(staging)?;
            let row_pitch = mapped.row_pitch;
            let fits = width <= desc.width
                && height <= desc.height
                && row_pitch as usize >= width as usize * BYTES_PER_PIXEL;
            let data = if fits {
                compact_rows(
                    mapped.data,
                    row_pitch as usize,
                    width as usize * BYTES_PER_PIXEL,
                    height as usize,
                )
            } else {
                Err(CaptureError::DimensionMismatch {
                    declared_width: width,
                    declared_height: height,
                    texture_width: desc.width,
                    texture_height: desc.height,
                    row_pitch,
                })
            };
            (data, row_pitch)
        };
        device.unmap(staging);
        let data = data?;

        if (width, height) != (desc.width, desc.height) {
            debug!(
                "Declared size {}x{} is smaller than texture {}x{}, cropping",
                width, height, desc.width, desc.height
            );
        }
        trace!(width, height, row_pitch, "frame read");

        Ok(Frame { data, width, height, row_pitch, format, flags })
    }

    /// Ask for a fresh image, wait until the producer acknowledges by
    /// changing `needs_data` away from the request code, then read it.
    pub fn wait_for_frame<D>(
        &self,
        channel: &SharedChannel,
        source: &SourceDescriptor,
        bridge: &mut TextureBridge<D::Texture>,
        device: &mut D,
        cancel: &CancellationToken,
    ) -> Result<Frame, CaptureError>
    where
        D: GpuDevice,
    {
        let slot = channel
            .table()?
            .slot(source.index)
            .ok_or(CaptureError::InvalidArgument("source index outside the table"))?;
        slot.set_needs_data(self.request_code);

        Poller::new("frame acknowledgment", self.poll_interval)
            .with_timeout(self.timeout)
            .with_cancel(cancel.clone())
            .poll_until(|| {
                channel.heartbeat();
                slot.needs_data() != self.request_code
            })?;

        self.read_frame(channel, source, bridge, device)
    }
}

/// Pack `height` rows of `row_bytes` each, read at `row_pitch` stride from
/// `src`, into a new buffer of exactly `row_bytes * height` bytes.
///
/// When the pitch equals the row size the rows are already contiguous and
/// are copied in one pass; otherwise row by row. Both give the same output.
pub fn compact_rows(
    src: &[u8],
    row_pitch: usize,
    row_bytes: usize,
    height: usize,
) -> Result<Vec<u8>, CaptureError> {
    if row_pitch < row_bytes {
        return Err(CaptureError::InvalidArgument("row pitch shorter than a row"));
    }
    let size = row_bytes
        .checked_mul(height)
        .ok_or(CaptureError::InvalidArgument("frame size overflows usize"))?;
    if size == 0 {
        return Ok(Vec::new());
    }
    let needed = (height - 1)
        .checked_mul(row_pitch)
        .and_then(|n| n.checked_add(row_bytes))
        .ok_or(CaptureError::InvalidArgument("row pitch overflows usize"))?;
    if src.len() < needed {
        return Err(CaptureError::InvalidArgument("mapped region shorter than the frame"));
    }

    let mut out = Vec::new();
    out.try_reserve_exact(size)
        .map_err(|_| CaptureError::AllocationFailed { bytes: size })?;

    if row_pitch == row_bytes {
        out.extend_from_slice(&src[..size]);
    } else {
        for row in src.chunks(row_pitch).take(height) {
            out.extend_from_slice(&row[..row_bytes]);
        }
    }
    Ok(out)
}

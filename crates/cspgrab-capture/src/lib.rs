//! cspgrab-capture — frame capture from the CSP shared texture table.
//!
//! The producer (the simulator's OBS texture export) publishes up to 63
//! texture sources in a named shared-memory table. A consumer keeps the
//! table's liveness counter fresh, picks a source, marks it as wanted, and
//! reads its texture back to system memory.
//!
//! # Pipeline
//!
//! ```text
//! Local\AcTools.CSP.OBSTextures.v0 ──► SharedChannel (alive counter = 60)
//!                                          │  SourceRegistry: first slot with
//!                                          │  handle ≠ 0 and !UNAVAILABLE
//!                                          ▼
//!                                 needs_data = 3 (request)
//!                                          │
//!   shared handle ──OpenSharedResource──► TextureBridge ──CopyResource──► staging
//!                                                                          │ Map
//!                                                                          ▼
//!                                    FrameReader: strip row padding ──► Frame
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! # fn example() -> Result<(), cspgrab_core::CaptureError> {
//! use cspgrab_capture::CaptureSession;
//! use cspgrab_core::CaptureConfig;
//!
//! let mut session = CaptureSession::new(CaptureConfig::default());
//! session.initialize()?;
//! let frame = session.capture_frame()?;
//! // frame.data: width * height * 4 bytes, rows tightly packed
//! # Ok(())
//! # }
//! ```
//!
//! On non-Windows targets a stub backend is compiled; session creation
//! fails with `DeviceCreationFailed`.

pub mod bridge;
pub mod channel;
pub mod ffi;
pub mod gpu;
pub mod reader;
pub mod registry;
pub mod session;
pub mod table;
pub mod wait;

#[cfg(test)]
mod mock;

pub use bridge::TextureBridge;
pub use channel::{HeapMapping, MappingOpener, SharedChannel, SharedMapping};
pub use gpu::{DeviceFactory, GpuDevice, MappedTexture};
pub use reader::{compact_rows, FrameReader};
pub use registry::{pick_source, SourceRegistry};
pub use session::{CaptureSession, SessionState};
pub use table::{SharedTable, SourceSlot};
pub use wait::Poller;

// ── Platform split ─────────────────────────────────────────────────────────────

#[cfg(target_os = "windows")]
mod d3d11;
#[cfg(target_os = "windows")]
mod win32;
#[cfg(target_os = "windows")]
pub use d3d11::{D3d11Device, D3d11Factory};
#[cfg(target_os = "windows")]
pub use win32::{FileMapping, FileMappingOpener};
#[cfg(target_os = "windows")]
pub type PlatformDeviceFactory = D3d11Factory;
#[cfg(target_os = "windows")]
pub type PlatformMappingOpener = FileMappingOpener;

#[cfg(not(target_os = "windows"))]
mod stub;
#[cfg(not(target_os = "windows"))]
pub use stub::{StubDevice, StubDeviceFactory, StubMappingOpener};
#[cfg(not(target_os = "windows"))]
pub type PlatformDeviceFactory = StubDeviceFactory;
#[cfg(not(target_os = "windows"))]
pub type PlatformMappingOpener = StubMappingOpener;

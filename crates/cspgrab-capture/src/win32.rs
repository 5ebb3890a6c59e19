//! Named file mappings via the Win32 memory API.

use std::ptr::NonNull;

use cspgrab_core::layout::TABLE_SIZE;
use cspgrab_core::CaptureError;
use tracing::warn;
use windows::core::HSTRING;
use windows::Win32::Foundation::{CloseHandle, GetLastError, HANDLE};
use windows::Win32::System::Memory::{
    MapViewOfFile, OpenFileMappingW, UnmapViewOfFile, FILE_MAP_READ, FILE_MAP_WRITE,
    MEMORY_MAPPED_VIEW_ADDRESS,
};

use crate::channel::{MappingOpener, SharedMapping};

/// An open read/write view of a named mapping created by another process.
pub struct FileMapping {
    handle: HANDLE,
    view: MEMORY_MAPPED_VIEW_ADDRESS,
    base: NonNull<u8>,
}

impl FileMapping {
    pub fn open(name: &str) -> Result<Self, CaptureError> {
        let access = FILE_MAP_READ | FILE_MAP_WRITE;
        // SAFETY: the name outlives the call.
        let handle = unsafe { OpenFileMappingW(access.0, false, &HSTRING::from(name)) }
            .map_err(|err| CaptureError::MappingUnavailable {
                name: name.to_owned(),
                code: err.code().0 as u32,
            })?;

        // SAFETY: `handle` is a valid mapping handle.
        let view = unsafe { MapViewOfFile(handle, access, 0, 0, TABLE_SIZE) };
        let Some(base) = NonNull::new(view.Value.cast::<u8>()) else {
            // SAFETY: reads the calling thread's last-error value.
            let code = unsafe { GetLastError() }.0;
            // SAFETY: `handle` was opened above and is not used again.
            let _ = unsafe { CloseHandle(handle) };
            return Err(CaptureError::MappingViewFailed { code });
        };
        Ok(Self { handle, view, base })
    }
}

// SAFETY: the view stays mapped at `base` until drop; views are page
// aligned and the table fits in TABLE_SIZE bytes.
unsafe impl SharedMapping for FileMapping {
    fn base(&self) -> NonNull<u8> {
        self.base
    }
}

// SAFETY: the handle and view are process-wide; table access is atomic.
unsafe impl Send for FileMapping {}

impl Drop for FileMapping {
    fn drop(&mut self) {
        // SAFETY: view and handle were obtained in `open` and are released once.
        unsafe {
            if let Err(err) = UnmapViewOfFile(self.view) {
                warn!("UnmapViewOfFile failed: {}", err);
            }
            if let Err(err) = CloseHandle(self.handle) {
                warn!("CloseHandle on mapping failed: {}", err);
            }
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FileMappingOpener;

impl MappingOpener for FileMappingOpener {
    fn open(&self, name: &str) -> Result<Box<dyn SharedMapping>, CaptureError> {
        Ok(Box::new(FileMapping::open(name)?))
    }
}

//! C ABI over [`CaptureSession`] for hosts that load the `cdylib`.
//!
//! Every function returns a status code: `0` on success, otherwise the
//! negative [`CaptureError::status_code`]. Sessions and frames handed out
//! here must be returned through the matching `*_destroy` / `*_free` call.

use std::ffi::{c_char, CStr};
use std::ptr;

use cspgrab_core::{CaptureConfig, CaptureError, Frame};
use tracing::debug;

use crate::session::CaptureSession;

pub const CSPGRAB_OK: i32 = 0;

/// A frame owned by the caller until passed to [`cspgrab_frame_free`].
#[repr(C)]
#[derive(Debug)]
pub struct CspFrame {
    pub data: *mut u8,
    /// `width * height * 4`.
    pub len: usize,
    pub width: u32,
    pub height: u32,
    /// Row pitch of the GPU mapping the frame was read from.
    pub row_pitch: u32,
    /// DXGI format value.
    pub format: u32,
    pub flags: u16,
}

impl CspFrame {
    const EMPTY: Self = Self {
        data: ptr::null_mut(),
        len: 0,
        width: 0,
        height: 0,
        row_pitch: 0,
        format: 0,
        flags: 0,
    };

    fn export(frame: Frame) -> Self {
        let len = frame.data.len();
        let data = Box::into_raw(frame.data.into_boxed_slice());
        Self {
            data: data.cast::<u8>(),
            len,
            width: frame.width,
            height: frame.height,
            row_pitch: frame.row_pitch,
            format: frame.format.to_dxgi(),
            flags: frame.flags.bits(),
        }
    }
}

fn status(result: Result<(), CaptureError>) -> i32 {
    match result {
        Ok(()) => CSPGRAB_OK,
        Err(err) => {
            debug!("cspgrab call failed: {}", err);
            err.status_code()
        }
    }
}

fn create(config: CaptureConfig, out: &mut *mut CaptureSession) -> Result<(), CaptureError> {
    let mut session = Box::new(CaptureSession::new(config));
    session.initialize()?;
    *out = Box::into_raw(session);
    Ok(())
}

/// Create and initialize a session with the default configuration.
///
/// # Safety
///
/// `out` must be null or valid for a pointer write.
#[no_mangle]
pub unsafe extern "C" fn cspgrab_session_create(out: *mut *mut CaptureSession) -> i32 {
    let Some(out) = out.as_mut() else {
        return CaptureError::InvalidArgument("null session out-pointer").status_code();
    };
    *out = ptr::null_mut();
    status(create(CaptureConfig::default(), out))
}

/// Create and initialize a session from a JSON configuration document.
///
/// # Safety
///
/// `json` must be null or a NUL-terminated string; `out` must be null or
/// valid for a pointer write.
#[no_mangle]
pub unsafe extern "C" fn cspgrab_session_create_with_config(
    json: *const c_char,
    out: *mut *mut CaptureSession,
) -> i32 {
    let Some(out) = out.as_mut() else {
        return CaptureError::InvalidArgument("null session out-pointer").status_code();
    };
    *out = ptr::null_mut();
    if json.is_null() {
        return CaptureError::InvalidArgument("null configuration").status_code();
    }
    let result = CStr::from_ptr(json)
        .to_str()
        .map_err(|_| CaptureError::ConfigurationInvalid { reason: "configuration is not UTF-8".into() })
        .and_then(CaptureConfig::from_json)
        .and_then(|config| create(config, out));
    status(result)
}

unsafe fn grab_with(
    session: *mut CaptureSession,
    out: *mut CspFrame,
    grab: fn(&mut CaptureSession) -> Result<Frame, CaptureError>,
) -> i32 {
    let (Some(session), Some(out)) = (session.as_mut(), out.as_mut()) else {
        return CaptureError::InvalidArgument("null session or frame pointer").status_code();
    };
    *out = CspFrame::EMPTY;
    status(grab(session).map(|frame| *out = CspFrame::export(frame)))
}

/// Read the current image of the selected source into `out`.
///
/// # Safety
///
/// `session` must come from a `cspgrab_session_create*` call and not be
/// destroyed; `out` must be null or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn cspgrab_grab_frame(session: *mut CaptureSession, out: *mut CspFrame) -> i32 {
    grab_with(session, out, CaptureSession::capture_frame)
}

/// Request a fresh image, wait for the producer, and read it into `out`.
///
/// # Safety
///
/// As for [`cspgrab_grab_frame`].
#[no_mangle]
pub unsafe extern "C" fn cspgrab_wait_frame(session: *mut CaptureSession, out: *mut CspFrame) -> i32 {
    grab_with(session, out, CaptureSession::wait_frame)
}

/// Release a frame's pixel buffer and clear the struct. Null-safe.
///
/// # Safety
///
/// `frame` must be null or a frame filled by this library, not yet freed.
#[no_mangle]
pub unsafe extern "C" fn cspgrab_frame_free(frame: *mut CspFrame) {
    let Some(frame) = frame.as_mut() else { return };
    if !frame.data.is_null() {
        drop(Box::from_raw(ptr::slice_from_raw_parts_mut(frame.data, frame.len)));
    }
    *frame = CspFrame::EMPTY;
}

/// Shut down and free a session. Null-safe.
///
/// # Safety
///
/// `session` must be null or come from a `cspgrab_session_create*` call,
/// destroyed at most once.
#[no_mangle]
pub unsafe extern "C" fn cspgrab_session_destroy(session: *mut CaptureSession) {
    if !session.is_null() {
        drop(Box::from_raw(session));
    }
}

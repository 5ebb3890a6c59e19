//! cspgrab-core — wire layout, core types, errors, and configuration shared by
//! the capture engine and its front-ends.

pub mod config;
pub mod errors;
pub mod layout;
pub mod types;

pub use config::CaptureConfig;
pub use errors::CaptureError;
pub use types::*;

use thiserror::Error;

/// Every failure the capture engine can report.
///
/// Variants map one-to-one onto the status codes of the C boundary
/// ([`CaptureError::status_code`]); callers should match on the variant, not
/// on the number.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("D3D11 device creation failed (hr=0x{code:08X})")]
    DeviceCreationFailed { code: u32 },

    #[error("Shared memory mapping {name:?} unavailable (hr=0x{code:08X})")]
    MappingUnavailable { name: String, code: u32 },

    #[error("Failed to map a view of the shared memory (hr=0x{code:08X})")]
    MappingViewFailed { code: u32 },

    #[error("No valid texture source among {count} published entries")]
    NoValidSource { count: usize },

    #[error("Failed to open shared texture 0x{handle:08X} (hr=0x{code:08X})")]
    OpenSharedResourceFailed { handle: u32, code: u32 },

    #[error("Failed to create staging texture (hr=0x{code:08X})")]
    StagingCreateFailed { code: u32 },

    #[error("Failed to copy shared texture into staging (hr=0x{code:08X})")]
    CopyFailed { code: u32 },

    #[error("Failed to map staging texture (hr=0x{code:08X})")]
    MapFailed { code: u32 },

    #[error("Failed to allocate {bytes} bytes for frame")]
    AllocationFailed { bytes: usize },

    #[error(
        "Declared size {declared_width}×{declared_height} does not fit texture \
         {texture_width}×{texture_height} (row pitch {row_pitch})"
    )]
    DimensionMismatch {
        declared_width: u32,
        declared_height: u32,
        texture_width: u32,
        texture_height: u32,
        row_pitch: u32,
    },

    #[error("Unsupported texture format 0x{format:02X}")]
    UnsupportedFormat { format: u32 },

    #[error("Timeout after {ms}ms waiting for {waiting_for}")]
    Timeout { waiting_for: &'static str, ms: u64 },

    #[error("Cancelled while waiting for {waiting_for}")]
    Cancelled { waiting_for: &'static str },

    #[error("Capture session not initialized")]
    NotInitialized,

    #[error("Capture session already initialized")]
    AlreadyInitialized,

    #[error("Configuration invalid: {reason}")]
    ConfigurationInvalid { reason: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),
}

impl CaptureError {
    /// Status code returned by the C boundary for this failure. Success is 0.
    pub fn status_code(&self) -> i32 {
        match self {
            Self::DeviceCreationFailed { .. } => -1,
            Self::MappingUnavailable { .. } => -2,
            Self::MappingViewFailed { .. } => -3,
            Self::NoValidSource { .. } => -4,
            Self::OpenSharedResourceFailed { .. } => -5,
            Self::StagingCreateFailed { .. } => -6,
            Self::MapFailed { .. } => -7,
            Self::AllocationFailed { .. } => -8,
            Self::CopyFailed { .. } => -9,
            Self::DimensionMismatch { .. } => -10,
            Self::UnsupportedFormat { .. } => -11,
            Self::Timeout { .. } => -12,
            Self::Cancelled { .. } => -13,
            Self::NotInitialized => -14,
            Self::AlreadyInitialized => -15,
            Self::ConfigurationInvalid { .. } => -16,
            Self::InvalidArgument(_) => -17,
        }
    }

    /// Fatal errors invalidate the session; it must be initialized again.
    /// Everything else is scoped to a single frame and may be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DeviceCreationFailed { .. }
                | Self::MappingUnavailable { .. }
                | Self::MappingViewFailed { .. }
                | Self::NoValidSource { .. }
                | Self::OpenSharedResourceFailed { .. }
                | Self::StagingCreateFailed { .. }
        )
    }
}

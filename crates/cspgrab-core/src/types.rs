use std::fmt;

use serde::{Deserialize, Serialize};

// MARK: - SourceFlags

/// Declared properties of a published source (`flags` field of a descriptor).
///
/// Unknown bits are kept as-is so a newer producer never loses information
/// when a descriptor is snapshotted and logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceFlags(u16);

impl SourceFlags {
    pub const UNAVAILABLE: Self = Self(1 << 0);
    pub const TRANSPARENT: Self = Self(1 << 1);
    pub const SRGB: Self = Self(1 << 2);
    pub const MONOCHROME: Self = Self(1 << 3);
    pub const HDR: Self = Self(1 << 4);
    pub const USER_SIZE: Self = Self(1 << 7);
    pub const OVERRIDE_SIZE: Self = Self(1 << 8);

    const NAMED: [(Self, &'static str); 7] = [
        (Self::UNAVAILABLE, "unavailable"),
        (Self::TRANSPARENT, "transparent"),
        (Self::SRGB, "srgb"),
        (Self::MONOCHROME, "monochrome"),
        (Self::HDR, "hdr"),
        (Self::USER_SIZE, "user-size"),
        (Self::OVERRIDE_SIZE, "override-size"),
    ];

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl std::ops::BitOr for SourceFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl fmt::Display for SourceFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let mut known = 0u16;
        for (flag, name) in Self::NAMED {
            known |= flag.0;
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        let unknown = self.0 & !known;
        if unknown != 0 {
            if !first {
                f.write_str("|")?;
            }
            write!(f, "0x{:04X}", unknown)?;
            first = false;
        }
        if first {
            f.write_str("none")?;
        }
        Ok(())
    }
}

// MARK: - SourceDescriptor

/// Owned snapshot of one entry of the shared descriptor table.
///
/// The live entry keeps changing under the producer; this copy is what gets
/// logged, compared, and handed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Position in the table (producer insertion order).
    pub index: usize,
    pub handle: u32,
    pub name_key: u32,
    pub width: u16,
    pub height: u16,
    pub needs_data: u16,
    pub flags: SourceFlags,
    pub name: String,
    pub description: String,
}

impl SourceDescriptor {
    /// A descriptor can be captured when it carries a texture handle and the
    /// producer has not flagged it unavailable.
    pub fn is_selectable(&self) -> bool {
        is_selectable(self.handle, self.flags)
    }

    /// Size in bytes of a tightly packed frame at the declared dimensions.
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} '{}' handle=0x{:08X} {}×{} flags={}",
            self.index, self.name, self.handle, self.width, self.height, self.flags
        )
    }
}

/// Selectability rule shared by the live table accessor and snapshots.
pub fn is_selectable(handle: u32, flags: SourceFlags) -> bool {
    handle != 0 && !flags.contains(SourceFlags::UNAVAILABLE)
}

// MARK: - PixelFormat

/// Bytes per pixel of every format the readback path accepts.
pub const BYTES_PER_PIXEL: usize = 4;

/// GPU texture format, decoded from its raw DXGI value.
///
/// Only the families a CSP source is known to publish are named; anything
/// else is carried as [`PixelFormat::Other`] and rejected by the readback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Bgra8,
    Bgra8Srgb,
    Bgrx8,
    Rgba8,
    Rgba8Srgb,
    Rgb10A2,
    Rgba16Float,
    Other(u32),
}

impl PixelFormat {
    pub fn from_dxgi(format: u32) -> Self {
        match format {
            87 | 90 => Self::Bgra8,
            91 => Self::Bgra8Srgb,
            88 | 92 | 93 => Self::Bgrx8,
            27 | 28 | 30 => Self::Rgba8,
            29 => Self::Rgba8Srgb,
            23 | 24 => Self::Rgb10A2,
            10 => Self::Rgba16Float,
            other => Self::Other(other),
        }
    }

    /// Canonical DXGI value (the UNORM member for typeless families).
    pub fn to_dxgi(self) -> u32 {
        match self {
            Self::Bgra8 => 87,
            Self::Bgra8Srgb => 91,
            Self::Bgrx8 => 88,
            Self::Rgba8 => 28,
            Self::Rgba8Srgb => 29,
            Self::Rgb10A2 => 24,
            Self::Rgba16Float => 10,
            Self::Other(raw) => raw,
        }
    }

    /// Storage size of one pixel, `None` when unknown.
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            Self::Bgra8 | Self::Bgra8Srgb | Self::Bgrx8 | Self::Rgba8 | Self::Rgba8Srgb
            | Self::Rgb10A2 => Some(4),
            Self::Rgba16Float => Some(8),
            Self::Other(_) => None,
        }
    }

    pub fn is_srgb(self) -> bool {
        matches!(self, Self::Bgra8Srgb | Self::Rgba8Srgb)
    }
}

// MARK: - TextureDesc

/// The subset of a GPU texture description the capture path cares about.
///
/// Two descriptions comparing equal means a staging texture created for one
/// can receive a full-resource copy of the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    /// Raw DXGI format value.
    pub format: u32,
    pub mip_levels: u32,
    pub array_size: u32,
    pub sample_count: u32,
}

impl TextureDesc {
    pub fn new(width: u32, height: u32, format: u32) -> Self {
        Self { width, height, format, mip_levels: 1, array_size: 1, sample_count: 1 }
    }

    pub fn pixel_format(&self) -> PixelFormat {
        PixelFormat::from_dxgi(self.format)
    }
}

impl fmt::Display for TextureDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{} format={:?} (0x{:02X})", self.width, self.height, self.pixel_format(), self.format)
    }
}

// MARK: - Frame

/// A captured frame, tightly packed, owned by the caller.
///
/// Byte order is whatever the GPU delivered (BGRA for the common source
/// format); `format` and `flags` describe it, nothing is converted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// `width * height * 4` bytes, no row padding.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Row pitch of the mapped GPU memory before compaction.
    pub row_pitch: u32,
    pub format: PixelFormat,
    pub flags: SourceFlags,
}

impl Frame {
    /// Bytes per row of `data`.
    pub fn stride(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }

    /// Borrow row `y` of the packed buffer.
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        let start = y as usize * self.stride();
        self.data.get(start..start + self.stride())
    }

    /// sRGB-encoded content, either by texture format or by source flag.
    pub fn is_srgb(&self) -> bool {
        self.format.is_srgb() || self.flags.contains(SourceFlags::SRGB)
    }

    pub fn is_hdr(&self) -> bool {
        self.flags.contains(SourceFlags::HDR)
    }
}

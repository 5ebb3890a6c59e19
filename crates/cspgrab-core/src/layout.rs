//! Binary schema of the `AcTools.CSP.OBSTextures.v0` shared-memory table.
//!
//! The producer (the shader pack running inside the simulator) owns this
//! memory; the layout below must match it byte for byte. All integers are
//! little-endian and naturally aligned, there is no padding and no version
//! field beyond the mapping name itself.
//!
//! # Table layout (20 168 bytes)
//!
//! ```text
//! [0..4]     alive_counter  u32   consumer heartbeat
//! [4..8]     items_count    i32   number of populated descriptors
//! [8..]      items[63]      SourceDescriptor, 320 bytes each
//! ```
//!
//! # SourceDescriptor layout (320 bytes)
//!
//! ```text
//! [0..4]     handle         u32   shared texture handle, 0 = none
//! [4..8]     name_key       u32   stable identity hash
//! [8..10]    width          u16
//! [10..12]   height         u16
//! [12..14]   needs_data     u16   handshake code
//! [14..16]   flags          u16   see SourceFlags
//! [16..64]   name           [u8; 48]   not NUL-terminated when full
//! [64..320]  description    [u8; 256]  not NUL-terminated when full
//! ```

// ── Constants ─────────────────────────────────────────────────────────────────

/// Name of the file mapping published by the shader pack.
pub const DEFAULT_MAPPING_NAME: &str = r"Local\AcTools.CSP.OBSTextures.v0";

/// Capacity of the descriptor table.
pub const MAX_SOURCES: usize = 63;
pub const NAME_LENGTH: usize = 48;
pub const DESCRIPTION_LENGTH: usize = 256;

/// Value written into `alive_counter` on every heartbeat.
pub const ALIVE_VALUE: u32 = 60;
/// `needs_data` code asking the producer to render into the source.
pub const NEEDS_DATA_REQUEST: u16 = 3;
/// `needs_data` code written on shutdown.
pub const NEEDS_DATA_IDLE: u16 = 0;

// ── Table offsets ─────────────────────────────────────────────────────────────

pub const ALIVE_COUNTER_OFFSET: usize = 0;
pub const ITEMS_COUNT_OFFSET: usize = 4;
pub const ITEMS_OFFSET: usize = 8;

// ── Descriptor offsets (relative to the descriptor start) ────────────────────

pub const HANDLE_OFFSET: usize = 0;
pub const NAME_KEY_OFFSET: usize = 4;
pub const WIDTH_OFFSET: usize = 8;
pub const HEIGHT_OFFSET: usize = 10;
pub const NEEDS_DATA_OFFSET: usize = 12;
pub const FLAGS_OFFSET: usize = 14;
pub const NAME_OFFSET: usize = 16;
pub const DESCRIPTION_OFFSET: usize = NAME_OFFSET + NAME_LENGTH;

pub const DESCRIPTOR_SIZE: usize = DESCRIPTION_OFFSET + DESCRIPTION_LENGTH;
pub const TABLE_SIZE: usize = ITEMS_OFFSET + MAX_SOURCES * DESCRIPTOR_SIZE;

/// Byte offset of descriptor `index` from the start of the table.
pub const fn descriptor_offset(index: usize) -> usize {
    ITEMS_OFFSET + index * DESCRIPTOR_SIZE
}

/// Clamp the producer-written `items_count` to the table capacity.
pub fn clamp_items_count(raw: i32) -> usize {
    raw.clamp(0, MAX_SOURCES as i32) as usize
}

/// Decode a fixed-width text field: bytes up to the first NUL, or the whole
/// field when no NUL is present. Invalid UTF-8 is replaced, never rejected.
pub fn decode_fixed_text(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Encode `text` into a fixed-width field, truncating to capacity and
/// zero-filling the remainder. Used by producers and test fixtures.
pub fn encode_fixed_text(text: &str, field: &mut [u8]) {
    field.fill(0);
    let bytes = text.as_bytes();
    let n = bytes.len().min(field.len());
    field[..n].copy_from_slice(&bytes[..n]);
}

//! Typed accessors over the mapped descriptor table.
//!
//! Every integer field is read and written as an atomic at its documented
//! offset (see [`cspgrab_core::layout`]); the producer writes the same memory
//! from another process at any time. Text fields are copied out bytewise and
//! decoded without assuming a NUL terminator.

use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI32, AtomicU16, AtomicU32, Ordering};

use cspgrab_core::layout::{self, DESCRIPTION_LENGTH, MAX_SOURCES, NAME_LENGTH};
use cspgrab_core::{SourceDescriptor, SourceFlags};

// ── SharedTable ───────────────────────────────────────────────────────────────

/// View of the whole table. Borrowed from the mapping that keeps it alive.
#[derive(Clone, Copy)]
pub struct SharedTable<'a> {
    base: NonNull<u8>,
    _mapping: PhantomData<&'a ()>,
}

impl<'a> SharedTable<'a> {
    /// # Safety
    ///
    /// `base` must point to at least [`layout::TABLE_SIZE`] bytes, 4-byte
    /// aligned, that stay mapped for `'a`.
    pub(crate) unsafe fn from_raw(base: NonNull<u8>) -> Self {
        Self { base, _mapping: PhantomData }
    }

    pub fn alive_counter(&self) -> u32 {
        self.u32_at(layout::ALIVE_COUNTER_OFFSET).load(Ordering::Acquire)
    }

    pub fn set_alive_counter(&self, value: u32) {
        self.u32_at(layout::ALIVE_COUNTER_OFFSET).store(value, Ordering::Release);
    }

    /// Producer-written count as stored, possibly negative or oversized.
    pub fn raw_items_count(&self) -> i32 {
        self.i32_at(layout::ITEMS_COUNT_OFFSET).load(Ordering::Acquire)
    }

    /// Number of populated descriptors, clamped to the table capacity.
    pub fn items_count(&self) -> usize {
        layout::clamp_items_count(self.raw_items_count())
    }

    /// Producer side: publish `count` descriptors.
    pub fn set_items_count(&self, count: i32) {
        self.i32_at(layout::ITEMS_COUNT_OFFSET).store(count, Ordering::Release);
    }

    /// Descriptor slot `index`, whether or not it is populated.
    pub fn slot(&self, index: usize) -> Option<SourceSlot<'a>> {
        if index >= MAX_SOURCES {
            return None;
        }
        // SAFETY: index < MAX_SOURCES keeps the offset inside TABLE_SIZE.
        let base = unsafe {
            NonNull::new_unchecked(self.base.as_ptr().add(layout::descriptor_offset(index)))
        };
        Some(SourceSlot { base, index, _mapping: PhantomData })
    }

    /// Populated slots in producer insertion order.
    pub fn slots(&self) -> impl Iterator<Item = SourceSlot<'a>> + 'a {
        let table = *self;
        (0..self.items_count()).filter_map(move |i| table.slot(i))
    }

    fn u32_at(&self, offset: usize) -> &'a AtomicU32 {
        // SAFETY: offsets come from `layout`, are 4-aligned and in bounds.
        unsafe { &*self.base.as_ptr().add(offset).cast::<AtomicU32>() }
    }

    fn i32_at(&self, offset: usize) -> &'a AtomicI32 {
        // SAFETY: as above.
        unsafe { &*self.base.as_ptr().add(offset).cast::<AtomicI32>() }
    }
}

// ── SourceSlot ────────────────────────────────────────────────────────────────

/// Live view of one descriptor. Reads observe the producer's latest writes.
#[derive(Clone, Copy)]
pub struct SourceSlot<'a> {
    base: NonNull<u8>,
    index: usize,
    _mapping: PhantomData<&'a ()>,
}

impl<'a> SourceSlot<'a> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn handle(&self) -> u32 {
        self.u32_at(layout::HANDLE_OFFSET).load(Ordering::Acquire)
    }

    pub fn name_key(&self) -> u32 {
        self.u32_at(layout::NAME_KEY_OFFSET).load(Ordering::Relaxed)
    }

    pub fn width(&self) -> u16 {
        self.u16_at(layout::WIDTH_OFFSET).load(Ordering::Relaxed)
    }

    pub fn height(&self) -> u16 {
        self.u16_at(layout::HEIGHT_OFFSET).load(Ordering::Relaxed)
    }

    pub fn needs_data(&self) -> u16 {
        self.u16_at(layout::NEEDS_DATA_OFFSET).load(Ordering::Acquire)
    }

    pub fn set_needs_data(&self, code: u16) {
        self.u16_at(layout::NEEDS_DATA_OFFSET).store(code, Ordering::Release);
    }

    pub fn flags(&self) -> SourceFlags {
        SourceFlags::from_bits(self.u16_at(layout::FLAGS_OFFSET).load(Ordering::Acquire))
    }

    pub fn is_selectable(&self) -> bool {
        cspgrab_core::is_selectable(self.handle(), self.flags())
    }

    pub fn name(&self) -> String {
        layout::decode_fixed_text(&self.read_bytes::<NAME_LENGTH>(layout::NAME_OFFSET))
    }

    pub fn description(&self) -> String {
        layout::decode_fixed_text(&self.read_bytes::<DESCRIPTION_LENGTH>(layout::DESCRIPTION_OFFSET))
    }

    /// Copy the descriptor out of shared memory.
    pub fn snapshot(&self) -> SourceDescriptor {
        SourceDescriptor {
            index: self.index,
            handle: self.handle(),
            name_key: self.name_key(),
            width: self.width(),
            height: self.height(),
            needs_data: self.needs_data(),
            flags: self.flags(),
            name: self.name(),
            description: self.description(),
        }
    }

    // ── Producer side ─────────────────────────────────────────────────────────

    pub fn set_handle(&self, handle: u32) {
        self.u32_at(layout::HANDLE_OFFSET).store(handle, Ordering::Release);
    }

    pub fn set_name_key(&self, key: u32) {
        self.u32_at(layout::NAME_KEY_OFFSET).store(key, Ordering::Relaxed);
    }

    pub fn set_size(&self, width: u16, height: u16) {
        self.u16_at(layout::WIDTH_OFFSET).store(width, Ordering::Relaxed);
        self.u16_at(layout::HEIGHT_OFFSET).store(height, Ordering::Relaxed);
    }

    pub fn set_flags(&self, flags: SourceFlags) {
        self.u16_at(layout::FLAGS_OFFSET).store(flags.bits(), Ordering::Release);
    }

    pub fn set_name(&self, name: &str) {
        let mut field = [0u8; NAME_LENGTH];
        layout::encode_fixed_text(name, &mut field);
        self.write_bytes(layout::NAME_OFFSET, &field);
    }

    pub fn set_description(&self, description: &str) {
        let mut field = [0u8; DESCRIPTION_LENGTH];
        layout::encode_fixed_text(description, &mut field);
        self.write_bytes(layout::DESCRIPTION_OFFSET, &field);
    }

    // ── Raw access ────────────────────────────────────────────────────────────

    fn u32_at(&self, offset: usize) -> &'a AtomicU32 {
        // SAFETY: descriptor offsets are aligned and inside DESCRIPTOR_SIZE.
        unsafe { &*self.base.as_ptr().add(offset).cast::<AtomicU32>() }
    }

    fn u16_at(&self, offset: usize) -> &'a AtomicU16 {
        // SAFETY: as above.
        unsafe { &*self.base.as_ptr().add(offset).cast::<AtomicU16>() }
    }

    fn read_bytes<const N: usize>(&self, offset: usize) -> [u8; N] {
        let mut out = [0u8; N];
        // SAFETY: offset + N stays inside the descriptor; `out` is local.
        unsafe {
            std::ptr::copy_nonoverlapping(self.base.as_ptr().add(offset), out.as_mut_ptr(), N);
        }
        out
    }

    fn write_bytes(&self, offset: usize, bytes: &[u8]) {
        // SAFETY: callers pass a field-sized buffer at the field's offset.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.base.as_ptr().add(offset), bytes.len());
        }
    }
}

//! The named shared-memory channel to the producer.
//!
//! [`SharedChannel`] owns a mapping of the descriptor table and refreshes the
//! liveness counter the producer watches. The OS-specific part (opening a
//! named file mapping) sits behind [`MappingOpener`]; [`HeapMapping`] is an
//! in-process table for tests and producer simulations.

use std::cell::UnsafeCell;
use std::ptr::{self, NonNull};
use std::sync::Arc;

use cspgrab_core::layout::TABLE_SIZE;
use cspgrab_core::CaptureError;
use tracing::{debug, info};

use crate::table::SharedTable;

// ── Mapping seam ──────────────────────────────────────────────────────────────

/// A mapped view of the descriptor table.
///
/// # Safety
///
/// `base` must return the same pointer for the lifetime of the value, to at
/// least [`TABLE_SIZE`] bytes, 4-byte aligned, readable and writable. The
/// view is released when the value is dropped.
pub unsafe trait SharedMapping: Send {
    fn base(&self) -> NonNull<u8>;
}

/// Opens a named mapping. Implemented by the platform backend and by
/// [`HeapMapping`] for tests.
pub trait MappingOpener {
    fn open(&self, name: &str) -> Result<Box<dyn SharedMapping>, CaptureError>;
}

// ── HeapMapping ───────────────────────────────────────────────────────────────

/// Untyped, 4-byte aligned table memory. Each field is only ever accessed
/// at its own width (see [`SharedTable`]), as with a real file mapping.
struct HeapTable(Box<[UnsafeCell<u32>]>);

// SAFETY: integer fields are accessed through atomics of the field's size;
// text fields are copied bytewise like the producer does.
unsafe impl Sync for HeapTable {}

/// Heap-backed table. Clones share the same memory, so one clone can play
/// the producer while another is handed to a [`SharedChannel`].
#[derive(Clone)]
pub struct HeapMapping {
    memory: Arc<HeapTable>,
}

impl HeapMapping {
    /// A zeroed table: no sources published, counter at 0.
    pub fn new() -> Self {
        let cells: Vec<UnsafeCell<u32>> = (0..TABLE_SIZE / 4).map(|_| UnsafeCell::new(0)).collect();
        Self { memory: Arc::new(HeapTable(cells.into_boxed_slice())) }
    }

    pub fn table(&self) -> SharedTable<'_> {
        // SAFETY: the buffer spans TABLE_SIZE bytes, is u32-aligned, and lives
        // as long as the borrow of `self`.
        unsafe { SharedTable::from_raw(self.base()) }
    }

    /// Copy of the raw table bytes. Must not race a writer on another thread.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; TABLE_SIZE];
        // SAFETY: the buffer holds TABLE_SIZE bytes; `out` is freshly allocated.
        unsafe { ptr::copy_nonoverlapping(self.base().as_ptr(), out.as_mut_ptr(), TABLE_SIZE) };
        out
    }
}

impl Default for HeapMapping {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: the buffer is never reallocated and is shared through `Arc`, which
// keeps it alive while any clone exists. `UnsafeCell` makes it writable
// through shared references.
unsafe impl SharedMapping for HeapMapping {
    fn base(&self) -> NonNull<u8> {
        NonNull::from(&*self.memory.0).cast::<u8>()
    }
}

impl MappingOpener for HeapMapping {
    fn open(&self, _name: &str) -> Result<Box<dyn SharedMapping>, CaptureError> {
        Ok(Box::new(self.clone()))
    }
}

// ── SharedChannel ─────────────────────────────────────────────────────────────

pub struct SharedChannel {
    name: String,
    alive_value: u32,
    mapping: Option<Box<dyn SharedMapping>>,
}

impl SharedChannel {
    /// Open the named mapping. There is no retry: the producer must already
    /// be running.
    pub fn open<O>(opener: &O, name: &str, alive_value: u32) -> Result<Self, CaptureError>
    where
        O: MappingOpener + ?Sized,
    {
        let mapping = opener.open(name)?;
        info!("Opened shared texture table {:?}", name);
        Ok(Self::from_mapping(mapping, name, alive_value))
    }

    pub fn from_mapping(mapping: Box<dyn SharedMapping>, name: &str, alive_value: u32) -> Self {
        Self { name: name.to_owned(), alive_value, mapping: Some(mapping) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        self.mapping.is_some()
    }

    /// View of the table, or `NotInitialized` once closed.
    pub fn table(&self) -> Result<SharedTable<'_>, CaptureError> {
        let mapping = self.mapping.as_ref().ok_or(CaptureError::NotInitialized)?;
        // SAFETY: guaranteed by the `SharedMapping` contract; the borrow of
        // `self` keeps the mapping from being closed meanwhile.
        Ok(unsafe { SharedTable::from_raw(mapping.base()) })
    }

    /// Tell the producer a consumer is still attached. No-op when closed.
    pub fn heartbeat(&self) {
        if let Ok(table) = self.table() {
            table.set_alive_counter(self.alive_value);
        }
    }

    /// Unmap and release the OS handle. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.mapping.take().is_some() {
            debug!("Closed shared texture table {:?}", self.name);
        }
    }
}

impl Drop for SharedChannel {
    fn drop(&mut self) {
        self.close();
    }
}

//! In-memory GPU backend for unit tests.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use cspgrab_core::{CaptureError, TextureDesc};

use crate::gpu::{DeviceFactory, GpuDevice, MappedTexture};

pub const BGRA8: u32 = 87;
const PADDING: u8 = 0xEE;

/// Byte `c` of pixel `(x, y)` in the texture published under `handle`.
pub fn pattern(handle: u32, x: u32, y: u32, c: u32) -> u8 {
    (handle as u8).wrapping_mul(31) ^ (x as u8).wrapping_mul(4).wrapping_add(c as u8) ^ (y as u8).wrapping_mul(7)
}

#[derive(Debug, Default)]
pub struct MockState {
    /// Textures the "producer" has shared, by handle.
    pub published: HashMap<u32, TextureDesc>,
    /// Row pitch alignment in bytes; 0 means tightly packed.
    pub row_align: u32,
    pub fail_device: bool,
    pub fail_open: bool,
    pub fail_staging: bool,
    pub fail_copy: bool,
    pub fail_map: bool,

    pub devices_created: usize,
    pub devices_dropped: usize,
    pub opened: Vec<u32>,
    pub released_shared: Vec<u32>,
    pub staging_created: Vec<TextureDesc>,
    pub staging_released: usize,
    pub copies: usize,
    pub maps: usize,
    pub unmaps: usize,
}

impl MockState {
    pub fn publish(&mut self, handle: u32, width: u32, height: u32) {
        self.published.insert(handle, TextureDesc::new(width, height, BGRA8));
    }
}

#[derive(Debug)]
enum Kind {
    Shared(u32),
    Staging,
}

#[derive(Debug)]
pub struct MockTexture {
    id: u64,
    kind: Kind,
    desc: TextureDesc,
}

pub struct MockDevice {
    state: Rc<RefCell<MockState>>,
    buffers: HashMap<u64, (u32, Vec<u8>)>,
    next_id: u64,
}

impl MockDevice {
    fn row_pitch(&self, desc: &TextureDesc) -> u32 {
        let tight = desc.width * 4;
        match self.state.borrow().row_align {
            0 => tight,
            align => tight.div_ceil(align) * align,
        }
    }

    fn alloc(&mut self, kind: Kind, desc: TextureDesc) -> MockTexture {
        self.next_id += 1;
        MockTexture { id: self.next_id, kind, desc }
    }
}

impl GpuDevice for MockDevice {
    type Texture = MockTexture;

    fn open_shared(&mut self, handle: u32) -> Result<MockTexture, CaptureError> {
        let desc = {
            let mut state = self.state.borrow_mut();
            match state.published.get(&handle).copied() {
                Some(desc) if !state.fail_open => {
                    state.opened.push(handle);
                    desc
                }
                _ => return Err(CaptureError::OpenSharedResourceFailed { handle, code: 0x8007_0057 }),
            }
        };
        Ok(self.alloc(Kind::Shared(handle), desc))
    }

    fn describe(&self, texture: &MockTexture) -> TextureDesc {
        texture.desc
    }

    fn create_staging(&mut self, desc: &TextureDesc) -> Result<MockTexture, CaptureError> {
        {
            let mut state = self.state.borrow_mut();
            if state.fail_staging {
                return Err(CaptureError::StagingCreateFailed { code: 0x8007_000E });
            }
            state.staging_created.push(*desc);
        }
        let pitch = self.row_pitch(desc);
        let texture = self.alloc(Kind::Staging, *desc);
        self.buffers.insert(texture.id, (pitch, vec![PADDING; (pitch * desc.height) as usize]));
        Ok(texture)
    }

    fn copy(&mut self, dst: &MockTexture, src: &MockTexture) -> Result<(), CaptureError> {
        let Kind::Shared(handle) = src.kind else {
            return Err(CaptureError::CopyFailed { code: 0x8007_0057 });
        };
        if self.state.borrow().fail_copy || dst.desc != src.desc {
            return Err(CaptureError::CopyFailed { code: 0x8007_0057 });
        }
        let (pitch, buf) = self
            .buffers
            .get_mut(&dst.id)
            .ok_or(CaptureError::CopyFailed { code: 0x8000_4003 })?;
        buf.fill(PADDING);
        for y in 0..src.desc.height {
            for x in 0..src.desc.width {
                for c in 0..4 {
                    buf[(y * *pitch + x * 4 + c) as usize] = pattern(handle, x, y, c);
                }
            }
        }
        self.state.borrow_mut().copies += 1;
        Ok(())
    }

    fn map<'a>(&'a mut self, texture: &'a MockTexture) -> Result<MappedTexture<'a>, CaptureError> {
        {
            let mut state = self.state.borrow_mut();
            if state.fail_map {
                return Err(CaptureError::MapFailed { code: 0x887A_0005 });
            }
            state.maps += 1;
        }
        let (pitch, buf) = self
            .buffers
            .get(&texture.id)
            .ok_or(CaptureError::MapFailed { code: 0x8007_0057 })?;
        Ok(MappedTexture { data: buf, row_pitch: *pitch })
    }

    fn unmap(&mut self, _texture: &MockTexture) {
        self.state.borrow_mut().unmaps += 1;
    }

    fn release(&mut self, texture: MockTexture) {
        let mut state = self.state.borrow_mut();
        match texture.kind {
            Kind::Shared(handle) => state.released_shared.push(handle),
            Kind::Staging => {
                state.staging_released += 1;
                self.buffers.remove(&texture.id);
            }
        }
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        self.state.borrow_mut().devices_dropped += 1;
    }
}

#[derive(Clone, Default)]
pub struct MockFactory {
    pub state: Rc<RefCell<MockState>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device(&self) -> MockDevice {
        self.state.borrow_mut().devices_created += 1;
        MockDevice { state: Rc::clone(&self.state), buffers: HashMap::new(), next_id: 0 }
    }
}

impl DeviceFactory for MockFactory {
    type Device = MockDevice;

    fn create(&self) -> Result<MockDevice, CaptureError> {
        if self.state.borrow().fail_device {
            return Err(CaptureError::DeviceCreationFailed { code: 0x887A_0004 });
        }
        Ok(self.device())
    }
}

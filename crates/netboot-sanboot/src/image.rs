//! Real-mode memory and the raw (PXE-style) image format.

use crate::BootError;

/// Physical load address of boot sectors and raw images (`0000:7C00`).
pub const RAW_IMAGE_LOAD_ADDR: u32 = 0x7C00;

/// Top of conventional memory.
pub const CONVENTIONAL_MEMORY_END: u32 = 0xA0000;

pub const fn real_to_linear(segment: u16, offset: u16) -> u32 {
    ((segment as u32) << 4) + offset as u32
}

/// The first 640 KiB of guest memory.
#[derive(Clone)]
pub struct RealModeMemory {
    bytes: Vec<u8>,
}

impl std::fmt::Debug for RealModeMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealModeMemory")
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl Default for RealModeMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl RealModeMemory {
    pub fn new() -> Self {
        Self {
            bytes: vec![0; CONVENTIONAL_MEMORY_END as usize],
        }
    }

    pub fn read(&self, addr: u32, len: usize) -> Option<&[u8]> {
        let start = addr as usize;
        self.bytes.get(start..start.checked_add(len)?)
    }

    /// Check that `[addr, addr + memsz)` lies inside conventional memory, then copy `data`
    /// (`filesz` bytes) to `addr` and zero the rest of the segment.
    pub fn prep_segment(&mut self, addr: u32, data: &[u8], memsz: usize) -> Result<(), BootError> {
        let too_large = || BootError::ImageTooLarge {
            len: memsz.max(data.len()),
            load_addr: addr,
            limit: CONVENTIONAL_MEMORY_END,
        };
        if data.len() > memsz {
            return Err(too_large());
        }
        let start = addr as usize;
        let end = start.checked_add(memsz).ok_or_else(too_large)?;
        let segment = self.bytes.get_mut(start..end).ok_or_else(too_large)?;
        let (file, zero) = segment.split_at_mut(data.len());
        file.copy_from_slice(data);
        zero.fill(0);
        Ok(())
    }
}

/// Load a raw image at `0000:7C00`. No signature check is made: any bytes are accepted as long
/// as they fit in conventional memory.
pub fn load_raw_image(memory: &mut RealModeMemory, image: &[u8]) -> Result<(), BootError> {
    memory
        .prep_segment(RAW_IMAGE_LOAD_ADDR, image, image.len())
        .inspect_err(|err| tracing::debug!(%err, "raw image could not be placed"))?;
    tracing::debug!(len = image.len(), "loaded raw image at {RAW_IMAGE_LOAD_ADDR:#x}");
    Ok(())
}

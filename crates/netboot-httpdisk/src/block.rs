use crate::{HttpDiskError, Result};

/// What a block device can do. Consumers check this instead of probing with a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub readable: bool,
    pub writable: bool,
}

impl Capabilities {
    pub const READ_ONLY: Self = Self {
        readable: true,
        writable: false,
    };
}

/// Synchronous block-addressed interface handed to boot-time consumers (e.g. a BIOS INT 13h
/// drive).
///
/// `read` fills `buf[..count * block_size]`; the caller guarantees the buffer is at least that
/// large.
pub trait BlockDevice {
    fn read(&mut self, start_block: u64, count: u64, buf: &mut [u8]) -> Result<()>;

    fn write(&mut self, _start_block: u64, _count: u64, _buf: &[u8]) -> Result<()> {
        Err(HttpDiskError::NotSupported)
    }

    fn block_size(&self) -> u32;

    /// Number of addressable blocks; 0 means the capacity is unknown.
    fn block_count(&self) -> u64;

    fn capabilities(&self) -> Capabilities {
        Capabilities::READ_ONLY
    }
}

impl<T: BlockDevice + ?Sized> BlockDevice for Box<T> {
    fn read(&mut self, start_block: u64, count: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read(start_block, count, buf)
    }

    fn write(&mut self, start_block: u64, count: u64, buf: &[u8]) -> Result<()> {
        (**self).write(start_block, count, buf)
    }

    fn block_size(&self) -> u32 {
        (**self).block_size()
    }

    fn block_count(&self) -> u64 {
        (**self).block_count()
    }

    fn capabilities(&self) -> Capabilities {
        (**self).capabilities()
    }
}

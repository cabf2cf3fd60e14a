use netboot_httpdisk::HttpDiskError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BootError {
    #[error(transparent)]
    Disk(#[from] HttpDiskError),

    #[error("no SAN boot protocol handles root path {root_path:?}")]
    NoProtocol { root_path: String },

    #[error("no free BIOS drive numbers")]
    NoDriveNumber,

    #[error("BIOS drive {drive:#04x} is not registered")]
    UnknownDrive { drive: u8 },

    #[error("INT 13h read from drive {drive:#04x} failed with status {status:#04x}")]
    DiskRead { drive: u8, status: u8 },

    #[error("block size {block_size} is smaller than a boot sector")]
    SectorTooSmall { block_size: u32 },

    #[error("invalid boot signature {found:02x?}")]
    BadBootSignature { found: [u8; 2] },

    #[error("image of {len} bytes does not fit below {limit:#x} when loaded at {load_addr:#x}")]
    ImageTooLarge {
        len: usize,
        load_addr: u32,
        limit: u32,
    },

    #[error("boot handoff returned control")]
    HandoffReturned,
}

//! BIOS INT 13h drive registry.

use std::collections::BTreeMap;
use std::fmt;

use netboot_httpdisk::{BlockDevice, HttpDiskError};

use crate::BootError;

/// First BIOS hard disk drive number.
pub const FIRST_HARD_DISK: u8 = 0x80;

/// INT 13h status codes returned in AH.
pub mod status {
    pub const INVALID_PARAMETER: u8 = 0x01;
    pub const WRITE_PROTECTED: u8 = 0x03;
    pub const SECTOR_NOT_FOUND: u8 = 0x04;
    pub const CONTROLLER_FAILURE: u8 = 0x20;
    pub const TIMEOUT: u8 = 0x80;
}

pub fn disk_err_to_int13_status(err: &HttpDiskError) -> u8 {
    match err {
        HttpDiskError::InvalidRange { .. }
        | HttpDiskError::HeaderTooLong { .. }
        | HttpDiskError::BufferTooSmall { .. } => status::INVALID_PARAMETER,
        HttpDiskError::NotSupported => status::WRITE_PROTECTED,
        HttpDiskError::TimedOut { .. } => status::TIMEOUT,
        _ => status::CONTROLLER_FAILURE,
    }
}

/// A block device registered under a BIOS drive number.
pub struct Int13Drive {
    drive: u8,
    disk: Box<dyn BlockDevice + Send>,
}

impl fmt::Debug for Int13Drive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Int13Drive")
            .field("drive", &format_args!("{:#04x}", self.drive))
            .field("block_size", &self.disk.block_size())
            .field("block_count", &self.disk.block_count())
            .finish()
    }
}

impl Int13Drive {
    pub fn drive(&self) -> u8 {
        self.drive
    }

    pub fn block_size(&self) -> u32 {
        self.disk.block_size()
    }

    pub fn block_count(&self) -> u64 {
        self.disk.block_count()
    }

    /// Extended read (AH=42h): `count` blocks from `lba` into `buf`.
    ///
    /// Errors are reported as INT 13h status codes.
    pub fn extended_read(&mut self, lba: u64, count: u64, buf: &mut [u8]) -> Result<(), u8> {
        let block_count = self.disk.block_count();
        // A block count of zero means the capacity is unknown; let the server decide.
        if block_count != 0 && lba.checked_add(count).map_or(true, |end| end > block_count) {
            return Err(status::SECTOR_NOT_FOUND);
        }
        self.disk.read(lba, count, buf).map_err(|err| {
            tracing::warn!(drive = self.drive, lba, count, %err, "INT 13h read failed");
            disk_err_to_int13_status(&err)
        })
    }

    pub fn extended_write(&mut self, lba: u64, count: u64, buf: &[u8]) -> Result<(), u8> {
        if !self.disk.capabilities().writable {
            return Err(status::WRITE_PROTECTED);
        }
        self.disk
            .write(lba, count, buf)
            .map_err(|err| disk_err_to_int13_status(&err))
    }
}

#[derive(Debug, Default)]
pub struct DriveTable {
    drives: BTreeMap<u8, Int13Drive>,
}

impl DriveTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `disk` under the lowest free hard disk number.
    pub fn register(&mut self, disk: Box<dyn BlockDevice + Send>) -> Result<u8, BootError> {
        let drive = (FIRST_HARD_DISK..=u8::MAX)
            .find(|n| !self.drives.contains_key(n))
            .ok_or(BootError::NoDriveNumber)?;
        tracing::debug!(
            drive,
            block_size = disk.block_size(),
            block_count = disk.block_count(),
            "registered INT 13h drive"
        );
        self.drives.insert(drive, Int13Drive { drive, disk });
        Ok(drive)
    }

    pub fn unregister(&mut self, drive: u8) -> Option<Int13Drive> {
        let removed = self.drives.remove(&drive);
        if removed.is_some() {
            tracing::debug!(drive, "unregistered INT 13h drive");
        }
        removed
    }

    pub fn get_mut(&mut self, drive: u8) -> Option<&mut Int13Drive> {
        self.drives.get_mut(&drive)
    }

    pub fn contains(&self, drive: u8) -> bool {
        self.drives.contains_key(&drive)
    }

    pub fn drives(&self) -> impl Iterator<Item = u8> + '_ {
        self.drives.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.drives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drives.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netboot_httpdisk::Result;

    struct FixedDisk {
        data: Vec<u8>,
    }

    impl BlockDevice for FixedDisk {
        fn read(&mut self, start_block: u64, block_count: u64, buf: &mut [u8]) -> Result<()> {
            let start = start_block as usize * 512;
            let len = block_count as usize * 512;
            buf[..len].copy_from_slice(&self.data[start..start + len]);
            Ok(())
        }

        fn block_size(&self) -> u32 {
            512
        }

        fn block_count(&self) -> u64 {
            (self.data.len() / 512) as u64
        }
    }

    fn disk(blocks: usize) -> Box<dyn BlockDevice + Send> {
        Box::new(FixedDisk {
            data: (0..blocks * 512).map(|i| (i % 256) as u8).collect(),
        })
    }

    #[test]
    fn numbers_start_at_first_hard_disk_and_reuse_gaps() {
        let mut table = DriveTable::new();
        assert_eq!(table.register(disk(1)).unwrap(), 0x80);
        assert_eq!(table.register(disk(1)).unwrap(), 0x81);
        assert_eq!(table.register(disk(1)).unwrap(), 0x82);

        let removed = table.unregister(0x81).unwrap();
        assert_eq!(removed.drive(), 0x81);
        assert!(table.unregister(0x81).is_none());
        assert_eq!(table.register(disk(1)).unwrap(), 0x81);
        assert_eq!(table.drives().collect::<Vec<_>>(), vec![0x80, 0x81, 0x82]);
    }

    #[test]
    fn table_fills_up() {
        let mut table = DriveTable::new();
        for _ in FIRST_HARD_DISK..=u8::MAX {
            table.register(disk(1)).unwrap();
        }
        assert_eq!(table.len(), 128);
        assert!(matches!(
            table.register(disk(1)).unwrap_err(),
            BootError::NoDriveNumber
        ));
    }

    #[test]
    fn extended_read_checks_capacity() {
        let mut table = DriveTable::new();
        let drive = table.register(disk(4)).unwrap();
        let drive = table.get_mut(drive).unwrap();

        let mut buf = vec![0u8; 1024];
        drive.extended_read(2, 2, &mut buf).unwrap();
        assert_eq!(buf[0], 0);
        assert_eq!(buf[1], 1);
        assert_eq!(drive.extended_read(3, 2, &mut buf), Err(status::SECTOR_NOT_FOUND));
        assert_eq!(
            drive.extended_read(u64::MAX, 1, &mut buf),
            Err(status::SECTOR_NOT_FOUND)
        );
    }

    #[test]
    fn writes_report_write_protected() {
        let mut table = DriveTable::new();
        let drive = table.register(disk(1)).unwrap();
        let drive = table.get_mut(drive).unwrap();
        assert_eq!(
            drive.extended_write(0, 1, &[0u8; 512]),
            Err(status::WRITE_PROTECTED)
        );
    }

    #[test]
    fn maps_disk_errors_to_status_codes() {
        assert_eq!(
            disk_err_to_int13_status(&HttpDiskError::ShortRead {
                expected: 512,
                actual: 0
            }),
            status::CONTROLLER_FAILURE
        );
        assert_eq!(
            disk_err_to_int13_status(&HttpDiskError::TimedOut { timeout_ms: 1 }),
            status::TIMEOUT
        );
        assert_eq!(
            disk_err_to_int13_status(&HttpDiskError::BufferTooSmall { needed: 1, len: 0 }),
            status::INVALID_PARAMETER
        );
    }
}

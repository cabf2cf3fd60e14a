//! Booting from an HTTP disk: attach, register as a BIOS drive, hand off to the boot sector,
//! and clean up when control comes back.

use std::sync::Arc;

use netboot_httpdisk::{HttpDisk, HttpDiskOptions, Locator, SharedHttpDisk, Transport};
use tokio::runtime::Runtime;

use crate::blocking::BlockingDisk;
use crate::drive::DriveTable;
use crate::image::{load_raw_image, RealModeMemory};
use crate::settings::{Settings, KEEP_SAN};
use crate::BootError;

/// Size of an MBR boot sector.
pub const BOOT_SECTOR_SIZE: usize = 512;

pub const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];

/// User-facing boot messages.
pub trait Console {
    fn println(&mut self, line: &str);
}

/// Emits every line as an `info` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingConsole;

impl Console for TracingConsole {
    fn println(&mut self, line: &str) {
        tracing::info!("{line}");
    }
}

impl Console for Vec<String> {
    fn println(&mut self, line: &str) {
        self.push(line.to_string());
    }
}

/// Transfers control to code placed in real-mode memory.
///
/// A successful handoff does not return. Whatever is returned explains why the loaded code gave
/// control back.
pub trait Handoff {
    fn handoff(&mut self, drive: u8, memory: &RealModeMemory) -> BootError;
}

/// Platform disk-boot entry point. Returns only if booting `drive` failed.
pub trait BootEntry {
    fn boot(&mut self, drives: &mut DriveTable, drive: u8) -> BootError;
}

/// Loads the MBR of a drive to `0000:7C00` and hands off to it, as a BIOS does.
#[derive(Debug)]
pub struct BootSectorEntry<H> {
    memory: RealModeMemory,
    handoff: H,
}

impl<H: Handoff> BootSectorEntry<H> {
    pub fn new(handoff: H) -> Self {
        Self {
            memory: RealModeMemory::new(),
            handoff,
        }
    }

    pub fn memory(&self) -> &RealModeMemory {
        &self.memory
    }

    pub fn handoff_mut(&mut self) -> &mut H {
        &mut self.handoff
    }

    fn load_boot_sector(&mut self, drives: &mut DriveTable, drive: u8) -> Result<(), BootError> {
        let disk = drives
            .get_mut(drive)
            .ok_or(BootError::UnknownDrive { drive })?;
        let block_size = disk.block_size();
        if (block_size as usize) < BOOT_SECTOR_SIZE {
            return Err(BootError::SectorTooSmall { block_size });
        }

        let mut block = vec![0u8; block_size as usize];
        disk.extended_read(0, 1, &mut block)
            .map_err(|status| BootError::DiskRead { drive, status })?;

        let sector = &block[..BOOT_SECTOR_SIZE];
        let found = [sector[510], sector[511]];
        if found != BOOT_SIGNATURE {
            return Err(BootError::BadBootSignature { found });
        }
        load_raw_image(&mut self.memory, sector)
    }
}

impl<H: Handoff> BootEntry for BootSectorEntry<H> {
    fn boot(&mut self, drives: &mut DriveTable, drive: u8) -> BootError {
        match self.load_boot_sector(drives, drive) {
            Ok(()) => {
                tracing::debug!(drive, "jumping to boot sector");
                self.handoff.handoff(drive, &self.memory)
            }
            Err(err) => err,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownFlags {
    /// Leave registered devices in place when the boot environment exits.
    pub keep_devices: bool,
}

/// Everything the boot path needs from its environment.
pub struct BootContext<'a> {
    pub runtime: Arc<Runtime>,
    pub transport: Arc<dyn Transport>,
    pub disk_options: HttpDiskOptions,
    pub settings: &'a Settings,
    pub drives: &'a mut DriveTable,
    pub boot_entry: &'a mut dyn BootEntry,
    pub console: &'a mut dyn Console,
    pub shutdown: &'a mut ShutdownFlags,
}

/// Boot from the disk image at `root_path`.
///
/// Returns only on failure. Unless `keep-san` is set, the drive is unregistered and the device
/// detached before returning; every failure after attach detaches the device exactly once.
pub fn httpdisk_boot(root_path: &str, ctx: &mut BootContext<'_>) -> BootError {
    let shown = Locator::parse(root_path)
        .map(|locator| locator.to_string())
        .unwrap_or_else(|_| root_path.to_string());
    ctx.console
        .println(&format!("HTTPDisk booting from {shown}"));

    let disk = match HttpDisk::attach_with_options(
        root_path,
        ctx.transport.clone(),
        ctx.disk_options.clone(),
    ) {
        Ok(disk) => disk,
        Err(err) => {
            ctx.console
                .println(&format!("Could not attach HTTPDisk device: {err}"));
            return err.into();
        }
    };

    let device = BlockingDisk::new(SharedHttpDisk::new(disk), ctx.runtime.clone());
    if let Err(err) = device.initialize(0) {
        ctx.console
            .println(&format!("Could not initialise HTTPDisk device: {err}"));
        detach(&device);
        return err.into();
    }

    let teardown = device.clone();
    let drive = match ctx.drives.register(Box::new(device)) {
        Ok(drive) => drive,
        Err(err) => {
            ctx.console
                .println(&format!("Could not register BIOS drive: {err}"));
            detach(&teardown);
            return err;
        }
    };
    ctx.console
        .println(&format!("Registered as BIOS drive {drive:#04x}"));
    ctx.console
        .println(&format!("Booting from BIOS drive {drive:#04x}"));

    let err = ctx.boot_entry.boot(&mut *ctx.drives, drive);
    ctx.console.println("Boot failed");
    tracing::warn!(drive, %err, "boot returned");

    if ctx.settings.is_enabled(&KEEP_SAN) {
        ctx.console.println("Preserving connection to SAN disk");
        ctx.shutdown.keep_devices = true;
        return err;
    }

    ctx.console
        .println(&format!("Unregistering BIOS drive {drive:#04x}"));
    drop(ctx.drives.unregister(drive));
    detach(&teardown);
    err
}

fn detach(device: &BlockingDisk) {
    if let Err(err) = device.detach() {
        tracing::warn!(%err, "failed to detach HTTP disk");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netboot_httpdisk::{BlockDevice, Result};

    struct Sectors {
        block_size: u32,
        data: Vec<u8>,
    }

    impl BlockDevice for Sectors {
        fn read(&mut self, start_block: u64, count: u64, buf: &mut [u8]) -> Result<()> {
            let bs = self.block_size as usize;
            let start = start_block as usize * bs;
            let len = count as usize * bs;
            buf[..len].copy_from_slice(&self.data[start..start + len]);
            Ok(())
        }

        fn block_size(&self) -> u32 {
            self.block_size
        }

        fn block_count(&self) -> u64 {
            (self.data.len() / self.block_size as usize) as u64
        }
    }

    #[derive(Default)]
    struct Recorder {
        calls: Vec<(u8, Vec<u8>)>,
    }

    impl Handoff for Recorder {
        fn handoff(&mut self, drive: u8, memory: &RealModeMemory) -> BootError {
            let sector = memory.read(0x7C00, BOOT_SECTOR_SIZE).unwrap_or_default();
            self.calls.push((drive, sector.to_vec()));
            BootError::HandoffReturned
        }
    }

    fn mbr(block_size: usize) -> Vec<u8> {
        let mut data = vec![0u8; block_size * 4];
        data[0] = 0xEB;
        data[1] = 0xFE;
        data[510] = 0x55;
        data[511] = 0xAA;
        data
    }

    #[test]
    fn boot_sector_lands_at_7c00() {
        let mut drives = DriveTable::new();
        let drive = drives
            .register(Box::new(Sectors {
                block_size: 512,
                data: mbr(512),
            }))
            .unwrap();
        let mut entry = BootSectorEntry::new(Recorder::default());

        let err = entry.boot(&mut drives, drive);
        assert!(matches!(err, BootError::HandoffReturned));
        let (handed_drive, sector) = &entry.handoff_mut().calls[0];
        assert_eq!(*handed_drive, 0x80);
        assert_eq!(&sector[..2], &[0xEB, 0xFE]);
        assert_eq!(&sector[510..], &BOOT_SIGNATURE);
    }

    #[test]
    fn larger_blocks_use_first_512_bytes() {
        let mut drives = DriveTable::new();
        let drive = drives
            .register(Box::new(Sectors {
                block_size: 2048,
                data: mbr(2048),
            }))
            .unwrap();
        let mut entry = BootSectorEntry::new(Recorder::default());
        assert!(matches!(
            entry.boot(&mut drives, drive),
            BootError::HandoffReturned
        ));
        assert_eq!(entry.memory().read(0x7C00 + 510, 2).unwrap(), &BOOT_SIGNATURE);
    }

    #[test]
    fn missing_signature_never_hands_off() {
        let mut data = mbr(512);
        data[511] = 0x00;
        let mut drives = DriveTable::new();
        let drive = drives
            .register(Box::new(Sectors {
                block_size: 512,
                data,
            }))
            .unwrap();
        let mut entry = BootSectorEntry::new(Recorder::default());

        let err = entry.boot(&mut drives, drive);
        assert!(matches!(
            err,
            BootError::BadBootSignature {
                found: [0x55, 0x00]
            }
        ));
        assert!(entry.handoff_mut().calls.is_empty());
    }

    #[test]
    fn rejects_unknown_drive_and_tiny_blocks() {
        let mut drives = DriveTable::new();
        let mut entry = BootSectorEntry::new(Recorder::default());
        assert!(matches!(
            entry.boot(&mut drives, 0x80),
            BootError::UnknownDrive { drive: 0x80 }
        ));

        let drive = drives
            .register(Box::new(Sectors {
                block_size: 256,
                data: vec![0u8; 1024],
            }))
            .unwrap();
        assert!(matches!(
            entry.boot(&mut drives, drive),
            BootError::SectorTooSmall { block_size: 256 }
        ));
    }
}

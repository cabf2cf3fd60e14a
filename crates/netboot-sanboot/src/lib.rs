//! SAN boot from HTTP disks.
//!
//! Glue between [`netboot_httpdisk`] and a BIOS-style boot path: a blocking adapter over the
//! async device, an INT 13h drive table, boot-sector loading and handoff, the `keep-san`
//! setting, and root-path dispatch.

mod blocking;
pub mod boot;
pub mod drive;
mod error;
pub mod image;
pub mod protocol;
pub mod settings;

pub use blocking::BlockingDisk;
pub use boot::{
    httpdisk_boot, BootContext, BootEntry, BootSectorEntry, Console, Handoff, ShutdownFlags,
    TracingConsole,
};
pub use drive::{DriveTable, Int13Drive};
pub use error::BootError;
pub use image::{load_raw_image, RealModeMemory};
pub use protocol::{sanboot, SanbootProtocol};
pub use settings::{Settings, KEEP_SAN};

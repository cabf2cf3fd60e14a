//! Root-path dispatch to SAN boot protocols.

use crate::boot::{httpdisk_boot, BootContext};
use crate::BootError;

pub trait SanbootProtocol: Sync {
    /// Root paths starting with this prefix are handled by this protocol.
    fn prefix(&self) -> &'static str;

    /// Boot from `root_path`. Returns only on failure.
    fn boot(&self, root_path: &str, ctx: &mut BootContext<'_>) -> BootError;
}

/// Boots from a disk image served over HTTP(S) with range requests.
#[derive(Debug)]
pub struct HttpDiskProtocol {
    prefix: &'static str,
}

impl SanbootProtocol for HttpDiskProtocol {
    fn prefix(&self) -> &'static str {
        self.prefix
    }

    fn boot(&self, root_path: &str, ctx: &mut BootContext<'_>) -> BootError {
        httpdisk_boot(root_path, ctx)
    }
}

pub static HTTP_SANBOOT: HttpDiskProtocol = HttpDiskProtocol { prefix: "http:" };
pub static HTTPS_SANBOOT: HttpDiskProtocol = HttpDiskProtocol { prefix: "https:" };

pub static SANBOOT_PROTOCOLS: &[&dyn SanbootProtocol] = &[&HTTP_SANBOOT, &HTTPS_SANBOOT];

pub fn find_protocol(root_path: &str) -> Option<&'static dyn SanbootProtocol> {
    SANBOOT_PROTOCOLS
        .iter()
        .copied()
        .find(|protocol| root_path.starts_with(protocol.prefix()))
}

/// Boot from `root_path` with whichever protocol claims its prefix. Returns only on failure.
pub fn sanboot(root_path: &str, ctx: &mut BootContext<'_>) -> BootError {
    match find_protocol(root_path) {
        Some(protocol) => {
            tracing::debug!(prefix = protocol.prefix(), "selected SAN boot protocol");
            protocol.boot(root_path, ctx)
        }
        None => {
            ctx.console
                .println(&format!("Unsupported root path \"{root_path}\""));
            BootError::NoProtocol {
                root_path: root_path.to_string(),
            }
        }
    }
}

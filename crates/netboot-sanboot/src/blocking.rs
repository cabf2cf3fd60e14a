use std::fmt;
use std::sync::Arc;

use netboot_httpdisk::{BlockDevice, HttpDiskError, Result, SharedHttpDisk};
use tokio::runtime::{Handle, Runtime};

/// Synchronous [`BlockDevice`] over a [`SharedHttpDisk`].
///
/// Every call drives the device's async operation to completion on `runtime`. The runtime
/// must be a current-thread runtime owned by the boot path, and calls must not be made from
/// inside an async context.
#[derive(Clone)]
pub struct BlockingDisk {
    disk: SharedHttpDisk,
    runtime: Arc<Runtime>,
}

impl fmt::Debug for BlockingDisk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingDisk")
            .field("disk", &self.disk)
            .field("geometry", &self.disk.geometry())
            .finish_non_exhaustive()
    }
}

impl BlockingDisk {
    pub fn new(disk: SharedHttpDisk, runtime: Arc<Runtime>) -> Self {
        Self { disk, runtime }
    }

    pub fn shared(&self) -> &SharedHttpDisk {
        &self.disk
    }

    pub fn initialize(&self, requested_block_size: u32) -> Result<()> {
        self.block_on(|disk| async move {
            let mut disk = disk.lock().await;
            disk.initialize(requested_block_size).await
        })?
    }

    pub fn detach(&self) -> Result<()> {
        self.block_on(|disk| async move {
            let mut disk = disk.lock().await;
            disk.detach()
        })?
    }

    fn block_on<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce(SharedHttpDisk) -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        if Handle::try_current().is_ok() {
            return Err(HttpDiskError::BlockingInAsyncContext);
        }
        Ok(self.runtime.block_on(op(self.disk.clone())))
    }
}

impl BlockDevice for BlockingDisk {
    fn read(&mut self, start_block: u64, count: u64, buf: &mut [u8]) -> Result<()> {
        self.block_on(|disk| async move {
            let mut disk = disk.lock().await;
            disk.read(start_block, count, buf).await
        })?
    }

    fn block_size(&self) -> u32 {
        self.disk.geometry().block_size
    }

    fn block_count(&self) -> u64 {
        self.disk.geometry().block_count
    }
}

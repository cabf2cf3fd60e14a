use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

use crate::delivery::ReadContext;
use crate::range::{RangeHeader, PROBE_RANGE_HEADER};
use crate::transfer::{LengthSink, TransferEvent, TransferSession, TransferStatus, Transport};
use crate::{HttpDiskError, Locator, Result};

pub const DEFAULT_BLOCK_SIZE: u32 = 512;

/// Block geometry. `block_count == 0` means the capacity is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub block_size: u32,
    pub block_count: u64,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            block_count: 0,
        }
    }
}

/// Geometry of one device, readable by every handle without taking the device lock.
#[derive(Debug, Default)]
struct GeometryCell(Mutex<Geometry>);

impl GeometryCell {
    fn get(&self) -> Geometry {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, geometry: Geometry) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = geometry;
    }
}

#[derive(Debug, Clone, Default)]
pub struct HttpDiskOptions {
    /// Upper bound on a single transfer (probe or read). `None` waits indefinitely for the
    /// server to close the transfer.
    pub read_timeout: Option<Duration>,
}

/// A read-only disk whose blocks are fetched from an HTTP resource with byte-range requests.
///
/// Lifecycle: [`attach`](Self::attach) → [`initialize`](Self::initialize) → any number of
/// [`read`](Self::read)s → [`detach`](Self::detach). `read` takes `&mut self`, so at most one
/// transfer is ever outstanding per device.
pub struct HttpDisk {
    locator: Locator,
    transport: Arc<dyn Transport>,
    options: HttpDiskOptions,
    geometry: Arc<GeometryCell>,
    initialized: bool,
    /// Most recent transfer; kept so `detach` can close it even if a read was abandoned.
    session: Option<TransferSession>,
    /// `None` once detached.
    range_header: Option<RangeHeader>,
    completed: bool,
    detached: bool,
}

impl fmt::Debug for HttpDisk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpDisk")
            .field("locator", &self.locator)
            .field("geometry", &self.geometry())
            .field("initialized", &self.initialized)
            .field("completed", &self.completed)
            .field("detached", &self.detached)
            .finish()
    }
}

impl HttpDisk {
    pub fn attach(root_path: &str, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::attach_with_options(root_path, transport, HttpDiskOptions::default())
    }

    /// Resolve `root_path` and allocate the per-device scratch state.
    ///
    /// No request is made here; an unreachable server is only noticed by `initialize`.
    pub fn attach_with_options(
        root_path: &str,
        transport: Arc<dyn Transport>,
        options: HttpDiskOptions,
    ) -> Result<Self> {
        let locator = Locator::parse(root_path).inspect_err(|err| {
            tracing::debug!(%err, "root path could not be parsed");
        })?;
        let range_header = RangeHeader::new()?;

        tracing::debug!(url = %locator, "attached HTTP disk");
        Ok(Self {
            locator,
            transport,
            options,
            geometry: Arc::default(),
            initialized: false,
            session: None,
            range_header: Some(range_header),
            completed: false,
            detached: false,
        })
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry.get()
    }

    pub fn block_size(&self) -> u32 {
        self.geometry().block_size
    }

    pub fn block_count(&self) -> u64 {
        self.geometry().block_count
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    /// Whether the last transfer has delivered its close notification.
    pub fn completed(&self) -> bool {
        self.completed
    }

    /// Whether the range-header scratch buffer is still allocated.
    pub fn has_scratch(&self) -> bool {
        self.range_header.is_some()
    }

    /// Fix the block size and discover the device length with a 1-byte probe read.
    ///
    /// `requested_block_size == 0` selects [`DEFAULT_BLOCK_SIZE`]. If the transport reports the
    /// resource length, `block_count = length / block_size` (any remainder is dropped);
    /// otherwise the block count stays 0.
    pub async fn initialize(&mut self, requested_block_size: u32) -> Result<()> {
        if self.detached {
            return Err(HttpDiskError::Detached);
        }
        if self.initialized {
            return Err(HttpDiskError::AlreadyInitialized);
        }
        let block_size = match requested_block_size {
            0 => DEFAULT_BLOCK_SIZE,
            size => size,
        };

        let mut probe = Vec::new();
        probe
            .try_reserve_exact(1)
            .map_err(|_| HttpDiskError::OutOfMemory {
                what: "probe buffer",
            })?;
        probe.push(0u8);

        let length = LengthSink::new();
        tracing::debug!(url = %self.locator, "probing device length");
        let session = self
            .transport
            .open(&self.locator, PROBE_RANGE_HEADER, Some(length.clone()))?;

        let mut ctx = ReadContext::new(&mut probe);
        self.run_session(session, &mut ctx).await?;
        if !ctx.is_exact() {
            tracing::warn!(
                url = %self.locator,
                cursor = ctx.cursor(),
                status = ?ctx.status(),
                "probe read did not return exactly one byte"
            );
            return Err(HttpDiskError::ProbeFailed {
                expected: 1,
                actual: ctx.cursor() as u64,
            });
        }

        let geometry = Geometry {
            block_size,
            block_count: length
                .get()
                .map_or(0, |total_len| total_len / u64::from(block_size)),
        };
        self.geometry.set(geometry);
        self.initialized = true;

        tracing::debug!(
            url = %self.locator,
            block_size,
            block_count = geometry.block_count,
            "initialized HTTP disk"
        );
        Ok(())
    }

    /// Read `block_count` blocks starting at `start_block` into the front of `buf`.
    pub async fn read(&mut self, start_block: u64, block_count: u64, buf: &mut [u8]) -> Result<()> {
        if self.detached {
            return Err(HttpDiskError::Detached);
        }
        if !self.initialized {
            return Err(HttpDiskError::NotInitialized);
        }

        let block_size = self.block_size();
        let invalid = || HttpDiskError::InvalidRange {
            start_block,
            block_count,
            block_size,
        };
        let offset = start_block
            .checked_mul(u64::from(block_size))
            .ok_or_else(invalid)?;
        let len = block_count
            .checked_mul(u64::from(block_size))
            .ok_or_else(invalid)?;
        if len == 0 {
            return Ok(());
        }
        let end_inclusive = offset.checked_add(len - 1).ok_or_else(invalid)?;
        let buf_len = usize::try_from(len)
            .ok()
            .filter(|&needed| needed <= buf.len())
            .ok_or(HttpDiskError::BufferTooSmall {
                needed: len,
                len: buf.len(),
            })?;

        let range_header = self.range_header.as_mut().ok_or(HttpDiskError::Detached)?;
        let header = range_header.format(offset, end_inclusive)?;
        tracing::debug!(url = %self.locator, offset, len, "reading [{offset:#x},{:#x})", offset + len);
        let session = self.transport.open(&self.locator, header, None)?;

        let mut ctx = ReadContext::new(&mut buf[..buf_len]);
        self.run_session(session, &mut ctx).await?;
        if !ctx.is_exact() {
            tracing::warn!(
                url = %self.locator,
                offset,
                len,
                cursor = ctx.cursor(),
                overflowed = ctx.overflowed(),
                status = ?ctx.status(),
                "short read"
            );
            return Err(HttpDiskError::ShortRead {
                expected: len,
                actual: ctx.cursor() as u64,
            });
        }
        Ok(())
    }

    /// Always fails: the remote image is read-only.
    pub fn write(&self, _start_block: u64, _block_count: u64, _buf: &[u8]) -> Result<()> {
        Err(HttpDiskError::NotSupported)
    }

    /// Tear down the transfer state and release the scratch buffer.
    ///
    /// Precondition: no read is outstanding (guaranteed when the caller holds `&mut self`).
    /// The device record itself is freed when its last owner drops it.
    pub fn detach(&mut self) -> Result<()> {
        if self.detached {
            tracing::warn!(url = %self.locator, "detach called twice");
            return Err(HttpDiskError::AlreadyDetached);
        }
        self.detached = true;

        if let Some(mut session) = self.session.take() {
            session.nullify();
            let status = if self.completed {
                TransferStatus::Ok
            } else {
                TransferStatus::Aborted
            };
            session.close_now(status);
        }
        self.range_header = None;

        tracing::debug!(url = %self.locator, "detached HTTP disk");
        Ok(())
    }

    /// Install `session` as the current transfer and wait for its close notification.
    async fn run_session(
        &mut self,
        session: TransferSession,
        ctx: &mut ReadContext<'_>,
    ) -> Result<()> {
        if let Some(mut previous) = self.session.take() {
            previous.nullify();
        }
        self.completed = false;
        let session = self.session.insert(session);

        match self.options.read_timeout {
            None => wait_for_close(session, ctx).await,
            Some(timeout) => {
                if tokio::time::timeout(timeout, wait_for_close(session, ctx))
                    .await
                    .is_err()
                {
                    session.close_now(TransferStatus::Aborted);
                    tracing::warn!(url = %self.locator, ?timeout, "transfer timed out");
                    return Err(HttpDiskError::TimedOut {
                        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    });
                }
            }
        }

        self.completed = true;
        Ok(())
    }
}

/// Feed deliveries into `ctx` until the session closes.
///
/// Each `await` yields to the runtime, so other tasks (including the transfer itself) keep
/// running while the read waits.
async fn wait_for_close(session: &mut TransferSession, ctx: &mut ReadContext<'_>) {
    while !ctx.completed() {
        match session.next_event().await {
            TransferEvent::Deliver(delivery) => {
                if let Err(err) = ctx.on_delivery(delivery) {
                    tracing::debug!(%err, "dropping excess delivery");
                }
            }
            TransferEvent::Close(status) => {
                tracing::debug!(%status, cursor = ctx.cursor(), "transfer closed");
                ctx.on_close(status);
            }
        }
    }
}

impl Drop for HttpDisk {
    fn drop(&mut self) {
        if !self.detached {
            // Freeing memory never stands in for protocol teardown.
            tracing::warn!(url = %self.locator, "HTTP disk dropped without detach");
        }
    }
}

/// Shared-ownership handle to an [`HttpDisk`].
///
/// The device is freed when the last handle is dropped. Dropping handles never closes the
/// transfer; call [`HttpDisk::detach`] for that.
pub struct SharedHttpDisk {
    inner: Arc<AsyncMutex<HttpDisk>>,
    geometry: Arc<GeometryCell>,
}

impl SharedHttpDisk {
    pub fn new(disk: HttpDisk) -> Self {
        Self {
            geometry: disk.geometry.clone(),
            inner: Arc::new(AsyncMutex::new(disk)),
        }
    }

    /// Current geometry of the device, even while another owner holds the lock.
    pub fn geometry(&self) -> Geometry {
        self.geometry.get()
    }

    /// Exclusive access for the duration of one operation.
    pub async fn lock(&self) -> MutexGuard<'_, HttpDisk> {
        self.inner.lock().await
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, HttpDisk>> {
        self.inner.try_lock().ok()
    }

    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl Clone for SharedHttpDisk {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            geometry: self.geometry.clone(),
        }
    }
}

impl fmt::Debug for SharedHttpDisk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedHttpDisk")
            .field("ref_count", &self.ref_count())
            .finish_non_exhaustive()
    }
}

impl From<HttpDisk> for SharedHttpDisk {
    fn from(disk: HttpDisk) -> Self {
        Self::new(disk)
    }
}

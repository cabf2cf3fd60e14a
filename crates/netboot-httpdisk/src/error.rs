use thiserror::Error;

use crate::transfer::TransferError;

pub type Result<T> = std::result::Result<T, HttpDiskError>;

/// Errors surfaced by an [`HttpDisk`](crate::HttpDisk) to its immediate caller.
///
/// None of these are retried internally: a failed read is reported once and the block-device
/// consumer decides whether to try again.
#[derive(Debug, Error)]
pub enum HttpDiskError {
    #[error("invalid disk locator {locator:?}: {reason}")]
    InvalidLocator { locator: String, reason: String },

    #[error("out of memory allocating {what}")]
    OutOfMemory { what: &'static str },

    #[error("transfer could not be opened: {0}")]
    Transport(#[from] TransferError),

    #[error("range header needs {len} bytes but scratch capacity is {capacity}")]
    HeaderTooLong { len: usize, capacity: usize },

    #[error("invalid block range: start={start_block} count={block_count} block_size={block_size}")]
    InvalidRange {
        start_block: u64,
        block_count: u64,
        block_size: u32,
    },

    #[error("destination buffer too small: need {needed} bytes, have {len}")]
    BufferTooSmall { needed: u64, len: usize },

    /// The transfer finished without filling the destination exactly.
    ///
    /// This covers both an early close and a delivery that overflowed the buffer and was
    /// truncated; callers cannot tell the two apart.
    #[error("short read: expected {expected} bytes, transfer left cursor at {actual}")]
    ShortRead { expected: u64, actual: u64 },

    #[error("probe read failed: expected {expected} byte(s), got {actual}")]
    ProbeFailed { expected: u64, actual: u64 },

    #[error("operation not supported by a read-only HTTP disk")]
    NotSupported,

    #[error("device has not been initialized")]
    NotInitialized,

    #[error("device is already initialized")]
    AlreadyInitialized,

    #[error("device has been detached")]
    Detached,

    #[error("device was already detached")]
    AlreadyDetached,

    #[error("transfer did not complete within {timeout_ms} ms")]
    TimedOut { timeout_ms: u64 },

    /// A synchronous wrapper was called from a task already running on an async runtime.
    #[error("blocking disk access from inside an async context")]
    BlockingInAsyncContext,
}

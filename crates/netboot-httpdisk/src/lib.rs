//! HTTP-backed block device for SAN-style network boot.
//!
//! A remote disk image served over HTTP is exposed as a read-only, block-addressed device.
//! Every block read becomes one `Range: bytes=<start>-<end>` request; the response body is
//! streamed into the caller's buffer chunk by chunk. This crate provides:
//!
//! - [`HttpDisk`]: the device (attach / initialize / read / detach)
//! - [`SharedHttpDisk`]: shared-ownership handle for registering the device with boot code
//! - [`Transport`]: the narrow open/deliver/close contract the device consumes
//! - [`HttpTransport`]: `reqwest`-backed transport
//! - [`MemTransport`]: in-memory transport with fault injection
//! - [`BlockDevice`]: synchronous block interface handed to boot-time consumers

mod block;
mod delivery;
mod disk;
mod error;
mod http;
mod locator;
pub mod mem;
pub mod range;
pub mod transfer;

pub use block::{BlockDevice, Capabilities};
pub use delivery::{DeliveryError, ReadContext};
pub use disk::{Geometry, HttpDisk, HttpDiskOptions, SharedHttpDisk, DEFAULT_BLOCK_SIZE};
pub use error::{HttpDiskError, Result};
pub use http::HttpTransport;
pub use locator::Locator;
pub use mem::{MemFault, MemTransport};
pub use transfer::{
    Delivery, LengthSink, SessionSender, TransferError, TransferEvent, TransferSession,
    TransferStatus, Transport, Whence,
};

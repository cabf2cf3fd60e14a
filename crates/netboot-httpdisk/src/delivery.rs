//! Per-read destination state and the handling of incoming deliveries.
//!
//! A [`ReadContext`] exists only for the duration of one read. It borrows the caller's buffer,
//! so nothing from one read can leak into the next.

use thiserror::Error;

use crate::transfer::{Delivery, TransferStatus, Whence};

/// Outcome of a single delivery that did not fit.
///
/// This never aborts the transfer; the enclosing read turns it into
/// [`HttpDiskError::ShortRead`](crate::HttpDiskError::ShortRead).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("delivery overflowed destination buffer: dropped {dropped} of {len} bytes at cursor {cursor}")]
    BufferOverflow {
        cursor: usize,
        len: usize,
        dropped: usize,
    },
}

#[derive(Debug)]
pub struct ReadContext<'a> {
    buf: &'a mut [u8],
    cursor: usize,
    overflowed: bool,
    completed: bool,
    status: Option<TransferStatus>,
}

impl<'a> ReadContext<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            cursor: 0,
            overflowed: false,
            completed: false,
            status: None,
        }
    }

    pub fn buffer_len(&self) -> usize {
        self.buf.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Whether any delivery so far had to be clipped.
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn completed(&self) -> bool {
        self.completed
    }

    pub fn status(&self) -> Option<&TransferStatus> {
        self.status.as_ref()
    }

    /// `true` if the buffer was filled exactly and nothing was dropped.
    pub fn is_exact(&self) -> bool {
        !self.overflowed && self.cursor == self.buf.len()
    }

    /// Copy one delivery into the buffer, returning the number of bytes copied.
    ///
    /// The delivery's storage is released on return whether or not it fit.
    pub fn on_delivery(&mut self, delivery: Delivery) -> Result<usize, DeliveryError> {
        let Delivery {
            data,
            position,
            whence,
        } = delivery;
        let buf_len = self.buf.len();

        if whence == Whence::Start {
            self.cursor = 0;
        }
        let position = usize::try_from(position).unwrap_or(usize::MAX);
        let target = self.cursor.saturating_add(position);

        // A position past the end leaves no room at all; clamp rather than wrap.
        self.cursor = target.min(buf_len);
        let remaining = buf_len - self.cursor;
        let copy_len = data.len().min(remaining);

        self.buf[self.cursor..self.cursor + copy_len].copy_from_slice(&data[..copy_len]);
        self.cursor += copy_len;

        let dropped = data.len() - copy_len;
        if target > buf_len || dropped > 0 {
            self.overflowed = true;
            tracing::debug!(
                cursor = self.cursor,
                buf_len,
                chunk_len = data.len(),
                "delivery would overflow buffer, dropping excess"
            );
            return Err(DeliveryError::BufferOverflow {
                cursor: self.cursor,
                len: data.len(),
                dropped,
            });
        }
        Ok(copy_len)
    }

    /// Record the close notification. Completion is set regardless of `status`; judging the
    /// result is left to the read.
    pub fn on_close(&mut self, status: TransferStatus) {
        self.completed = true;
        self.status = Some(status);
    }
}

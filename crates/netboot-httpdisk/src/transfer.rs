//! Contract between an [`HttpDisk`](crate::HttpDisk) and the byte-stream transport feeding it.
//!
//! A transport is opened with a locator, one extra request header line and an optional sink
//! for the total resource length. The returned [`TransferSession`] then yields zero or more
//! [`TransferEvent::Deliver`] events followed by exactly one [`TransferEvent::Close`].
//!
//! Producers hold a [`SessionSender`]; closing consumes it, so a second close cannot be
//! expressed. A sender that is dropped without closing is observed by the consumer as a failed
//! close.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::Locator;

/// Interpretation of [`Delivery::position`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// Position is absolute: the stream restarted (or was redirected) and the cursor resets to
    /// zero before the position is applied.
    Start,
    /// Position is a delta from the current cursor.
    Current,
}

/// One chunk of arriving data.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub data: Bytes,
    pub position: u64,
    pub whence: Whence,
}

/// Status carried by the close notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    Ok,
    /// The server answered with a non-success HTTP status.
    HttpStatus(u16),
    Failed(String),
    /// The consumer force-closed the session before it completed.
    Aborted,
}

impl TransferStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, TransferStatus::Ok)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferStatus::Ok => f.write_str("ok"),
            TransferStatus::HttpStatus(code) => write!(f, "HTTP status {code}"),
            TransferStatus::Failed(msg) => write!(f, "failed: {msg}"),
            TransferStatus::Aborted => f.write_str("aborted"),
        }
    }
}

#[derive(Debug)]
pub enum TransferEvent {
    Deliver(Delivery),
    Close(TransferStatus),
}

/// Reasons a transport refuses to open a session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("no async runtime is available to drive the transfer")]
    NoRuntime,

    #[error("invalid request header {0:?}")]
    InvalidHeader(String),

    #[error("unsupported locator: {0}")]
    Unsupported(String),

    #[error("transfer refused: {0}")]
    Refused(String),
}

/// Out-of-band channel through which a transport reports the total resource length
/// (e.g. from `Content-Range: bytes 0-0/<total>`).
#[derive(Debug, Clone, Default)]
pub struct LengthSink {
    len: Arc<AtomicU64>,
}

impl LengthSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self, total_len: u64) {
        self.len.store(total_len, Ordering::Release);
    }

    /// Reported length, or `None` if the transport never reported one (or reported zero).
    pub fn get(&self) -> Option<u64> {
        match self.len.load(Ordering::Acquire) {
            0 => None,
            len => Some(len),
        }
    }
}

/// Asynchronous byte-stream fetcher.
pub trait Transport: Send + Sync {
    /// Start a transfer of `locator` with `extra_header` (a complete `Name: value\r\n` line)
    /// appended to the request.
    ///
    /// Failing here means the request never started; once a session is returned, all further
    /// failures are reported through its close status.
    fn open(
        &self,
        locator: &Locator,
        extra_header: &str,
        length_sink: Option<LengthSink>,
    ) -> Result<TransferSession, TransferError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn open(
        &self,
        locator: &Locator,
        extra_header: &str,
        length_sink: Option<LengthSink>,
    ) -> Result<TransferSession, TransferError> {
        (**self).open(locator, extra_header, length_sink)
    }
}

/// Producer-side hook invoked when the consumer force-closes a session.
pub trait SessionControl: Send {
    fn close_now(&mut self, status: &TransferStatus);
}

/// Control for producers that have nothing to cancel.
#[derive(Debug, Default)]
pub struct NoControl;

impl SessionControl for NoControl {
    fn close_now(&mut self, _status: &TransferStatus) {}
}

/// Consumer half of one transfer.
pub struct TransferSession {
    events: mpsc::UnboundedReceiver<TransferEvent>,
    control: Option<Box<dyn SessionControl>>,
    closed: bool,
}

impl fmt::Debug for TransferSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferSession")
            .field("closed", &self.closed)
            .field("has_control", &self.control.is_some())
            .finish()
    }
}

impl TransferSession {
    pub fn channel(control: impl SessionControl + 'static) -> (SessionSender, TransferSession) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            SessionSender { tx },
            TransferSession {
                events: rx,
                control: Some(Box::new(control)),
                closed: false,
            },
        )
    }

    /// Replace the producer's control hook, for producers that only learn how to cancel
    /// themselves after the session exists (e.g. once their task has been spawned).
    pub fn set_control(&mut self, control: impl SessionControl + 'static) {
        self.control = Some(Box::new(control));
    }

    /// Wait for the next event.
    ///
    /// After the close event has been returned, every further call returns the same terminal
    /// `Close(Ok)` without waiting, so callers never block on a finished session.
    pub async fn next_event(&mut self) -> TransferEvent {
        if self.closed {
            return TransferEvent::Close(TransferStatus::Ok);
        }
        match self.events.recv().await {
            Some(TransferEvent::Close(status)) => {
                self.closed = true;
                TransferEvent::Close(status)
            }
            Some(event) => event,
            None => {
                self.closed = true;
                TransferEvent::Close(TransferStatus::Failed(
                    "transfer ended without a close notification".to_string(),
                ))
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Tell the producer there is no longer a consumer. Pending and future deliveries are
    /// discarded.
    pub fn nullify(&mut self) {
        self.events.close();
        while self.events.try_recv().is_ok() {}
    }

    /// Force-terminate the transfer. The producer's control hook runs at most once.
    pub fn close_now(&mut self, status: TransferStatus) {
        self.nullify();
        if let Some(mut control) = self.control.take() {
            control.close_now(&status);
        }
        self.closed = true;
    }
}

/// Producer half of one transfer.
#[derive(Debug)]
pub struct SessionSender {
    tx: mpsc::UnboundedSender<TransferEvent>,
}

impl SessionSender {
    /// Queue a delivery. Returns `false` once the consumer has unhooked the session.
    pub fn deliver(&self, data: Bytes, position: u64, whence: Whence) -> bool {
        self.tx
            .send(TransferEvent::Deliver(Delivery {
                data,
                position,
                whence,
            }))
            .is_ok()
    }

    pub fn close(self, status: TransferStatus) {
        let _ = self.tx.send(TransferEvent::Close(status));
    }

    pub fn is_unhooked(&self) -> bool {
        self.tx.is_closed()
    }
}

//! In-memory [`Transport`] serving a byte image with HTTP range semantics.
//!
//! Useful for offline boots from a local image and for exercising the disk against
//! misbehaving servers: faults can be injected per transport and every request header and
//! forced close is recorded.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::{Bytes, BytesMut};

use crate::range::parse_range_spec;
use crate::transfer::{
    LengthSink, SessionControl, SessionSender, TransferError, TransferSession, TransferStatus,
    Transport, Whence,
};
use crate::Locator;

pub const DEFAULT_MEM_CHUNK_SIZE: usize = 1460;

/// Misbehaviour applied to every transfer opened while it is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemFault {
    /// `open` itself fails.
    FailOpen,
    /// Close with `Ok` after delivering only this many bytes.
    CloseEarly { after: usize },
    /// Deliver this many bytes beyond the requested range.
    Overrun { extra: usize },
    /// Answer every request with the whole image, as a server without range support would.
    IgnoreRange,
    /// Deliver the first chunk, then restart the stream from offset zero and deliver it all.
    Restart,
    /// Deliver everything but never send the close notification.
    Stall,
    /// Close immediately with this HTTP status and no data.
    Status(u16),
}

#[derive(Clone)]
pub struct MemTransport {
    inner: Arc<Mutex<MemState>>,
}

struct MemState {
    image: Bytes,
    chunk_size: usize,
    report_length: bool,
    fault: Option<MemFault>,
    requests: Vec<String>,
    forced_closes: Vec<TransferStatus>,
    stalled: Vec<SessionSender>,
}

impl fmt::Debug for MemTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.lock() {
            Ok(state) => f
                .debug_struct("MemTransport")
                .field("image_len", &state.image.len())
                .field("chunk_size", &state.chunk_size)
                .field("fault", &state.fault)
                .finish(),
            Err(_) => f.write_str("MemTransport(<poisoned>)"),
        }
    }
}

impl MemTransport {
    pub fn new(image: impl Into<Bytes>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemState {
                image: image.into(),
                chunk_size: DEFAULT_MEM_CHUNK_SIZE,
                report_length: true,
                fault: None,
                requests: Vec::new(),
                forced_closes: Vec::new(),
                stalled: Vec::new(),
            })),
        }
    }

    pub fn with_chunk_size(self, chunk_size: usize) -> Self {
        if let Ok(mut state) = self.inner.lock() {
            state.chunk_size = chunk_size.max(1);
        }
        self
    }

    /// Never report the total length (as a server omitting `Content-Range` would).
    pub fn without_length(self) -> Self {
        if let Ok(mut state) = self.inner.lock() {
            state.report_length = false;
        }
        self
    }

    pub fn with_fault(self, fault: MemFault) -> Self {
        self.set_fault(Some(fault));
        self
    }

    pub fn set_fault(&self, fault: Option<MemFault>) {
        if let Ok(mut state) = self.inner.lock() {
            state.fault = fault;
        }
    }

    /// Every extra header line passed to `open`, verbatim, in order.
    pub fn requests(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|state| state.requests.clone())
            .unwrap_or_default()
    }

    pub fn close_now_calls(&self) -> usize {
        self.forced_closes().len()
    }

    /// Status passed to each forced close, in order.
    pub fn forced_closes(&self) -> Vec<TransferStatus> {
        self.inner
            .lock()
            .map(|state| state.forced_closes.clone())
            .unwrap_or_default()
    }

    /// Stalled producers still waiting for their consumer.
    pub fn stalled_senders(&self) -> usize {
        self.inner
            .lock()
            .map(|state| state.stalled.len())
            .unwrap_or_default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemState>, TransferError> {
        self.inner
            .lock()
            .map_err(|_| TransferError::Refused("poisoned lock".to_string()))
    }
}

struct MemControl {
    inner: Arc<Mutex<MemState>>,
}

impl SessionControl for MemControl {
    fn close_now(&mut self, status: &TransferStatus) {
        if let Ok(mut state) = self.inner.lock() {
            state.forced_closes.push(status.clone());
            // Let go of any stalled producers; their consumer is gone.
            state.stalled.retain(|tx| !tx.is_unhooked());
        }
    }
}

impl Transport for MemTransport {
    fn open(
        &self,
        _locator: &Locator,
        extra_header: &str,
        length_sink: Option<LengthSink>,
    ) -> Result<TransferSession, TransferError> {
        let mut state = self.state()?;
        state.requests.push(extra_header.to_string());

        let fault = state.fault;
        if fault == Some(MemFault::FailOpen) {
            return Err(TransferError::Refused("injected open failure".to_string()));
        }
        let (start, end_inclusive) = parse_range_spec(extra_header)
            .ok_or_else(|| TransferError::InvalidHeader(extra_header.to_string()))?;

        let (tx, session) = TransferSession::channel(MemControl {
            inner: self.inner.clone(),
        });

        if let Some(MemFault::Status(code)) = fault {
            tx.close(TransferStatus::HttpStatus(code));
            return Ok(session);
        }

        let image = state.image.clone();
        let image_len = image.len() as u64;
        if fault != Some(MemFault::IgnoreRange) && start >= image_len {
            tx.close(TransferStatus::HttpStatus(416));
            return Ok(session);
        }
        if state.report_length {
            if let Some(sink) = &length_sink {
                sink.report(image_len);
            }
        }

        let mut payload = match fault {
            Some(MemFault::IgnoreRange) => image,
            _ => {
                let end = end_inclusive.saturating_add(1).min(image_len);
                image.slice(start as usize..end as usize)
            }
        };
        match fault {
            Some(MemFault::CloseEarly { after }) => payload.truncate(after),
            Some(MemFault::Overrun { extra }) => {
                let mut grown = BytesMut::with_capacity(payload.len() + extra);
                grown.extend_from_slice(&payload);
                grown.resize(payload.len() + extra, 0xEE);
                payload = grown.freeze();
            }
            _ => {}
        }

        let chunk_size = state.chunk_size;
        if fault == Some(MemFault::Restart) {
            let first = payload.len().min(chunk_size);
            tx.deliver(payload.slice(..first), 0, Whence::Start);
        }
        send_chunks(&tx, &payload, chunk_size);

        if fault == Some(MemFault::Stall) {
            state.stalled.push(tx);
        } else {
            tx.close(TransferStatus::Ok);
        }
        Ok(session)
    }
}

fn send_chunks(tx: &SessionSender, payload: &Bytes, chunk_size: usize) {
    let mut offset = 0;
    while offset < payload.len() {
        let end = (offset + chunk_size).min(payload.len());
        let whence = if offset == 0 {
            Whence::Start
        } else {
            Whence::Current
        };
        if !tx.deliver(payload.slice(offset..end), 0, whence) {
            return;
        }
        offset = end;
    }
}

use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH,
    CONTENT_RANGE,
};
use reqwest::StatusCode;
use tokio::task::AbortHandle;
use url::Url;

use crate::locator::redact_url_for_logs;
use crate::range::{parse_content_range, parse_range_spec, ContentRange};
use crate::transfer::{
    LengthSink, NoControl, SessionControl, SessionSender, TransferError, TransferSession,
    TransferStatus, Transport, Whence,
};
use crate::Locator;

/// [`Transport`] that performs real HTTP(S) requests with `reqwest`.
///
/// Each `open` spawns the request onto the current tokio runtime. The response body is
/// forwarded chunk by chunk as it arrives.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
    request_headers: HeaderMap,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            request_headers: HeaderMap::new(),
        }
    }

    /// Extra headers sent with every request (e.g. `Authorization`).
    pub fn with_request_headers(
        mut self,
        headers: &[(String, String)],
    ) -> Result<Self, TransferError> {
        for (name, value) in headers {
            let (name, value) = header_pair(name, value)?;
            self.request_headers.insert(name, value);
        }
        Ok(self)
    }
}

struct AbortOnClose(AbortHandle);

impl SessionControl for AbortOnClose {
    fn close_now(&mut self, _status: &TransferStatus) {
        self.0.abort();
    }
}

impl Transport for HttpTransport {
    fn open(
        &self,
        locator: &Locator,
        extra_header: &str,
        length_sink: Option<LengthSink>,
    ) -> Result<TransferSession, TransferError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| TransferError::NoRuntime)?;
        let (name, value) = parse_header_line(extra_header)?;
        let requested = parse_range_spec(extra_header);

        let mut headers = self.request_headers.clone();
        // Disk bytes must arrive exactly as stored; never let an intermediary compress them.
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        headers.insert(name, value);

        let request = self.client.get(locator.url().clone()).headers(headers);
        let (tx, mut session) = TransferSession::channel(NoControl);
        let task = runtime.spawn(run_transfer(
            request,
            locator.redacted(),
            requested,
            length_sink,
            tx,
        ));
        session.set_control(AbortOnClose(task.abort_handle()));
        Ok(session)
    }
}

async fn run_transfer(
    request: reqwest::RequestBuilder,
    url: Url,
    requested: Option<(u64, u64)>,
    length_sink: Option<LengthSink>,
    tx: SessionSender,
) {
    let mut resp = match request.send().await {
        Ok(resp) => resp,
        Err(err) => {
            tracing::debug!(%url, "request failed: {}", format_reqwest_error(&err));
            tx.close(TransferStatus::Failed(format_reqwest_error(&err)));
            return;
        }
    };

    let status = resp.status();
    if !status.is_success() {
        tracing::debug!(%url, %status, "request rejected");
        tx.close(TransferStatus::HttpStatus(status.as_u16()));
        return;
    }
    if let Some(encoding) = resp
        .headers()
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
    {
        if !encoding.eq_ignore_ascii_case("identity") {
            tx.close(TransferStatus::Failed(format!(
                "unexpected Content-Encoding: {encoding}"
            )));
            return;
        }
    }
    let content_range = resp
        .headers()
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_content_range);
    if status == StatusCode::PARTIAL_CONTENT {
        if let Err(msg) = check_served_range(requested, content_range) {
            tracing::warn!(%url, "{msg}");
            tx.close(TransferStatus::Failed(msg));
            return;
        }
    } else {
        // The body is the whole image; the read will notice it does not fit.
        tracing::warn!(%url, %status, "server ignored Range request");
    }
    if let Some(sink) = &length_sink {
        if let Some(total) = reported_length(&resp, content_range) {
            sink.report(total);
        }
    }

    let mut whence = Whence::Start;
    loop {
        match resp.chunk().await {
            Ok(Some(chunk)) => {
                if !tx.deliver(chunk, 0, whence) {
                    tracing::debug!(%url, "consumer went away, abandoning transfer");
                    return;
                }
                whence = Whence::Current;
            }
            Ok(None) => break,
            Err(err) => {
                tx.close(TransferStatus::Failed(format_reqwest_error(&err)));
                return;
            }
        }
    }
    tx.close(TransferStatus::Ok);
}

/// A 206 must carry exactly the requested bytes. The end may only fall short where the
/// resource itself ends.
fn check_served_range(
    requested: Option<(u64, u64)>,
    served: Option<ContentRange>,
) -> Result<(), String> {
    let Some((start, end_inclusive)) = requested else {
        return Ok(());
    };
    let served = served.ok_or_else(|| "missing or invalid Content-Range".to_string())?;
    let clamped_at_end = served.end_inclusive < end_inclusive
        && served.total == served.end_inclusive.checked_add(1);
    if served.start != start || (served.end_inclusive != end_inclusive && !clamped_at_end) {
        return Err(format!(
            "unexpected Content-Range: bytes {}-{} (expected bytes {start}-{end_inclusive})",
            served.start, served.end_inclusive
        ));
    }
    Ok(())
}

/// Total resource length: `Content-Range` total on a 206, `Content-Length` on a plain 200.
fn reported_length(resp: &reqwest::Response, content_range: Option<ContentRange>) -> Option<u64> {
    if resp.status() == StatusCode::PARTIAL_CONTENT {
        content_range.and_then(|cr| cr.total)
    } else {
        resp.headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    }
}

/// Split a `Name: value\r\n` line into a typed header.
fn parse_header_line(line: &str) -> Result<(HeaderName, HeaderValue), TransferError> {
    let invalid = || TransferError::InvalidHeader(line.to_string());
    let (name, value) = line
        .strip_suffix("\r\n")
        .unwrap_or(line)
        .split_once(':')
        .ok_or_else(invalid)?;
    header_pair(name.trim(), value.trim()).map_err(|_| invalid())
}

fn header_pair(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), TransferError> {
    let name = HeaderName::from_bytes(name.to_ascii_lowercase().as_bytes())
        .map_err(|e| TransferError::InvalidHeader(e.to_string()))?;
    let value =
        HeaderValue::from_str(value).map_err(|e| TransferError::InvalidHeader(e.to_string()))?;
    Ok((name, value))
}

fn format_reqwest_error(err: &reqwest::Error) -> String {
    let mut msg = err.to_string();
    if let Some(url) = err.url() {
        let redacted = redact_url_for_logs(url);
        msg = msg.replace(url.as_str(), redacted.as_str());
    }
    msg
}

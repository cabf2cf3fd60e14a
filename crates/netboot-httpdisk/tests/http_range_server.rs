use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use hyper::header::{ACCEPT_ENCODING, ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use netboot_httpdisk::{HttpDisk, HttpDiskError, HttpTransport};
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerMode {
    Ranges,
    /// Behave like a static server without range support.
    IgnoreRange,
    /// Answer the first byte correctly but serve every other range one block further on.
    MisplacedRanges,
    NotFound,
}

#[derive(Default)]
struct Seen {
    ranges: Mutex<Vec<String>>,
    accept_encoding: Mutex<Vec<String>>,
}

async fn start_range_server(
    image: Vec<u8>,
    mode: ServerMode,
) -> (String, Arc<Seen>, oneshot::Sender<()>) {
    let image = Arc::new(image);
    let seen = Arc::new(Seen::default());

    let make_svc = {
        let image = image.clone();
        let seen = seen.clone();
        make_service_fn(move |_conn| {
            let image = image.clone();
            let seen = seen.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    handle_request(req, image.clone(), seen.clone(), mode)
                }))
            }
        })
    };

    let addr: SocketAddr = ([127, 0, 0, 1], 0).into();
    let builder = Server::try_bind(&addr).expect("bind");
    let local_addr = builder.local_addr();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = builder
        .serve(make_svc)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });

    tokio::spawn(server);

    (format!("http://{local_addr}/httpdisk.hdd"), seen, shutdown_tx)
}

async fn handle_request(
    req: Request<Body>,
    image: Arc<Vec<u8>>,
    seen: Arc<Seen>,
    mode: ServerMode,
) -> Result<Response<Body>, Infallible> {
    if *req.method() != Method::GET {
        let mut resp = Response::new(Body::empty());
        *resp.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
        return Ok(resp);
    }
    if let Some(v) = req.headers().get(ACCEPT_ENCODING).and_then(|v| v.to_str().ok()) {
        seen.accept_encoding.lock().unwrap().push(v.to_string());
    }
    let range = req
        .headers()
        .get(RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    if let Some(range) = &range {
        seen.ranges.lock().unwrap().push(range.clone());
    }

    if mode == ServerMode::NotFound {
        let mut resp = Response::new(Body::from("not found"));
        *resp.status_mut() = StatusCode::NOT_FOUND;
        return Ok(resp);
    }

    if let (ServerMode::Ranges | ServerMode::MisplacedRanges, Some(range)) = (mode, range) {
        return match parse_range_header(&range, image.len() as u64) {
            Ok((start, end_exclusive)) => {
                let (start, end_exclusive) = match mode {
                    ServerMode::MisplacedRanges if start > 0 => (
                        start + 512,
                        (end_exclusive + 512).min(image.len() as u64),
                    ),
                    _ => (start, end_exclusive),
                };
                let end_inclusive = end_exclusive - 1;
                let body = image[start as usize..end_exclusive as usize].to_vec();
                let mut resp = Response::new(Body::from(body));
                *resp.status_mut() = StatusCode::PARTIAL_CONTENT;
                resp.headers_mut().insert(
                    CONTENT_LENGTH,
                    (end_exclusive - start).to_string().parse().unwrap(),
                );
                resp.headers_mut()
                    .insert(ACCEPT_RANGES, "bytes".parse().unwrap());
                resp.headers_mut().insert(
                    CONTENT_RANGE,
                    format!("bytes {start}-{end_inclusive}/{}", image.len())
                        .parse()
                        .unwrap(),
                );
                Ok(resp)
            }
            Err(status) => {
                let mut resp = Response::new(Body::empty());
                *resp.status_mut() = status;
                Ok(resp)
            }
        };
    }

    let mut resp = Response::new(Body::from(image.as_ref().clone()));
    *resp.status_mut() = StatusCode::OK;
    resp.headers_mut()
        .insert(CONTENT_LENGTH, (image.len() as u64).to_string().parse().unwrap());
    Ok(resp)
}

fn parse_range_header(header: &str, total_size: u64) -> Result<(u64, u64), StatusCode> {
    // Only supports a single range: bytes=start-end
    let Some(spec) = header.trim().strip_prefix("bytes=") else {
        return Err(StatusCode::BAD_REQUEST);
    };
    let (start, end) = spec.split_once('-').ok_or(StatusCode::BAD_REQUEST)?;
    let start: u64 = start.parse().map_err(|_| StatusCode::BAD_REQUEST)?;
    let end_inclusive: u64 = end.parse().map_err(|_| StatusCode::BAD_REQUEST)?;
    if start >= total_size || end_inclusive < start {
        return Err(StatusCode::RANGE_NOT_SATISFIABLE);
    }
    Ok((start, (end_inclusive + 1).min(total_size)))
}

fn image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn reads_blocks_over_http() {
    let data = image(64 * 1024 + 100);
    let (url, seen, shutdown) = start_range_server(data.clone(), ServerMode::Ranges).await;

    let mut disk = HttpDisk::attach(&url, Arc::new(HttpTransport::new())).unwrap();
    disk.initialize(0).await.unwrap();
    assert_eq!(disk.block_size(), 512);
    assert_eq!(disk.block_count(), 128);

    let mut buf = vec![0u8; 4 * 512];
    disk.read(10, 4, &mut buf).await.unwrap();
    assert_eq!(buf, &data[10 * 512..14 * 512]);

    let mut last = vec![0u8; 512];
    disk.read(127, 1, &mut last).await.unwrap();
    assert_eq!(last, &data[127 * 512..128 * 512]);

    assert_eq!(
        *seen.ranges.lock().unwrap(),
        vec!["bytes=0-0", "bytes=5120-7167", "bytes=65024-65535"]
    );
    assert!(seen
        .accept_encoding
        .lock()
        .unwrap()
        .iter()
        .all(|v| v == "identity"));

    disk.detach().unwrap();
    let _ = shutdown.send(());
}

#[tokio::test]
async fn large_read_spans_many_body_chunks() {
    let data = image(1024 * 1024);
    let (url, _seen, shutdown) = start_range_server(data.clone(), ServerMode::Ranges).await;

    let mut disk = HttpDisk::attach(&url, Arc::new(HttpTransport::new())).unwrap();
    disk.initialize(4096).await.unwrap();
    assert_eq!(disk.block_count(), 256);

    let mut buf = vec![0u8; 128 * 4096];
    disk.read(64, 128, &mut buf).await.unwrap();
    assert_eq!(buf, &data[64 * 4096..192 * 4096]);

    disk.detach().unwrap();
    let _ = shutdown.send(());
}

#[tokio::test]
async fn server_without_range_support_fails_probe() {
    let data = image(8192);
    let (url, _seen, shutdown) = start_range_server(data, ServerMode::IgnoreRange).await;

    let mut disk = HttpDisk::attach(&url, Arc::new(HttpTransport::new())).unwrap();
    let err = disk.initialize(0).await.unwrap_err();
    assert!(
        matches!(err, HttpDiskError::ProbeFailed { expected: 1, actual: 1 }),
        "{err:?}"
    );

    disk.detach().unwrap();
    let _ = shutdown.send(());
}

#[tokio::test]
async fn missing_image_fails_probe() {
    let (url, _seen, shutdown) = start_range_server(image(8192), ServerMode::NotFound).await;

    let mut disk = HttpDisk::attach(&url, Arc::new(HttpTransport::new())).unwrap();
    let err = disk.initialize(0).await.unwrap_err();
    assert!(
        matches!(err, HttpDiskError::ProbeFailed { expected: 1, actual: 0 }),
        "{err:?}"
    );

    disk.detach().unwrap();
    let _ = shutdown.send(());
}

#[tokio::test]
async fn read_past_end_of_image_is_short() {
    let data = image(4096);
    let (url, _seen, shutdown) = start_range_server(data, ServerMode::Ranges).await;

    let mut disk = HttpDisk::attach(&url, Arc::new(HttpTransport::new())).unwrap();
    disk.initialize(0).await.unwrap();

    // Last block plus one that does not exist: the server clips the range.
    let mut buf = vec![0u8; 1024];
    let err = disk.read(7, 2, &mut buf).await.unwrap_err();
    assert!(
        matches!(err, HttpDiskError::ShortRead { expected: 1024, actual: 512 }),
        "{err:?}"
    );

    disk.detach().unwrap();
    let _ = shutdown.send(());
}

#[tokio::test]
async fn misplaced_partial_content_is_rejected() {
    let data = image(4096);
    let (url, seen, shutdown) = start_range_server(data, ServerMode::MisplacedRanges).await;

    let mut disk = HttpDisk::attach(&url, Arc::new(HttpTransport::new())).unwrap();
    disk.initialize(0).await.unwrap();
    assert_eq!(disk.block_count(), 8);

    // The body has the right length but belongs to block 2.
    let mut buf = vec![0u8; 512];
    let err = disk.read(1, 1, &mut buf).await.unwrap_err();
    assert!(
        matches!(err, HttpDiskError::ShortRead { expected: 512, actual: 0 }),
        "{err:?}"
    );
    assert!(buf.iter().all(|&b| b == 0));
    assert_eq!(
        seen.ranges.lock().unwrap().as_slice(),
        ["bytes=0-0", "bytes=512-1023"]
    );

    disk.detach().unwrap();
    let _ = shutdown.send(());
}

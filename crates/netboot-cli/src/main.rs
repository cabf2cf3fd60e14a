#![forbid(unsafe_code)]

mod config;
mod hexdump;

use std::fs::File;
use std::io::{self, BufWriter, IsTerminal, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use netboot_httpdisk::{HttpDisk, HttpDiskOptions, HttpTransport, MemTransport, Transport};
use netboot_sanboot::boot::BOOT_SECTOR_SIZE;
use netboot_sanboot::image::RAW_IMAGE_LOAD_ADDR;
use netboot_sanboot::{
    sanboot, BootContext, BootError, BootSectorEntry, DriveTable, Handoff, RealModeMemory,
    Settings, ShutdownFlags, TracingConsole, KEEP_SAN,
};
use tokio::runtime::Runtime;
use tracing_subscriber::EnvFilter;

use crate::config::{BootArgs, Cli, Command, DiskArgs, ReadArgs};
use crate::hexdump::hex_dump;

/// Largest single range request issued by `read`, in blocks and in bytes.
const MAX_BLOCKS_PER_REQUEST: u64 = 128;
const MAX_REQUEST_BYTES: u64 = 1 << 20;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    let runtime = Arc::new(
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("build async runtime")?,
    );

    match cli.command {
        Command::Boot(args) => boot(args, runtime),
        Command::Read(args) => read(args, &runtime),
    }
}

fn init_tracing(log_level: Option<&str>) {
    let filter = log_level
        .map(EnvFilter::new)
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    // stdout carries data (hex dumps); logs and boot messages go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .init();
}

fn transport(args: &DiskArgs) -> anyhow::Result<Arc<dyn Transport>> {
    if let Some(path) = &args.image {
        let image = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
        tracing::info!(
            "serving {} ({} bytes) in place of the root path",
            path.display(),
            image.len()
        );
        return Ok(Arc::new(MemTransport::new(image)));
    }

    let headers = args
        .headers
        .iter()
        .map(|h| config::parse_header_arg(h).ok_or_else(|| anyhow!("invalid --header {h:?}")))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let transport = HttpTransport::new()
        .with_request_headers(&headers)
        .context("invalid --header")?;
    Ok(Arc::new(transport))
}

fn disk_options(args: &DiskArgs) -> HttpDiskOptions {
    HttpDiskOptions {
        read_timeout: args.read_timeout_ms.map(Duration::from_millis),
    }
}

/// Dumps the loaded boot sector instead of jumping to it.
struct DumpHandoff;

impl Handoff for DumpHandoff {
    fn handoff(&mut self, drive: u8, memory: &RealModeMemory) -> BootError {
        tracing::info!(drive, "boot sector loaded at 0000:{RAW_IMAGE_LOAD_ADDR:04x}");
        if let Some(sector) = memory.read(RAW_IMAGE_LOAD_ADDR, BOOT_SECTOR_SIZE) {
            let mut out = io::stdout().lock();
            if let Err(err) = hex_dump(&mut out, u64::from(RAW_IMAGE_LOAD_ADDR), sector) {
                tracing::warn!(%err, "failed to dump boot sector");
            }
        }
        BootError::HandoffReturned
    }
}

fn boot(args: BootArgs, runtime: Arc<Runtime>) -> anyhow::Result<()> {
    let mut settings = Settings::new();
    if args.keep_san {
        settings.store(&KEEP_SAN, 1);
    }
    let mut drives = DriveTable::new();
    let mut entry = BootSectorEntry::new(DumpHandoff);
    let mut console = TracingConsole;
    let mut shutdown = ShutdownFlags::default();

    let mut ctx = BootContext {
        runtime,
        transport: transport(&args.disk)?,
        disk_options: disk_options(&args.disk),
        settings: &settings,
        drives: &mut drives,
        boot_entry: &mut entry,
        console: &mut console,
        shutdown: &mut shutdown,
    };
    let err = sanboot(&args.disk.root_path, &mut ctx);

    if shutdown.keep_devices {
        tracing::info!(
            drives = ?drives.drives().collect::<Vec<_>>(),
            "keeping SAN drives registered"
        );
    }
    match err {
        // The boot sector was found and dumped; there is nothing to execute it on.
        BootError::HandoffReturned => Ok(()),
        err => Err(anyhow::Error::new(err).context(format!("boot {}", args.disk.root_path))),
    }
}

fn read(args: ReadArgs, runtime: &Runtime) -> anyhow::Result<()> {
    let transport = transport(&args.disk)?;
    let mut out: Box<dyn Write> = match &args.out {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("create {}", path.display()))?,
        )),
        None => Box::new(io::stdout().lock()),
    };

    let mut disk = HttpDisk::attach_with_options(
        &args.disk.root_path,
        transport,
        disk_options(&args.disk),
    )
    .context("attach HTTP disk")?;

    let result = runtime.block_on(read_blocks(&mut disk, &args, &mut *out));
    disk.detach().context("detach HTTP disk")?;
    result?;
    out.flush().context("flush output")?;
    Ok(())
}

async fn read_blocks(disk: &mut HttpDisk, args: &ReadArgs, out: &mut dyn Write) -> anyhow::Result<()> {
    disk.initialize(args.block_size)
        .await
        .context("initialize HTTP disk")?;
    let block_size = disk.block_size();
    let block_count = disk.block_count();
    tracing::info!(block_size, block_count, "disk ready");

    let end = args
        .lba
        .checked_add(args.count)
        .ok_or_else(|| anyhow!("--lba + --count overflows"))?;
    if block_count != 0 && end > block_count {
        bail!("blocks {}..{end} are past the end of the disk ({block_count} blocks)", args.lba);
    }

    let blocks_per_request = (MAX_REQUEST_BYTES / u64::from(block_size))
        .clamp(1, MAX_BLOCKS_PER_REQUEST)
        .min(args.count.max(1));
    let buf_len = usize::try_from(blocks_per_request * u64::from(block_size))
        .context("read buffer size")?;
    let mut buf = Vec::new();
    buf.try_reserve_exact(buf_len)
        .with_context(|| format!("allocate {buf_len}-byte read buffer"))?;
    buf.resize(buf_len, 0u8);

    let mut lba = args.lba;
    while lba < end {
        let n = (end - lba).min(blocks_per_request);
        let len = (n * u64::from(block_size)) as usize;
        disk.read(lba, n, &mut buf[..len])
            .await
            .with_context(|| format!("read blocks {lba}..{}", lba + n))?;
        if args.out.is_some() {
            out.write_all(&buf[..len]).context("write output")?;
        } else {
            hex_dump(out, lba * u64::from(block_size), &buf[..len]).context("write output")?;
        }
        lba += n;
    }
    Ok(())
}

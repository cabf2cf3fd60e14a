use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Largest `--block-size` accepted.
pub const MAX_BLOCK_SIZE: u32 = 1 << 20;

#[derive(Parser, Debug)]
#[command(
    name = "netboot",
    about = "Boot from, or read blocks of, a disk image served over HTTP."
)]
pub struct Cli {
    /// Log filter (tracing-subscriber EnvFilter syntax). Falls back to `RUST_LOG`, then `info`.
    ///
    /// Environment variable: `NETBOOT_LOG`.
    #[arg(long, env = "NETBOOT_LOG", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Attach the image as BIOS drive 0x80 and load its boot sector.
    ///
    /// The boot sector is dumped instead of executed.
    Boot(BootArgs),
    /// Read blocks from the image.
    Read(ReadArgs),
}

#[derive(Args, Debug)]
pub struct DiskArgs {
    /// Disk image URL (`http://host/path`).
    ///
    /// Environment variable: `NETBOOT_ROOT_PATH`.
    #[arg(env = "NETBOOT_ROOT_PATH")]
    pub root_path: String,

    /// Serve this local file in place of the URL (no network access).
    #[arg(long, value_name = "FILE")]
    pub image: Option<PathBuf>,

    /// Give up on a transfer after this many milliseconds (default: wait forever).
    ///
    /// Environment variable: `NETBOOT_READ_TIMEOUT_MS`.
    #[arg(long, env = "NETBOOT_READ_TIMEOUT_MS", value_name = "MS")]
    pub read_timeout_ms: Option<u64>,

    /// Extra request header, `Name: value`. May be repeated.
    #[arg(long = "header", value_name = "NAME: VALUE")]
    pub headers: Vec<String>,
}

#[derive(Args, Debug)]
pub struct BootArgs {
    #[command(flatten)]
    pub disk: DiskArgs,

    /// Leave the drive registered if the boot fails.
    ///
    /// Environment variable: `NETBOOT_KEEP_SAN`.
    #[arg(long, env = "NETBOOT_KEEP_SAN")]
    pub keep_san: bool,
}

#[derive(Args, Debug)]
pub struct ReadArgs {
    #[command(flatten)]
    pub disk: DiskArgs,

    /// Block size in bytes (0 selects 512, at most 1 MiB).
    ///
    /// Environment variable: `NETBOOT_BLOCK_SIZE`.
    #[arg(
        long,
        env = "NETBOOT_BLOCK_SIZE",
        default_value_t = 0,
        value_parser = clap::value_parser!(u32).range(0..=i64::from(MAX_BLOCK_SIZE))
    )]
    pub block_size: u32,

    /// First block to read.
    #[arg(long, default_value_t = 0)]
    pub lba: u64,

    /// Number of blocks to read.
    #[arg(long, default_value_t = 1)]
    pub count: u64,

    /// Write the raw bytes here instead of a hex dump to stdout.
    #[arg(long, value_name = "FILE")]
    pub out: Option<PathBuf>,
}

/// Split `Name: value` into its parts.
pub fn parse_header_arg(arg: &str) -> Option<(String, String)> {
    let (name, value) = arg.split_once(':')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

use std::path::PathBuf;

use clap::Parser;
use log::{error, info};

use mkexofs::exofs::layout::{EXOFS_FORMAT_ALL, EXOFS_MIN_PID};
use mkexofs::exofs::mkfs::read_root_inode;
use mkexofs::exofs::{bootstrap_with, MkfsOptions};
use mkexofs::machine::ImageDevice;
use mkexofs::osd::OsdError;
use mkexofs::util::{format_unixtime, parse_osd_id};

const EXIT_FAILURE: i32 = 1;

/// Make an exofs filesystem on a partition of an OSD
#[derive(Debug, Parser)]
#[clap(name = "mkfs.exofs")]
struct Args {
  /// Partition that will hold the filesystem, decimal or 0x hex
  #[clap(short, long, parse(try_from_str = parse_osd_id))]
  pid: u64,

  /// Format the device first: size in MiB, bare or 0 for all space
  #[clap(long, require_equals = true, value_name = "MiB")]
  format: Option<Option<u64>>,

  /// Fail instead of removing an existing partition
  #[clap(short, long = "not_destructive")]
  not_destructive: bool,

  /// OSD name set when formatting
  #[clap(long)]
  osdname: Option<String>,

  /// OSD image to operate on
  device: PathBuf,
}

impl Args {
  fn format_capacity_bytes(&self) -> u64 {
    match self.format {
      None => 0,
      Some(None) | Some(Some(0)) => EXOFS_FORMAT_ALL,
      Some(Some(mib)) => mib.saturating_mul(1 << 20),
    }
  }
}

fn mkfs(args: &Args) -> i32 {
  if args.pid < EXOFS_MIN_PID {
    eprintln!(
      "mkfs.exofs: --pid=0x{:x} is reserved, minimum is {} (0x{:x})",
      args.pid, EXOFS_MIN_PID, EXOFS_MIN_PID
    );
    return EXIT_FAILURE;
  }

  let mut dev = match ImageDevice::open(&args.device) {
    Ok(dev) => dev,
    Err(err) => {
      eprintln!("mkfs.exofs: {err}");
      return err.errno();
    },
  };

  let options = MkfsOptions {
    pid: args.pid,
    destructive: !args.not_destructive,
    format_capacity_bytes: args.format_capacity_bytes(),
    osdname: args.osdname.clone(),
  };

  let result = bootstrap_with(&mut dev, &options);
  if result.is_ok() {
    match read_root_inode(&mut dev, args.pid) {
      Ok(inode) => info!("root inode mode {:o}, created {}", inode.mode, format_unixtime(inode.ctime)),
      Err(err) => error!("reading back root inode: {err}"),
    }
  }

  match result.and(dev.close()) {
    Ok(()) => 0,
    Err(OsdError::AlreadyExists) if args.not_destructive => {
      eprintln!(
        "pid 0x{:x} already exist and --not_destructive specified, will not remove an existing partition",
        args.pid
      );
      OsdError::AlreadyExists.errno()
    },
    Err(err) => {
      eprintln!("exofs_mkfs --pid=0x{:x} returned {}: {err}", args.pid, err.errno());
      err.errno()
    },
  }
}

pub fn main() {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

  let args = Args::parse();
  std::process::exit(mkfs(&args));
}

#[cfg(test)]
mod tests {
  use std::ffi::OsString;

  use super::*;

  #[test]
  fn format_flag_forms() {
    let args = Args::try_parse_from(["mkfs.exofs", "--pid=0x100", "osd0"]).unwrap();
    assert_eq!(args.format_capacity_bytes(), 0);

    let args = Args::try_parse_from(["mkfs.exofs", "--pid=256", "--format", "osd0"]).unwrap();
    assert_eq!(args.pid, 0x100);
    assert_eq!(args.format_capacity_bytes(), EXOFS_FORMAT_ALL);

    let args = Args::try_parse_from(["mkfs.exofs", "-p", "0x100", "--format=0", "osd0"]).unwrap();
    assert_eq!(args.format_capacity_bytes(), EXOFS_FORMAT_ALL);

    let args = Args::try_parse_from(["mkfs.exofs", "-p", "0x100", "--format=64", "osd0"]).unwrap();
    assert_eq!(args.format_capacity_bytes(), 64 << 20);
  }

  #[test]
  fn not_destructive_flag() {
    let args = Args::try_parse_from(["mkfs.exofs", "-p", "0x100", "--not_destructive", "osd0"]).unwrap();
    assert!(args.not_destructive);
    let args = Args::try_parse_from(["mkfs.exofs", "-p", "0x100", "-n", "osd0"]).unwrap();
    assert!(args.not_destructive);
  }

  #[test]
  fn pid_is_required() {
    assert!(Args::try_parse_from(["mkfs.exofs", "osd0"]).is_err());
    assert!(Args::try_parse_from(["mkfs.exofs", "--pid=zero", "osd0"]).is_err());
  }

  #[test]
  fn reserved_pid_exits_with_failure() {
    let args = Args::try_parse_from(["mkfs.exofs", "--pid=0x10", "osd0"]).unwrap();
    assert_eq!(mkfs(&args), EXIT_FAILURE);
  }

  #[test]
  fn existing_partition_not_destructive() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let path = file.path().to_str().unwrap();

    let args = Args::try_parse_from(["mkfs.exofs", "--pid=0x100", path]).unwrap();
    assert_eq!(mkfs(&args), 0);

    let args = Args::try_parse_from(["mkfs.exofs", "--pid=0x100", "-n", path]).unwrap();
    assert_eq!(mkfs(&args), OsdError::AlreadyExists.errno());

    let args = Args::try_parse_from(["mkfs.exofs", "--pid=0x100", path]).unwrap();
    assert_eq!(mkfs(&args), 0);
  }

  #[test]
  fn missing_device_exits_with_errno() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nope.yaml");
    let args = Args::try_parse_from([
      OsString::from("mkfs.exofs"),
      OsString::from("--pid=0x100"),
      path.into_os_string(),
    ]).unwrap();

    assert_eq!(mkfs(&args), mkexofs::osd::error::ENODEV);
  }
}

// vim:ts=2 sw=2

//! Lays a fresh exofs onto one partition of an OSD.
//!
//! The steps run strictly in order and each one is a single request:
//! format (optional), create partition, create the superblock and root
//! directory objects, write both, then set the root inode attribute. The
//! first failing step ends the run. Nothing already done is undone.

use std::time::Duration;

use log::{debug, error, info, warn};

use super::layout::*;
use crate::osd::device::OsdDevice;
use crate::osd::error::OsdError;
use crate::osd::request::{execute_and_finish, Request, DEFAULT_TIMEOUT};
use crate::osd::sec::{CredentialIssuer, NoSecurity};
use crate::osd::types::*;
use crate::util::unixtime;

/// Formatting a large device can take a while.
pub const FORMAT_TIMEOUT: Duration = Duration::from_secs(DEFAULT_TIMEOUT.as_secs() * 10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MkfsOptions {
  pub pid: OsdId,
  /// Remove an existing partition of the same id and try again
  pub destructive: bool,
  /// `0` skips the format, [`EXOFS_FORMAT_ALL`] formats all space
  pub format_capacity_bytes: u64,
  /// Set as the OSD name when formatting
  pub osdname: Option<String>,
}

impl Default for MkfsOptions {
  fn default() -> Self {
    Self {
      pid: EXOFS_MIN_PID,
      destructive: true,
      format_capacity_bytes: 0,
      osdname: None,
    }
  }
}

pub struct Mkfs<'d, I = NoSecurity> {
  dev: &'d mut dyn OsdDevice,
  issuer: I,
}

impl<'d> Mkfs<'d> {
  pub fn new(dev: &'d mut dyn OsdDevice) -> Self {
    Self::with_issuer(dev, NoSecurity)
  }
}

impl<'d, I: CredentialIssuer> Mkfs<'d, I> {
  pub fn with_issuer(dev: &'d mut dyn OsdDevice, issuer: I) -> Self {
    Self { dev, issuer }
  }

  /// One request against `obj`: start, let `build` fill it, finalize with a
  /// fresh credential, execute, end.
  fn kick<F>(&mut self, obj: &ObjectId, what: &str, build: F) -> Result<(), OsdError>
  where
    F: FnOnce(&mut Request<'_>) -> Result<(), OsdError>,
  {
    let credential = self.issuer.issue(obj, false, true)?;
    let mut request = Request::start(&mut *self.dev)?;
    build(&mut request)?;

    execute_and_finish(request, credential).map_err(|err| {
      debug!("execute {what} on {obj} => {err}");
      err
    })
  }

  fn step<F>(&mut self, what: &str, run: F) -> Result<(), OsdError>
  where
    F: FnOnce(&mut Self) -> Result<(), OsdError>,
  {
    info!("{what}...");
    match run(self) {
      Ok(()) => {
        info!("{what}... OK");
        Ok(())
      },
      Err(err) => {
        error!("{what}: {err}");
        Err(err)
      },
    }
  }

  /// `capacity == 0` uses all available space.
  pub fn format(&mut self, capacity: u64, osdname: Option<&str>) -> Result<(), OsdError> {
    self.kick(&OSD_ROOT_OBJECT, "format", |request| {
      request.format(capacity)?.set_timeout(FORMAT_TIMEOUT)?;
      if let Some(name) = osdname {
        request.add_set_attr_list(&[Attr::set(
          OSD_APAGE_ROOT_INFORMATION,
          OSD_ATTR_RI_OSD_NAME,
          name.as_bytes(),
        )])?;
      }
      Ok(())
    })
  }

  pub fn remove_partition(&mut self, pid: OsdId) -> Result<(), OsdError> {
    self.kick(&ObjectId::partition(pid), "remove partition", |request| {
      request.remove_partition(pid)?;
      Ok(())
    })
  }

  /// Any failure to create comes out as `AlreadyExists`, except running
  /// out of requests. With `destructive` a failed create is followed by one
  /// remove and one more create.
  pub fn create_partition(&mut self, pid: OsdId, destructive: bool) -> Result<(), OsdError> {
    for attempt in 0..=1 {
      let result = self.kick(&ObjectId::partition(pid), "create partition", |request| {
        request.create_partition(pid)?;
        Ok(())
      });

      match result {
        Ok(()) => return Ok(()),
        Err(OsdError::ResourceExhausted) => return Err(OsdError::ResourceExhausted),
        Err(err) if attempt == 0 && destructive => {
          warn!("partition 0x{pid:x}: {err}, removing it and trying again");
          match self.remove_partition(pid) {
            Ok(()) => {},
            Err(OsdError::ResourceExhausted) => return Err(OsdError::ResourceExhausted),
            Err(err) => warn!("remove partition 0x{pid:x}: {err}"),
          }
        },
        Err(_) => break,
      }
    }

    Err(OsdError::AlreadyExists)
  }

  pub fn create(&mut self, obj: &ObjectId) -> Result<(), OsdError> {
    self.kick(obj, "create", |request| {
      request.create_object(obj)?;
      Ok(())
    })
  }

  pub fn write_super(&mut self, obj: &ObjectId) -> Result<(), OsdError> {
    let data = Superblock::new_fs().to_bytes();
    self.kick(obj, "write super", |request| {
      request.write(obj, 0, &data)?;
      Ok(())
    })
  }

  pub fn write_rootdir(&mut self, obj: &ObjectId) -> Result<(), OsdError> {
    let ino = obj.id
      .checked_sub(EXOFS_OBJ_OFF)
      .ok_or(OsdError::InvalidArgument("object id below inode range"))?;
    let block = root_dir_block(ino)?;
    self.kick(obj, "write rootdir", |request| {
      request.write(obj, 0, &block)?;
      Ok(())
    })
  }

  pub fn set_inode(&mut self, obj: &ObjectId, size: u64, mode: FileMode) -> Result<(), OsdError> {
    let inode = InodeRecord::new_dir(size, mode, unixtime(), rand::random());
    debug!("inode of {obj}: {inode:?}");

    self.kick(obj, "set inode", |request| {
      request
        .set_attributes(obj)?
        .add_set_attr_list(&[Attr::set(EXOFS_APAGE_FS_DATA, EXOFS_ATTR_INODE_DATA, &inode.to_bytes())])?;
      Ok(())
    })
  }

  pub fn run(&mut self, options: &MkfsOptions) -> Result<(), OsdError> {
    let MkfsOptions { pid, destructive, format_capacity_bytes, osdname } = options;
    let (pid, destructive) = (*pid, *destructive);

    if pid < EXOFS_MIN_PID {
      error!("partition 0x{pid:x} is reserved, minimum is 0x{EXOFS_MIN_PID:x}");
      return Err(OsdError::InvalidArgument("partition id below minimum"));
    }

    let obj_super = ObjectId::new(pid, EXOFS_SUPER_ID);
    let obj_root = ObjectId::new(pid, EXOFS_ROOT_ID);

    info!("setting up exofs on partition 0x{pid:x}");

    if *format_capacity_bytes > 0 {
      if let Some(name) = osdname {
        info!("formatting osdname=[{name}]");
      }
      let capacity = match *format_capacity_bytes {
        EXOFS_FORMAT_ALL => {
          info!("formatting all available space");
          0
        },
        bytes => {
          info!("formatting {} MiB", bytes >> 20);
          bytes
        },
      };
      self.step("formatting", |mkfs| mkfs.format(capacity, osdname.as_deref()))?;
    }

    self.step("creating partition", |mkfs| mkfs.create_partition(pid, destructive))?;
    self.step("creating superblock", |mkfs| mkfs.create(&obj_super))?;
    self.step("creating root directory", |mkfs| mkfs.create(&obj_root))?;
    self.step("writing superblock", |mkfs| mkfs.write_super(&obj_super))?;
    self.step("writing root directory", |mkfs| mkfs.write_rootdir(&obj_root))?;
    self.step("writing root inode", |mkfs| {
      mkfs.set_inode(&obj_root, EXOFS_BLKSIZE as u64, root_dir_mode())
    })?;

    info!("mkfs complete");
    Ok(())
  }
}

/// Make an exofs on partition `pid` of `dev`.
pub fn bootstrap(dev: &mut dyn OsdDevice, pid: OsdId, destructive: bool, format_capacity_bytes: u64)
  -> Result<(), OsdError> {
  bootstrap_with(dev, &MkfsOptions {
    pid,
    destructive,
    format_capacity_bytes,
    osdname: None,
  })
}

pub fn bootstrap_with(dev: &mut dyn OsdDevice, options: &MkfsOptions) -> Result<(), OsdError> {
  Mkfs::new(dev).run(options)
}

/// Up to `len` bytes of `obj` from offset 0.
pub fn read_object(dev: &mut dyn OsdDevice, obj: &ObjectId, len: u64) -> Result<Vec<u8>, OsdError> {
  let credential = NoSecurity.issue(obj, true, false)?;
  let mut request = Request::start(dev)?;
  request.read(obj, 0, len)?;
  request.finalize(credential)?;
  request.execute()?;

  Ok(request.data_in().to_vec())
}

pub fn read_superblock(dev: &mut dyn OsdDevice, pid: OsdId) -> Result<Superblock, OsdError> {
  let data = read_object(dev, &ObjectId::new(pid, EXOFS_SUPER_ID), Superblock::SIZE as u64)?;
  Superblock::from_bytes(&data)
}

pub fn read_root_dir(dev: &mut dyn OsdDevice, pid: OsdId) -> Result<Vec<DirEntry>, OsdError> {
  let block = read_object(dev, &ObjectId::new(pid, EXOFS_ROOT_ID), EXOFS_BLKSIZE as u64)?;
  parse_dir_block(&block)
}

/// The inode record stored on the root directory object.
pub fn read_root_inode(dev: &mut dyn OsdDevice, pid: OsdId) -> Result<InodeRecord, OsdError> {
  let obj = ObjectId::new(pid, EXOFS_ROOT_ID);
  let credential = NoSecurity.issue(&obj, true, false)?;

  let mut request = Request::start(dev)?;
  request
    .get_attributes(&obj)?
    .add_get_attr_list(&[AttrGet::def(EXOFS_APAGE_FS_DATA, EXOFS_ATTR_INODE_DATA, InodeRecord::SIZE as u16)])?;
  request.finalize(credential)?;
  request.execute()?;

  let attrs = request.decoded_get_list()?;
  let value = attrs
    .first()
    .and_then(|attr| attr.value.as_deref())
    .ok_or(OsdError::NotFound)?;
  InodeRecord::from_bytes(value)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::osd::device::{CommandBlock, CommandKind, Outcome};
  use crate::osd::memosd::{FailurePolicy, MemOsd};

  fn count(osd: &MemOsd, kind: CommandKind) -> usize {
    osd.journal().iter().filter(|entry| entry.kind == kind).count()
  }

  fn occupied(pid: OsdId) -> MemOsd {
    let mut osd = MemOsd::new(1 << 30);
    let mut mkfs = Mkfs::new(&mut osd);
    mkfs.create_partition(pid, false).unwrap();
    mkfs.create(&ObjectId::new(pid, 0x12345)).unwrap();
    osd.clear_journal();
    osd
  }

  /// Remembers the timeout every command was sent with.
  struct TimeoutRecorder {
    inner: MemOsd,
    seen: Vec<(CommandKind, Duration)>,
  }

  impl OsdDevice for TimeoutRecorder {
    fn alloc_request(&mut self) -> Result<(), OsdError> {
      self.inner.alloc_request()
    }

    fn release_request(&mut self) {
      self.inner.release_request()
    }

    fn execute(&mut self, block: &CommandBlock<'_>) -> Outcome {
      self.seen.push((block.command.kind(), block.timeout));
      self.inner.execute(block)
    }

    fn name(&self) -> &str {
      "timeout recorder"
    }
  }

  #[test]
  fn reserved_pids_are_rejected_before_any_command() {
    for pid in [0, 1, 0x42, EXOFS_MIN_PID - 1] {
      let mut osd = MemOsd::new(1 << 30);
      let result = bootstrap(&mut osd, pid, true, EXOFS_FORMAT_ALL);

      assert!(matches!(result, Err(OsdError::InvalidArgument(_))));
      assert!(osd.journal().is_empty());
      assert_eq!(osd.outstanding_requests(), 0);
    }
  }

  #[test]
  fn end_to_end() {
    let mut osd = MemOsd::new(1 << 30);
    bootstrap(&mut osd, 0x100, true, 0).unwrap();

    assert_eq!(osd.partitions.keys().copied().collect::<Vec<_>>(), vec![0x100]);
    let objects = &osd.partition(0x100).unwrap().objects;
    assert_eq!(objects.keys().copied().collect::<Vec<_>>(), vec![EXOFS_SUPER_ID, EXOFS_ROOT_ID]);

    let inode = read_root_inode(&mut osd, 0x100).unwrap();
    assert_eq!(inode.mode(), root_dir_mode());
    assert_eq!(inode.mode, 0o040000 | (0o777 & !0o022));
    assert_eq!(inode.size, EXOFS_BLKSIZE as u64);
    assert_eq!(inode.links_count, 2);
    assert_eq!(inode.atime, inode.ctime);
    assert_eq!(inode.ctime, inode.mtime);

    assert_eq!(read_superblock(&mut osd, 0x100).unwrap(), Superblock::new_fs());
    let entries = read_root_dir(&mut osd, 0x100).unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|entry| entry.inode_no == EXOFS_ROOT_INO));

    assert_eq!(osd.outstanding_requests(), 0);
    assert_eq!(count(&osd, CommandKind::Format), 0);
  }

  #[test]
  fn commands_run_in_order() {
    let mut osd = MemOsd::new(1 << 30);
    bootstrap(&mut osd, 0x100, true, EXOFS_FORMAT_ALL).unwrap();

    let kinds: Vec<CommandKind> = osd.journal().iter().map(|entry| entry.kind).collect();
    assert_eq!(kinds, vec![
      CommandKind::Format,
      CommandKind::CreatePartition,
      CommandKind::CreateObject,
      CommandKind::CreateObject,
      CommandKind::Write,
      CommandKind::Write,
      CommandKind::SetAttributes,
    ]);
    assert_eq!(osd.journal()[2].target, ObjectId::new(0x100, EXOFS_SUPER_ID));
    assert_eq!(osd.journal()[3].target, ObjectId::new(0x100, EXOFS_ROOT_ID));
  }

  #[test]
  fn destructive_replaces_existing_partition() {
    let mut osd = occupied(0x100);
    bootstrap(&mut osd, 0x100, true, 0).unwrap();

    assert_eq!(count(&osd, CommandKind::RemovePartition), 1);
    assert_eq!(count(&osd, CommandKind::CreatePartition), 2);
    assert_eq!(osd.partition(0x100).unwrap().objects.len(), 2);
  }

  #[test]
  fn not_destructive_keeps_existing_partition() {
    let mut osd = occupied(0x100);
    let result = bootstrap(&mut osd, 0x100, false, 0);

    assert_eq!(result, Err(OsdError::AlreadyExists));
    assert_eq!(count(&osd, CommandKind::RemovePartition), 0);
    assert_eq!(count(&osd, CommandKind::CreatePartition), 1);
    assert_eq!(count(&osd, CommandKind::CreateObject), 0);
    assert!(osd.object(&ObjectId::new(0x100, 0x12345)).is_some());
  }

  #[test]
  fn retry_is_bounded_to_one() {
    let mut osd = MemOsd::new(1 << 30);
    osd.set_policy(FailurePolicy::FailOn(CommandKind::CreatePartition));
    let result = bootstrap(&mut osd, 0x100, true, 0);

    assert_eq!(result, Err(OsdError::AlreadyExists));
    assert_eq!(count(&osd, CommandKind::CreatePartition), 2);
    assert_eq!(count(&osd, CommandKind::RemovePartition), 1);
    assert_eq!(count(&osd, CommandKind::CreateObject), 0);
  }

  #[test]
  fn layout_is_identical_across_runs() {
    let mut first = MemOsd::new(1 << 30);
    let mut second = MemOsd::new(1 << 30);
    bootstrap(&mut first, 0x100, true, EXOFS_FORMAT_ALL).unwrap();
    bootstrap(&mut second, 0x100, true, EXOFS_FORMAT_ALL).unwrap();

    for id in [EXOFS_SUPER_ID, EXOFS_ROOT_ID] {
      let obj = ObjectId::new(0x100, id);
      assert_eq!(first.object(&obj).unwrap().data, second.object(&obj).unwrap().data);
    }

    let strip = |mut inode: InodeRecord| {
      inode.generation = 0;
      inode.atime = 0;
      inode.ctime = 0;
      inode.mtime = 0;
      inode
    };
    assert_eq!(
      strip(read_root_inode(&mut first, 0x100).unwrap()),
      strip(read_root_inode(&mut second, 0x100).unwrap())
    );
  }

  #[test]
  fn format_wipes_other_partitions() {
    let mut osd = occupied(0x200);
    bootstrap_with(&mut osd, &MkfsOptions {
      pid: 0x100,
      format_capacity_bytes: EXOFS_FORMAT_ALL,
      osdname: Some("osd0".to_owned()),
      ..MkfsOptions::default()
    }).unwrap();

    assert!(osd.partition(0x200).is_none());
    assert!(osd.partition(0x100).is_some());
    assert_eq!(osd.capacity, 1 << 30);
    assert_eq!(
      osd.root_attrs.get(&AttrKey::new(OSD_APAGE_ROOT_INFORMATION, OSD_ATTR_RI_OSD_NAME)),
      Some(&b"osd0".to_vec())
    );
  }

  #[test]
  fn format_with_capacity() {
    let mut osd = MemOsd::new(1 << 30);
    bootstrap(&mut osd, 0x100, true, 64 << 20).unwrap();
    assert_eq!(osd.capacity, 64 << 20);
  }

  #[test]
  fn format_gets_long_timeout() {
    let mut dev = TimeoutRecorder { inner: MemOsd::new(1 << 30), seen: Vec::new() };
    bootstrap(&mut dev, 0x100, true, EXOFS_FORMAT_ALL).unwrap();

    assert_eq!(dev.seen[0], (CommandKind::Format, FORMAT_TIMEOUT));
    assert_eq!(FORMAT_TIMEOUT, Duration::from_secs(600));
    assert!(dev.seen[1..].iter().all(|(_, timeout)| *timeout == DEFAULT_TIMEOUT));
  }

  #[test]
  fn format_timeout_aborts() {
    let mut osd = MemOsd::new(1 << 30);
    osd.set_policy(FailurePolicy::TimeOutOn(CommandKind::Format));

    assert_eq!(bootstrap(&mut osd, 0x100, true, EXOFS_FORMAT_ALL), Err(OsdError::Timeout));
    assert_eq!(count(&osd, CommandKind::CreatePartition), 0);
  }

  #[test]
  fn failed_step_aborts_without_rollback() {
    let mut osd = MemOsd::new(1 << 30);
    osd.set_policy(FailurePolicy::FailOn(CommandKind::Write));

    assert_eq!(bootstrap(&mut osd, 0x100, true, 0), Err(OsdError::DeviceIo));
    assert_eq!(count(&osd, CommandKind::Write), 1);
    assert_eq!(count(&osd, CommandKind::SetAttributes), 0);
    assert_eq!(osd.partition(0x100).unwrap().objects.len(), 2);
    assert_eq!(osd.outstanding_requests(), 0);
  }

  #[test]
  fn nth_command_failure_aborts() {
    let mut osd = MemOsd::new(1 << 30);
    // create partition, create superblock, create root
    osd.set_policy(FailurePolicy::FailNth(3));

    assert_eq!(bootstrap(&mut osd, 0x100, true, 0), Err(OsdError::DeviceIo));
    assert_eq!(osd.journal().len(), 3);
    assert_eq!(osd.partition(0x100).unwrap().objects.len(), 1);
  }

  #[test]
  fn small_device_runs_out_of_space() {
    let mut osd = MemOsd::new(1024);
    assert_eq!(bootstrap(&mut osd, 0x100, true, 0), Err(OsdError::OutOfSpace));
    assert_eq!(count(&osd, CommandKind::Write), 2);
  }

  #[test]
  fn no_memory_is_resource_exhausted() {
    let mut osd = MemOsd::new(1 << 30);
    osd.set_policy(FailurePolicy::NoMemory);

    assert_eq!(bootstrap(&mut osd, 0x100, true, 0), Err(OsdError::ResourceExhausted));
    assert!(osd.journal().is_empty());
  }
}

// vim:ts=2 sw=2

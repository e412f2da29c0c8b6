//! On-disk records of exofs. All multi-byte fields are little-endian.

use std::io::Write;
use std::mem::size_of;

use crate::osd::error::OsdError;
use crate::osd::types::{OsdId, OSD_APAGE_APP_DEFINED_FIRST};

pub const EXOFS_SUPER_ID: OsdId = 0x10000;
pub const EXOFS_ROOT_ID: OsdId = 0x10002;
/// Object id of inode `n` is `n + EXOFS_OBJ_OFF`.
pub const EXOFS_OBJ_OFF: OsdId = 0x10000;
pub const EXOFS_ROOT_INO: u64 = EXOFS_ROOT_ID - EXOFS_OBJ_OFF;

pub const EXOFS_BLKSHIFT: u32 = 12;
pub const EXOFS_BLKSIZE: usize = 1 << EXOFS_BLKSHIFT;

pub const EXOFS_SUPER_MAGIC: u16 = 0x5DF5;
/// First inode number handed out after mkfs.
pub const EXOFS_INITIAL_NEXTID: u64 = 4;

/// Partitions below this id are reserved.
pub const EXOFS_MIN_PID: OsdId = 0x100;
/// Format sentinel: use all the space the device has.
pub const EXOFS_FORMAT_ALL: u64 = u64::MAX;

pub const EXOFS_APAGE_FS_DATA: u32 = OSD_APAGE_APP_DEFINED_FIRST + 3;
pub const EXOFS_ATTR_INODE_DATA: u32 = 1;

pub const EXOFS_FT_UNKNOWN: u8 = 0;
pub const EXOFS_FT_REG_FILE: u8 = 1;
pub const EXOFS_FT_DIR: u8 = 2;

/// Record length of a directory entry holding a `name_len`-byte name.
pub const fn dir_rec_len(name_len: usize) -> usize {
  (name_len + 8 + 4 + 3) & !3
}

fn take<const N: usize>(bytes: &mut Vec<u8>, what: &'static str) -> Result<[u8; N], OsdError> {
  if bytes.len() < N {
    return Err(OsdError::Corrupted(what));
  }
  bytes
    .drain(0..N)
    .as_slice()
    .try_into()
    .map_err(|_| OsdError::Corrupted(what))
}

//     type   (4 bits, S_IFMT >> 12)
//     |    suid/sgid/sticky
//     |    |   user
//     |    |   |   group
//     |    |   |   |   others
//     |    |   |   |   |
//     tttt sss rwx rwx rwx
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMode(pub u16);

pub enum FileModeType {
  Fifo = 0o01,
  Char = 0o02,
  Dir = 0o04,
  Block = 0o06,
  File = 0o10,
  Symlink = 0o12,
  Socket = 0o14,
}

impl Default for FileMode {
  fn default() -> Self {
    Self(0o777)
  }
}

impl FileMode {
  pub fn new(raw: u16) -> Self {
    Self(raw)
  }

  pub fn zero() -> Self {
    Self(0)
  }

  pub fn r#type(&self) -> u8 {
    (self.0 >> 12) as u8
  }

  pub fn user(&self) -> u8 {
    ((self.0 >> 6) & 0o7) as u8
  }

  pub fn group(&self) -> u8 {
    ((self.0 >> 3) & 0o7) as u8
  }

  pub fn others(&self) -> u8 {
    (self.0 & 0o7) as u8
  }

  pub fn with_type(&self, r#type: FileModeType) -> Self {
    Self((self.0 & 0o7777) | ((r#type as u16) << 12))
  }

  /// Clear the permission bits set in `umask`.
  pub fn with_umask(&self, umask: u16) -> Self {
    Self(self.0 & !(umask & 0o777))
  }

  pub fn is_dir(&self) -> bool {
    self.r#type() == FileModeType::Dir as u8
  }

  pub fn get_raw(&self) -> u16 {
    self.0
  }
}

/// Mode of a freshly made root directory: `drwxr-xr-x`.
pub fn root_dir_mode() -> FileMode {
  FileMode::default()
    .with_umask(0o022)
    .with_type(FileModeType::Dir)
}

// 8 + 4 + 2 + 2
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
  /// Highest inode number handed out so far plus one
  pub nextid: u64,
  pub numfiles: u32,
  pub magic: u16,
  /// Set until the first mount
  pub newfs: u16,
}

impl Superblock {
  pub const SIZE: usize = 16;

  pub fn new_fs() -> Self {
    Self {
      nextid: EXOFS_INITIAL_NEXTID,
      numfiles: 0,
      magic: EXOFS_SUPER_MAGIC,
      newfs: 1,
    }
  }

  pub fn to_bytes(&self) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(Self::SIZE);
    bytes.extend_from_slice(&self.nextid.to_le_bytes());
    bytes.extend_from_slice(&self.numfiles.to_le_bytes());
    bytes.extend_from_slice(&self.magic.to_le_bytes());
    bytes.extend_from_slice(&self.newfs.to_le_bytes());
    bytes
  }

  pub fn from_bytes(bytes: &[u8]) -> Result<Self, OsdError> {
    let mut bytes = bytes.get(0..Self::SIZE).ok_or(OsdError::Corrupted("short superblock"))?.to_vec();

    let nextid = u64::from_le_bytes(take(&mut bytes, "superblock")?);
    let numfiles = u32::from_le_bytes(take(&mut bytes, "superblock")?);
    let magic = u16::from_le_bytes(take(&mut bytes, "superblock")?);
    let newfs = u16::from_le_bytes(take(&mut bytes, "superblock")?);

    if magic != EXOFS_SUPER_MAGIC {
      return Err(OsdError::Corrupted("bad superblock magic"));
    }

    Ok(Self {
      nextid,
      numfiles,
      magic,
      newfs,
    })
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
  pub inode_no: u64,
  pub rec_len: u16,
  pub file_type: u8,
  pub name: Vec<u8>,
}

impl DirEntry {
  /// Fixed part before the name.
  pub const HEADER_LEN: usize = 8 + 2 + 1 + 1;

  pub fn new(inode_no: u64, file_type: u8, name: &[u8], rec_len: u16) -> Self {
    Self {
      inode_no,
      rec_len,
      file_type,
      name: name.to_owned(),
    }
  }

  /// Appends the entry padded out to `rec_len`.
  pub fn write_to(&self, block: &mut Vec<u8>) -> Result<(), OsdError> {
    let name_len: u8 = self.name
      .len()
      .try_into()
      .map_err(|_| OsdError::InvalidArgument("directory entry name too long"))?;
    if (self.rec_len as usize) < dir_rec_len(self.name.len()) {
      return Err(OsdError::InvalidArgument("directory entry record too short"));
    }

    let start = block.len();
    block.extend_from_slice(&self.inode_no.to_le_bytes());
    block.extend_from_slice(&self.rec_len.to_le_bytes());
    block.push(name_len);
    block.push(self.file_type);
    block.extend_from_slice(&self.name);
    block.resize(start + self.rec_len as usize, 0);
    Ok(())
  }
}

/// The first block of a new directory: `.` and `..`, with `..` taking
/// the rest of the block. Both point at `ino`.
pub fn root_dir_block(ino: u64) -> Result<Vec<u8>, OsdError> {
  let dot_len = dir_rec_len(1);
  let entries = [
    DirEntry::new(ino, EXOFS_FT_DIR, b".", dot_len as u16),
    DirEntry::new(ino, EXOFS_FT_DIR, b"..", (EXOFS_BLKSIZE - dot_len) as u16),
  ];

  let mut block = Vec::with_capacity(EXOFS_BLKSIZE);
  for entry in &entries {
    entry.write_to(&mut block)?;
  }
  Ok(block)
}

/// Walks the entries of one directory block.
pub fn parse_dir_block(block: &[u8]) -> Result<Vec<DirEntry>, OsdError> {
  let mut entries = Vec::new();
  let mut pos = 0;

  while pos + DirEntry::HEADER_LEN <= block.len() {
    let mut header = block[pos..pos + DirEntry::HEADER_LEN].to_vec();
    let inode_no = u64::from_le_bytes(take(&mut header, "directory entry")?);
    let rec_len = u16::from_le_bytes(take(&mut header, "directory entry")?);
    let [name_len, file_type] = take::<2>(&mut header, "directory entry")?;

    if (rec_len as usize) < dir_rec_len(name_len as usize) || pos + rec_len as usize > block.len() {
      return Err(OsdError::Corrupted("directory entry overruns block"));
    }

    let name_start = pos + DirEntry::HEADER_LEN;
    entries.push(DirEntry {
      inode_no,
      rec_len,
      file_type,
      name: block[name_start..name_start + name_len as usize].to_vec(),
    });
    pos += rec_len as usize;
  }

  Ok(entries)
}

// 8 + 2 + 2 + 4 + 4 + 4 + 4 + 4 + 4 + 4 + (4 * 5) + 4
/// Inode record kept in the inode attribute of the object backing it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InodeRecord {
  pub size: u64,
  pub mode: u16,
  pub links_count: u16,
  pub uid: u32,
  pub gid: u32,
  pub atime: u32,
  pub ctime: u32,
  pub mtime: u32,
  pub flags: u32,
  pub generation: u32,
  /// Device numbers or inline symlink target
  pub data: [u32; 5],
}

impl InodeRecord {
  pub const SIZE: usize = 64;

  /// A directory with two links stamped `now`.
  pub fn new_dir(size: u64, mode: FileMode, now: u32, generation: u32) -> Self {
    Self {
      size,
      mode: mode.get_raw(),
      links_count: 2,
      uid: 0,
      gid: 0,
      atime: now,
      ctime: now,
      mtime: now,
      flags: 0,
      generation,
      data: [0; 5],
    }
  }

  pub fn mode(&self) -> FileMode {
    FileMode::new(self.mode)
  }

  pub fn to_bytes(&self) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(Self::SIZE);
    let fields: [&[u8]; 10] = [
      &self.size.to_le_bytes(),
      &self.mode.to_le_bytes(),
      &self.links_count.to_le_bytes(),
      &self.uid.to_le_bytes(),
      &self.gid.to_le_bytes(),
      &self.atime.to_le_bytes(),
      &self.ctime.to_le_bytes(),
      &self.mtime.to_le_bytes(),
      &self.flags.to_le_bytes(),
      &self.generation.to_le_bytes(),
    ];
    for field in fields {
      // Writing to a Vec never fails
      let _ = bytes.write_all(field);
    }
    bytes.extend(self.data.iter().flat_map(|word| word.to_le_bytes()));
    bytes.resize(Self::SIZE, 0);
    bytes
  }

  pub fn from_bytes(bytes: &[u8]) -> Result<Self, OsdError> {
    let mut bytes = bytes.get(0..Self::SIZE).ok_or(OsdError::Corrupted("short inode record"))?.to_vec();

    let size = u64::from_le_bytes(take(&mut bytes, "inode")?);
    let mode = u16::from_le_bytes(take(&mut bytes, "inode")?);
    let links_count = u16::from_le_bytes(take(&mut bytes, "inode")?);
    let uid = u32::from_le_bytes(take(&mut bytes, "inode")?);
    let gid = u32::from_le_bytes(take(&mut bytes, "inode")?);
    let atime = u32::from_le_bytes(take(&mut bytes, "inode")?);
    let ctime = u32::from_le_bytes(take(&mut bytes, "inode")?);
    let mtime = u32::from_le_bytes(take(&mut bytes, "inode")?);
    let flags = u32::from_le_bytes(take(&mut bytes, "inode")?);
    let generation = u32::from_le_bytes(take(&mut bytes, "inode")?);

    let mut data = [0u32; 5];
    for word in data.iter_mut() {
      *word = u32::from_le_bytes(take(&mut bytes, "inode")?);
    }

    Ok(Self {
      size,
      mode,
      links_count,
      uid,
      gid,
      atime,
      ctime,
      mtime,
      flags,
      generation,
      data,
    })
  }
}


// vim:ts=2 sw=2

use thiserror::Error;

pub const ENOENT: i32 = 2;
pub const EIO: i32 = 5;
pub const ENOMEM: i32 = 12;
pub const EACCES: i32 = 13;
pub const EFAULT: i32 = 14;
pub const EEXIST: i32 = 17;
pub const ENODEV: i32 = 19;
pub const EINVAL: i32 = 22;
pub const ENOSPC: i32 = 28;
pub const ETIMEDOUT: i32 = 110;
pub const EUCLEAN: i32 = 117;

/// Portable outcome of a failed OSD operation. Device sense data never
/// leaves the `osd` layer; callers only see this.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OsdError {
  /// Request could not be allocated
  #[error("cannot allocate request")]
  ResourceExhausted,
  /// Partition is present and could not be replaced
  #[error("partition already exists")]
  AlreadyExists,
  /// Bad starting byte offset
  #[error("invalid starting byte offset")]
  InvalidOffset,
  /// No such object
  #[error("no such object")]
  NotFound,
  /// Invalid argument
  #[error("invalid argument: {0}")]
  InvalidArgument(&'static str),
  /// Quota or capacity exceeded
  #[error("no space left on device")]
  OutOfSpace,
  /// I/O Error
  #[error("device I/O error")]
  DeviceIo,
  /// Command did not complete in time
  #[error("command timed out")]
  Timeout,
  /// Device could not be opened
  #[error("cannot open device {0}")]
  DeviceUnavailable(String),
  /// Credential could not be issued for the object
  #[error("permission denied")]
  PermissionDenied,
  /// Request session used out of order
  #[error("request is {found}, expected {expected}")]
  InvalidState {
    expected: &'static str,
    found: &'static str,
  },
  /// Record read back from the device does not decode
  #[error("corrupted record: {0}")]
  Corrupted(&'static str),
}

impl OsdError {
  /// Positive errno value, used as the process exit code.
  pub fn errno(&self) -> i32 {
    match self {
      OsdError::ResourceExhausted => ENOMEM,
      OsdError::AlreadyExists => EEXIST,
      OsdError::InvalidOffset => EFAULT,
      OsdError::NotFound => ENOENT,
      OsdError::InvalidArgument(_) => EINVAL,
      OsdError::OutOfSpace => ENOSPC,
      OsdError::DeviceIo => EIO,
      OsdError::Timeout => ETIMEDOUT,
      OsdError::DeviceUnavailable(_) => ENODEV,
      OsdError::PermissionDenied => EACCES,
      OsdError::InvalidState { .. } => EINVAL,
      OsdError::Corrupted(_) => EUCLEAN,
    }
  }

  /// `Timeout` belongs to the device I/O family.
  pub fn is_device_io(&self) -> bool {
    matches!(self, OsdError::DeviceIo | OsdError::Timeout)
  }
}


// vim:ts=2 sw=2

//! The boundary to whatever carries commands to a target.

use core::fmt;
use std::time::Duration;

use super::error::OsdError;
use super::sec::{Credential, Permissions};
use super::sense::SenseInfo;
use super::types::{ObjectId, OsdId, OSD_ROOT_OBJECT};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
  /// Format the whole device. `capacity == 0` uses all available space.
  Format { capacity: u64 },
  CreatePartition { partition: OsdId },
  RemovePartition { partition: OsdId },
  /// Create an object. `obj.id == 0` lets the device pick the id.
  CreateObject { obj: ObjectId },
  RemoveObject { obj: ObjectId },
  Write { obj: ObjectId, offset: u64, data: Vec<u8> },
  Read { obj: ObjectId, offset: u64, len: u64 },
  SetAttributes { obj: ObjectId },
  GetAttributes { obj: ObjectId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
  Format,
  CreatePartition,
  RemovePartition,
  CreateObject,
  RemoveObject,
  Write,
  Read,
  SetAttributes,
  GetAttributes,
}

impl fmt::Display for CommandKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      CommandKind::Format => "format",
      CommandKind::CreatePartition => "create partition",
      CommandKind::RemovePartition => "remove partition",
      CommandKind::CreateObject => "create",
      CommandKind::RemoveObject => "remove",
      CommandKind::Write => "write",
      CommandKind::Read => "read",
      CommandKind::SetAttributes => "set attributes",
      CommandKind::GetAttributes => "get attributes",
    };
    write!(f, "{name}")
  }
}

impl Command {
  pub fn kind(&self) -> CommandKind {
    match self {
      Command::Format { .. } => CommandKind::Format,
      Command::CreatePartition { .. } => CommandKind::CreatePartition,
      Command::RemovePartition { .. } => CommandKind::RemovePartition,
      Command::CreateObject { .. } => CommandKind::CreateObject,
      Command::RemoveObject { .. } => CommandKind::RemoveObject,
      Command::Write { .. } => CommandKind::Write,
      Command::Read { .. } => CommandKind::Read,
      Command::SetAttributes { .. } => CommandKind::SetAttributes,
      Command::GetAttributes { .. } => CommandKind::GetAttributes,
    }
  }

  /// Object the command acts on, and so the object its credential must name.
  pub fn target(&self) -> ObjectId {
    match self {
      Command::Format { .. } => OSD_ROOT_OBJECT,
      Command::CreatePartition { partition } | Command::RemovePartition { partition } => {
        ObjectId::partition(*partition)
      },
      Command::CreateObject { obj }
      | Command::RemoveObject { obj }
      | Command::Write { obj, .. }
      | Command::Read { obj, .. }
      | Command::SetAttributes { obj }
      | Command::GetAttributes { obj } => *obj,
    }
  }

  pub fn reads_data(&self) -> bool {
    matches!(self, Command::Read { .. })
  }

  pub fn writes_data(&self) -> bool {
    matches!(self, Command::Write { .. })
  }

  /// Capability bits a device demands for this command.
  pub fn required_permissions(&self) -> Permissions {
    match self {
      Command::Format { .. } => Permissions::DEV_MGMT,
      Command::CreatePartition { .. } | Command::CreateObject { .. } => Permissions::CREATE,
      Command::RemovePartition { .. } | Command::RemoveObject { .. } => Permissions::REMOVE,
      Command::Write { .. } => Permissions::WRITE,
      Command::Read { .. } => Permissions::READ,
      Command::SetAttributes { .. } => Permissions::SET_ATTR,
      Command::GetAttributes { .. } => Permissions::GET_ATTR,
    }
  }
}

/// A finalized command as handed to the device.
#[derive(Debug)]
pub struct CommandBlock<'a> {
  pub command: &'a Command,
  /// Encoded set list, empty when none.
  pub set_attrs: &'a [u8],
  /// Encoded get list, empty when none.
  pub get_attrs: &'a [u8],
  /// Room for the retrieved list.
  pub get_alloc_len: usize,
  pub credential: &'a Credential,
  pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
  Good,
  CheckCondition(SenseInfo),
  TimedOut,
}

/// What came back from one executed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
  pub status: Status,
  pub data_in: Vec<u8>,
  /// Encoded retrieved-attributes list, empty when none was asked for.
  pub attrs_in: Vec<u8>,
}

impl Outcome {
  pub fn good() -> Self {
    Self {
      status: Status::Good,
      data_in: Vec::new(),
      attrs_in: Vec::new(),
    }
  }

  pub fn check_condition(sense: SenseInfo) -> Self {
    Self {
      status: Status::CheckCondition(sense),
      data_in: Vec::new(),
      attrs_in: Vec::new(),
    }
  }

  pub fn timed_out() -> Self {
    Self {
      status: Status::TimedOut,
      data_in: Vec::new(),
      attrs_in: Vec::new(),
    }
  }
}

/// An open device handle.
///
/// `execute` blocks until the command completes or its timeout elapses and
/// always yields an outcome; device-level failures are reported in it.
pub trait OsdDevice {
  /// Reserve what one request needs.
  fn alloc_request(&mut self) -> Result<(), OsdError> {
    Ok(())
  }

  /// Give back what `alloc_request` reserved.
  fn release_request(&mut self) {}

  fn execute(&mut self, block: &CommandBlock<'_>) -> Outcome;

  fn name(&self) -> &str;
}

impl fmt::Debug for dyn OsdDevice + '_ {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "OsdDevice {{ {} }}", self.name())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn partition_commands_target_partition_object() {
    let create = Command::CreatePartition { partition: 0x100 };
    assert_eq!(create.target(), ObjectId::partition(0x100));
    assert_eq!(Command::Format { capacity: 0 }.target(), OSD_ROOT_OBJECT);
  }

  #[test]
  fn command_kind_names() {
    assert_eq!(CommandKind::CreatePartition.to_string(), "create partition");
    let write = Command::Write { obj: ObjectId::new(1, 2), offset: 0, data: vec![] };
    assert_eq!(write.kind(), CommandKind::Write);
    assert!(write.writes_data());
    assert!(!write.reads_data());
  }
}

// vim:ts=2 sw=2

//! In-memory OSD target.
//!
//! Keeps partitions, objects and attribute pages in maps and answers
//! commands with the sense data a real target would produce. Retrieved
//! attributes come back in key order, not request order. A
//! [`FailurePolicy`] injects allocation failures, device faults and
//! timeouts.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, warn};
use uuid::Uuid;

use super::attr::{self, AttrIter};
use super::device::{Command, CommandBlock, CommandKind, OsdDevice, Outcome};
use super::error::OsdError;
use super::sec::{Credential, OSD_SEC_NOSEC};
use super::sense::*;
use super::types::*;

/// First id handed out when the device picks an object id.
pub const FIRST_ALLOCATED_ID: OsdId = 0x10000;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsdObject {
  pub data: Vec<u8>,
  pub attrs: BTreeMap<AttrKey, Vec<u8>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
  pub attrs: BTreeMap<AttrKey, Vec<u8>>,
  pub objects: BTreeMap<OsdId, OsdObject>,
}

/// When the device should misbehave
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailurePolicy {
  /// Never fail (passthrough)
  Never,
  /// Refuse to allocate requests
  NoMemory,
  /// Fail every command of this kind with a target failure
  FailOn(CommandKind),
  /// Fail the Nth executed command, counting from 1
  FailNth(usize),
  /// Let every command of this kind time out
  TimeOutOn(CommandKind),
}

impl Default for FailurePolicy {
  fn default() -> Self {
    FailurePolicy::Never
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
  pub kind: CommandKind,
  pub target: ObjectId,
  pub ok: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MemOsd {
  /// Space the medium can hold
  pub physical_capacity: u64,
  /// Space granted by the last format
  pub capacity: u64,
  pub root_attrs: BTreeMap<AttrKey, Vec<u8>>,
  pub partitions: BTreeMap<OsdId, Partition>,
  policy: FailurePolicy,
  executed: usize,
  outstanding: usize,
  journal: Vec<JournalEntry>,
}

type CommandResult = Result<(ObjectId, Vec<u8>), SenseInfo>;

impl MemOsd {
  /// An empty device of `physical_capacity` bytes, usable without format.
  pub fn new(physical_capacity: u64) -> Self {
    Self {
      physical_capacity,
      capacity: physical_capacity,
      ..Self::default()
    }
  }

  pub fn set_policy(&mut self, policy: FailurePolicy) {
    self.policy = policy;
    self.executed = 0;
  }

  pub fn outstanding_requests(&self) -> usize {
    self.outstanding
  }

  pub fn journal(&self) -> &[JournalEntry] {
    &self.journal
  }

  pub fn clear_journal(&mut self) {
    self.journal.clear();
  }

  pub fn partition(&self, pid: OsdId) -> Option<&Partition> {
    self.partitions.get(&pid)
  }

  pub fn object(&self, obj: &ObjectId) -> Option<&OsdObject> {
    self.partitions.get(&obj.partition)?.objects.get(&obj.id)
  }

  pub fn used_capacity(&self) -> u64 {
    self.partitions
      .values()
      .flat_map(|partition| partition.objects.values())
      .map(|object| object.data.len() as u64)
      .sum()
  }

  fn injected_failure(&mut self, kind: CommandKind) -> Option<Outcome> {
    match &self.policy {
      FailurePolicy::FailOn(failing) if *failing == kind => Some(Outcome::check_condition(
        SenseInfo::new(SCSI_SENSE_HARDWARE_ERROR, SCSI_INTERNAL_TARGET_FAILURE),
      )),
      FailurePolicy::FailNth(n) if *n == self.executed => Some(Outcome::check_condition(
        SenseInfo::new(SCSI_SENSE_HARDWARE_ERROR, SCSI_INTERNAL_TARGET_FAILURE),
      )),
      FailurePolicy::TimeOutOn(slow) if *slow == kind => Some(Outcome::timed_out()),
      _ => None,
    }
  }

  fn check_credential(block: &CommandBlock<'_>, credential: &Credential) -> Result<(), SenseInfo> {
    let denied = SenseInfo::invalid_field(OSD_CFO_CAPABILITY);
    let mut required = block.command.required_permissions();
    if !block.set_attrs.is_empty() {
      required = required.union(super::sec::Permissions::SET_ATTR);
    }
    if !block.get_attrs.is_empty() {
      required = required.union(super::sec::Permissions::GET_ATTR);
    }

    if credential.security_method() != OSD_SEC_NOSEC
      || credential.allowed_object() != block.command.target()
      || !credential.permissions().contains(required)
    {
      return Err(denied);
    }
    Ok(())
  }

  fn object_mut(&mut self, obj: &ObjectId) -> Result<&mut OsdObject, SenseInfo> {
    let partition = self.partitions
      .get_mut(&obj.partition)
      .ok_or_else(|| SenseInfo::invalid_field(OSD_CFO_PARTITION_ID).with_object(*obj))?;

    partition.objects
      .get_mut(&obj.id)
      .ok_or_else(|| SenseInfo::invalid_field(OSD_CFO_OBJECT_ID).with_object(*obj))
  }

  fn attrs_mut(&mut self, target: &ObjectId) -> Result<&mut BTreeMap<AttrKey, Vec<u8>>, SenseInfo> {
    if target.is_root() {
      return Ok(&mut self.root_attrs);
    }
    if target.is_partition() {
      return self.partitions
        .get_mut(&target.partition)
        .map(|partition| &mut partition.attrs)
        .ok_or_else(|| SenseInfo::invalid_field(OSD_CFO_PARTITION_ID).with_object(*target));
    }
    self.object_mut(target).map(|object| &mut object.attrs)
  }

  fn run(&mut self, command: &Command) -> CommandResult {
    let target = command.target();

    match command {
      Command::Format { capacity } => {
        let capacity = match *capacity {
          0 => self.physical_capacity,
          capacity => capacity.min(self.physical_capacity),
        };
        self.capacity = capacity;
        self.partitions.clear();
        self.root_attrs.clear();
        self.root_attrs.insert(
          AttrKey::new(OSD_APAGE_ROOT_INFORMATION, OSD_ATTR_RI_OSD_SYSTEM_ID),
          Uuid::new_v4().as_bytes().to_vec(),
        );
        debug!("memosd: formatted {capacity} bytes");
        Ok((target, Vec::new()))
      },
      Command::CreatePartition { partition } => {
        if *partition == 0 || self.partitions.contains_key(partition) {
          return Err(SenseInfo::invalid_field(OSD_CFO_PARTITION_ID).with_object(target));
        }
        self.partitions.insert(*partition, Partition::default());
        Ok((target, Vec::new()))
      },
      Command::RemovePartition { partition } => {
        let removed = self.partitions
          .remove(partition)
          .ok_or_else(|| SenseInfo::invalid_field(OSD_CFO_PARTITION_ID).with_object(target))?;
        if !removed.objects.is_empty() {
          warn!("memosd: removed partition 0x{partition:x} with {} objects", removed.objects.len());
        }
        Ok((target, Vec::new()))
      },
      Command::CreateObject { obj } => {
        let partition = self.partitions
          .get_mut(&obj.partition)
          .ok_or_else(|| SenseInfo::invalid_field(OSD_CFO_PARTITION_ID).with_object(*obj))?;

        let id = match obj.id {
          0 => partition.objects
            .keys()
            .next_back()
            .map_or(FIRST_ALLOCATED_ID, |last| (*last + 1).max(FIRST_ALLOCATED_ID)),
          id if partition.objects.contains_key(&id) => {
            return Err(SenseInfo::invalid_field(OSD_CFO_OBJECT_ID).with_object(*obj));
          },
          id => id,
        };
        partition.objects.insert(id, OsdObject::default());
        Ok((ObjectId::new(obj.partition, id), Vec::new()))
      },
      Command::RemoveObject { obj } => {
        self.object_mut(obj)?;
        if let Some(partition) = self.partitions.get_mut(&obj.partition) {
          partition.objects.remove(&obj.id);
        }
        Ok((target, Vec::new()))
      },
      Command::Write { obj, offset, data } => {
        let used = self.used_capacity();
        let capacity = self.capacity;
        let object = self.object_mut(obj)?;

        let end = offset
          .checked_add(data.len() as u64)
          .ok_or_else(|| SenseInfo::invalid_field(OSD_CFO_STARTING_BYTE))?;
        let new_len = end.max(object.data.len() as u64);
        let quota = object.attrs
          .get(&AttrKey::new(OSD_APAGE_OBJECT_QUOTAS, OSD_ATTR_OQ_MAXIMUM_LENGTH))
          .and_then(|value| value.get(0..8)?.try_into().ok())
          .map(u64::from_be_bytes);

        if quota.map_or(false, |max| end > max)
          || used - object.data.len() as u64 + new_len > capacity
        {
          return Err(SenseInfo::new(SCSI_SENSE_DATA_PROTECT, OSD_QUOTA_ERROR).with_object(*obj));
        }

        let start = *offset as usize;
        object.data.resize(new_len as usize, 0);
        object.data[start..start + data.len()].copy_from_slice(data);
        Ok((target, Vec::new()))
      },
      Command::Read { obj, offset, len } => {
        let object = self.object_mut(obj)?;
        let size = object.data.len() as u64;
        if *offset > size {
          return Err(SenseInfo::invalid_field(OSD_CFO_STARTING_BYTE).with_object(*obj));
        }
        let end = offset.saturating_add(*len).min(size);
        Ok((target, object.data[*offset as usize..end as usize].to_vec()))
      },
      Command::SetAttributes { obj } | Command::GetAttributes { obj } => {
        self.attrs_mut(obj)?;
        Ok((target, Vec::new()))
      },
    }
  }

  fn apply_set_list(&mut self, target: &ObjectId, list: &[u8]) -> Result<(), SenseInfo> {
    let bad_list = || SenseInfo::new(SCSI_SENSE_ILLEGAL_REQUEST, SCSI_INVALID_FIELD_IN_PARAMETER_LIST);
    let attrs = self.attrs_mut(target)?;

    for record in AttrIter::new(list).map_err(|_| bad_list())? {
      match record.map_err(|_| bad_list())? {
        (key, Some(value)) => {
          attrs.insert(key, value.to_owned());
        },
        (key, None) => {
          attrs.remove(&key);
        },
      }
    }
    Ok(())
  }

  fn synthesized(&self, target: &ObjectId, key: &AttrKey) -> Option<Vec<u8>> {
    if target.is_root() {
      return match (key.page, key.number) {
        (OSD_APAGE_ROOT_INFORMATION, OSD_ATTR_RI_TOTAL_CAPACITY) => Some(self.capacity.to_be_bytes().to_vec()),
        (OSD_APAGE_ROOT_INFORMATION, OSD_ATTR_RI_USED_CAPACITY) => Some(self.used_capacity().to_be_bytes().to_vec()),
        _ => None,
      };
    }

    let object = self.object(target)?;
    match (key.page, key.number) {
      (OSD_APAGE_OBJECT_INFORMATION, OSD_ATTR_OI_PARTITION_ID) => Some(target.partition.to_be_bytes().to_vec()),
      (OSD_APAGE_OBJECT_INFORMATION, OSD_ATTR_OI_OBJECT_ID) => Some(target.id.to_be_bytes().to_vec()),
      (OSD_APAGE_OBJECT_INFORMATION, OSD_ATTR_OI_USED_CAPACITY)
      | (OSD_APAGE_OBJECT_INFORMATION, OSD_ATTR_OI_LOGICAL_LENGTH) => {
        Some((object.data.len() as u64).to_be_bytes().to_vec())
      },
      _ => None,
    }
  }

  fn answer_get_list(&mut self, target: &ObjectId, list: &[u8], alloc_len: usize)
    -> Result<Vec<u8>, SenseInfo> {
    let keys = attr::decode_get_list_keys(list)
      .map_err(|_| SenseInfo::new(SCSI_SENSE_ILLEGAL_REQUEST, SCSI_INVALID_FIELD_IN_PARAMETER_LIST))?;
    let keys: BTreeSet<AttrKey> = keys.into_iter().collect();
    let stored = self.attrs_mut(target)?.clone();

    let mut retrieved = Vec::new();
    let mut len = attr::LIST_HEADER_LEN;
    for key in keys {
      let value = self.synthesized(target, &key).or_else(|| stored.get(&key).cloned());
      len += attr::element_len(value.as_ref().map_or(0, Vec::len));
      if len > alloc_len {
        debug!("memosd: retrieved list cut at {key}, {alloc_len} bytes allocated");
        break;
      }
      retrieved.push((key, value));
    }

    attr::encode_retrieved_list(&retrieved)
      .map_err(|_| SenseInfo::new(SCSI_SENSE_HARDWARE_ERROR, SCSI_INTERNAL_TARGET_FAILURE))
  }

  fn execute_checked(&mut self, block: &CommandBlock<'_>) -> Result<Outcome, SenseInfo> {
    Self::check_credential(block, block.credential)?;

    let (target, data_in) = self.run(block.command)?;
    if !block.set_attrs.is_empty() {
      self.apply_set_list(&target, block.set_attrs)?;
    }
    let attrs_in = if block.get_attrs.is_empty() {
      Vec::new()
    } else {
      self.answer_get_list(&target, block.get_attrs, block.get_alloc_len)?
    };

    Ok(Outcome {
      data_in,
      attrs_in,
      ..Outcome::good()
    })
  }
}

impl OsdDevice for MemOsd {
  fn alloc_request(&mut self) -> Result<(), OsdError> {
    if self.policy == FailurePolicy::NoMemory {
      return Err(OsdError::ResourceExhausted);
    }
    self.outstanding += 1;
    Ok(())
  }

  fn release_request(&mut self) {
    self.outstanding = self.outstanding.saturating_sub(1);
  }

  fn execute(&mut self, block: &CommandBlock<'_>) -> Outcome {
    self.executed += 1;
    let kind = block.command.kind();
    let target = block.command.target();

    let outcome = match self.injected_failure(kind) {
      Some(outcome) => outcome,
      None => self.execute_checked(block).unwrap_or_else(Outcome::check_condition),
    };

    self.journal.push(JournalEntry {
      kind,
      target,
      ok: outcome.status == super::device::Status::Good,
    });
    outcome
  }

  fn name(&self) -> &str {
    "memosd"
  }
}


// vim:ts=2 sw=2

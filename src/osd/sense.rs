//! Sense data returned by failed commands and its translation into
//! [`OsdError`].

use super::device::Status;
use super::error::OsdError;
use super::types::ObjectId;

// Sense keys
pub const SCSI_SENSE_NO_SENSE: u8 = 0x0;
pub const SCSI_SENSE_NOT_READY: u8 = 0x2;
pub const SCSI_SENSE_HARDWARE_ERROR: u8 = 0x4;
pub const SCSI_SENSE_ILLEGAL_REQUEST: u8 = 0x5;
pub const SCSI_SENSE_DATA_PROTECT: u8 = 0x7;

// Additional sense codes (ASC << 8 | ASCQ)
pub const SCSI_INVALID_FIELD_IN_CDB: u16 = 0x2400;
pub const SCSI_INVALID_FIELD_IN_PARAMETER_LIST: u16 = 0x2600;
pub const OSD_QUOTA_ERROR: u16 = 0x5507;
pub const SCSI_INTERNAL_TARGET_FAILURE: u16 = 0x4400;
pub const SCSI_INSUFFICIENT_RESOURCES: u16 = 0x5503;

// CDB field offsets reported with invalid-field sense
pub const OSD_CFO_PARTITION_ID: u16 = 24;
pub const OSD_CFO_OBJECT_ID: u16 = 32;
pub const OSD_CFO_STARTING_BYTE: u16 = 56;
pub const OSD_CFO_CAPABILITY: u16 = 80;

/// Decoded sense record of a failed command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenseInfo {
  pub key: u8,
  pub additional_code: u16,
  /// Field pointers, one per sense-key-specific descriptor.
  pub cdb_field_offsets: Vec<u16>,
  /// Object the sense refers to, when the device reports one.
  pub obj: Option<ObjectId>,
}

impl SenseInfo {
  pub fn new(key: u8, additional_code: u16) -> Self {
    Self {
      key,
      additional_code,
      cdb_field_offsets: Vec::new(),
      obj: None,
    }
  }

  pub fn invalid_field(offset: u16) -> Self {
    Self::new(SCSI_SENSE_ILLEGAL_REQUEST, SCSI_INVALID_FIELD_IN_CDB).with_field(offset)
  }

  pub fn with_field(mut self, offset: u16) -> Self {
    self.cdb_field_offsets.push(offset);
    self
  }

  pub fn with_object(mut self, obj: ObjectId) -> Self {
    self.obj = Some(obj);
    self
  }

  pub fn flags_field(&self, offset: u16) -> bool {
    self.cdb_field_offsets.contains(&offset)
  }

  pub fn is_zero(&self) -> bool {
    self.key == SCSI_SENSE_NO_SENSE && self.additional_code == 0
  }
}

/// Maps a command outcome onto the portable taxonomy.
///
/// Invalid-field is tested before quota, and within invalid-field the
/// starting-byte pointer wins over the object-id pointer.
pub fn translate(status: &Status) -> Result<(), OsdError> {
  let sense = match status {
    Status::Good => return Ok(()),
    Status::TimedOut => return Err(OsdError::Timeout),
    Status::CheckCondition(sense) => sense,
  };

  if sense.is_zero() {
    return Ok(());
  }

  if sense.additional_code == SCSI_INVALID_FIELD_IN_CDB {
    if sense.flags_field(OSD_CFO_STARTING_BYTE) {
      Err(OsdError::InvalidOffset)
    } else if sense.flags_field(OSD_CFO_OBJECT_ID) {
      Err(OsdError::NotFound)
    } else {
      Err(OsdError::InvalidArgument("invalid field in command"))
    }
  } else if sense.additional_code == OSD_QUOTA_ERROR {
    Err(OsdError::OutOfSpace)
  } else {
    Err(OsdError::DeviceIo)
  }
}


// vim:ts=2 sw=2

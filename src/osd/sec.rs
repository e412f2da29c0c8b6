//! Capability credentials. Only the no-security method is issued here; the
//! integrity fields of the capability are left zero.

use super::error::OsdError;
use super::types::ObjectId;

/// Size of an OSDv1 capability.
pub const OSD_CAP_LEN: usize = 80;

pub const OSD_SEC_CAP_FORMAT_VER1: u8 = 1;
pub const OSD_SEC_NOSEC: u8 = 0;

// Byte offsets inside the capability
pub const CAP_FORMAT: usize = 0;
pub const CAP_SECURITY_METHOD: usize = 2;
pub const CAP_OBJECT_TYPE: usize = 48;
pub const CAP_PERMISSIONS: usize = 49;
pub const CAP_DESCRIPTOR_TYPE: usize = 55;
pub const CAP_ALLOWED_PARTITION: usize = 60;
pub const CAP_ALLOWED_OBJECT: usize = 68;

// Object types
pub const OSD_SEC_OBJ_ROOT: u8 = 0x1;
pub const OSD_SEC_OBJ_PARTITION: u8 = 0x2;
pub const OSD_SEC_OBJ_USER: u8 = 0x80;

// Object descriptor types (high nibble)
pub const OSD_SEC_OBJ_DESC_OBJ: u8 = 1 << 4;
pub const OSD_SEC_OBJ_DESC_PAR: u8 = 2 << 4;

/// Permission bit mask, first two bytes of the 5-byte field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Permissions(pub u16);

impl Permissions {
  pub const APPEND: Self = Self(1 << 0);
  pub const OBJ_MGMT: Self = Self(1 << 1);
  pub const REMOVE: Self = Self(1 << 2);
  pub const CREATE: Self = Self(1 << 3);
  pub const SET_ATTR: Self = Self(1 << 4);
  pub const GET_ATTR: Self = Self(1 << 5);
  pub const WRITE: Self = Self(1 << 6);
  pub const READ: Self = Self(1 << 7);
  pub const POL_SEC: Self = Self(1 << 8);
  pub const GLOBAL: Self = Self(1 << 9);
  pub const DEV_MGMT: Self = Self(1 << 10);

  pub const fn empty() -> Self {
    Self(0)
  }

  /// Everything except data access, which is granted per request.
  pub const fn management() -> Self {
    Self(
      Self::OBJ_MGMT.0 | Self::REMOVE.0 | Self::CREATE.0 | Self::SET_ATTR.0
        | Self::GET_ATTR.0 | Self::POL_SEC.0 | Self::GLOBAL.0 | Self::DEV_MGMT.0,
    )
  }

  pub const fn union(self, other: Self) -> Self {
    Self(self.0 | other.0)
  }

  pub const fn contains(self, other: Self) -> bool {
    self.0 & other.0 == other.0
  }
}

/// Opaque capability bound to one object for one request.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential([u8; OSD_CAP_LEN]);

impl core::fmt::Debug for Credential {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    write!(f, "Credential({})", hex::encode(&self.0[..]))
  }
}

impl Credential {
  pub fn as_bytes(&self) -> &[u8; OSD_CAP_LEN] {
    &self.0
  }

  pub fn from_bytes(bytes: [u8; OSD_CAP_LEN]) -> Self {
    Self(bytes)
  }

  pub fn security_method(&self) -> u8 {
    self.0[CAP_SECURITY_METHOD] & 0x0f
  }

  pub fn object_type(&self) -> u8 {
    self.0[CAP_OBJECT_TYPE]
  }

  pub fn permissions(&self) -> Permissions {
    Permissions(u16::from_le_bytes([
      self.0[CAP_PERMISSIONS],
      self.0[CAP_PERMISSIONS + 1],
    ]))
  }

  /// Object the capability was issued for.
  pub fn allowed_object(&self) -> ObjectId {
    let mut partition = [0u8; 8];
    let mut id = [0u8; 8];
    partition.copy_from_slice(&self.0[CAP_ALLOWED_PARTITION..CAP_ALLOWED_PARTITION + 8]);
    id.copy_from_slice(&self.0[CAP_ALLOWED_OBJECT..CAP_ALLOWED_OBJECT + 8]);

    ObjectId::new(u64::from_be_bytes(partition), u64::from_be_bytes(id))
  }
}

pub trait CredentialIssuer {
  fn issue(&self, obj: &ObjectId, read: bool, write: bool)
    -> Result<Credential, OsdError>;
}

/// The allow-all policy: every object is authorized for every operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSecurity;

impl CredentialIssuer for NoSecurity {
  fn issue(&self, obj: &ObjectId, read: bool, write: bool)
    -> Result<Credential, OsdError> {
    let mut cap = [0u8; OSD_CAP_LEN];

    let mut permissions = Permissions::management();
    if read {
      permissions = permissions.union(Permissions::READ);
    }
    if write {
      permissions = permissions.union(Permissions::WRITE).union(Permissions::APPEND);
    }

    let (object_type, descriptor_type) = if obj.is_root() {
      (OSD_SEC_OBJ_ROOT, OSD_SEC_OBJ_DESC_PAR)
    } else if obj.is_partition() {
      (OSD_SEC_OBJ_PARTITION, OSD_SEC_OBJ_DESC_PAR)
    } else {
      (OSD_SEC_OBJ_USER, OSD_SEC_OBJ_DESC_OBJ)
    };

    cap[CAP_FORMAT] = OSD_SEC_CAP_FORMAT_VER1;
    cap[CAP_SECURITY_METHOD] = OSD_SEC_NOSEC;
    cap[CAP_OBJECT_TYPE] = object_type;
    cap[CAP_PERMISSIONS..CAP_PERMISSIONS + 2].copy_from_slice(&permissions.0.to_le_bytes());
    cap[CAP_DESCRIPTOR_TYPE] = descriptor_type;
    cap[CAP_ALLOWED_PARTITION..CAP_ALLOWED_PARTITION + 8]
      .copy_from_slice(&obj.partition.to_be_bytes());
    cap[CAP_ALLOWED_OBJECT..CAP_ALLOWED_OBJECT + 8].copy_from_slice(&obj.id.to_be_bytes());

    Ok(Credential(cap))
  }
}


// vim:ts=2 sw=2

use core::fmt;

pub type OsdId = u64;

/// `{partition, id}` pair addressing one object on the device.
/// `{0, 0}` is the device root; `{pid, 0}` is the partition object itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ObjectId {
  pub partition: OsdId,
  pub id: OsdId,
}

pub const OSD_ROOT_OBJECT: ObjectId = ObjectId { partition: 0, id: 0 };

impl ObjectId {
  pub const fn new(partition: OsdId, id: OsdId) -> Self {
    Self { partition, id }
  }

  pub const fn partition(partition: OsdId) -> Self {
    Self { partition, id: 0 }
  }

  pub fn is_root(&self) -> bool {
    self.partition == 0 && self.id == 0
  }

  pub fn is_partition(&self) -> bool {
    self.partition != 0 && self.id == 0
  }
}

impl fmt::Display for ObjectId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "0x{:x}:0x{:x}", self.partition, self.id)
  }
}

// Attribute pages
pub const OSD_APAGE_OBJECT_INFORMATION: u32 = 0x1;
pub const OSD_APAGE_OBJECT_QUOTAS: u32 = 0x2;
pub const OSD_APAGE_APP_DEFINED_FIRST: u32 = 0x10000;
pub const OSD_APAGE_PARTITION_FIRST: u32 = 0x3000_0000;
pub const OSD_APAGE_PARTITION_INFORMATION: u32 = OSD_APAGE_PARTITION_FIRST + 1;
pub const OSD_APAGE_ROOT_FIRST: u32 = 0x9000_0000;
pub const OSD_APAGE_ROOT_INFORMATION: u32 = OSD_APAGE_ROOT_FIRST + 1;

// Root information page
pub const OSD_ATTR_RI_OSD_SYSTEM_ID: u32 = 0x3;
pub const OSD_ATTR_RI_OSD_NAME: u32 = 0x9;
pub const OSD_ATTR_RI_TOTAL_CAPACITY: u32 = 0x80;
pub const OSD_ATTR_RI_USED_CAPACITY: u32 = 0x81;

// Object information page
pub const OSD_ATTR_OI_PARTITION_ID: u32 = 0x1;
pub const OSD_ATTR_OI_OBJECT_ID: u32 = 0x2;
pub const OSD_ATTR_OI_USERNAME: u32 = 0x9;
pub const OSD_ATTR_OI_USED_CAPACITY: u32 = 0x81;
pub const OSD_ATTR_OI_LOGICAL_LENGTH: u32 = 0x82;

// Object quotas page
pub const OSD_ATTR_OQ_MAXIMUM_LENGTH: u32 = 0x1;

/// Page/number pair selecting one attribute slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttrKey {
  pub page: u32,
  pub number: u32,
}

impl AttrKey {
  pub const fn new(page: u32, number: u32) -> Self {
    Self { page, number }
  }
}

impl fmt::Display for AttrKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "0x{:x}.0x{:x}", self.page, self.number)
  }
}

/// An attribute to set, carrying its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
  pub key: AttrKey,
  pub value: Vec<u8>,
}

impl Attr {
  pub fn set(page: u32, number: u32, value: &[u8]) -> Self {
    Self {
      key: AttrKey::new(page, number),
      value: value.to_owned(),
    }
  }
}

/// An attribute to get. `value` stays `None` until a response is decoded,
/// and stays `None` if the device did not return it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrGet {
  pub key: AttrKey,
  pub len: u16,
  pub value: Option<Vec<u8>>,
}

impl AttrGet {
  pub fn def(page: u32, number: u32, len: u16) -> Self {
    Self {
      key: AttrKey::new(page, number),
      len,
      value: None,
    }
  }

  pub fn value_be64(&self) -> Option<u64> {
    let value = self.value.as_ref()?;
    let bytes: [u8; 8] = value.get(0..8)?.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
  }
}


// vim:ts=2 sw=2

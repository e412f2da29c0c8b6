//! An emulated OSD kept in a YAML image on the host.
//!
//! Opening the image loads the whole target into a [`MemOsd`], closing it
//! writes it back. Object data and attribute values are hex strings.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::{debug, error};
use serde::{Deserialize, Serialize};

use crate::osd::device::{CommandBlock, OsdDevice, Outcome};
use crate::osd::error::OsdError;
use crate::osd::memosd::{MemOsd, OsdObject, Partition};
use crate::osd::types::{AttrKey, OsdId};
use crate::util::parse_osd_id;

/// Capacity given to an image file that is still empty.
pub const DEFAULT_IMAGE_CAPACITY: u64 = 1 << 30;

type AttrPage = BTreeMap<String, String>;

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectImage {
  #[serde(default)]
  pub data: String,
  #[serde(default)]
  pub attrs: AttrPage,
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PartitionImage {
  #[serde(default)]
  pub attrs: AttrPage,
  #[serde(default)]
  pub objects: BTreeMap<OsdId, ObjectImage>,
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OsdImage {
  pub physical_capacity: u64,
  pub capacity: u64,
  #[serde(default)]
  pub root_attrs: AttrPage,
  #[serde(default)]
  pub partitions: BTreeMap<OsdId, PartitionImage>,
}

fn attrs_to_image(attrs: &BTreeMap<AttrKey, Vec<u8>>) -> AttrPage {
  attrs
    .iter()
    .map(|(key, value)| (key.to_string(), hex::encode(value)))
    .collect()
}

fn attrs_from_image(attrs: &AttrPage) -> Result<BTreeMap<AttrKey, Vec<u8>>, String> {
  attrs
    .iter()
    .map(|(key, value)| {
      let (page, number) = key
        .split_once('.')
        .ok_or_else(|| format!("attribute key {key}: expected page.number"))?;
      let key = AttrKey::new(
        parse_attr_number(page)?,
        parse_attr_number(number)?,
      );
      let value = hex::decode(value).map_err(|e| format!("attribute {key}: {e}"))?;
      Ok((key, value))
    })
    .collect()
}

fn parse_attr_number(s: &str) -> Result<u32, String> {
  let n = parse_osd_id(s)?;
  u32::try_from(n).map_err(|e| format!("{s}: {e}"))
}

impl OsdImage {
  pub fn blank(capacity: u64) -> Self {
    Self {
      physical_capacity: capacity,
      capacity,
      ..Self::default()
    }
  }

  pub fn from_osd(osd: &MemOsd) -> Self {
    Self {
      physical_capacity: osd.physical_capacity,
      capacity: osd.capacity,
      root_attrs: attrs_to_image(&osd.root_attrs),
      partitions: osd.partitions
        .iter()
        .map(|(pid, partition)| (*pid, PartitionImage {
          attrs: attrs_to_image(&partition.attrs),
          objects: partition.objects
            .iter()
            .map(|(id, object)| (*id, ObjectImage {
              data: hex::encode(&object.data),
              attrs: attrs_to_image(&object.attrs),
            }))
            .collect(),
        }))
        .collect(),
    }
  }

  pub fn to_osd(&self) -> Result<MemOsd, String> {
    let mut osd = MemOsd::new(self.physical_capacity);
    osd.capacity = self.capacity;
    osd.root_attrs = attrs_from_image(&self.root_attrs)?;

    for (pid, partition) in &self.partitions {
      let mut objects = BTreeMap::new();
      for (id, object) in &partition.objects {
        objects.insert(*id, OsdObject {
          data: hex::decode(&object.data).map_err(|e| format!("object 0x{pid:x}:0x{id:x}: {e}"))?,
          attrs: attrs_from_image(&object.attrs)?,
        });
      }
      osd.partitions.insert(*pid, Partition {
        attrs: attrs_from_image(&partition.attrs)?,
        objects,
      });
    }

    Ok(osd)
  }
}

/// Handle on an image file. Changes reach the file on [`ImageDevice::close`].
#[derive(Debug)]
pub struct ImageDevice {
  path: PathBuf,
  name: String,
  osd: MemOsd,
}

impl ImageDevice {
  /// Write a blank image of `capacity` bytes to `path`.
  pub fn create(path: &Path, capacity: u64) -> Result<(), OsdError> {
    Self::save(path, &OsdImage::blank(capacity))
  }

  /// Load the image at `path`. An empty file is a blank device.
  pub fn open(path: &Path) -> Result<Self, OsdError> {
    let name = path.display().to_string();
    let unavailable = |e: &dyn std::fmt::Display| OsdError::DeviceUnavailable(format!("{name}: {e}"));

    let reader = std::fs::File::open(path).map_err(|e| unavailable(&e))?;
    let len = reader.metadata().map_err(|e| unavailable(&e))?.len();

    let osd = if len == 0 {
      debug!("{name}: empty image, {DEFAULT_IMAGE_CAPACITY} bytes");
      MemOsd::new(DEFAULT_IMAGE_CAPACITY)
    } else {
      let image = serde_yaml::from_reader::<_, OsdImage>(reader).map_err(|e| unavailable(&e))?;
      image.to_osd().map_err(|e| unavailable(&e))?
    };

    debug!("{name}: opened, {} partitions", osd.partitions.len());
    Ok(Self {
      path: path.to_owned(),
      name,
      osd,
    })
  }

  pub fn osd(&self) -> &MemOsd {
    &self.osd
  }

  /// Write the target back to its image.
  pub fn close(self) -> Result<(), OsdError> {
    Self::save(&self.path, &OsdImage::from_osd(&self.osd))
  }

  fn save(path: &Path, image: &OsdImage) -> Result<(), OsdError> {
    let writer = std::fs::File::create(path).map_err(|e| {
      error!("{}: {e}", path.display());
      OsdError::DeviceIo
    })?;

    serde_yaml::to_writer(writer, image).map_err(|e| {
      error!("{}: {e}", path.display());
      OsdError::DeviceIo
    })
  }
}

impl OsdDevice for ImageDevice {
  fn alloc_request(&mut self) -> Result<(), OsdError> {
    self.osd.alloc_request()
  }

  fn release_request(&mut self) {
    self.osd.release_request()
  }

  fn execute(&mut self, block: &CommandBlock<'_>) -> Outcome {
    self.osd.execute(block)
  }

  fn name(&self) -> &str {
    &self.name
  }
}


// vim:ts=2 sw=2

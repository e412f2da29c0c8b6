//! Attribute list wire format.
//!
//! A list is an 8-byte header (`type`, 3 reserved bytes, big-endian length
//! of what follows) and a run of entries. Get lists carry bare
//! `page`/`number` pairs. Set and retrieved lists carry elements of
//! `page`, `number`, 6 reserved bytes, a big-endian value length and the
//! value, each element padded to 8 bytes. A retrieved length of `0xFFFF`
//! marks an attribute the device does not define.
//!
//! Devices are free to return retrieved attributes in any order, so decoded
//! values are matched to requests by key and never by position.

use itertools::Itertools;
use log::debug;

use super::error::OsdError;
use super::types::{Attr, AttrGet, AttrKey};

pub const OSD_ATTR_LIST_GET: u8 = 0x1;
pub const OSD_ATTR_LIST_SET_RETRIEVE: u8 = 0x9;

pub const LIST_HEADER_LEN: usize = 8;
pub const GET_ENTRY_LEN: usize = 8;
pub const ELEMENT_HEADER_LEN: usize = 16;
pub const OSD_ATTR_UNDEFINED_LEN: u16 = 0xFFFF;

fn pad8(len: usize) -> usize {
  (len + 7) & !7
}

pub fn element_len(value_len: usize) -> usize {
  pad8(ELEMENT_HEADER_LEN + value_len)
}

fn list_header(list_type: u8, body_len: usize) -> Result<Vec<u8>, OsdError> {
  let body_len = u32::try_from(body_len)
    .map_err(|_| OsdError::InvalidArgument("attribute list too long"))?;

  let mut bytes = Vec::with_capacity(LIST_HEADER_LEN + body_len as usize);
  bytes.push(list_type);
  bytes.extend_from_slice(&[0u8; 3]);
  bytes.extend_from_slice(&body_len.to_be_bytes());
  Ok(bytes)
}

fn push_element(bytes: &mut Vec<u8>, key: &AttrKey, value: Option<&[u8]>) {
  let start = bytes.len();
  let (len, value) = match value {
    Some(value) => (value.len() as u16, value),
    None => (OSD_ATTR_UNDEFINED_LEN, &[][..]),
  };

  bytes.extend_from_slice(&key.page.to_be_bytes());
  bytes.extend_from_slice(&key.number.to_be_bytes());
  bytes.extend_from_slice(&[0u8; 6]);
  bytes.extend_from_slice(&len.to_be_bytes());
  bytes.extend_from_slice(value);
  bytes.resize(start + element_len(value.len()), 0);
}

/// Encodes attributes to set, in the order given. Duplicates are kept.
pub fn encode_set_list(attrs: &[Attr]) -> Result<Vec<u8>, OsdError> {
  if attrs.iter().any(|attr| attr.value.len() >= OSD_ATTR_UNDEFINED_LEN as usize) {
    return Err(OsdError::InvalidArgument("attribute value too long"));
  }

  let body_len: usize = attrs.iter().map(|attr| element_len(attr.value.len())).sum();
  let mut bytes = list_header(OSD_ATTR_LIST_SET_RETRIEVE, body_len)?;
  for attr in attrs {
    push_element(&mut bytes, &attr.key, Some(&attr.value));
  }

  Ok(bytes)
}

/// Encodes the keys of a get list, in the order given.
pub fn encode_get_list(attrs: &[AttrGet]) -> Result<Vec<u8>, OsdError> {
  let mut bytes = list_header(OSD_ATTR_LIST_GET, attrs.len() * GET_ENTRY_LEN)?;
  for attr in attrs {
    bytes.extend_from_slice(&attr.key.page.to_be_bytes());
    bytes.extend_from_slice(&attr.key.number.to_be_bytes());
  }

  Ok(bytes)
}

/// Space the device needs to answer `attrs` in full.
pub fn retrieved_len(attrs: &[AttrGet]) -> usize {
  LIST_HEADER_LEN + attrs.iter().map(|attr| element_len(attr.len as usize)).sum::<usize>()
}

/// Encodes a retrieved list as a device answers a get list.
pub fn encode_retrieved_list(attrs: &[(AttrKey, Option<Vec<u8>>)]) -> Result<Vec<u8>, OsdError> {
  let body_len: usize = attrs
    .iter()
    .map(|(_, value)| element_len(value.as_ref().map_or(0, Vec::len)))
    .sum();
  let mut bytes = list_header(OSD_ATTR_LIST_SET_RETRIEVE, body_len)?;
  for (key, value) in attrs {
    push_element(&mut bytes, key, value.as_deref());
  }

  Ok(bytes)
}

fn read_header(buf: &[u8], list_type: u8) -> Result<&[u8], OsdError> {
  if buf.len() < LIST_HEADER_LEN {
    return Err(OsdError::Corrupted("attribute list header truncated"));
  }
  if buf[0] & 0x0f != list_type {
    return Err(OsdError::Corrupted("unexpected attribute list type"));
  }

  let mut len = [0u8; 4];
  len.copy_from_slice(&buf[4..8]);
  let len = u32::from_be_bytes(len) as usize;

  buf
    .get(LIST_HEADER_LEN..LIST_HEADER_LEN + len)
    .ok_or(OsdError::Corrupted("attribute list length exceeds buffer"))
}

/// Decodes the keys of a get list.
pub fn decode_get_list_keys(buf: &[u8]) -> Result<Vec<AttrKey>, OsdError> {
  let body = read_header(buf, OSD_ATTR_LIST_GET)?;
  if body.len() % GET_ENTRY_LEN != 0 {
    return Err(OsdError::Corrupted("get list entry truncated"));
  }

  Ok(
    body
      .chunks_exact(GET_ENTRY_LEN)
      .map(|entry| {
        let page = u32::from_be_bytes([entry[0], entry[1], entry[2], entry[3]]);
        let number = u32::from_be_bytes([entry[4], entry[5], entry[6], entry[7]]);
        AttrKey::new(page, number)
      })
      .collect()
  )
}

/// Resumable walk over a set or retrieved list.
#[derive(Debug, Clone)]
pub struct AttrIter<'a> {
  body: &'a [u8],
  pos: usize,
  failed: bool,
}

impl<'a> AttrIter<'a> {
  pub fn new(buf: &'a [u8]) -> Result<Self, OsdError> {
    Self::resume(buf, 0)
  }

  /// Continues a walk at an offset previously taken from [`AttrIter::position`].
  pub fn resume(buf: &'a [u8], pos: usize) -> Result<Self, OsdError> {
    let body = read_header(buf, OSD_ATTR_LIST_SET_RETRIEVE)?;
    Ok(Self {
      body,
      pos: pos.min(body.len()),
      failed: false,
    })
  }

  /// An empty walk, for responses that carry no list.
  pub fn empty() -> Self {
    Self {
      body: &[],
      pos: 0,
      failed: false,
    }
  }

  pub fn position(&self) -> usize {
    self.pos
  }

  pub fn is_done(&self) -> bool {
    self.failed || self.pos >= self.body.len()
  }
}

impl<'a> Iterator for AttrIter<'a> {
  type Item = Result<(AttrKey, Option<&'a [u8]>), OsdError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.is_done() {
      return None;
    }

    let rest = &self.body[self.pos..];
    if rest.len() < ELEMENT_HEADER_LEN {
      self.failed = true;
      return Some(Err(OsdError::Corrupted("attribute element truncated")));
    }

    let page = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]);
    let number = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]);
    let len = u16::from_be_bytes([rest[14], rest[15]]);
    let key = AttrKey::new(page, number);

    if len == OSD_ATTR_UNDEFINED_LEN {
      self.pos += element_len(0).min(rest.len());
      return Some(Ok((key, None)));
    }

    let len = len as usize;
    let value = match rest.get(ELEMENT_HEADER_LEN..ELEMENT_HEADER_LEN + len) {
      Some(value) => value,
      None => {
        self.failed = true;
        return Some(Err(OsdError::Corrupted("attribute value truncated")));
      }
    };

    // The last element may omit its padding
    self.pos += element_len(len).min(rest.len());
    Some(Ok((key, Some(value))))
  }
}

/// Fills `requested` from at most `requested.len()` records of `iter`,
/// matching each record to the request with the same key. Returns how many
/// requests got a value. Unmatched requests keep `value == None`; records
/// past the consumed ones stay in `iter` for the caller.
pub fn decode_get_list(requested: &mut [AttrGet], iter: &mut AttrIter<'_>)
  -> Result<usize, OsdError> {
  let mut filled = 0;

  for _ in 0..requested.len() {
    let (key, value) = match iter.next() {
      Some(record) => record?,
      None => break,
    };

    let slot = requested
      .iter_mut()
      .find(|attr| attr.key == key && attr.value.is_none());

    match (slot, value) {
      (Some(slot), Some(value)) => {
        slot.value = Some(value.to_owned());
        filled += 1;
      },
      (Some(_), None) => debug!("attribute {key} not defined by device"),
      (None, _) => debug!("attribute {key} was not requested"),
    }
  }

  let missing = requested.iter().filter(|attr| attr.value.is_none()).map(|attr| attr.key).join(", ");
  if !missing.is_empty() {
    debug!("attributes without value: {missing}");
  }

  Ok(filled)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::osd::types::*;

  #[test]
  fn set_list_layout() {
    let attrs = [Attr::set(OSD_APAGE_OBJECT_INFORMATION, OSD_ATTR_OI_USERNAME, b"abc")];
    let bytes = encode_set_list(&attrs).unwrap();

    assert_eq!(bytes.len(), LIST_HEADER_LEN + 24);
    assert_eq!(bytes[0], OSD_ATTR_LIST_SET_RETRIEVE);
    assert_eq!(&bytes[4..8], &24u32.to_be_bytes());
    assert_eq!(&bytes[8..12], &OSD_APAGE_OBJECT_INFORMATION.to_be_bytes());
    assert_eq!(&bytes[12..16], &OSD_ATTR_OI_USERNAME.to_be_bytes());
    assert_eq!(&bytes[22..24], &3u16.to_be_bytes());
    assert_eq!(&bytes[24..27], b"abc");
    assert!(bytes[27..].iter().all(|b| *b == 0));
  }

  #[test]
  fn set_list_keeps_order_and_duplicates() {
    let attrs = [
      Attr::set(OSD_APAGE_OBJECT_QUOTAS, OSD_ATTR_OQ_MAXIMUM_LENGTH, &[1]),
      Attr::set(OSD_APAGE_OBJECT_INFORMATION, OSD_ATTR_OI_USERNAME, &[2]),
      Attr::set(OSD_APAGE_OBJECT_QUOTAS, OSD_ATTR_OQ_MAXIMUM_LENGTH, &[3]),
    ];
    let bytes = encode_set_list(&attrs).unwrap();
    let decoded: Vec<_> = AttrIter::new(&bytes)
      .unwrap()
      .map(|record| record.map(|(key, value)| (key, value.map(<[u8]>::to_vec))))
      .collect::<Result<_, _>>()
      .unwrap();

    assert_eq!(decoded, vec![
      (attrs[0].key, Some(vec![1])),
      (attrs[1].key, Some(vec![2])),
      (attrs[2].key, Some(vec![3])),
    ]);
  }

  #[test]
  fn set_list_rejects_huge_value() {
    let attrs = [Attr::set(1, 1, &vec![0u8; 0xFFFF])];
    assert!(matches!(encode_set_list(&attrs), Err(OsdError::InvalidArgument(_))));
  }

  #[test]
  fn get_list_keys() {
    let attrs = [
      AttrGet::def(OSD_APAGE_OBJECT_INFORMATION, OSD_ATTR_OI_USED_CAPACITY, 8),
      AttrGet::def(OSD_APAGE_OBJECT_INFORMATION, OSD_ATTR_OI_LOGICAL_LENGTH, 8),
    ];
    let bytes = encode_get_list(&attrs).unwrap();

    assert_eq!(bytes.len(), LIST_HEADER_LEN + 2 * GET_ENTRY_LEN);
    assert_eq!(decode_get_list_keys(&bytes).unwrap(), vec![attrs[0].key, attrs[1].key]);
  }

  #[test]
  fn decode_matches_by_key_not_position() {
    let used = AttrKey::new(OSD_APAGE_OBJECT_INFORMATION, OSD_ATTR_OI_USED_CAPACITY);
    let logical = AttrKey::new(OSD_APAGE_OBJECT_INFORMATION, OSD_ATTR_OI_LOGICAL_LENGTH);
    // Device answers in the opposite order
    let bytes = encode_retrieved_list(&[
      (logical, Some(100u64.to_be_bytes().to_vec())),
      (used, Some(4096u64.to_be_bytes().to_vec())),
    ]).unwrap();

    let mut requested = [
      AttrGet::def(used.page, used.number, 8),
      AttrGet::def(logical.page, logical.number, 8),
    ];
    let mut iter = AttrIter::new(&bytes).unwrap();

    assert_eq!(decode_get_list(&mut requested, &mut iter).unwrap(), 2);
    assert_eq!(requested[0].value_be64(), Some(4096));
    assert_eq!(requested[1].value_be64(), Some(100));
    assert!(iter.is_done());
  }

  #[test]
  fn decode_leaves_missing_values_unset() {
    let name = AttrKey::new(OSD_APAGE_OBJECT_INFORMATION, OSD_ATTR_OI_USERNAME);
    let logical = AttrKey::new(OSD_APAGE_OBJECT_INFORMATION, OSD_ATTR_OI_LOGICAL_LENGTH);
    let bytes = encode_retrieved_list(&[
      (name, None),
      (logical, Some(8u64.to_be_bytes().to_vec())),
    ]).unwrap();

    let mut requested = [
      AttrGet::def(name.page, name.number, 16),
      AttrGet::def(logical.page, logical.number, 8),
    ];
    let mut iter = AttrIter::new(&bytes).unwrap();

    assert_eq!(decode_get_list(&mut requested, &mut iter).unwrap(), 1);
    assert_eq!(requested[0].value, None);
    assert_eq!(requested[1].value_be64(), Some(8));
  }

  #[test]
  fn decode_resumes_on_trailing_records() {
    let keys = [AttrKey::new(1, 1), AttrKey::new(1, 2), AttrKey::new(1, 3)];
    let bytes = encode_retrieved_list(&[
      (keys[0], Some(vec![0xa])),
      (keys[1], Some(vec![0xb])),
      (keys[2], Some(vec![0xc])),
    ]).unwrap();

    let mut first = [AttrGet::def(1, 1, 1)];
    let mut iter = AttrIter::new(&bytes).unwrap();
    assert_eq!(decode_get_list(&mut first, &mut iter).unwrap(), 1);
    let position = iter.position();

    let mut rest = [AttrGet::def(1, 3, 1), AttrGet::def(1, 2, 1)];
    let mut iter = AttrIter::resume(&bytes, position).unwrap();
    assert_eq!(decode_get_list(&mut rest, &mut iter).unwrap(), 2);
    assert_eq!(rest[0].value, Some(vec![0xc]));
    assert_eq!(rest[1].value, Some(vec![0xb]));
  }

  #[test]
  fn truncated_element_is_corrupted() {
    let mut bytes = encode_retrieved_list(&[(AttrKey::new(1, 1), Some(vec![1; 8]))]).unwrap();
    // Claim a longer value than the element holds
    bytes[LIST_HEADER_LEN + 15] = 32;

    let mut iter = AttrIter::new(&bytes).unwrap();
    assert!(matches!(iter.next(), Some(Err(OsdError::Corrupted(_)))));
    assert!(iter.next().is_none());
  }

  #[test]
  fn wrong_list_type_is_corrupted() {
    let bytes = encode_get_list(&[AttrGet::def(1, 1, 8)]).unwrap();
    assert!(matches!(AttrIter::new(&bytes), Err(OsdError::Corrupted(_))));
  }
}

// vim:ts=2 sw=2

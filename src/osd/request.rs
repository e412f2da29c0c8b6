//! One command's lifecycle on a device.
//!
//! `Idle -> Built -> Finalized -> Executed -> Ended`. A request is started
//! against a device, given a command and optional attribute lists, finalized
//! with a credential and executed once. Dropping it ends it, whatever state
//! it reached, so the device always gets its request back.

use std::time::Duration;

use itertools::Itertools;
use log::debug;

use super::attr::{self, AttrIter};
use super::device::{Command, CommandBlock, OsdDevice, Outcome};
use super::error::OsdError;
use super::sec::Credential;
use super::sense;
use super::types::{Attr, AttrGet, ObjectId};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
  Idle,
  Built,
  Finalized,
  Executed,
  Ended,
}

impl RequestState {
  pub fn name(&self) -> &'static str {
    match self {
      RequestState::Idle => "idle",
      RequestState::Built => "built",
      RequestState::Finalized => "finalized",
      RequestState::Executed => "executed",
      RequestState::Ended => "ended",
    }
  }
}

pub struct Request<'d> {
  dev: &'d mut dyn OsdDevice,
  state: RequestState,
  command: Option<Command>,
  set_list: Vec<Attr>,
  get_list: Vec<AttrGet>,
  credential: Option<Credential>,
  timeout: Duration,
  outcome: Option<Outcome>,
}

impl<'d> Request<'d> {
  /// Allocate a request on `dev`. Allocation failure is fatal for the caller.
  pub fn start(dev: &'d mut dyn OsdDevice) -> Result<Self, OsdError> {
    dev.alloc_request()?;

    Ok(Self {
      dev,
      state: RequestState::Idle,
      command: None,
      set_list: Vec::new(),
      get_list: Vec::new(),
      credential: None,
      timeout: DEFAULT_TIMEOUT,
      outcome: None,
    })
  }

  pub fn state(&self) -> RequestState {
    self.state
  }

  pub fn target(&self) -> Option<ObjectId> {
    self.command.as_ref().map(Command::target)
  }

  pub fn timeout(&self) -> Duration {
    self.timeout
  }

  fn expect_state(&self, expected: RequestState) -> Result<(), OsdError> {
    if self.state != expected {
      return Err(OsdError::InvalidState {
        expected: expected.name(),
        found: self.state.name(),
      });
    }
    Ok(())
  }

  fn expect_building(&self) -> Result<(), OsdError> {
    match self.state {
      RequestState::Idle | RequestState::Built => Ok(()),
      found => Err(OsdError::InvalidState {
        expected: "idle or built",
        found: found.name(),
      }),
    }
  }

  /// Attach the command and with it the target object.
  pub fn build(&mut self, command: Command) -> Result<&mut Self, OsdError> {
    self.expect_state(RequestState::Idle)?;
    self.command = Some(command);
    self.state = RequestState::Built;
    Ok(self)
  }

  pub fn format(&mut self, capacity: u64) -> Result<&mut Self, OsdError> {
    self.build(Command::Format { capacity })
  }

  pub fn create_partition(&mut self, partition: u64) -> Result<&mut Self, OsdError> {
    self.build(Command::CreatePartition { partition })
  }

  pub fn remove_partition(&mut self, partition: u64) -> Result<&mut Self, OsdError> {
    self.build(Command::RemovePartition { partition })
  }

  pub fn create_object(&mut self, obj: &ObjectId) -> Result<&mut Self, OsdError> {
    self.build(Command::CreateObject { obj: *obj })
  }

  pub fn remove_object(&mut self, obj: &ObjectId) -> Result<&mut Self, OsdError> {
    self.build(Command::RemoveObject { obj: *obj })
  }

  pub fn write(&mut self, obj: &ObjectId, offset: u64, data: &[u8]) -> Result<&mut Self, OsdError> {
    self.build(Command::Write { obj: *obj, offset, data: data.to_owned() })
  }

  pub fn read(&mut self, obj: &ObjectId, offset: u64, len: u64) -> Result<&mut Self, OsdError> {
    self.build(Command::Read { obj: *obj, offset, len })
  }

  pub fn set_attributes(&mut self, obj: &ObjectId) -> Result<&mut Self, OsdError> {
    self.build(Command::SetAttributes { obj: *obj })
  }

  pub fn get_attributes(&mut self, obj: &ObjectId) -> Result<&mut Self, OsdError> {
    self.build(Command::GetAttributes { obj: *obj })
  }

  /// Append attributes to set. Order is kept as given.
  pub fn add_set_attr_list(&mut self, attrs: &[Attr]) -> Result<&mut Self, OsdError> {
    self.expect_building()?;
    self.set_list.extend_from_slice(attrs);
    Ok(self)
  }

  /// Append attributes to get.
  pub fn add_get_attr_list(&mut self, attrs: &[AttrGet]) -> Result<&mut Self, OsdError> {
    self.expect_building()?;
    self.get_list.extend(attrs.iter().map(|attr| AttrGet { value: None, ..attr.clone() }));
    Ok(self)
  }

  pub fn set_timeout(&mut self, timeout: Duration) -> Result<&mut Self, OsdError> {
    self.expect_building()?;
    self.timeout = timeout;
    Ok(self)
  }

  /// Bind the credential. Only a built request can be finalized, once.
  pub fn finalize(&mut self, credential: Credential) -> Result<(), OsdError> {
    self.expect_state(RequestState::Built)?;
    self.credential = Some(credential);
    self.state = RequestState::Finalized;
    Ok(())
  }

  /// Send the command and decode the outcome. Blocks until the device
  /// answers or the timeout elapses.
  pub fn execute(&mut self) -> Result<(), OsdError> {
    self.expect_state(RequestState::Finalized)?;

    let (command, credential) = match (&self.command, &self.credential) {
      (Some(command), Some(credential)) => (command, credential),
      _ => return Err(OsdError::InvalidState { expected: "finalized", found: "unbound" }),
    };

    let set_attrs = if self.set_list.is_empty() {
      Vec::new()
    } else {
      attr::encode_set_list(&self.set_list)?
    };
    let get_attrs = if self.get_list.is_empty() {
      Vec::new()
    } else {
      attr::encode_get_list(&self.get_list)?
    };

    if !self.set_list.is_empty() || !self.get_list.is_empty() {
      debug!(
        "{} {}: set [{}] get [{}]",
        command.kind(),
        command.target(),
        self.set_list.iter().map(|attr| attr.key).join(", "),
        self.get_list.iter().map(|attr| attr.key).join(", "),
      );
    }

    let block = CommandBlock {
      command,
      set_attrs: &set_attrs,
      get_attrs: &get_attrs,
      get_alloc_len: if self.get_list.is_empty() { 0 } else { attr::retrieved_len(&self.get_list) },
      credential,
      timeout: self.timeout,
    };

    let outcome = self.dev.execute(&block);
    let result = sense::translate(&outcome.status);
    debug!("execute {} {} => {:?}", command.kind(), command.target(), result);

    self.outcome = Some(outcome);
    self.state = RequestState::Executed;
    result
  }

  pub fn outcome(&self) -> Option<&Outcome> {
    self.outcome.as_ref()
  }

  /// Bytes returned by a read.
  pub fn data_in(&self) -> &[u8] {
    self.outcome.as_ref().map_or(&[][..], |outcome| &outcome.data_in[..])
  }

  /// Fill the requested get list from the response. Values are matched by
  /// key; anything the device left out stays `None`. The returned iterator
  /// continues past the records consumed here.
  pub fn decode_get_attr_list(&self, requested: &mut [AttrGet])
    -> Result<AttrIter<'_>, OsdError> {
    self.expect_state(RequestState::Executed)?;

    let attrs_in = self.outcome.as_ref().map_or(&[][..], |outcome| &outcome.attrs_in[..]);
    if attrs_in.is_empty() {
      return Ok(AttrIter::empty());
    }

    let mut iter = AttrIter::new(attrs_in)?;
    attr::decode_get_list(requested, &mut iter)?;
    Ok(iter)
  }

  /// The get list as attached, with values filled from the response.
  pub fn decoded_get_list(&self) -> Result<Vec<AttrGet>, OsdError> {
    let mut requested = self.get_list.clone();
    self.decode_get_attr_list(&mut requested)?;
    Ok(requested)
  }
}

impl Drop for Request<'_> {
  fn drop(&mut self) {
    if self.state != RequestState::Ended {
      self.state = RequestState::Ended;
      self.dev.release_request();
    }
  }
}

/// Finalize, execute and end `request` in one go.
pub fn execute_and_finish(mut request: Request<'_>, credential: Credential) -> Result<(), OsdError> {
  request.finalize(credential)?;
  request.execute()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::osd::memosd::{FailurePolicy, MemOsd};
  use crate::osd::sec::{CredentialIssuer, NoSecurity};
  use crate::osd::types::*;

  #[test]
  fn finalize_requires_built() {
    let mut osd = MemOsd::new(1 << 20);
    let mut request = Request::start(&mut osd).unwrap();
    let cred = NoSecurity.issue(&OSD_ROOT_OBJECT, false, false).unwrap();

    assert!(matches!(request.finalize(cred), Err(OsdError::InvalidState { .. })));
  }

  #[test]
  fn finalize_twice_fails() {
    let mut osd = MemOsd::new(1 << 20);
    let mut request = Request::start(&mut osd).unwrap();
    request.create_partition(0x100).unwrap();
    let cred = NoSecurity.issue(&ObjectId::partition(0x100), false, false).unwrap();

    request.finalize(cred.clone()).unwrap();
    assert!(matches!(request.finalize(cred), Err(OsdError::InvalidState { .. })));
  }

  #[test]
  fn build_twice_fails() {
    let mut osd = MemOsd::new(1 << 20);
    let mut request = Request::start(&mut osd).unwrap();
    request.create_partition(0x100).unwrap();

    assert!(matches!(request.remove_partition(0x100), Err(OsdError::InvalidState { .. })));
    assert_eq!(request.state(), RequestState::Built);
  }

  #[test]
  fn request_released_on_every_path() {
    let mut osd = MemOsd::new(1 << 20);
    {
      let request = Request::start(&mut osd).unwrap();
      assert_eq!(request.state(), RequestState::Idle);
    }
    assert_eq!(osd.outstanding_requests(), 0);

    let mut request = Request::start(&mut osd).unwrap();
    request.remove_partition(0x200).unwrap();
    let cred = NoSecurity.issue(&ObjectId::partition(0x200), false, false).unwrap();
    assert!(execute_and_finish(request, cred).is_err());
    assert_eq!(osd.outstanding_requests(), 0);
  }

  #[test]
  fn allocation_failure_is_resource_exhausted() {
    let mut osd = MemOsd::new(1 << 20);
    osd.set_policy(FailurePolicy::NoMemory);

    assert!(matches!(Request::start(&mut osd), Err(OsdError::ResourceExhausted)));
    assert_eq!(osd.outstanding_requests(), 0);
  }

  #[test]
  fn set_then_get_reversed_order() {
    let mut osd = MemOsd::new(1 << 20);
    let obj = ObjectId::new(0x100, 0x10000);
    let name = b"ktest_write_read_attr\0";
    let max_len = 0x8000_0000u64.to_be_bytes();

    let mut request = Request::start(&mut osd).unwrap();
    request.create_partition(0x100).unwrap();
    execute_and_finish(request, NoSecurity.issue(&ObjectId::partition(0x100), false, false).unwrap()).unwrap();

    let mut request = Request::start(&mut osd).unwrap();
    request.create_object(&obj).unwrap();
    execute_and_finish(request, NoSecurity.issue(&obj, false, true).unwrap()).unwrap();

    let mut request = Request::start(&mut osd).unwrap();
    request
      .set_attributes(&obj)
      .unwrap()
      .add_set_attr_list(&[
        Attr::set(OSD_APAGE_OBJECT_QUOTAS, OSD_ATTR_OQ_MAXIMUM_LENGTH, &max_len),
        Attr::set(OSD_APAGE_OBJECT_INFORMATION, OSD_ATTR_OI_USERNAME, name),
      ])
      .unwrap();
    execute_and_finish(request, NoSecurity.issue(&obj, false, true).unwrap()).unwrap();

    let mut request = Request::start(&mut osd).unwrap();
    request
      .get_attributes(&obj)
      .unwrap()
      .add_get_attr_list(&[
        AttrGet::def(OSD_APAGE_OBJECT_INFORMATION, OSD_ATTR_OI_USERNAME, name.len() as u16),
        AttrGet::def(OSD_APAGE_OBJECT_QUOTAS, OSD_ATTR_OQ_MAXIMUM_LENGTH, 8),
      ])
      .unwrap();
    request.finalize(NoSecurity.issue(&obj, true, false).unwrap()).unwrap();
    request.execute().unwrap();

    let attrs = request.decoded_get_list().unwrap();
    assert_eq!(attrs[0].value.as_deref(), Some(&name[..]));
    assert_eq!(attrs[1].value_be64(), Some(0x8000_0000));
  }

  #[test]
  fn decode_before_execute_fails() {
    let mut osd = MemOsd::new(1 << 20);
    let obj = ObjectId::new(0x100, 0x10000);
    let mut request = Request::start(&mut osd).unwrap();
    request.get_attributes(&obj).unwrap();

    let mut attrs = [AttrGet::def(OSD_APAGE_OBJECT_INFORMATION, OSD_ATTR_OI_LOGICAL_LENGTH, 8)];
    assert!(matches!(request.decode_get_attr_list(&mut attrs), Err(OsdError::InvalidState { .. })));
  }

  #[test]
  fn timeout_reaches_device() {
    let mut osd = MemOsd::new(1 << 20);
    osd.set_policy(FailurePolicy::TimeOutOn(crate::osd::CommandKind::Format));

    let mut request = Request::start(&mut osd).unwrap();
    request.format(0).unwrap().set_timeout(DEFAULT_TIMEOUT * 10).unwrap();
    assert_eq!(request.timeout(), Duration::from_secs(600));

    let result = execute_and_finish(request, NoSecurity.issue(&OSD_ROOT_OBJECT, false, true).unwrap());
    assert_eq!(result, Err(OsdError::Timeout));
  }
}

// vim:ts=2 sw=2

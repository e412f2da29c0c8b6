//! Object-storage command layer: object identities, credentials, request
//! sessions, attribute lists and sense decoding.

pub mod attr;
pub mod device;
pub mod error;
pub mod memosd;
pub mod request;
pub mod sec;
pub mod sense;
pub mod types;

pub use device::{Command, CommandBlock, CommandKind, OsdDevice, Outcome, Status};
pub use error::OsdError;
pub use request::{execute_and_finish, Request, RequestState};
pub use sec::{Credential, CredentialIssuer, NoSecurity};
pub use types::{Attr, AttrGet, AttrKey, ObjectId};

// vim:ts=2 sw=2

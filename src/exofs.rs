//! exofs: a filesystem laid out on the objects of one OSD partition.

pub mod layout;
pub mod mkfs;

pub use mkfs::{bootstrap, bootstrap_with, MkfsOptions};

// vim:ts=2 sw=2

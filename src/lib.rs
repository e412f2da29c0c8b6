pub mod exofs;
pub mod machine;
pub mod osd;
pub mod util;

// vim:ts=2 sw=2

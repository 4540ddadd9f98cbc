//! IO modules - side effects (network, filesystem)

pub mod checksum;
pub mod download;
pub mod extract;

//! Shared value types for the flashpatch workspace.
//!
//! Provides [`BinBuf`], the owned byte container every image payload lives
//! in, and the device descriptors ([`Device`], [`InstallLocation`]) that
//! the patcher threads through the pipeline.

#![forbid(unsafe_code)]

pub mod binbuf;
pub mod device;

pub use binbuf::BinBuf;
pub use device::{Device, InstallLocation, InstallLocationParseError};

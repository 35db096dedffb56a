//! In-memory CPIO newc archive reader and editor.
//!
//! Android ramdisks are CPIO archives in the "new ASCII" format (magic
//! `070701`): fixed-width hex ASCII headers, 4-byte alignment for names
//! and content, terminated by an entry named `TRAILER!!!`.
//!
//! [`CpioArchive`] loads an archive into an ordered list of [`CpioEntry`],
//! supports in-place edits, and serializes back out. Entry order is
//! preserved across load/edit/save; new entries append.
//!
//! ```
//! use flashpatch_cpio::CpioArchive;
//!
//! let mut cpio = CpioArchive::new();
//! cpio.set_contents("default.prop", b"ro.debuggable=1\n".into());
//! let bytes = cpio.serialize();
//! let reloaded = CpioArchive::load(&bytes).expect("valid archive");
//! assert_eq!(reloaded.contents("default.prop"), Some(&b"ro.debuggable=1\n"[..]));
//! ```

#![forbid(unsafe_code)]

pub mod archive;
pub mod entry;

pub use archive::CpioArchive;
pub use entry::{CpioEntry, S_IFDIR, S_IFLNK, S_IFMT, S_IFREG};

use thiserror::Error;

/// Errors that can occur when parsing or editing a CPIO archive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CpioError {
    /// The input ended before the declared structure.
    #[error("cpio input truncated at offset {offset}")]
    Truncated {
        /// Byte offset at which more data was expected.
        offset: usize,
    },
    /// An entry header does not start with the newc magic.
    #[error("bad cpio magic at offset {offset}")]
    BadMagic {
        /// Byte offset of the offending header.
        offset: usize,
    },
    /// A header field is not valid fixed-width hex ASCII.
    #[error("non-hex {field} field in cpio header at offset {offset}")]
    BadHexField {
        /// Name of the offending header field.
        field: &'static str,
        /// Byte offset of the entry header.
        offset: usize,
    },
    /// An entry name is missing its NUL terminator.
    #[error("unterminated cpio entry name at offset {offset}")]
    UnterminatedName {
        /// Byte offset of the entry header.
        offset: usize,
    },
    /// The archive ended without a `TRAILER!!!` entry.
    #[error("cpio archive has no trailer entry")]
    MissingTrailer,
    /// An operation referenced an entry that does not exist.
    #[error("no cpio entry named {0:?}")]
    EntryMissing(String),
}

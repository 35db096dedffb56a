//! Boundary error taxonomy.

use std::io;
use std::path::PathBuf;

use flashpatch_bootimg::BootImageError;
use flashpatch_cpio::CpioError;
use thiserror::Error;

use crate::transform::TransformError;

/// Every failure `patch_file` can surface.
///
/// Errors propagate upward unchanged; the first one encountered wins,
/// except cancellation, which overrides any pending error.
#[derive(Debug, Error)]
pub enum PatchError {
    /// The input file is not a ZIP archive.
    #[error("only zip archives are supported: {path}")]
    OnlyZipSupported {
        /// Path of the rejected input.
        path: PathBuf,
    },
    /// A file handed to the boot-image patcher is not a boot image.
    #[error("{name:?} is not a supported boot image")]
    OnlyBootImageSupported {
        /// Name of the rejected entry.
        name: String,
    },
    /// Opening the source archive failed.
    #[error("failed to open archive for reading")]
    ArchiveReadOpen(#[source] zip::result::ZipError),
    /// Reading an entry's header failed.
    #[error("failed to read archive entry header")]
    ArchiveReadHeader(#[source] zip::result::ZipError),
    /// Reading an entry's data failed.
    #[error("failed to read data of archive entry {name:?}")]
    ArchiveReadData {
        /// Entry being read.
        name: String,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// Creating the output archive failed.
    #[error("failed to open archive for writing: {path}")]
    ArchiveWriteOpen {
        /// Path of the output archive.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// Writing an entry to the output archive failed.
    #[error("failed to write archive entry {name:?}")]
    ArchiveWriteData {
        /// Entry being written.
        name: String,
        /// Underlying failure.
        #[source]
        source: zip::result::ZipError,
    },
    /// A boot image failed to decode.
    #[error("failed to parse boot image")]
    BootImageParse(#[from] BootImageError),
    /// A boot image failed to re-encode.
    #[error("failed to create boot image")]
    BootImageCreate(#[source] BootImageError),
    /// A ramdisk failed to parse or serialize.
    #[error("ramdisk cpio error")]
    Cpio(#[from] CpioError),
    /// A registered transform reported a failure.
    #[error("ramdisk transform {key:?} failed")]
    RamdiskTransform {
        /// Registry key of the failing transform.
        key: String,
        /// The transform's own error.
        #[source]
        source: TransformError,
    },
    /// A helper file could not be opened.
    #[error("failed to open file: {path}")]
    FileOpen {
        /// Path that failed to open.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// A helper file could not be read.
    #[error("failed to read file: {path}")]
    FileRead {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// A file could not be written.
    #[error("failed to write file: {path}")]
    FileWrite {
        /// Path that failed to write.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// The cancel flag was observed at a polling boundary.
    #[error("patching was cancelled")]
    Cancelled,
    /// A bug or an unclassifiable failure.
    #[error("internal error: {0}")]
    Internal(String),
}

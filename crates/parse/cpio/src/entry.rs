//! CPIO entry metadata and content.

use flashpatch_core::BinBuf;

/// File-type mask in a CPIO mode field.
pub const S_IFMT: u32 = 0o170_000;
/// Regular file type bits.
pub const S_IFREG: u32 = 0o100_000;
/// Directory type bits.
pub const S_IFDIR: u32 = 0o040_000;
/// Symbolic link type bits.
pub const S_IFLNK: u32 = 0o120_000;

/// Default mode for entries created by `set_contents`: regular file, 0644.
pub(crate) const DEFAULT_FILE_MODE: u32 = S_IFREG | 0o644;

/// Mode for symlink entries: link type, 0777.
pub(crate) const SYMLINK_MODE: u32 = S_IFLNK | 0o777;

/// One entry of a CPIO archive.
///
/// `name` is a POSIX path without a leading `/`. Symbolic links store
/// their target path in `content`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpioEntry {
    /// Entry path, relative, no leading slash.
    pub name: String,
    /// UNIX permissions plus file-type bits.
    pub mode: u32,
    /// Owner user id.
    pub uid: u32,
    /// Owner group id.
    pub gid: u32,
    /// Hard-link count.
    pub nlink: u32,
    /// Modification time, seconds since the epoch.
    pub mtime: u32,
    /// Device major number of the containing filesystem.
    pub dev_major: u32,
    /// Device minor number of the containing filesystem.
    pub dev_minor: u32,
    /// Device major number for device-node entries.
    pub rdev_major: u32,
    /// Device minor number for device-node entries.
    pub rdev_minor: u32,
    /// File content; symlink target for link entries.
    pub content: BinBuf,
}

impl CpioEntry {
    /// Creates a regular-file entry with default ownership (root:root,
    /// mtime 0, nlink 1).
    #[must_use]
    pub fn new_file(name: &str, mode: u32, content: BinBuf) -> Self {
        Self {
            name: name.to_string(),
            mode,
            uid: 0,
            gid: 0,
            nlink: 1,
            mtime: 0,
            dev_major: 0,
            dev_minor: 0,
            rdev_major: 0,
            rdev_minor: 0,
            content,
        }
    }

    /// Creates a symlink entry pointing at `target`.
    #[must_use]
    pub fn new_symlink(name: &str, target: &str) -> Self {
        Self::new_file(name, SYMLINK_MODE, BinBuf::from_slice(target.as_bytes()))
    }

    /// Returns `true` if the type bits mark this entry as a symlink.
    #[must_use]
    pub fn is_symlink(&self) -> bool {
        self.mode & S_IFMT == S_IFLNK
    }

    /// Returns `true` if the type bits mark this entry as a directory.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }
}

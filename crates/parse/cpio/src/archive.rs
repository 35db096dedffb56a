//! CPIO newc wire format: parsing and serialization.

use flashpatch_core::BinBuf;

use crate::entry::{CpioEntry, DEFAULT_FILE_MODE};
use crate::CpioError;

/// newc header magic.
const MAGIC: &[u8; 6] = b"070701";

/// Fixed header size: magic + 13 fields of 8 hex digits each.
const HEADER_SIZE: usize = 6 + 13 * 8;

/// Sentinel name of the terminating entry.
const TRAILER_NAME: &str = "TRAILER!!!";

/// First inode number assigned on serialization.
///
/// High enough that renumbered inodes never collide with device nodes a
/// kernel may have recorded in the original archive.
const INODE_BASE: u32 = 300_000;

/// Header and name, and content, are each padded to this alignment.
const ALIGN: usize = 4;

fn align_up(n: usize) -> usize {
    n.div_ceil(ALIGN) * ALIGN
}

/// Reads one 8-digit lowercase-hex header field.
fn hex_field(
    data: &[u8],
    header_offset: usize,
    index: usize,
    field: &'static str,
) -> Result<u32, CpioError> {
    let start = header_offset + 6 + index * 8;
    let bytes = &data[start..start + 8];
    let text = core::str::from_utf8(bytes).map_err(|_| CpioError::BadHexField {
        field,
        offset: header_offset,
    })?;
    u32::from_str_radix(text, 16).map_err(|_| CpioError::BadHexField {
        field,
        offset: header_offset,
    })
}

fn push_hex_field(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(format!("{value:08x}").as_bytes());
}

/// In-memory CPIO newc archive: an ordered sequence of entries with
/// unique names.
///
/// The trailer entry is not stored; it is consumed on [`load`] and
/// re-emitted by [`serialize`].
///
/// [`load`]: CpioArchive::load
/// [`serialize`]: CpioArchive::serialize
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpioArchive {
    entries: Vec<CpioEntry>,
}

impl CpioArchive {
    /// Creates an empty archive.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Parses a newc archive from `data`.
    ///
    /// Entries are stored in archive order. Parsing stops at the
    /// `TRAILER!!!` entry; bytes after it (typically zero padding) are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns [`CpioError`] on short input, bad magic, non-hex header
    /// fields, an unterminated name, or a missing trailer.
    pub fn load(data: &[u8]) -> Result<Self, CpioError> {
        let mut entries = Vec::new();
        let mut offset = 0usize;

        loop {
            if data.len() < offset + HEADER_SIZE {
                return Err(if entries.is_empty() && offset == 0 && data.len() < HEADER_SIZE {
                    CpioError::Truncated { offset }
                } else {
                    CpioError::MissingTrailer
                });
            }
            if &data[offset..offset + 6] != MAGIC {
                return Err(CpioError::BadMagic { offset });
            }

            // Field order: ino, mode, uid, gid, nlink, mtime, filesize,
            // devmajor, devminor, rdevmajor, rdevminor, namesize, check.
            let mode = hex_field(data, offset, 1, "mode")?;
            let uid = hex_field(data, offset, 2, "uid")?;
            let gid = hex_field(data, offset, 3, "gid")?;
            let nlink = hex_field(data, offset, 4, "nlink")?;
            let mtime = hex_field(data, offset, 5, "mtime")?;
            let filesize = hex_field(data, offset, 6, "filesize")? as usize;
            let dev_major = hex_field(data, offset, 7, "devmajor")?;
            let dev_minor = hex_field(data, offset, 8, "devminor")?;
            let rdev_major = hex_field(data, offset, 9, "rdevmajor")?;
            let rdev_minor = hex_field(data, offset, 10, "rdevminor")?;
            let namesize = hex_field(data, offset, 11, "namesize")? as usize;
            // check (index 12) is always zero in practice; ignored.

            let name_start = offset + HEADER_SIZE;
            let name_end = name_start
                .checked_add(namesize)
                .ok_or(CpioError::Truncated { offset })?;
            if namesize == 0 || data.len() < name_end {
                return Err(CpioError::Truncated { offset });
            }
            if data[name_end - 1] != 0 {
                return Err(CpioError::UnterminatedName { offset });
            }
            let name = core::str::from_utf8(&data[name_start..name_end - 1])
                .map_err(|_| CpioError::UnterminatedName { offset })?
                .to_string();

            let content_start = align_up(name_end);
            let content_end = content_start
                .checked_add(filesize)
                .ok_or(CpioError::Truncated { offset })?;

            if name == TRAILER_NAME {
                return Ok(Self { entries });
            }

            if data.len() < content_end {
                return Err(CpioError::Truncated {
                    offset: content_start,
                });
            }

            entries.push(CpioEntry {
                name,
                mode,
                uid,
                gid,
                nlink,
                mtime,
                dev_major,
                dev_minor,
                rdev_major,
                rdev_minor,
                content: BinBuf::from_slice(&data[content_start..content_end]),
            });

            offset = align_up(content_end);
        }
    }

    /// Serializes the archive, appending the trailer.
    ///
    /// Inode numbers are reassigned sequentially from 300000 and the
    /// checksum field is written as zero, so two archives with identical
    /// entries serialize to identical bytes regardless of their original
    /// inode numbering.
    #[must_use]
    pub fn serialize(&self) -> BinBuf {
        let mut out = Vec::new();
        for (index, entry) in self.entries.iter().enumerate() {
            let ino = INODE_BASE + u32::try_from(index).unwrap_or(u32::MAX - INODE_BASE);
            write_entry(&mut out, ino, entry);
        }
        let trailer = CpioEntry::new_file(TRAILER_NAME, 0, BinBuf::new());
        write_entry(&mut out, 0, &trailer);
        BinBuf::from(out)
    }

    /// Borrows the content of the named entry.
    #[must_use]
    pub fn contents(&self, name: &str) -> Option<&[u8]> {
        self.entry(name).map(|e| e.content.as_slice())
    }

    /// Replaces the content of `name`, keeping its metadata; if no such
    /// entry exists, appends a regular file with default metadata
    /// (mode 0100644, root:root, mtime 0).
    pub fn set_contents(&mut self, name: &str, data: BinBuf) {
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => entry.content = data,
            None => self
                .entries
                .push(CpioEntry::new_file(name, DEFAULT_FILE_MODE, data)),
        }
    }

    /// Appends (or replaces) a regular file with an explicit mode.
    pub fn add_file(&mut self, name: &str, mode: u32, data: BinBuf) {
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => {
                entry.mode = mode;
                entry.content = data;
            }
            None => self.entries.push(CpioEntry::new_file(name, mode, data)),
        }
    }

    /// Appends a symlink entry `name` pointing at `target`.
    ///
    /// An existing entry with the same name is replaced.
    pub fn add_symlink(&mut self, target: &str, name: &str) {
        self.remove(name);
        self.entries.push(CpioEntry::new_symlink(name, target));
    }

    /// Removes the named entry. Returns `true` if it existed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.name != name);
        self.entries.len() != before
    }

    /// Returns `true` if an entry with this name exists.
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.entry(name).is_some()
    }

    /// Borrows the named entry.
    #[must_use]
    pub fn entry(&self, name: &str) -> Option<&CpioEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Iterates over `(name, entry)` pairs in archive order.
    pub fn enumerate(&self) -> impl Iterator<Item = (&str, &CpioEntry)> {
        self.entries.iter().map(|e| (e.name.as_str(), e))
    }

    /// Number of entries (trailer excluded).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the archive has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn write_entry(out: &mut Vec<u8>, ino: u32, entry: &CpioEntry) {
    let namesize = entry.name.len() + 1;
    let filesize = entry.content.len();

    out.extend_from_slice(MAGIC);
    push_hex_field(out, ino);
    push_hex_field(out, entry.mode);
    push_hex_field(out, entry.uid);
    push_hex_field(out, entry.gid);
    push_hex_field(out, entry.nlink);
    push_hex_field(out, entry.mtime);
    push_hex_field(out, u32::try_from(filesize).unwrap_or(u32::MAX));
    push_hex_field(out, entry.dev_major);
    push_hex_field(out, entry.dev_minor);
    push_hex_field(out, entry.rdev_major);
    push_hex_field(out, entry.rdev_minor);
    push_hex_field(out, u32::try_from(namesize).unwrap_or(u32::MAX));
    push_hex_field(out, 0); // check

    out.extend_from_slice(entry.name.as_bytes());
    out.push(0);
    while out.len() % ALIGN != 0 {
        out.push(0);
    }

    out.extend_from_slice(&entry.content);
    while out.len() % ALIGN != 0 {
        out.push(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Serializes a small archive through the public API and returns the
    /// wire bytes, used as the known-good fixture for parser tests.
    fn make_archive_bytes() -> Vec<u8> {
        let mut cpio = CpioArchive::new();
        cpio.set_contents("init.rc", b"on boot\n".into());
        cpio.add_file("sbin/busybox", 0o100_755, b"\x7fELF".into());
        cpio.add_symlink("/system/bin/sh", "sbin/sh");
        cpio.serialize().into_vec()
    }

    #[test]
    fn load_serialize_round_trip() {
        let bytes = make_archive_bytes();
        let cpio = CpioArchive::load(&bytes).expect("valid archive");
        assert_eq!(cpio.len(), 3);
        assert_eq!(cpio.serialize().as_slice(), &bytes[..]);
    }

    #[test]
    fn order_preserved_across_round_trip() {
        let bytes = make_archive_bytes();
        let cpio = CpioArchive::load(&bytes).expect("valid archive");
        let names: Vec<&str> = cpio.enumerate().map(|(name, _)| name).collect();
        assert_eq!(names, ["init.rc", "sbin/busybox", "sbin/sh"]);
    }

    #[test]
    fn metadata_preserved_across_round_trip() {
        let bytes = make_archive_bytes();
        let cpio = CpioArchive::load(&bytes).expect("valid archive");

        let busybox = cpio.entry("sbin/busybox").expect("entry present");
        assert_eq!(busybox.mode, 0o100_755);
        assert_eq!(busybox.content.as_slice(), b"\x7fELF");

        let sh = cpio.entry("sbin/sh").expect("entry present");
        assert!(sh.is_symlink());
        assert_eq!(sh.content.as_slice(), b"/system/bin/sh");
    }

    #[test]
    fn add_then_remove_is_a_no_op() {
        let bytes = make_archive_bytes();
        let mut cpio = CpioArchive::load(&bytes).expect("valid archive");
        cpio.set_contents("foo", b"bar".into());
        assert!(cpio.remove("foo"));
        assert_eq!(cpio.serialize().as_slice(), &bytes[..]);
    }

    #[test]
    fn set_contents_replaces_in_place() {
        let mut cpio = CpioArchive::load(&make_archive_bytes()).expect("valid archive");
        cpio.set_contents("init.rc", b"on late-init\n".into());
        let names: Vec<&str> = cpio.enumerate().map(|(name, _)| name).collect();
        assert_eq!(names, ["init.rc", "sbin/busybox", "sbin/sh"]);
        assert_eq!(cpio.contents("init.rc"), Some(&b"on late-init\n"[..]));
        // Metadata survives a content replacement.
        assert_eq!(cpio.entry("sbin/busybox").unwrap().mode, 0o100_755);
    }

    #[test]
    fn set_contents_appends_with_default_metadata() {
        let mut cpio = CpioArchive::new();
        cpio.set_contents("default.prop", b"x=1\n".into());
        let entry = cpio.entry("default.prop").expect("entry present");
        assert_eq!(entry.mode, 0o100_644);
        assert_eq!(entry.uid, 0);
        assert_eq!(entry.nlink, 1);
        assert_eq!(entry.mtime, 0);
    }

    #[test]
    fn inodes_renumbered_from_base() {
        let bytes = make_archive_bytes();
        let first_ino = u32::from_str_radix(
            core::str::from_utf8(&bytes[6..14]).expect("hex field"),
            16,
        )
        .expect("hex field");
        assert_eq!(first_ino, 300_000);
    }

    #[test]
    fn empty_archive_is_just_a_trailer() {
        let bytes = CpioArchive::new().serialize();
        let cpio = CpioArchive::load(&bytes).expect("valid archive");
        assert!(cpio.is_empty());
    }

    #[test]
    fn content_alignment_padding() {
        // 3-byte content forces a single pad byte before the next header.
        let mut cpio = CpioArchive::new();
        cpio.set_contents("a", b"abc".into());
        cpio.set_contents("b", b"defg".into());
        let bytes = cpio.serialize();
        let reloaded = CpioArchive::load(&bytes).expect("valid archive");
        assert_eq!(reloaded.contents("a"), Some(&b"abc"[..]));
        assert_eq!(reloaded.contents("b"), Some(&b"defg"[..]));
    }

    #[test]
    fn reject_empty_input() {
        assert_eq!(
            CpioArchive::load(&[]),
            Err(CpioError::Truncated { offset: 0 })
        );
    }

    #[test]
    fn reject_bad_magic() {
        let mut bytes = make_archive_bytes();
        bytes[0] = b'0';
        bytes[5] = b'0'; // "070700", the binary-adjacent variant
        assert_eq!(CpioArchive::load(&bytes), Err(CpioError::BadMagic { offset: 0 }));
    }

    #[test]
    fn reject_non_hex_field() {
        let mut bytes = make_archive_bytes();
        bytes[6 + 8] = b'z'; // first byte of the mode field
        assert!(matches!(
            CpioArchive::load(&bytes),
            Err(CpioError::BadHexField { field: "mode", .. })
        ));
    }

    #[test]
    fn reject_unterminated_name() {
        let mut cpio = CpioArchive::new();
        cpio.set_contents("ab", b"".into());
        let mut bytes = cpio.serialize().into_vec();
        // "ab\0" + 1 pad byte follow the header; clobber the NUL.
        bytes[HEADER_SIZE + 2] = b'!';
        assert!(matches!(
            CpioArchive::load(&bytes),
            Err(CpioError::UnterminatedName { .. })
        ));
    }

    #[test]
    fn reject_missing_trailer() {
        let mut cpio = CpioArchive::new();
        cpio.set_contents("file", b"data".into());
        let bytes = cpio.serialize();
        // Cut the archive off before the trailer header.
        let truncated = &bytes[..HEADER_SIZE + 8];
        assert!(matches!(
            CpioArchive::load(truncated),
            Err(CpioError::MissingTrailer) | Err(CpioError::Truncated { .. })
        ));
    }

    #[test]
    fn trailing_padding_after_trailer_ignored() {
        let mut bytes = make_archive_bytes();
        bytes.extend_from_slice(&[0u8; 512]);
        let cpio = CpioArchive::load(&bytes).expect("valid archive");
        assert_eq!(cpio.len(), 3);
    }
}

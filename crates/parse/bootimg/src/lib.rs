//! Boot image codec for the Android boot image family.
//!
//! Decodes and re-encodes the interrelated binary formats an Android
//! bootloader consumes: plain Android images, Bump-signed images, Loki
//! images, MTK images with vendor headers, and Sony ELF images. All
//! formats share one intermediate representation, [`BootImage`], so a
//! caller can decode any of them, edit the payloads, and encode without
//! caring which wrapper the bytes arrived in.
//!
//! Detection probes formats in a fixed precedence ([`BootImage::detect`]);
//! Loki, Bump and MTK wrap or extend a plain Android image and must be
//! recognized before the Android probe matches them.
//!
//! For well-formed plain Android inputs, `decode` followed by `encode`
//! with unchanged payloads reproduces the input byte for byte.

#![forbid(unsafe_code)]

mod android;
mod bump;
mod loki;
mod mtk;
mod sony;

use flashpatch_core::BinBuf;
use thiserror::Error;
use tracing::warn;

/// Page sizes a boot image header may declare.
pub const ALLOWED_PAGE_SIZES: [u32; 7] = [2048, 4096, 8192, 16384, 32768, 65536, 131_072];

/// Default page size for images built from scratch.
pub const DEFAULT_PAGE_SIZE: u32 = 2048;

/// Errors produced while decoding or encoding a boot image.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BootImageError {
    /// No supported format matched the input.
    #[error("unrecognized boot image format")]
    UnknownFormat,
    /// The input ended before the structure it declares.
    #[error("boot image truncated while reading {context}")]
    Truncated {
        /// What was being read when the input ran out.
        context: &'static str,
    },
    /// The header declares a page size outside the allowed set.
    #[error("invalid boot image page size {0}")]
    InvalidPageSize(u32),
    /// An MTK vendor header's size field disagrees with the payload.
    #[error("mtk {label} header declares {declared} bytes but payload has {actual}")]
    MtkSizeMismatch {
        /// Which payload the header belongs to.
        label: &'static str,
        /// Size recorded inside the vendor header.
        declared: u32,
        /// Actual payload length after the vendor header.
        actual: u32,
    },
    /// A Loki image's kernel or ramdisk size is recoverable from neither
    /// the Android header nor the Loki side header.
    #[error("loki image has no recoverable {0} size")]
    LokiMissingSize(&'static str),
    /// A Sony ELF image lacks a required segment.
    #[error("sony elf image is missing a {0} segment")]
    SonyMissingSegment(&'static str),
    /// A Sony ELF image's structure is malformed.
    #[error("sony elf image is malformed: {context}")]
    SonyMalformed {
        /// What was malformed.
        context: &'static str,
    },
}

/// The wire formats the codec understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootImageType {
    /// Plain AOSP boot image.
    Android,
    /// Android image with the 9-byte Bump trailer.
    Bump,
    /// Loki'd image for locked LG/Samsung bootloaders.
    Loki,
    /// Android image with MTK vendor headers on kernel and/or ramdisk.
    Mtk,
    /// Sony ELF32 wrapper.
    SonyElf,
}

/// Intermediate representation of a boot image: the union of every field
/// any supported format carries.
///
/// Produced by [`BootImage::decode`]; consumed by [`BootImage::encode`].
/// Size fields are recomputed from payload lengths and the SHA-1 `id` is
/// recomputed at encode time, so callers may freely replace payloads.
#[derive(Debug, Clone)]
pub struct BootImage {
    /// Kernel command line, at most 511 bytes plus NUL on the wire.
    pub cmdline: String,
    /// Board or product name, at most 15 bytes plus NUL on the wire.
    pub board_name: String,

    /// Kernel physical load address.
    pub kernel_addr: u32,
    /// Ramdisk physical load address.
    pub ramdisk_addr: u32,
    /// Second bootloader load address.
    pub second_addr: u32,
    /// Kernel tags address.
    pub tags_addr: u32,
    /// Sony IPL load address.
    pub ipl_addr: u32,
    /// Sony RPM load address.
    pub rpm_addr: u32,
    /// Sony APPSBL load address.
    pub appsbl_addr: u32,
    /// Sony ELF entry point.
    pub entrypoint_addr: u32,

    /// Kernel size as the source header declared it.
    pub hdr_kernel_size: u32,
    /// Ramdisk size as the source header declared it.
    pub hdr_ramdisk_size: u32,
    /// Second bootloader size as the source header declared it.
    pub hdr_second_size: u32,
    /// Device tree size as the source header declared it.
    pub hdr_dt_size: u32,
    /// The header's unused word, preserved for byte-identical re-encoding.
    pub hdr_unused: u32,

    /// Page size; one of [`ALLOWED_PAGE_SIZES`].
    pub page_size: u32,
    /// SHA-1 digest, 20 bytes right-zero-padded to 32.
    pub id: [u8; 32],

    /// Kernel payload (MTK vendor header excluded).
    pub kernel: BinBuf,
    /// Ramdisk payload (MTK vendor header excluded).
    pub ramdisk: BinBuf,
    /// Second bootloader payload.
    pub second: BinBuf,
    /// Device tree payload.
    pub dt: BinBuf,
    /// Aboot fragment recovered from a Loki image.
    pub aboot: BinBuf,
    /// Raw 512-byte MTK header for the kernel, when present.
    pub mtk_kernel_hdr: BinBuf,
    /// Raw 512-byte MTK header for the ramdisk, when present.
    pub mtk_ramdisk_hdr: BinBuf,
    /// Sony IPL payload.
    pub ipl: BinBuf,
    /// Sony RPM payload.
    pub rpm: BinBuf,
    /// Sony APPSBL payload.
    pub appsbl: BinBuf,
    /// Sony SIN trailer header, when present.
    pub sony_sin_hdr: BinBuf,
    /// Sony SIN trailer payload, when present.
    pub sony_sin: BinBuf,

    /// Format the image was decoded from.
    pub source_type: BootImageType,
    /// Format [`encode`](BootImage::encode) will produce.
    pub target_type: BootImageType,
}

impl Default for BootImage {
    fn default() -> Self {
        // AOSP mkbootimg defaults: base 0x10000000 plus the standard
        // per-section offsets.
        Self {
            cmdline: String::new(),
            board_name: String::new(),
            kernel_addr: 0x1000_8000,
            ramdisk_addr: 0x1100_0000,
            second_addr: 0x10f0_0000,
            tags_addr: 0x1000_0100,
            ipl_addr: 0,
            rpm_addr: 0,
            appsbl_addr: 0,
            entrypoint_addr: 0,
            hdr_kernel_size: 0,
            hdr_ramdisk_size: 0,
            hdr_second_size: 0,
            hdr_dt_size: 0,
            hdr_unused: 0,
            page_size: DEFAULT_PAGE_SIZE,
            id: [0; 32],
            kernel: BinBuf::new(),
            ramdisk: BinBuf::new(),
            second: BinBuf::new(),
            dt: BinBuf::new(),
            aboot: BinBuf::new(),
            mtk_kernel_hdr: BinBuf::new(),
            mtk_ramdisk_hdr: BinBuf::new(),
            ipl: BinBuf::new(),
            rpm: BinBuf::new(),
            appsbl: BinBuf::new(),
            sony_sin_hdr: BinBuf::new(),
            sony_sin: BinBuf::new(),
            source_type: BootImageType::Android,
            target_type: BootImageType::Android,
        }
    }
}

/// Equality ignores the format tags, the header's unused word, and the
/// recovered aboot fragment: a Loki-wrapped image equals its plain
/// Android equivalent.
impl PartialEq for BootImage {
    fn eq(&self, other: &Self) -> bool {
        self.cmdline == other.cmdline
            && self.board_name == other.board_name
            && self.kernel_addr == other.kernel_addr
            && self.ramdisk_addr == other.ramdisk_addr
            && self.second_addr == other.second_addr
            && self.tags_addr == other.tags_addr
            && self.ipl_addr == other.ipl_addr
            && self.rpm_addr == other.rpm_addr
            && self.appsbl_addr == other.appsbl_addr
            && self.entrypoint_addr == other.entrypoint_addr
            && self.hdr_kernel_size == other.hdr_kernel_size
            && self.hdr_ramdisk_size == other.hdr_ramdisk_size
            && self.hdr_second_size == other.hdr_second_size
            && self.hdr_dt_size == other.hdr_dt_size
            && self.page_size == other.page_size
            && self.id == other.id
            && self.kernel == other.kernel
            && self.ramdisk == other.ramdisk
            && self.second == other.second
            && self.dt == other.dt
            && self.mtk_kernel_hdr == other.mtk_kernel_hdr
            && self.mtk_ramdisk_hdr == other.mtk_ramdisk_hdr
            && self.ipl == other.ipl
            && self.rpm == other.rpm
            && self.appsbl == other.appsbl
            && self.sony_sin_hdr == other.sony_sin_hdr
            && self.sony_sin == other.sony_sin
    }
}

impl Eq for BootImage {}

impl BootImage {
    /// Probes the formats in precedence order and returns the first match.
    ///
    /// Order matters: Loki, Bump and MTK images also satisfy the Android
    /// probe and must be recognized first.
    #[must_use]
    pub fn detect(data: &[u8]) -> Option<BootImageType> {
        if loki::is_valid(data) {
            Some(BootImageType::Loki)
        } else if bump::is_valid(data) {
            Some(BootImageType::Bump)
        } else if mtk::is_valid(data) {
            Some(BootImageType::Mtk)
        } else if android::is_valid(data) {
            Some(BootImageType::Android)
        } else if sony::is_valid(data) {
            Some(BootImageType::SonyElf)
        } else {
            None
        }
    }

    /// Returns `true` if any supported format matches `data`.
    #[must_use]
    pub fn is_valid(data: &[u8]) -> bool {
        Self::detect(data).is_some()
    }

    /// Decodes `data` into the intermediate representation.
    ///
    /// `source_type` records the detected format; `target_type` matches
    /// it, except Loki, which re-encodes as Android (full Loki
    /// re-injection needs the device's aboot partition).
    ///
    /// # Errors
    ///
    /// Returns [`BootImageError::UnknownFormat`] if no format matches,
    /// or a format-specific error for a recognized but malformed image.
    pub fn decode(data: &[u8]) -> Result<Self, BootImageError> {
        let source_type = Self::detect(data).ok_or(BootImageError::UnknownFormat)?;
        let mut image = match source_type {
            BootImageType::Android | BootImageType::Bump => android::decode(data)?,
            BootImageType::Mtk => mtk::decode(data)?,
            BootImageType::Loki => loki::decode(data)?,
            BootImageType::SonyElf => sony::decode(data)?,
        };
        image.source_type = source_type;
        image.target_type = match source_type {
            BootImageType::Loki => BootImageType::Android,
            other => other,
        };
        Ok(image)
    }

    /// Encodes the image in its `target_type` format.
    ///
    /// Header size fields are recomputed from the payload lengths and the
    /// SHA-1 `id` is refreshed before the header is written; padding up
    /// to each page boundary is zero-filled.
    ///
    /// # Errors
    ///
    /// Returns [`BootImageError::InvalidPageSize`] if `page_size` is not
    /// in the allowed set, or a Sony-specific error for an ELF target
    /// lacking its required segments.
    pub fn encode(&self) -> Result<Vec<u8>, BootImageError> {
        match self.target_type {
            BootImageType::Android | BootImageType::Mtk => android::encode(self),
            BootImageType::Bump => bump::encode(self),
            BootImageType::Loki => {
                // Loki repack is unsupported; emit the equivalent Android
                // image instead.
                warn!("loki re-encode requested; falling back to android format");
                android::encode(self)
            }
            BootImageType::SonyElf => sony::encode(self),
        }
    }
}

pub(crate) fn align_up(n: usize, alignment: usize) -> usize {
    n.div_ceil(alignment) * alignment
}

/// Decodes a fixed-size NUL-padded string field.
pub(crate) fn fixed_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Encodes a string into a fixed-size NUL-padded field, truncating to
/// `N - 1` bytes so the terminator always fits.
pub(crate) fn pad_string<const N: usize>(s: &str) -> [u8; N] {
    let mut out = [0u8; N];
    let len = s.len().min(N - 1);
    out[..len].copy_from_slice(&s.as_bytes()[..len]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::android::tests::make_android_image;

    #[test]
    fn detect_rejects_garbage() {
        assert_eq!(BootImage::detect(b"not a boot image"), None);
        assert_eq!(BootImage::detect(&[]), None);
        assert!(!BootImage::is_valid(&[0u8; 4096]));
    }

    #[test]
    fn decode_garbage_is_unknown_format() {
        assert_eq!(
            BootImage::decode(&[0u8; 64]),
            Err(BootImageError::UnknownFormat)
        );
    }

    #[test]
    fn equality_ignores_format_tags() {
        let data = make_android_image(2048, b"kern", b"rd", &[], &[]);
        let mut a = BootImage::decode(&data).expect("decode");
        let b = a.clone();
        a.source_type = BootImageType::Loki;
        a.target_type = BootImageType::Bump;
        a.hdr_unused = 0xdead_beef;
        assert_eq!(a, b);
    }

    #[test]
    fn fixed_string_stops_at_nul() {
        assert_eq!(fixed_string(b"abc\0def"), "abc");
        assert_eq!(fixed_string(b"abc"), "abc");
        assert_eq!(fixed_string(b"\0\0"), "");
    }

    #[test]
    fn pad_string_truncates_and_terminates() {
        let field: [u8; 4] = pad_string("abcdef");
        assert_eq!(&field, b"abc\0");
        let field: [u8; 8] = pad_string("ab");
        assert_eq!(&field, b"ab\0\0\0\0\0\0");
    }
}

//! Loki image decoding.
//!
//! Loki reshapes a boot image so the signature check on locked LG and
//! Samsung bootloaders passes: a side header lands at offset 0x400
//! inside the Android header's page padding, the ramdisk is relocated,
//! and a fragment of the device's aboot code is appended. Some Loki
//! builds additionally zero the size fields of the Android header.
//!
//! Decode only: re-encoding falls back to the plain Android format,
//! since re-injecting Loki needs the device's aboot partition.

use flashpatch_core::BinBuf;

use crate::{align_up, android, fixed_string, BootImage, BootImageError, ALLOWED_PAGE_SIZES};

/// Loki side-header magic.
pub(crate) const LOKI_MAGIC: &[u8; 5] = b"LOKI!";

/// Offset of the side header within the image.
pub(crate) const LOKI_MAGIC_OFFSET: usize = 0x400;

/// Side-header size: magic, recovery flag, build string, three words.
const LOKI_HEADER_SIZE: usize = 5 + 1 + 128 + 12;

/// Gzip member signature, used to locate the relocated ramdisk.
const GZIP_MAGIC: [u8; 3] = [0x1f, 0x8b, 0x08];

/// Side header fields.
#[derive(Debug, Clone)]
struct LokiHeader {
    /// Build fingerprint recorded by the loki patcher.
    build: String,
    orig_kernel_size: u32,
    orig_ramdisk_size: u32,
    ramdisk_addr: u32,
}

impl LokiHeader {
    fn parse(data: &[u8]) -> Option<Self> {
        let end = LOKI_MAGIC_OFFSET.checked_add(LOKI_HEADER_SIZE)?;
        if data.len() < end {
            return None;
        }
        let b = &data[LOKI_MAGIC_OFFSET..end];
        if &b[..5] != LOKI_MAGIC {
            return None;
        }
        let word = |off: usize| u32::from_le_bytes(b[off..off + 4].try_into().expect("in range"));
        Some(Self {
            build: fixed_string(&b[6..134]),
            orig_kernel_size: word(134),
            orig_ramdisk_size: word(138),
            ramdisk_addr: word(142),
        })
    }
}

/// Returns `true` if the Loki magic sits at offset 0x400.
pub(crate) fn is_valid(data: &[u8]) -> bool {
    data.len() >= LOKI_MAGIC_OFFSET + LOKI_HEADER_SIZE
        && &data[LOKI_MAGIC_OFFSET..LOKI_MAGIC_OFFSET + 5] == LOKI_MAGIC
}

/// Locates the relocated ramdisk: the first page boundary at or after
/// the kernel that carries a gzip signature, falling back to the aligned
/// offset when no signature is found (uncompressed ramdisks).
fn find_ramdisk_offset(data: &[u8], page: usize, kernel_end: usize) -> usize {
    let fallback = align_up(kernel_end, page);
    let mut offset = fallback;
    while offset + GZIP_MAGIC.len() <= data.len() {
        if data[offset..offset + GZIP_MAGIC.len()] == GZIP_MAGIC {
            return offset;
        }
        offset += page;
    }
    fallback
}

/// Decodes a Loki image into the IR.
pub(crate) fn decode(data: &[u8]) -> Result<BootImage, BootImageError> {
    if data.len() < android::HEADER_SIZE || &data[..8] != android::BOOT_MAGIC {
        return Err(BootImageError::Truncated {
            context: "android header of loki image",
        });
    }
    let header = android::RawHeader::parse(data, 0)?;
    if !ALLOWED_PAGE_SIZES.contains(&header.page_size) {
        return Err(BootImageError::InvalidPageSize(header.page_size));
    }
    let loki = LokiHeader::parse(data).ok_or(BootImageError::Truncated {
        context: "loki side header",
    })?;
    tracing::debug!(build = %loki.build, "decoding loki image");

    let kernel_size = if header.kernel_size != 0 {
        header.kernel_size
    } else {
        loki.orig_kernel_size
    };
    if kernel_size == 0 {
        return Err(BootImageError::LokiMissingSize("kernel"));
    }
    let ramdisk_size = if header.ramdisk_size != 0 {
        header.ramdisk_size
    } else {
        loki.orig_ramdisk_size
    };
    if ramdisk_size == 0 {
        return Err(BootImageError::LokiMissingSize("ramdisk"));
    }

    let page = header.page_size as usize;
    let kernel_start = page;
    let kernel_end = kernel_start + kernel_size as usize;
    if kernel_end > data.len() {
        return Err(BootImageError::Truncated { context: "kernel" });
    }

    let ramdisk_start = find_ramdisk_offset(data, page, kernel_end);
    let ramdisk_end = ramdisk_start + ramdisk_size as usize;
    if ramdisk_end > data.len() {
        return Err(BootImageError::Truncated { context: "ramdisk" });
    }

    Ok(BootImage {
        cmdline: fixed_string(&header.cmdline),
        board_name: fixed_string(&header.name),
        kernel_addr: header.kernel_addr,
        ramdisk_addr: loki.ramdisk_addr,
        second_addr: header.second_addr,
        tags_addr: header.tags_addr,
        hdr_kernel_size: kernel_size,
        hdr_ramdisk_size: ramdisk_size,
        hdr_unused: header.unused,
        page_size: header.page_size,
        id: header.id,
        kernel: BinBuf::from_slice(&data[kernel_start..kernel_end]),
        ramdisk: BinBuf::from_slice(&data[ramdisk_start..ramdisk_end]),
        aboot: BinBuf::from_slice(&data[ramdisk_end..]),
        ..BootImage::default()
    })
}

//! Plain Android boot image decode and encode.
//!
//! Header layout (packed, little-endian): magic[8], kernel_size,
//! kernel_addr, ramdisk_size, ramdisk_addr, second_size, second_addr,
//! tags_addr, page_size, dt_size, unused, name[16], cmdline[512],
//! id[8 x u32]. Each image section is zero-padded to the next page
//! boundary: header, kernel, ramdisk, optional second bootloader,
//! optional device tree.

use flashpatch_core::BinBuf;
use sha1::{Digest, Sha1};

use crate::{align_up, fixed_string, pad_string, BootImage, BootImageError, ALLOWED_PAGE_SIZES};

/// Boot image magic.
pub(crate) const BOOT_MAGIC: &[u8; 8] = b"ANDROID!";

/// Board name field width, NUL included.
pub(crate) const BOOT_NAME_SIZE: usize = 16;

/// Command line field width, NUL included.
pub(crate) const BOOT_ARGS_SIZE: usize = 512;

/// Total header size: magic + 10 words + name + cmdline + id.
pub(crate) const HEADER_SIZE: usize = 8 + 10 * 4 + BOOT_NAME_SIZE + BOOT_ARGS_SIZE + 32;

/// The magic may sit at any 512-byte-aligned offset within the first
/// `max(page_size, 4096)` bytes (Loki leaves the Android header at 0,
/// but some vendor images prepend a block). This is the floor of that
/// window; a larger declared page size widens it.
const MAGIC_SCAN_BASE: usize = 4096;

fn le_u32(data: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(data[off..off + 4].try_into().expect("bounds checked"))
}

/// Raw header fields, exactly as stored on the wire.
#[derive(Debug, Clone)]
pub(crate) struct RawHeader {
    pub kernel_size: u32,
    pub kernel_addr: u32,
    pub ramdisk_size: u32,
    pub ramdisk_addr: u32,
    pub second_size: u32,
    pub second_addr: u32,
    pub tags_addr: u32,
    pub page_size: u32,
    pub dt_size: u32,
    pub unused: u32,
    pub name: [u8; BOOT_NAME_SIZE],
    pub cmdline: [u8; BOOT_ARGS_SIZE],
    pub id: [u8; 32],
}

impl RawHeader {
    /// Parses the header at `offset`. The caller has already located the
    /// magic there.
    pub(crate) fn parse(data: &[u8], offset: usize) -> Result<Self, BootImageError> {
        if data.len() < offset + HEADER_SIZE {
            return Err(BootImageError::Truncated { context: "header" });
        }
        let b = &data[offset..];
        let mut name = [0u8; BOOT_NAME_SIZE];
        name.copy_from_slice(&b[48..48 + BOOT_NAME_SIZE]);
        let mut cmdline = [0u8; BOOT_ARGS_SIZE];
        cmdline.copy_from_slice(&b[64..64 + BOOT_ARGS_SIZE]);
        let mut id = [0u8; 32];
        id.copy_from_slice(&b[576..608]);

        Ok(Self {
            kernel_size: le_u32(b, 8),
            kernel_addr: le_u32(b, 12),
            ramdisk_size: le_u32(b, 16),
            ramdisk_addr: le_u32(b, 20),
            second_size: le_u32(b, 24),
            second_addr: le_u32(b, 28),
            tags_addr: le_u32(b, 32),
            page_size: le_u32(b, 36),
            dt_size: le_u32(b, 40),
            unused: le_u32(b, 44),
            name,
            cmdline,
            id,
        })
    }
}

/// Byte ranges of the payload sections, relative to the image start.
///
/// Absent sections get the empty `0..0` range, so an image that ends
/// right after its last section (no trailing page padding) still
/// computes an in-bounds layout.
#[derive(Debug, Clone)]
pub(crate) struct Layout {
    pub kernel: core::ops::Range<usize>,
    pub ramdisk: core::ops::Range<usize>,
    pub second: core::ops::Range<usize>,
    pub dt: core::ops::Range<usize>,
    /// Offset one past the last declared payload byte.
    pub end: usize,
}

impl Layout {
    /// Computes section offsets from the header at `header_offset`.
    pub(crate) fn compute(header: &RawHeader, header_offset: usize) -> Self {
        let page = header.page_size as usize;
        let kernel_start = align_up(header_offset + HEADER_SIZE, page);
        let kernel_end = kernel_start + header.kernel_size as usize;
        let ramdisk_start = align_up(kernel_end, page);
        let ramdisk_end = ramdisk_start + header.ramdisk_size as usize;

        let mut pos = ramdisk_end;
        let mut section = |size: usize| {
            if size == 0 {
                return 0..0;
            }
            let start = align_up(pos, page);
            pos = start + size;
            start..pos
        };
        let second = section(header.second_size as usize);
        let dt = section(header.dt_size as usize);

        Self {
            kernel: kernel_start..kernel_end,
            ramdisk: ramdisk_start..ramdisk_end,
            second,
            dt,
            end: pos,
        }
    }
}

/// Finds the `ANDROID!` magic at a 512-byte-aligned offset in the first
/// block of the image.
///
/// The scan window is `max(page_size, 4096)` bytes. The page size is
/// only known once a header has been parsed, so candidates are probed
/// up to the largest allowed page size; a hit beyond the base window
/// counts only when its own header declares a page size that reaches it.
pub(crate) fn find_header(data: &[u8]) -> Option<usize> {
    let scan_limit = ALLOWED_PAGE_SIZES
        .iter()
        .map(|&page| page as usize)
        .max()
        .unwrap_or(MAGIC_SCAN_BASE)
        .max(MAGIC_SCAN_BASE);

    (0..scan_limit).step_by(512).find(|&off| {
        if data.len() < off + HEADER_SIZE || &data[off..off + 8] != BOOT_MAGIC {
            return false;
        }
        if off < MAGIC_SCAN_BASE {
            return true;
        }
        match RawHeader::parse(data, off) {
            Ok(header) => (header.page_size as usize).max(MAGIC_SCAN_BASE) > off,
            Err(_) => false,
        }
    })
}

/// Returns `true` if `data` carries a well-formed plain Android image:
/// magic found, page size in the allowed set, declared payloads in
/// bounds.
pub(crate) fn is_valid(data: &[u8]) -> bool {
    let Some(offset) = find_header(data) else {
        return false;
    };
    let Ok(header) = RawHeader::parse(data, offset) else {
        return false;
    };
    if !ALLOWED_PAGE_SIZES.contains(&header.page_size) {
        return false;
    }
    Layout::compute(&header, offset).end <= data.len()
}

/// Borrows the kernel and ramdisk payload slices of an Android-valid
/// image, for wrapper-format probes.
pub(crate) fn payload_slices(data: &[u8]) -> Option<(&[u8], &[u8])> {
    let offset = find_header(data)?;
    let header = RawHeader::parse(data, offset).ok()?;
    if !ALLOWED_PAGE_SIZES.contains(&header.page_size) {
        return None;
    }
    let layout = Layout::compute(&header, offset);
    if layout.end > data.len() {
        return None;
    }
    Some((&data[layout.kernel.clone()], &data[layout.ramdisk.clone()]))
}

/// Decodes a plain Android image into the IR.
pub(crate) fn decode(data: &[u8]) -> Result<BootImage, BootImageError> {
    let offset = find_header(data).ok_or(BootImageError::UnknownFormat)?;
    let header = RawHeader::parse(data, offset)?;
    if !ALLOWED_PAGE_SIZES.contains(&header.page_size) {
        return Err(BootImageError::InvalidPageSize(header.page_size));
    }
    let layout = Layout::compute(&header, offset);
    if layout.end > data.len() {
        return Err(BootImageError::Truncated { context: "payloads" });
    }

    Ok(BootImage {
        cmdline: fixed_string(&header.cmdline),
        board_name: fixed_string(&header.name),
        kernel_addr: header.kernel_addr,
        ramdisk_addr: header.ramdisk_addr,
        second_addr: header.second_addr,
        tags_addr: header.tags_addr,
        hdr_kernel_size: header.kernel_size,
        hdr_ramdisk_size: header.ramdisk_size,
        hdr_second_size: header.second_size,
        hdr_dt_size: header.dt_size,
        hdr_unused: header.unused,
        page_size: header.page_size,
        id: header.id,
        kernel: BinBuf::from_slice(&data[layout.kernel.clone()]),
        ramdisk: BinBuf::from_slice(&data[layout.ramdisk.clone()]),
        second: BinBuf::from_slice(&data[layout.second.clone()]),
        dt: BinBuf::from_slice(&data[layout.dt.clone()]),
        ..BootImage::default()
    })
}

/// Computes the `id` field: SHA-1 over kernel bytes, kernel size (le32),
/// ramdisk bytes, ramdisk size, second bytes, second size (hashed even
/// when zero, matching AOSP mkbootimg), then device tree bytes and size
/// only when a device tree is present. 20 digest bytes, right-zero-padded
/// to 32.
pub(crate) fn compute_id(kernel: &[u8], ramdisk: &[u8], second: &[u8], dt: &[u8]) -> [u8; 32] {
    let mut hasher = Sha1::new();
    hasher.update(kernel);
    hasher.update(u32::try_from(kernel.len()).unwrap_or(u32::MAX).to_le_bytes());
    hasher.update(ramdisk);
    hasher.update(u32::try_from(ramdisk.len()).unwrap_or(u32::MAX).to_le_bytes());
    hasher.update(second);
    hasher.update(u32::try_from(second.len()).unwrap_or(u32::MAX).to_le_bytes());
    if !dt.is_empty() {
        hasher.update(dt);
        hasher.update(u32::try_from(dt.len()).unwrap_or(u32::MAX).to_le_bytes());
    }
    let digest = hasher.finalize();
    let mut id = [0u8; 32];
    id[..20].copy_from_slice(&digest);
    id
}

fn pad_to_page(out: &mut Vec<u8>, page: usize) {
    let padded = align_up(out.len(), page);
    out.resize(padded, 0);
}

/// Encodes the IR as a plain Android image (MTK vendor headers included
/// when present).
pub(crate) fn encode(image: &BootImage) -> Result<Vec<u8>, BootImageError> {
    if !ALLOWED_PAGE_SIZES.contains(&image.page_size) {
        return Err(BootImageError::InvalidPageSize(image.page_size));
    }
    let page = image.page_size as usize;

    let kernel = crate::mtk::with_vendor_header(&image.mtk_kernel_hdr, &image.kernel);
    let ramdisk = crate::mtk::with_vendor_header(&image.mtk_ramdisk_hdr, &image.ramdisk);
    let second = image.second.as_slice();
    let dt = image.dt.as_slice();

    let id = compute_id(&kernel, &ramdisk, second, dt);

    let mut out = Vec::with_capacity(
        align_up(HEADER_SIZE, page)
            + align_up(kernel.len(), page)
            + align_up(ramdisk.len(), page)
            + align_up(second.len(), page)
            + align_up(dt.len(), page),
    );

    out.extend_from_slice(BOOT_MAGIC);
    for value in [
        u32::try_from(kernel.len()).unwrap_or(u32::MAX),
        image.kernel_addr,
        u32::try_from(ramdisk.len()).unwrap_or(u32::MAX),
        image.ramdisk_addr,
        u32::try_from(second.len()).unwrap_or(u32::MAX),
        image.second_addr,
        image.tags_addr,
        image.page_size,
        u32::try_from(dt.len()).unwrap_or(u32::MAX),
        image.hdr_unused,
    ] {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out.extend_from_slice(&pad_string::<BOOT_NAME_SIZE>(&image.board_name));
    out.extend_from_slice(&pad_string::<BOOT_ARGS_SIZE>(&image.cmdline));
    out.extend_from_slice(&id);
    pad_to_page(&mut out, page);

    out.extend_from_slice(&kernel);
    pad_to_page(&mut out, page);
    out.extend_from_slice(&ramdisk);
    pad_to_page(&mut out, page);
    if !second.is_empty() {
        out.extend_from_slice(second);
        pad_to_page(&mut out, page);
    }
    if !dt.is_empty() {
        out.extend_from_slice(dt);
        pad_to_page(&mut out, page);
    }

    Ok(out)
}

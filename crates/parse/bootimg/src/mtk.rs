//! MTK vendor header handling.
//!
//! MediaTek bootloaders prepend a 512-byte vendor header to the kernel
//! and/or ramdisk payload of an otherwise plain Android image: magic
//! `\x88\x16\x88\x58`, a little-endian payload size, a 32-byte type
//! label (`KERNEL`, `ROOTFS`), and 0xFF fill. The headers are counted
//! inside the Android header's size fields and inside the SHA-1 stream.
//!
//! Decode strips the vendor headers into the IR so ramdisk edits see a
//! bare CPIO payload; encode prefixes them back with the embedded size
//! field rewritten to the actual payload length.

use flashpatch_core::BinBuf;
use tracing::warn;

use crate::{android, BootImage, BootImageError};

/// MTK vendor header magic.
pub(crate) const MTK_MAGIC: [u8; 4] = [0x88, 0x16, 0x88, 0x58];

/// Vendor header size on the wire.
pub(crate) const MTK_HEADER_SIZE: usize = 512;

/// Width of the type label field.
const MTK_TYPE_SIZE: usize = 32;

fn has_vendor_header(payload: &[u8]) -> bool {
    payload.len() >= MTK_HEADER_SIZE && payload[..4] == MTK_MAGIC
}

/// Returns `true` for an Android-valid image whose kernel or ramdisk
/// payload begins with the MTK magic.
pub(crate) fn is_valid(data: &[u8]) -> bool {
    match android::payload_slices(data) {
        Some((kernel, ramdisk)) => has_vendor_header(kernel) || has_vendor_header(ramdisk),
        None => false,
    }
}

/// Splits a payload into its vendor header and the bytes after it.
///
/// The size recorded in the header must match the remaining payload
/// length; a mismatch is fatal when `fatal` is set and a warning
/// otherwise (the device may have appended a DTB to the kernel).
fn strip_vendor_header(
    payload: BinBuf,
    label: &'static str,
    fatal: bool,
) -> Result<(BinBuf, BinBuf), BootImageError> {
    if !has_vendor_header(&payload) {
        return Ok((BinBuf::new(), payload));
    }
    let declared = u32::from_le_bytes(payload[4..8].try_into().expect("header is 512 bytes"));
    let actual = u32::try_from(payload.len() - MTK_HEADER_SIZE).unwrap_or(u32::MAX);
    if declared != actual {
        if fatal {
            return Err(BootImageError::MtkSizeMismatch {
                label,
                declared,
                actual,
            });
        }
        warn!(label, declared, actual, "mtk header size mismatch; image will be re-encoded with corrected size");
    }
    let header = BinBuf::from_slice(&payload[..MTK_HEADER_SIZE]);
    let rest = BinBuf::from_slice(&payload[MTK_HEADER_SIZE..]);
    Ok((header, rest))
}

/// Prefixes a payload with its vendor header, size field corrected.
///
/// Used by the Android encoder; a missing header passes the payload
/// through untouched.
pub(crate) fn with_vendor_header(header: &BinBuf, payload: &BinBuf) -> Vec<u8> {
    if header.is_empty() {
        return payload.as_slice().to_vec();
    }
    let mut out = Vec::with_capacity(header.len() + payload.len());
    out.extend_from_slice(header);
    if out.len() >= 8 {
        out[4..8].copy_from_slice(&u32::try_from(payload.len()).unwrap_or(u32::MAX).to_le_bytes());
    }
    out.extend_from_slice(payload);
    out
}

/// Decodes an MTK image: plain Android decode, then vendor header
/// stripping. Header sizes in the IR reflect the stripped payloads.
pub(crate) fn decode(data: &[u8]) -> Result<BootImage, BootImageError> {
    let mut image = android::decode(data)?;

    let kernel = core::mem::take(&mut image.kernel);
    let (kernel_hdr, kernel) = strip_vendor_header(kernel, "kernel", false)?;
    image.mtk_kernel_hdr = kernel_hdr;
    image.kernel = kernel;
    image.hdr_kernel_size = u32::try_from(image.kernel.len()).unwrap_or(u32::MAX);

    let ramdisk = core::mem::take(&mut image.ramdisk);
    let (ramdisk_hdr, ramdisk) = strip_vendor_header(ramdisk, "ramdisk", true)?;
    image.mtk_ramdisk_hdr = ramdisk_hdr;
    image.ramdisk = ramdisk;
    image.hdr_ramdisk_size = u32::try_from(image.ramdisk.len()).unwrap_or(u32::MAX);

    Ok(image)
}

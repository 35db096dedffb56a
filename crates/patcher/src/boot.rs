//! Boot-image and ramdisk patching glue.
//!
//! Bridges the codec and the CPIO editor: decode the image, unpack the
//! ramdisk (inflating gzip transparently), run the resolved transform,
//! pack everything back up. The codec itself never sees compression,
//! which keeps unmodified images byte-identical across decode/encode.

use std::io::{Read, Write};

use flashpatch_bootimg::BootImage;
use flashpatch_core::Device;
use flashpatch_cpio::CpioArchive;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::debug;

use crate::error::PatchError;
use crate::transform::TransformRegistry;

/// Gzip member signature.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

fn gunzip(data: &[u8]) -> Result<Vec<u8>, PatchError> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| PatchError::Internal(format!("gzip inflate failed: {e}")))?;
    Ok(out)
}

fn gzip(data: &[u8]) -> Result<Vec<u8>, PatchError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .and_then(|()| encoder.finish())
        .map_err(|e| PatchError::Internal(format!("gzip deflate failed: {e}")))
}

/// Runs the device's ramdisk transform over a raw or gzip-wrapped CPIO
/// payload, returning the payload in its original framing.
///
/// # Errors
///
/// Fails if the payload does not parse as CPIO, if the resolved
/// transform reports an error, or on a gzip framing failure.
pub fn patch_ramdisk_bytes(
    data: &[u8],
    device: &Device,
    registry: &TransformRegistry,
) -> Result<Vec<u8>, PatchError> {
    let gzipped = data.starts_with(&GZIP_MAGIC);
    let cpio_bytes = if gzipped { gunzip(data)? } else { data.to_vec() };

    let mut cpio = CpioArchive::load(&cpio_bytes)?;

    let Some((key, transform)) = registry.resolve(&device.id) else {
        debug!(device = %device.id, "no ramdisk transform registered; leaving ramdisk unchanged");
        return Ok(data.to_vec());
    };
    transform
        .patch_ramdisk(device, &mut cpio)
        .map_err(|source| PatchError::RamdiskTransform {
            key: key.to_string(),
            source,
        })?;

    let serialized = cpio.serialize().into_vec();
    if gzipped {
        gzip(&serialized)
    } else {
        Ok(serialized)
    }
}

/// Patches the ramdisk inside a boot image and re-encodes it.
///
/// `name` labels the image in errors (typically the archive entry
/// name).
///
/// # Errors
///
/// Returns [`PatchError::OnlyBootImageSupported`] when no supported
/// format matches, and otherwise propagates codec, CPIO and transform
/// failures.
pub fn patch_boot_image(
    data: &[u8],
    name: &str,
    device: &Device,
    registry: &TransformRegistry,
) -> Result<Vec<u8>, PatchError> {
    if !BootImage::is_valid(data) {
        return Err(PatchError::OnlyBootImageSupported {
            name: name.to_string(),
        });
    }
    let mut image = BootImage::decode(data)?;
    let ramdisk = core::mem::take(&mut image.ramdisk).into_vec();
    image.ramdisk = patch_ramdisk_bytes(&ramdisk, device, registry)?.into();
    image.encode().map_err(PatchError::BootImageCreate)
}

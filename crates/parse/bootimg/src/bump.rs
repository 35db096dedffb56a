//! Bump signature handling.
//!
//! A bumped image is a plain Android image with a fixed 9-byte signature
//! appended after the final page padding, satisfying the bootloader's
//! signed-image check on certain LG devices.

use crate::{android, BootImage, BootImageError};

/// The trailer a bumped image ends with.
pub(crate) const BUMP_MAGIC: [u8; 9] = [0x41, 0xa9, 0xe4, 0x67, 0x74, 0x4d, 0x1d, 0x1b, 0xa4];

/// Returns `true` for an Android-valid image carrying the Bump trailer.
pub(crate) fn is_valid(data: &[u8]) -> bool {
    data.len() >= BUMP_MAGIC.len() && data.ends_with(&BUMP_MAGIC) && android::is_valid(data)
}

/// Encodes as Android and appends the trailer.
pub(crate) fn encode(image: &BootImage) -> Result<Vec<u8>, BootImageError> {
    let mut out = android::encode(image)?;
    out.extend_from_slice(&BUMP_MAGIC);
    Ok(out)
}

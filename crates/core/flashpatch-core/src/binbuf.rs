//! Owned byte buffer used for image payloads.
//!
//! Every boot-image section and CPIO entry body is a [`BinBuf`]. Borrowed
//! views are plain `&[u8]` slices; there is no reference counting.

use core::fmt;
use core::ops::{Deref, DerefMut};

/// Owned, growable byte buffer.
///
/// Construction covers the two owning modes: copying from a slice
/// ([`BinBuf::from_slice`]) and taking over an existing allocation
/// (`From<Vec<u8>>`). Equality is by content.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct BinBuf {
    data: Vec<u8>,
}

impl BinBuf {
    /// Creates an empty buffer.
    #[must_use]
    pub const fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Creates a buffer by copying `data`.
    #[must_use]
    pub fn from_slice(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
        }
    }

    /// Number of bytes in the buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the buffer holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Resizes to `new_len` bytes, preserving the leading prefix.
    ///
    /// Growth is zero-filled.
    pub fn resize(&mut self, new_len: usize) {
        self.data.resize(new_len, 0);
    }

    /// Drops all content.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Borrows the content.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Mutably borrows the content.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Consumes the buffer, returning the backing allocation.
    #[must_use]
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

impl From<Vec<u8>> for BinBuf {
    fn from(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl From<&[u8]> for BinBuf {
    fn from(data: &[u8]) -> Self {
        Self::from_slice(data)
    }
}

impl<const N: usize> From<&[u8; N]> for BinBuf {
    fn from(data: &[u8; N]) -> Self {
        Self::from_slice(data)
    }
}

impl Deref for BinBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for BinBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl PartialEq<[u8]> for BinBuf {
    fn eq(&self, other: &[u8]) -> bool {
        self.data == other
    }
}

impl fmt::Debug for BinBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Payloads are megabytes of binary; print the size, not the bytes.
        write!(f, "BinBuf({} bytes)", self.data.len())
    }
}

//! The ramdisk-transform contract and registry.
//!
//! Concrete transforms live outside this crate; they decide what lines
//! to edit in `init.rc` and friends. The core only defines the
//! interface and resolves which transform applies to a device.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use flashpatch_core::Device;
use flashpatch_cpio::CpioArchive;

/// Error type transforms report; opaque to the core.
pub type TransformError = Box<dyn std::error::Error + Send + Sync>;

/// Result alias for transform callbacks.
pub type TransformResult = Result<(), TransformError>;

/// A collaborator that edits the ramdisk and selected archive files.
pub trait RamdiskTransform: Send + Sync {
    /// Edits the unpacked ramdisk in place.
    fn patch_ramdisk(&self, device: &Device, cpio: &mut CpioArchive) -> TransformResult;

    /// Archive entries this transform will edit in pass 2. Pass 1
    /// extracts them to the scratch directory instead of copying them.
    fn existing_files(&self) -> Vec<String> {
        Vec::new()
    }

    /// Edits the previously extracted files under `temp_dir`.
    fn patch_files(&self, _temp_dir: &Path) -> TransformResult {
        Ok(())
    }
}

/// Registry key of the fallback transform.
pub const DEFAULT_KEY: &str = "default";

/// Maps registry keys to transforms.
///
/// Ramdisk resolution tries `"<device-id>/default"` first and falls
/// back to `"default"`; exactly one transform patches each boot image.
/// Pass 2 runs every registered transform.
#[derive(Default)]
pub struct TransformRegistry {
    transforms: HashMap<String, Box<dyn RamdiskTransform>>,
}

impl TransformRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a transform under `key`, replacing any previous one.
    pub fn register(&mut self, key: impl Into<String>, transform: Box<dyn RamdiskTransform>) {
        self.transforms.insert(key.into(), transform);
    }

    /// Resolves the transform for a device: `"<device-id>/default"`,
    /// then `"default"`.
    #[must_use]
    pub fn resolve(&self, device_id: &str) -> Option<(&str, &dyn RamdiskTransform)> {
        let device_key = format!("{device_id}/{DEFAULT_KEY}");
        self.transforms
            .get_key_value(device_key.as_str())
            .or_else(|| self.transforms.get_key_value(DEFAULT_KEY))
            .map(|(key, transform)| (key.as_str(), transform.as_ref()))
    }

    /// Iterates over all registered transforms in key order.
    pub fn all(&self) -> impl Iterator<Item = (&str, &dyn RamdiskTransform)> {
        let mut keys: Vec<&String> = self.transforms.keys().collect();
        keys.sort();
        keys.into_iter().map(|key| {
            (
                key.as_str(),
                self.transforms[key].as_ref(),
            )
        })
    }

    /// Union of every transform's pass-1 exclusions.
    #[must_use]
    pub fn exclusion_set(&self) -> BTreeSet<String> {
        self.transforms
            .values()
            .flat_map(|t| t.existing_files())
            .collect()
    }
}

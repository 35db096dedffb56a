//! Two-pass flashable ZIP rewriter for multi-boot installs.
//!
//! Takes an Android "flashable" update archive and produces a sibling
//! archive that installs the ROM under a multi-boot manager: boot
//! images inside the ZIP are decoded, their ramdisks edited through a
//! registered [`RamdiskTransform`], and re-encoded; text files the
//! transforms claim are rewritten in a second pass; the stock installer
//! is set aside and replaced with the multi-boot installer.
//!
//! The pipeline is single-threaded and cooperative: progress callbacks
//! run synchronously on the patching thread, and a shared [`CancelFlag`]
//! is polled at entry boundaries. Run concurrent jobs with separate
//! [`ZipPatcher`] instances, temp directories and output paths.
//!
//! ```no_run
//! use flashpatch_core::Device;
//! use flashpatch_patcher::{PatchParams, TransformRegistry, ZipPatcher};
//!
//! # fn main() -> Result<(), flashpatch_patcher::PatchError> {
//! let params = PatchParams {
//!     input: "/sdcard/rom.zip".into(),
//!     device: Device::new("hammerhead", "Google Nexus 5"),
//!     rom_id: "dual".to_string(),
//!     data_dir: "/opt/flashpatch/data".into(),
//!     temp_dir: std::env::temp_dir(),
//!     device_catalog: Vec::new(),
//! };
//! let mut patcher = ZipPatcher::new(params, TransformRegistry::new());
//! let output = patcher.patch_file()?;
//! println!("patched archive at {}", output.display());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

mod boot;
mod error;
mod patcher;
mod progress;
mod transform;
mod zipio;

pub use boot::{patch_boot_image, patch_ramdisk_bytes};
pub use error::PatchError;
pub use patcher::{
    PatchParams, ZipPatcher, BB_WRAPPER_ENTRY, INFO_PROP_ENTRY, UPDATE_BINARY, UPDATE_BINARY_ORIG,
};
pub use progress::{CancelFlag, ProgressHooks};
pub use transform::{RamdiskTransform, TransformError, TransformRegistry, TransformResult};

//! The two-pass flashable-ZIP rewrite pipeline.
//!
//! Pass 1 streams the source archive: entries a transform claimed for
//! itself are extracted to a scratch directory, boot-image-shaped
//! entries are decoded/patched/re-encoded inline, the stock installer
//! binary is renamed aside, and everything else is copied raw without
//! recompression. Pass 2 lets the transforms edit the extracted files,
//! then appends them. Finalization adds the multi-boot installer, its
//! shell wrapper, and a generated `info.prop`.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use flashpatch_bootimg::BootImage;
use flashpatch_core::Device;
use tracing::{debug, warn};
use zip::CompressionMethod;

use crate::boot;
use crate::error::PatchError;
use crate::progress::{CancelFlag, ProgressHooks};
use crate::transform::TransformRegistry;
use crate::zipio::{EntryMeta, ZipSink, ZipSource};

/// The installer binary a recovery environment executes.
pub const UPDATE_BINARY: &str = "META-INF/com/google/android/update-binary";

/// Where the stock installer is preserved.
pub const UPDATE_BINARY_ORIG: &str = "META-INF/com/google/android/update-binary.orig";

/// Helper script entry added at finalization.
pub const BB_WRAPPER_ENTRY: &str = "multiboot/bb-wrapper.sh";

/// Generated metadata entry added at finalization.
pub const INFO_PROP_ENTRY: &str = "multiboot/info.prop";

/// Entries appended after pass 2.
const EXTRA_ENTRIES: u64 = 3;

/// Boot-image-shaped entries above this uncompressed size are copied
/// raw instead of being loaded into memory.
const MAX_IMAGE_SIZE: u64 = 30 * 1024 * 1024;

/// Inputs of one patch job.
#[derive(Debug, Clone)]
pub struct PatchParams {
    /// Source flashable ZIP.
    pub input: PathBuf,
    /// Target device.
    pub device: Device,
    /// ROM identifier; becomes the install location and the output
    /// file-name suffix.
    pub rom_id: String,
    /// Directory holding the helper binaries and scripts.
    pub data_dir: PathBuf,
    /// Directory for per-job scratch files; removed on every exit path.
    pub temp_dir: PathBuf,
    /// All known devices, rendered into `info.prop` for reference.
    pub device_catalog: Vec<Device>,
}

/// Rewrites one flashable ZIP for a multi-boot install.
///
/// One patcher handles one job; run concurrent jobs with separate
/// patchers, temp directories and output paths.
pub struct ZipPatcher {
    params: PatchParams,
    registry: TransformRegistry,
    progress: ProgressHooks,
    cancel: CancelFlag,
}

/// Scratch directory with recursive cleanup on drop.
struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    fn create(base: &Path) -> Result<Self, PatchError> {
        let path = base.join("flashpatch");
        fs::create_dir_all(&path).map_err(|source| PatchError::FileWrite {
            path: path.clone(),
            source,
        })?;
        Ok(Self { path })
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        // Cleanup applies to success, failure and cancellation alike.
        let _ = fs::remove_dir_all(&self.path);
    }
}

fn is_boot_candidate(meta: &EntryMeta) -> bool {
    let boot_suffix = meta.name.ends_with(".img")
        || meta.name.ends_with(".lok")
        || meta.name.ends_with(".gz");
    boot_suffix && meta.size <= MAX_IMAGE_SIZE
}

fn read_file(path: &Path) -> Result<Vec<u8>, PatchError> {
    let mut file = fs::File::open(path).map_err(|source| PatchError::FileOpen {
        path: path.to_path_buf(),
        source,
    })?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)
        .map_err(|source| PatchError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(data)
}

impl ZipPatcher {
    /// Creates a patcher for one job.
    #[must_use]
    pub fn new(params: PatchParams, registry: TransformRegistry) -> Self {
        Self {
            params,
            registry,
            progress: ProgressHooks::default(),
            cancel: CancelFlag::new(),
        }
    }

    /// Installs progress callbacks.
    pub fn set_progress(&mut self, progress: ProgressHooks) {
        self.progress = progress;
    }

    /// Returns a handle another thread can use to request cancellation.
    #[must_use]
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Path the patched archive will be written to:
    /// `<input-stem>_<rom-id>.zip` beside the input.
    #[must_use]
    pub fn output_path(&self) -> PathBuf {
        let stem = self
            .params
            .input
            .file_stem()
            .map_or_else(|| "rom".to_string(), |s| s.to_string_lossy().into_owned());
        let name = format!("{stem}_{}.zip", self.params.rom_id);
        match self.params.input.parent() {
            Some(parent) => parent.join(name),
            None => PathBuf::from(name),
        }
    }

    /// Runs the full pipeline.
    ///
    /// On success the returned path holds the patched archive. On any
    /// error the output file must be treated as invalid; the scratch
    /// directory is removed in all cases.
    ///
    /// # Errors
    ///
    /// The first [`PatchError`] encountered, except that an observed
    /// cancellation overrides any pending error.
    pub fn patch_file(&mut self) -> Result<PathBuf, PatchError> {
        let output = self.output_path();
        let scratch = ScratchDir::create(&self.params.temp_dir)?;
        let scratch_path = scratch.path.clone();

        let result = self.run(&output, &scratch_path);
        drop(scratch);
        if self.cancel.is_cancelled() {
            return Err(PatchError::Cancelled);
        }
        result.map(|()| output)
    }

    fn check_cancel(&self) -> Result<(), PatchError> {
        if self.cancel.is_cancelled() {
            Err(PatchError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn run(&mut self, output: &Path, scratch: &Path) -> Result<(), PatchError> {
        self.check_cancel()?;
        let mut source = ZipSource::open(&self.params.input)?;
        let exclusions = self.registry.exclusion_set();

        let entry_count = source.len();
        let max_files = entry_count as u64 + EXTRA_ENTRIES;
        let mut max_bytes = 0u64;
        let mut input_names = BTreeSet::new();
        for index in 0..entry_count {
            let meta = source.meta(index)?;
            max_bytes += meta.size;
            input_names.insert(meta.name);
        }
        let orig_name = orig_rename_target(&input_names);

        let mut sink = ZipSink::create(output)?;
        let mut current_bytes = 0u64;
        let mut current_files = 0u64;

        // Pass 1: streaming copy with inline boot-image patching.
        for index in 0..entry_count {
            self.check_cancel()?;
            let meta = source.meta(index)?;
            self.progress.on_entry(&meta.name);
            current_files += 1;
            self.progress.on_files(current_files, max_files);

            if exclusions.contains(&meta.name) {
                debug!(entry = %meta.name, "deferring entry to pass 2");
                source.extract_to(index, &scratch.join(&meta.name))?;
                current_bytes += meta.size;
            } else if is_boot_candidate(&meta) {
                let data = source.read(index)?;
                let patched = self.patch_candidate(&meta.name, data)?;
                current_bytes += patched.len() as u64;
                sink.write_entry(&meta.name, &patched, CompressionMethod::Deflated)?;
            } else if meta.name == UPDATE_BINARY {
                debug!(preserved_as = %orig_name, "setting aside stock update-binary");
                let entry = source.raw_entry(index)?;
                sink.copy_raw_renamed(entry, &orig_name)?;
                current_bytes += meta.size;
            } else {
                let entry = source.raw_entry(index)?;
                sink.copy_raw(entry)?;
                current_bytes += meta.size;
            }
            self.progress.on_bytes(current_bytes, max_bytes);
        }

        // Replaced entries changed size; settle the total.
        max_bytes = current_bytes;
        self.progress.on_bytes(current_bytes, max_bytes);

        // Pass 2: transforms edit the extracted files, then the files
        // are appended.
        for (key, transform) in self.registry.all() {
            self.check_cancel()?;
            transform
                .patch_files(scratch)
                .map_err(|source| PatchError::RamdiskTransform {
                    key: key.to_string(),
                    source,
                })?;
        }
        self.check_cancel()?;

        for name in &exclusions {
            let path = scratch.join(name);
            if !path.exists() {
                warn!(entry = %name, "excluded entry was never extracted; skipping");
                continue;
            }
            self.progress.on_entry(name);
            let data = read_file(&path)?;
            let out_name = if name == UPDATE_BINARY {
                orig_name.as_str()
            } else {
                name.as_str()
            };
            sink.write_entry(out_name, &data, CompressionMethod::Deflated)?;
        }

        // Finalization: the three synthetic entries.
        self.check_cancel()?;
        let installer = self
            .params
            .data_dir
            .join("binaries/android")
            .join(&self.params.device.architecture)
            .join("mbtool_recovery");
        self.progress.on_entry(UPDATE_BINARY);
        sink.write_entry(
            UPDATE_BINARY,
            &read_file(&installer)?,
            CompressionMethod::Deflated,
        )?;
        current_files += 1;
        self.progress.on_files(current_files, max_files);

        self.check_cancel()?;
        let wrapper = self.params.data_dir.join("scripts/bb-wrapper.sh");
        self.progress.on_entry(BB_WRAPPER_ENTRY);
        sink.write_entry(
            BB_WRAPPER_ENTRY,
            &read_file(&wrapper)?,
            CompressionMethod::Deflated,
        )?;
        current_files += 1;
        self.progress.on_files(current_files, max_files);

        self.check_cancel()?;
        self.progress.on_entry(INFO_PROP_ENTRY);
        let prop = generate_info_prop(&self.params);
        sink.write_entry(INFO_PROP_ENTRY, prop.as_bytes(), CompressionMethod::Deflated)?;
        current_files += 1;
        self.progress.on_files(current_files, max_files);

        sink.finish()
    }

    /// Patches one in-memory boot-image candidate.
    ///
    /// `.img`/`.lok` entries that are not recognizable boot images, and
    /// `.gz` entries that do not parse as a ramdisk, pass through
    /// unchanged.
    fn patch_candidate(&self, name: &str, data: Vec<u8>) -> Result<Vec<u8>, PatchError> {
        self.check_cancel()?;
        let result = if name.ends_with(".gz") {
            match boot::patch_ramdisk_bytes(&data, &self.params.device, &self.registry) {
                Ok(patched) => patched,
                Err(error) => {
                    debug!(entry = %name, %error, "gz entry did not parse as a ramdisk; passing through");
                    data
                }
            }
        } else if BootImage::is_valid(&data) {
            debug!(entry = %name, "patching boot image in place");
            boot::patch_boot_image(&data, name, &self.params.device, &self.registry)?
        } else {
            debug!(entry = %name, "entry has a boot image suffix but no recognizable format; passing through");
            data
        };
        self.check_cancel()?;
        Ok(result)
    }
}

/// Picks the name the stock installer is preserved under: `.orig`, with
/// the suffix chained past any name the input already uses. Re-patching
/// an already-patched archive therefore accumulates `.orig.orig` instead
/// of colliding with the previous run's entry.
fn orig_rename_target(input_names: &BTreeSet<String>) -> String {
    let mut name = format!("{UPDATE_BINARY}.orig");
    while input_names.contains(&name) {
        name.push_str(".orig");
    }
    name
}

/// Renders `multiboot/info.prop`: the installer metadata keys followed
/// by a commented table of every known device.
fn generate_info_prop(params: &PatchParams) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "mbtool.installer.version={}", env!("CARGO_PKG_VERSION"));
    let _ = writeln!(out, "mbtool.installer.device={}", params.device.id);
    let _ = writeln!(out, "mbtool.installer.ignore-codename=false");
    let _ = writeln!(out, "mbtool.installer.install-location={}", params.rom_id);

    if params.device_catalog.is_empty() {
        return out;
    }

    let rows: Vec<(String, String, String)> = params
        .device_catalog
        .iter()
        .map(|d| (d.id.clone(), d.codenames.join(", "), d.name.clone()))
        .collect();
    let id_width = rows.iter().map(|r| r.0.len()).max().unwrap_or(0).max(2);
    let codename_width = rows.iter().map(|r| r.1.len()).max().unwrap_or(0).max(9);

    out.push_str("\n# Known devices:\n");
    let _ = writeln!(
        out,
        "#   {:id_width$}  {:codename_width$}  Name",
        "ID", "Codenames"
    );
    for (id, codenames, name) in &rows {
        let _ = writeln!(out, "#   {id:id_width$}  {codenames:codename_width$}  {name}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_prop_contains_installer_keys() {
        let params = PatchParams {
            input: PathBuf::from("rom.zip"),
            device: Device::new("hammerhead", "Google Nexus 5"),
            rom_id: "dual".to_string(),
            data_dir: PathBuf::new(),
            temp_dir: PathBuf::new(),
            device_catalog: vec![
                Device::new("hammerhead", "Google Nexus 5"),
                Device {
                    id: "mako".to_string(),
                    codenames: vec!["mako".to_string(), "occam".to_string()],
                    name: "LG Nexus 4".to_string(),
                    architecture: "armeabi-v7a".to_string(),
                },
            ],
        };
        let prop = generate_info_prop(&params);
        assert!(prop.contains("mbtool.installer.version="));
        assert!(prop.contains("mbtool.installer.device=hammerhead\n"));
        assert!(prop.contains("mbtool.installer.ignore-codename=false\n"));
        assert!(prop.contains("mbtool.installer.install-location=dual\n"));
        assert!(prop.contains("# Known devices:"));
        assert!(prop.contains("mako, occam"));
        assert!(prop.contains("LG Nexus 4"));
    }

    #[test]
    fn output_path_appends_rom_id() {
        let patcher = ZipPatcher::new(
            PatchParams {
                input: PathBuf::from("/data/roms/lineage-18.1.zip"),
                device: Device::new("mako", "LG Nexus 4"),
                rom_id: "data-slot-test".to_string(),
                data_dir: PathBuf::new(),
                temp_dir: PathBuf::new(),
                device_catalog: Vec::new(),
            },
            TransformRegistry::new(),
        );
        assert_eq!(
            patcher.output_path(),
            PathBuf::from("/data/roms/lineage-18.1_data-slot-test.zip")
        );
    }

    #[test]
    fn rename_target_chains_past_existing_orig_entries() {
        let mut names = BTreeSet::new();
        names.insert(UPDATE_BINARY.to_string());
        assert_eq!(orig_rename_target(&names), UPDATE_BINARY_ORIG);

        names.insert(UPDATE_BINARY_ORIG.to_string());
        assert_eq!(
            orig_rename_target(&names),
            format!("{UPDATE_BINARY_ORIG}.orig")
        );

        names.insert(format!("{UPDATE_BINARY_ORIG}.orig"));
        assert_eq!(
            orig_rename_target(&names),
            format!("{UPDATE_BINARY_ORIG}.orig.orig")
        );
    }

    #[test]
    fn boot_candidate_classification() {
        let meta = |name: &str, size: u64| EntryMeta {
            name: name.to_string(),
            size,
        };
        assert!(is_boot_candidate(&meta("boot.img", 1024)));
        assert!(is_boot_candidate(&meta("recovery.lok", 1024)));
        assert!(is_boot_candidate(&meta("ramdisk.gz", 1024)));
        assert!(!is_boot_candidate(&meta("system.img", MAX_IMAGE_SIZE + 1)));
        assert!(!is_boot_candidate(&meta("system/build.prop", 1024)));
    }
}

//! End-to-end tests of the two-pass ZIP rewrite.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flashpatch_bootimg::BootImage;
use flashpatch_core::Device;
use flashpatch_cpio::CpioArchive;
use flashpatch_patcher::{
    PatchError, PatchParams, ProgressHooks, RamdiskTransform, TransformRegistry, TransformResult,
    ZipPatcher, BB_WRAPPER_ENTRY, INFO_PROP_ENTRY, UPDATE_BINARY, UPDATE_BINARY_ORIG,
};
use zip::write::FileOptions;

const UPDATER_SCRIPT: &str = "META-INF/com/google/android/updater-script";

/// Test transform: flags the ramdisk, claims the updater-script, and
/// prepends a marker line to it in pass 2.
struct TestTransform;

impl RamdiskTransform for TestTransform {
    fn patch_ramdisk(&self, _device: &Device, cpio: &mut CpioArchive) -> TransformResult {
        cpio.set_contents("multiboot-flag", b"1".into());
        Ok(())
    }

    fn existing_files(&self) -> Vec<String> {
        vec![UPDATER_SCRIPT.to_string()]
    }

    fn patch_files(&self, temp_dir: &Path) -> TransformResult {
        let path = temp_dir.join(UPDATER_SCRIPT);
        if !path.exists() {
            return Ok(());
        }
        let original = fs::read(&path)?;
        let mut patched = b"# patched for multiboot\n".to_vec();
        patched.extend_from_slice(&original);
        fs::write(&path, patched)?;
        Ok(())
    }
}

fn registry() -> TransformRegistry {
    let mut registry = TransformRegistry::new();
    registry.register("default", Box::new(TestTransform));
    registry
}

fn make_data_dir(root: &Path) -> PathBuf {
    let data = root.join("data");
    let binaries = data.join("binaries/android/armeabi-v7a");
    fs::create_dir_all(&binaries).expect("create data dir");
    fs::write(binaries.join("mbtool_recovery"), b"MBTOOL_RECOVERY_BINARY").expect("write binary");
    let scripts = data.join("scripts");
    fs::create_dir_all(&scripts).expect("create scripts dir");
    fs::write(scripts.join("bb-wrapper.sh"), b"#!/sbin/sh\nexec busybox \"$@\"\n")
        .expect("write script");
    data
}

fn sample_ramdisk() -> Vec<u8> {
    let mut cpio = CpioArchive::new();
    cpio.set_contents("init.rc", b"on boot\n".into());
    cpio.serialize().into_vec()
}

fn sample_boot_image() -> Vec<u8> {
    BootImage {
        kernel: b"kernel-code".into(),
        ramdisk: sample_ramdisk().into(),
        ..BootImage::default()
    }
    .encode()
    .expect("encode boot image")
}

fn build_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = fs::File::create(path).expect("create zip");
    let mut writer = zip::ZipWriter::new(file);
    for (name, data) in entries {
        writer
            .start_file(*name, FileOptions::default())
            .expect("start entry");
        writer.write_all(data).expect("write entry");
    }
    writer.finish().expect("finish zip");
}

/// Reads all entries of a ZIP in archive order.
fn read_zip(path: &Path) -> Vec<(String, Vec<u8>)> {
    let file = fs::File::open(path).expect("open zip");
    let mut archive = zip::ZipArchive::new(file).expect("parse zip");
    let mut entries = Vec::new();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).expect("entry");
        let mut data = Vec::new();
        entry.read_to_end(&mut data).expect("read entry");
        entries.push((entry.name().to_string(), data));
    }
    entries
}

fn find<'a>(entries: &'a [(String, Vec<u8>)], name: &str) -> &'a [u8] {
    &entries
        .iter()
        .find(|(n, _)| n == name)
        .unwrap_or_else(|| panic!("missing entry {name:?}"))
        .1
}

fn make_params(root: &Path, input: PathBuf) -> PatchParams {
    PatchParams {
        input,
        device: Device::new("hammerhead", "Google Nexus 5"),
        rom_id: "dual".to_string(),
        data_dir: make_data_dir(root),
        temp_dir: root.join("tmp"),
        device_catalog: vec![Device::new("hammerhead", "Google Nexus 5")],
    }
}

#[test]
fn full_pipeline_rewrites_archive() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("rom.zip");
    let boot = sample_boot_image();
    build_zip(
        &input,
        &[
            ("system/app.txt", b"A"),
            (UPDATER_SCRIPT, b"ui_print(\"flashing\");\n"),
            (UPDATE_BINARY, b"STOCK_INSTALLER"),
            ("boot.img", &boot),
            ("junk.gz", b"definitely not a ramdisk"),
            ("other/file.bin", b"B"),
        ],
    );

    let mut patcher = ZipPatcher::new(make_params(dir.path(), input), registry());
    let output = patcher.patch_file().expect("patch succeeds");
    assert_eq!(output, dir.path().join("rom_dual.zip"));

    let entries = read_zip(&output);
    // 5 pass-1 entries (updater-script deferred) + 1 pass-2 + 3 final.
    assert_eq!(entries.len(), 9);

    assert_eq!(find(&entries, "system/app.txt"), b"A");
    assert_eq!(find(&entries, "other/file.bin"), b"B");
    assert_eq!(find(&entries, UPDATE_BINARY_ORIG), b"STOCK_INSTALLER");
    assert_eq!(find(&entries, UPDATE_BINARY), b"MBTOOL_RECOVERY_BINARY");
    assert_eq!(
        find(&entries, BB_WRAPPER_ENTRY),
        b"#!/sbin/sh\nexec busybox \"$@\"\n"
    );
    assert_eq!(find(&entries, "junk.gz"), b"definitely not a ramdisk");

    let script = find(&entries, UPDATER_SCRIPT);
    assert!(script.starts_with(b"# patched for multiboot\n"));
    assert!(script.ends_with(b"ui_print(\"flashing\");\n"));

    let prop = String::from_utf8(find(&entries, INFO_PROP_ENTRY).to_vec()).expect("utf8");
    assert!(prop.contains("mbtool.installer.device=hammerhead\n"));
    assert!(prop.contains("mbtool.installer.install-location=dual\n"));
    assert!(prop.contains("mbtool.installer.ignore-codename=false\n"));

    let image = BootImage::decode(find(&entries, "boot.img")).expect("patched boot image");
    assert_eq!(image.kernel.as_slice(), b"kernel-code");
    let cpio = CpioArchive::load(&image.ramdisk).expect("ramdisk cpio");
    assert!(cpio.exists("multiboot-flag"));
    assert!(cpio.exists("init.rc"));
}

#[test]
fn excluded_entries_are_appended_after_pass_one() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("rom.zip");
    build_zip(
        &input,
        &[
            ("a.txt", b"A"),
            (UPDATER_SCRIPT, b"script"),
            ("b.txt", b"B"),
        ],
    );

    let mut patcher = ZipPatcher::new(make_params(dir.path(), input), registry());
    let output = patcher.patch_file().expect("patch succeeds");

    let names: Vec<String> = read_zip(&output).into_iter().map(|(n, _)| n).collect();
    assert_eq!(
        names,
        [
            "a.txt",
            "b.txt",
            UPDATER_SCRIPT,
            UPDATE_BINARY,
            BB_WRAPPER_ENTRY,
            INFO_PROP_ENTRY,
        ]
    );
}

#[test]
fn repatching_accumulates_the_update_binary_chain() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("rom.zip");
    let boot = sample_boot_image();
    build_zip(
        &input,
        &[
            ("system/app.txt", b"A"),
            (UPDATE_BINARY, b"STOCK_INSTALLER"),
            ("boot.img", &boot),
        ],
    );

    let mut patcher = ZipPatcher::new(make_params(dir.path(), input), registry());
    let first = patcher.patch_file().expect("first patch succeeds");

    let mut patcher = ZipPatcher::new(make_params(dir.path(), first.clone()), registry());
    let second = patcher.patch_file().expect("second patch succeeds");
    assert_eq!(second, dir.path().join("rom_dual_dual.zip"));

    let first_entries = read_zip(&first);
    let entries = read_zip(&second);

    // The chain: the stock installer keeps `.orig`, the first run's
    // installer moves to `.orig.orig`, and the active entry is the
    // freshly added installer.
    assert_eq!(find(&entries, UPDATE_BINARY_ORIG), b"STOCK_INSTALLER");
    assert_eq!(
        find(&entries, &format!("{UPDATE_BINARY_ORIG}.orig")),
        b"MBTOOL_RECOVERY_BINARY"
    );
    assert_eq!(find(&entries, UPDATE_BINARY), b"MBTOOL_RECOVERY_BINARY");
    for name in [UPDATE_BINARY, UPDATE_BINARY_ORIG] {
        assert_eq!(
            entries.iter().filter(|(n, _)| n == name).count(),
            1,
            "exactly one entry named {name:?}"
        );
    }

    // Everything outside the chain survives the second pass unchanged.
    assert_eq!(find(&entries, "system/app.txt"), b"A");
    assert_eq!(find(&entries, "boot.img"), find(&first_entries, "boot.img"));
}

#[test]
fn gz_entry_with_ramdisk_content_is_patched() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("rom.zip");

    let mut encoder =
        flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(&sample_ramdisk()).expect("gzip write");
    let gzipped = encoder.finish().expect("gzip finish");
    build_zip(&input, &[("ramdisk-recovery.gz", &gzipped)]);

    let mut patcher = ZipPatcher::new(make_params(dir.path(), input), registry());
    let output = patcher.patch_file().expect("patch succeeds");

    let entries = read_zip(&output);
    let patched = find(&entries, "ramdisk-recovery.gz");
    let mut decoder = flate2::read::GzDecoder::new(patched);
    let mut cpio_bytes = Vec::new();
    decoder.read_to_end(&mut cpio_bytes).expect("gunzip");
    let cpio = CpioArchive::load(&cpio_bytes).expect("cpio");
    assert!(cpio.exists("multiboot-flag"));
}

#[test]
fn cancellation_stops_at_the_next_entry_boundary() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("rom.zip");
    let entries: Vec<(String, Vec<u8>)> = (0..50)
        .map(|i| (format!("file-{i:03}.txt"), vec![b'x'; 64]))
        .collect();
    let borrowed: Vec<(&str, &[u8])> = entries
        .iter()
        .map(|(n, d)| (n.as_str(), d.as_slice()))
        .collect();
    build_zip(&input, &borrowed);

    let mut patcher = ZipPatcher::new(make_params(dir.path(), input), registry());
    let cancel = patcher.cancel_flag();
    patcher.set_progress(ProgressHooks {
        files: Some(Box::new(move |_, _| cancel.cancel())),
        ..ProgressHooks::default()
    });

    let err = patcher.patch_file().expect_err("must cancel");
    assert!(matches!(err, PatchError::Cancelled));
    // The scratch directory is cleaned on the cancellation path too.
    assert!(!dir.path().join("tmp/flashpatch").exists());
}

#[test]
fn non_zip_input_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("rom.zip");
    fs::write(&input, b"this is not a zip archive").expect("write input");

    let mut patcher = ZipPatcher::new(make_params(dir.path(), input), registry());
    let err = patcher.patch_file().expect_err("must fail");
    assert!(matches!(err, PatchError::OnlyZipSupported { .. }));
}

#[test]
fn failing_pass_two_transform_is_terminal() {
    struct FailingTransform;

    impl RamdiskTransform for FailingTransform {
        fn patch_ramdisk(&self, _device: &Device, _cpio: &mut CpioArchive) -> TransformResult {
            Ok(())
        }

        fn patch_files(&self, _temp_dir: &Path) -> TransformResult {
            Err("updater-script is write-protected".into())
        }
    }

    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("rom.zip");
    build_zip(&input, &[("a.txt", b"A")]);

    let mut registry = TransformRegistry::new();
    registry.register("default", Box::new(FailingTransform));
    let mut patcher = ZipPatcher::new(make_params(dir.path(), input), registry);

    let err = patcher.patch_file().expect_err("must fail");
    assert!(matches!(err, PatchError::RamdiskTransform { .. }));
}

#[test]
fn missing_excluded_file_is_skipped_with_a_warning() {
    // The transform claims updater-script but the input has none.
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("rom.zip");
    build_zip(&input, &[("a.txt", b"A")]);

    let mut patcher = ZipPatcher::new(make_params(dir.path(), input), registry());
    let output = patcher.patch_file().expect("patch succeeds");

    let names: Vec<String> = read_zip(&output).into_iter().map(|(n, _)| n).collect();
    assert!(!names.iter().any(|n| n == UPDATER_SCRIPT));
    assert_eq!(names.len(), 4); // a.txt + three finalization entries
}

#[test]
fn device_specific_transform_wins_over_default() {
    struct DeviceTransform;

    impl RamdiskTransform for DeviceTransform {
        fn patch_ramdisk(&self, _device: &Device, cpio: &mut CpioArchive) -> TransformResult {
            cpio.set_contents("device-specific", b"1".into());
            Ok(())
        }
    }

    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("rom.zip");
    let boot = sample_boot_image();
    build_zip(&input, &[("boot.img", &boot)]);

    let mut registry = registry();
    registry.register("hammerhead/default", Box::new(DeviceTransform));
    let mut patcher = ZipPatcher::new(make_params(dir.path(), input), registry);
    let output = patcher.patch_file().expect("patch succeeds");

    let entries = read_zip(&output);
    let image = BootImage::decode(find(&entries, "boot.img")).expect("boot image");
    let cpio = CpioArchive::load(&image.ramdisk).expect("cpio");
    assert!(cpio.exists("device-specific"));
    assert!(!cpio.exists("multiboot-flag"));
}

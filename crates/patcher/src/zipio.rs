//! Thin wrapper over the `zip` crate, exposing exactly what the
//! patcher needs: metadata enumeration, whole-entry reads, extraction,
//! raw (compressed-stream) copies, and buffer writes.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

use zip::read::ZipFile;
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::PatchError;

/// Per-entry metadata from the central directory.
#[derive(Debug, Clone)]
pub(crate) struct EntryMeta {
    pub name: String,
    /// Uncompressed size.
    pub size: u64,
}

/// Read side of a ZIP rewrite.
pub(crate) struct ZipSource {
    archive: ZipArchive<File>,
}

impl ZipSource {
    /// Opens a source archive. A file that is not a ZIP maps to
    /// [`PatchError::OnlyZipSupported`].
    pub(crate) fn open(path: &Path) -> Result<Self, PatchError> {
        let file = File::open(path).map_err(|source| PatchError::FileOpen {
            path: path.to_path_buf(),
            source,
        })?;
        match ZipArchive::new(file) {
            Ok(archive) => Ok(Self { archive }),
            Err(ZipError::InvalidArchive(_) | ZipError::UnsupportedArchive(_)) => {
                Err(PatchError::OnlyZipSupported {
                    path: path.to_path_buf(),
                })
            }
            Err(error) => Err(PatchError::ArchiveReadOpen(error)),
        }
    }

    /// Number of entries.
    pub(crate) fn len(&self) -> usize {
        self.archive.len()
    }

    /// Entry metadata without touching the compressed stream.
    pub(crate) fn meta(&mut self, index: usize) -> Result<EntryMeta, PatchError> {
        let entry = self
            .archive
            .by_index_raw(index)
            .map_err(PatchError::ArchiveReadHeader)?;
        Ok(EntryMeta {
            name: entry.name().to_string(),
            size: entry.size(),
        })
    }

    /// Reads an entry fully into memory, decompressing.
    pub(crate) fn read(&mut self, index: usize) -> Result<Vec<u8>, PatchError> {
        let mut entry = self
            .archive
            .by_index(index)
            .map_err(PatchError::ArchiveReadHeader)?;
        let mut data = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
        let name = entry.name().to_string();
        entry
            .read_to_end(&mut data)
            .map_err(|source| PatchError::ArchiveReadData { name, source })?;
        Ok(data)
    }

    /// Extracts an entry to `dest`, creating parent directories.
    ///
    /// Refuses paths that would escape the destination tree.
    pub(crate) fn extract_to(&mut self, index: usize, dest: &Path) -> Result<(), PatchError> {
        if dest.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(PatchError::Internal(format!(
                "refusing to extract outside the scratch directory: {}",
                dest.display()
            )));
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|source| PatchError::FileWrite {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let mut entry = self
            .archive
            .by_index(index)
            .map_err(PatchError::ArchiveReadHeader)?;
        let name = entry.name().to_string();
        let mut file = File::create(dest).map_err(|source| PatchError::FileWrite {
            path: dest.to_path_buf(),
            source,
        })?;
        io::copy(&mut entry, &mut file).map_err(|source| PatchError::ArchiveReadData {
            name,
            source,
        })?;
        Ok(())
    }

    /// Borrows an entry with its compressed stream intact, for raw
    /// copying into a sink.
    pub(crate) fn raw_entry(&mut self, index: usize) -> Result<ZipFile<'_>, PatchError> {
        self.archive
            .by_index_raw(index)
            .map_err(PatchError::ArchiveReadHeader)
    }
}

/// Write side of a ZIP rewrite.
pub(crate) struct ZipSink {
    writer: ZipWriter<File>,
    path: PathBuf,
}

impl ZipSink {
    /// Creates the output archive, truncating any previous file.
    pub(crate) fn create(path: &Path) -> Result<Self, PatchError> {
        let file = File::create(path).map_err(|source| PatchError::ArchiveWriteOpen {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            writer: ZipWriter::new(file),
            path: path.to_path_buf(),
        })
    }

    /// Adds an entry from a byte buffer with the given compression.
    pub(crate) fn write_entry(
        &mut self,
        name: &str,
        data: &[u8],
        method: CompressionMethod,
    ) -> Result<(), PatchError> {
        let options = FileOptions::default().compression_method(method);
        self.writer
            .start_file(name, options)
            .map_err(|source| PatchError::ArchiveWriteData {
                name: name.to_string(),
                source,
            })?;
        self.writer
            .write_all(data)
            .map_err(|source| PatchError::ArchiveWriteData {
                name: name.to_string(),
                source: ZipError::Io(source),
            })
    }

    /// Copies an entry's compressed stream byte for byte.
    pub(crate) fn copy_raw(&mut self, entry: ZipFile<'_>) -> Result<(), PatchError> {
        let name = entry.name().to_string();
        self.writer
            .raw_copy_file(entry)
            .map_err(|source| PatchError::ArchiveWriteData { name, source })
    }

    /// As [`copy_raw`](Self::copy_raw), storing the entry under a new
    /// name.
    pub(crate) fn copy_raw_renamed(
        &mut self,
        entry: ZipFile<'_>,
        name: &str,
    ) -> Result<(), PatchError> {
        self.writer
            .raw_copy_file_rename(entry, name)
            .map_err(|source| PatchError::ArchiveWriteData {
                name: name.to_string(),
                source,
            })
    }

    /// Writes the central directory and closes the file.
    pub(crate) fn finish(mut self) -> Result<(), PatchError> {
        self.writer
            .finish()
            .map_err(|source| PatchError::ArchiveWriteData {
                name: self.path.display().to_string(),
                source,
            })?;
        Ok(())
    }
}

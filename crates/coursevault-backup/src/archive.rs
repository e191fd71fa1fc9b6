//! Archive creation and reading for backups.
//!
//! A backup archive is a gzip-compressed tar holding the manifest as its
//! first entry followed by the XML files the backup steps produced.

use crate::error::{BackupError, Result};
use crate::manifest::{sha256_hex, BackupManifest, MANIFEST_FILENAME};
use camino::{Utf8Path, Utf8PathBuf};
use coursevault_core::config::DEFAULT_COMPRESSION_LEVEL;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use tar::{Archive, Builder as TarBuilder, Header};
use tracing::{debug, info};

/// Result of writing an archive.
#[derive(Debug, Clone)]
pub struct ArchiveSummary {
    /// Path to the created archive
    pub archive_path: Utf8PathBuf,

    /// Size of the archive in bytes
    pub size_bytes: u64,

    /// Number of files included, manifest excluded
    pub file_count: usize,
}

/// Writes backup archives.
#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    compression_level: u32,
}

impl Default for ArchiveBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION_LEVEL)
    }
}

impl ArchiveBuilder {
    /// Creates a builder; the level is clamped to 1-9.
    pub fn new(compression_level: u32) -> Self {
        Self {
            compression_level: compression_level.clamp(1, 9),
        }
    }

    pub fn compression_level(&self) -> u32 {
        self.compression_level
    }

    /// Write `files` and their manifest to `output`.
    ///
    /// Every file must have a checksum in the manifest. A partially
    /// written archive is removed on failure.
    pub fn write(
        &self,
        files: &BTreeMap<String, Vec<u8>>,
        manifest: &BackupManifest,
        output: &Utf8Path,
    ) -> Result<ArchiveSummary> {
        for path in files.keys() {
            if !manifest.files.contains_key(path) {
                return Err(BackupError::coding(format!(
                    "file '{}' has no checksum in the manifest",
                    path
                )));
            }
        }

        if let Some(parent) = output.parent() {
            if !parent.as_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        info!("Writing backup archive {}", output);
        if let Err(e) = self.write_tar(files, manifest, output) {
            let _ = fs::remove_file(output);
            return Err(e);
        }

        let size_bytes = fs::metadata(output)?.len();
        Ok(ArchiveSummary {
            archive_path: output.to_path_buf(),
            size_bytes,
            file_count: files.len(),
        })
    }

    fn write_tar(
        &self,
        files: &BTreeMap<String, Vec<u8>>,
        manifest: &BackupManifest,
        output: &Utf8Path,
    ) -> Result<()> {
        let file = File::create(output)?;
        let encoder = GzEncoder::new(file, Compression::new(self.compression_level));
        let mut tar = TarBuilder::new(encoder);
        let mtime = manifest.created_at.timestamp().max(0) as u64;

        let manifest_json = manifest.to_json()?;
        append_entry(&mut tar, MANIFEST_FILENAME, manifest_json.as_bytes(), mtime)?;
        for (path, bytes) in files {
            debug!("Adding {} ({} bytes)", path, bytes.len());
            append_entry(&mut tar, path, bytes, mtime)?;
        }

        let mut file = tar.into_inner()?.finish()?;
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }
}

fn append_entry<W: Write>(
    tar: &mut TarBuilder<W>,
    path: &str,
    bytes: &[u8],
    mtime: u64,
) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(mtime);
    tar.append_data(&mut header, path, bytes)?;
    Ok(())
}

/// A verified backup archive held in memory.
#[derive(Debug, Clone)]
pub struct ArchiveReader {
    manifest: BackupManifest,
    files: BTreeMap<String, Vec<u8>>,
}

impl ArchiveReader {
    /// Read and verify an archive file.
    pub fn open(path: &Utf8Path) -> Result<Self> {
        if !path.exists() {
            return Err(BackupError::archive(format!("archive not found: {}", path)));
        }

        let file = File::open(path)?;
        let mut archive = Archive::new(GzDecoder::new(file));
        let mut manifest = None;
        let mut files = BTreeMap::new();

        for entry in archive.entries()? {
            let mut entry = entry?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let name = entry
                .path()?
                .to_str()
                .ok_or_else(|| BackupError::archive("archive entry name is not UTF-8"))?
                .to_string();
            check_entry_name(&name)?;

            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes)?;

            if name == MANIFEST_FILENAME {
                let json = String::from_utf8(bytes)
                    .map_err(|_| BackupError::archive("manifest is not UTF-8"))?;
                manifest = Some(BackupManifest::from_json(&json)?);
            } else if files.insert(name.clone(), bytes).is_some() {
                return Err(BackupError::archive(format!(
                    "duplicate archive entry '{}'",
                    name
                )));
            }
        }

        let manifest = manifest.ok_or_else(|| {
            BackupError::archive(format!("{} is missing from the archive", MANIFEST_FILENAME))
        })?;
        Self::from_parts(manifest, files)
    }

    /// Verify already loaded contents.
    pub fn from_parts(manifest: BackupManifest, files: BTreeMap<String, Vec<u8>>) -> Result<Self> {
        manifest.validate()?;

        for (path, info) in &manifest.files {
            let bytes = files.get(path).ok_or_else(|| {
                BackupError::archive(format!("{} is listed in the manifest but missing", path))
            })?;
            let actual = sha256_hex(bytes);
            if actual != info.value {
                return Err(BackupError::ChecksumMismatch {
                    path: path.clone(),
                    expected: info.value.clone(),
                    actual,
                });
            }
        }
        if let Some(extra) = files.keys().find(|p| !manifest.files.contains_key(*p)) {
            return Err(BackupError::archive(format!(
                "{} is not listed in the manifest",
                extra
            )));
        }

        Ok(Self { manifest, files })
    }

    pub fn manifest(&self) -> &BackupManifest {
        &self.manifest
    }

    pub fn file(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn into_parts(self) -> (BackupManifest, BTreeMap<String, Vec<u8>>) {
        (self.manifest, self.files)
    }
}

fn check_entry_name(name: &str) -> Result<()> {
    let unsafe_name = name.starts_with('/') || name.split('/').any(|part| part == "..");
    if unsafe_name {
        return Err(BackupError::archive(format!(
            "archive entry '{}' escapes the archive root",
            name
        )));
    }
    Ok(())
}

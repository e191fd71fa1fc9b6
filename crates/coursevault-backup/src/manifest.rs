//! Backup manifest format and metadata.
//!
//! The manifest is stored as the first file in every backup archive and
//! records what was backed up, with which settings, and a checksum for
//! every other file in the archive.

use crate::error::{BackupError, Result};
use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Version of the backup manifest format.
pub const MANIFEST_VERSION: &str = "1.0.0";

/// Name of the manifest file in the backup archive.
pub const MANIFEST_FILENAME: &str = ".backup-manifest.json";

/// Hex-encoded SHA256 of `bytes`
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Complete backup manifest stored in archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupManifest {
    /// Manifest format version
    pub version: String,

    /// When the backup was created
    pub created_at: DateTime<Utc>,

    /// What created this backup (e.g., "coursevault v0.4.0")
    pub created_by: String,

    /// Id of the backup job
    pub job_id: String,

    /// Course the backup was taken from
    pub course_id: i64,

    /// Final value of every backup setting
    pub settings: BTreeMap<String, String>,

    /// Executed steps, in execution order
    pub steps: Vec<StepRecord>,

    /// Archive path -> checksum
    pub files: BTreeMap<String, ChecksumInfo>,

    /// Backup statistics
    pub statistics: BackupStatistics,
}

/// A step that wrote a file to the archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub path: String,
}

/// Checksum information for integrity verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumInfo {
    /// Hash algorithm (sha256)
    pub algorithm: String,

    /// Hex-encoded checksum value
    pub value: String,

    /// Size in bytes
    pub size: u64,
}

impl ChecksumInfo {
    pub fn of(bytes: &[u8]) -> Self {
        Self {
            algorithm: "sha256".to_string(),
            value: sha256_hex(bytes),
            size: bytes.len() as u64,
        }
    }
}

/// Statistics about the backup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupStatistics {
    /// Number of files in the archive, manifest excluded
    pub files_included: usize,

    /// Total uncompressed size in bytes
    pub total_size_bytes: u64,

    /// Annotated item counts (itemtype -> count)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotated: BTreeMap<String, usize>,

    /// Duration of backup operation in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
}

impl BackupManifest {
    /// Creates a manifest for the given files.
    pub fn new(
        job_id: impl Into<String>,
        course_id: i64,
        settings: BTreeMap<String, String>,
        files: &BTreeMap<String, Vec<u8>>,
    ) -> Self {
        let checksums: BTreeMap<String, ChecksumInfo> = files
            .iter()
            .map(|(path, bytes)| (path.clone(), ChecksumInfo::of(bytes)))
            .collect();
        let statistics = BackupStatistics {
            files_included: files.len(),
            total_size_bytes: files.values().map(|b| b.len() as u64).sum(),
            ..Default::default()
        };

        Self {
            version: MANIFEST_VERSION.to_string(),
            created_at: Utc::now(),
            created_by: format!("coursevault v{}", env!("CARGO_PKG_VERSION")),
            job_id: job_id.into(),
            course_id,
            settings,
            steps: Vec::new(),
            files: checksums,
            statistics,
        }
    }

    /// Serializes the manifest to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserializes a manifest from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| BackupError::archive(format!("invalid manifest: {}", e)))
    }

    /// Checks the format version and checksum algorithms.
    pub fn validate(&self) -> Result<()> {
        let compatibility = VersionCompatibility::check(&self.version)?;
        if !compatibility.compatible {
            return Err(BackupError::archive(compatibility.message()));
        }

        if let Some((path, info)) = self.files.iter().find(|(_, i)| i.algorithm != "sha256") {
            return Err(BackupError::archive(format!(
                "unsupported checksum algorithm '{}' for {}",
                info.algorithm, path
            )));
        }
        Ok(())
    }

    /// A boolean setting as recorded at backup time
    pub fn setting_enabled(&self, name: &str) -> Option<bool> {
        self.settings.get(name).map(|v| v == "1")
    }
}

/// Whether a manifest format version can be read by this build
#[derive(Debug, Clone)]
pub struct VersionCompatibility {
    pub manifest_version: Version,
    pub supported_version: Version,
    pub compatible: bool,
}

impl VersionCompatibility {
    pub fn check(manifest_version: &str) -> Result<Self> {
        let manifest = Version::parse(manifest_version).map_err(|e| {
            BackupError::archive(format!(
                "invalid manifest version '{}': {}",
                manifest_version, e
            ))
        })?;
        let supported = Version::parse(MANIFEST_VERSION)
            .map_err(|e| BackupError::coding(format!("bad MANIFEST_VERSION: {}", e)))?;

        let compatible = manifest.major == supported.major;
        Ok(Self {
            manifest_version: manifest,
            supported_version: supported,
            compatible,
        })
    }

    pub fn message(&self) -> String {
        if self.compatible {
            format!(
                "Manifest version {} is compatible with supported version {}",
                self.manifest_version, self.supported_version
            )
        } else {
            format!(
                "Manifest version {} is NOT compatible with supported version {}",
                self.manifest_version, self.supported_version
            )
        }
    }
}

/// Formats bytes as a human-readable string.
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

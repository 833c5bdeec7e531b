//! Read side of the archive: inspection, integrity checks and extraction.

use crate::executor::manifest::{ManifestRecord, MANIFEST_ENTRY};
use crate::{EngineError, Result};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use zip::result::ZipError;
use zip::ZipArchive;

/// Outcome of extracting the files subtree
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractSummary {
    pub restored: usize,
    pub errors: Vec<String>,
}

pub struct ArchiveReader {
    zip: ZipArchive<File>,
    path: PathBuf,
}

impl ArchiveReader {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(EngineError::ArchiveMissing(path.display().to_string()));
        }
        let file = File::open(path)?;
        let zip = ZipArchive::new(file)?;
        Ok(Self {
            zip,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entry names in archive order
    pub fn entry_names(&self) -> Vec<String> {
        (0..self.zip.len())
            .filter_map(|i| self.zip.name_for_index(i).map(str::to_string))
            .collect()
    }

    pub fn has_entry(&self, name: &str) -> bool {
        self.zip.index_for_name(name).is_some()
    }

    /// Number of file entries below `prefix`
    pub fn count_under(&self, prefix: &str) -> usize {
        self.entry_names()
            .iter()
            .filter(|name| name.starts_with(prefix) && !name.ends_with('/'))
            .count()
    }

    /// Whole entry as UTF-8, `None` when the entry does not exist
    pub fn read_to_string(&mut self, name: &str) -> Result<Option<String>> {
        let mut entry = match self.zip.by_name(name) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut content = String::new();
        entry.read_to_string(&mut content)?;
        Ok(Some(content))
    }

    pub fn read_manifest(&mut self) -> Result<Option<ManifestRecord>> {
        match self.read_to_string(MANIFEST_ENTRY)? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Check the archive against its own manifest: the manifest must be
    /// present and the files subtree must hold exactly `files_written`
    /// entries. Per-entry CRCs are verified later, while extracting.
    pub fn verify(&mut self) -> Result<ManifestRecord> {
        let manifest = self
            .read_manifest()?
            .ok_or_else(|| EngineError::Integrity(format!("{} has no {}", self.path.display(), MANIFEST_ENTRY)))?;
        let stats = manifest
            .stats
            .as_ref()
            .ok_or_else(|| EngineError::Integrity("manifest carries no completion stats".into()))?;

        let found = self.count_under(&manifest.files_prefix());
        if found != stats.files_written {
            return Err(EngineError::Integrity(format!(
                "manifest lists {} files but archive holds {}",
                stats.files_written, found
            )));
        }
        Ok(manifest)
    }

    /// Extract every entry below `prefix` into `destination`, recreating the
    /// relative directory structure. Entries that would escape the
    /// destination are refused; per-entry failures are collected.
    pub fn extract_under(&mut self, prefix: &str, destination: &Path) -> Result<ExtractSummary> {
        fs::create_dir_all(destination)?;
        let mut summary = ExtractSummary::default();

        for index in 0..self.zip.len() {
            let mut entry = self.zip.by_index(index)?;
            let name = entry.name().to_string();
            let Some(relative) = name.strip_prefix(prefix) else {
                continue;
            };
            if entry.is_dir() || relative.is_empty() {
                continue;
            }

            let Some(safe) = entry.enclosed_name() else {
                summary.errors.push(format!("{}: unsafe path refused", name));
                continue;
            };
            let Ok(relative) = safe.strip_prefix(prefix.trim_end_matches('/')) else {
                summary.errors.push(format!("{}: unexpected path layout", name));
                continue;
            };
            let target = destination.join(relative);

            match write_entry(&mut entry, &target) {
                Ok(()) => {
                    #[cfg(unix)]
                    {
                        use std::os::unix::fs::PermissionsExt;
                        if let Some(mode) = entry.unix_mode() {
                            if let Err(e) = fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o7777)) {
                                tracing::warn!(entry = %name, error = %e, "Failed to restore file permissions");
                            }
                        }
                    }
                    summary.restored += 1;
                }
                Err(e) => {
                    tracing::warn!(entry = %name, error = %e, "Failed to extract entry");
                    summary.errors.push(format!("{}: {}", name, e));
                }
            }
        }

        Ok(summary)
    }
}

fn write_entry<R: Read>(entry: &mut R, target: &Path) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = File::create(target)?;
    // The zip reader checks the CRC32 when the entry hits EOF
    io::copy(entry, &mut out)?;
    Ok(())
}
